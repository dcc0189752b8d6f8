//! Automation session lifecycle
//!
//! A [`DeviceSession`] is created once per run (or reused across cases
//! when the caller opts in) and owns the backend session exclusively:
//! exactly one automation session may be attached to a device at a
//! time. There is no process-global "current session"; the session
//! object is passed into every engine call that needs it.

use crate::backend::{AutomationBackend, Capabilities, HttpBackend};
use crate::model::Platform;

use super::device::BootState;
use super::error::EngineError;

/// An open automation session bound to a ready device
pub struct DeviceSession {
    pub serial: String,
    pub boot_state: BootState,
    pub capabilities: Capabilities,
    backend: Box<dyn AutomationBackend>,
}

impl DeviceSession {
    pub fn new(
        serial: impl Into<String>,
        capabilities: Capabilities,
        backend: Box<dyn AutomationBackend>,
    ) -> Self {
        Self {
            serial: serial.into(),
            boot_state: BootState::Ready,
            capabilities,
            backend,
        }
    }

    pub fn backend(&self) -> &dyn AutomationBackend {
        self.backend.as_ref()
    }
}

/// Opens and releases automation sessions against the backend server
pub struct AutomationSessionManager {
    server_url: String,
}

impl AutomationSessionManager {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }

    /// Create a session for a READY device
    pub async fn open(
        &self,
        platform: Platform,
        serial: &str,
    ) -> Result<DeviceSession, EngineError> {
        let capabilities = Capabilities::for_device(platform, serial);
        let backend = HttpBackend::open(&self.server_url, &capabilities)
            .await
            .map_err(|e| EngineError::SessionCreation {
                diagnostic: format!("{:#}", e),
            })?;

        log::info!(
            "automation session {} opened for {}",
            backend.session_id(),
            serial
        );

        Ok(DeviceSession::new(serial, capabilities, Box::new(backend)))
    }

    /// Release a session. Runs on every exit path; a close failure is
    /// reported but never masks the run outcome.
    pub async fn close(session: &DeviceSession) {
        if let Err(e) = session.backend().close().await {
            log::warn!(
                "failed to close automation session for {}: {:#}",
                session.serial,
                e
            );
        } else {
            log::info!("automation session closed for {}", session.serial);
        }
    }
}
