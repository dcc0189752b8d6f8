//! Engine error taxonomy
//!
//! Device/session/app-lifecycle errors are fatal to the current test
//! case; resolution and action errors are step-scoped and are
//! downgraded to a failed step outcome by the executor. Every message
//! is written for the test author, not the engine developer: it names
//! what was attempted and why it failed.

use thiserror::Error;

use crate::model::LocatorAttempt;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("device discovery failed: {0}")]
    DeviceDiscovery(String),

    #[error("virtual device did not come online within {timeout_secs}s")]
    DeviceLaunchTimeout { timeout_secs: u64 },

    #[error("device {serial} did not reach ready state within {timeout_secs}s (stuck at: {stage})")]
    DeviceBootTimeout {
        serial: String,
        timeout_secs: u64,
        stage: String,
    },

    #[error(
        "device {serial} is still unauthorized after a bridge restart; \
         accept the debugging prompt on the device and retry"
    )]
    DeviceUnauthorized { serial: String },

    #[error("device {serial} is still offline after a bridge restart")]
    DeviceOffline { serial: String },

    #[error("automation session could not be created: {diagnostic}")]
    SessionCreation { diagnostic: String },

    #[error("app install failed ({path}): {reason}")]
    AppInstall { path: String, reason: String },

    #[error("app launch failed ({app_id}): {reason}")]
    AppLaunch { app_id: String, reason: String },

    #[error("element not resolved; every locator failed:\n{}", format_attempts(.attempts))]
    ElementResolutionFailed { attempts: Vec<LocatorAttempt> },

    #[error("{action} failed: {reason}")]
    ActionExecution { action: String, reason: String },

    #[error("run cancelled")]
    Cancelled,
}

impl EngineError {
    /// Step-scoped errors are caught by the executor and never abort
    /// the test case.
    pub fn is_step_scoped(&self) -> bool {
        matches!(
            self,
            EngineError::ElementResolutionFailed { .. } | EngineError::ActionExecution { .. }
        )
    }
}

fn format_attempts(attempts: &[LocatorAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("  - {}", a))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LocatorStrategy;

    #[test]
    fn test_resolution_error_lists_every_attempt() {
        let err = EngineError::ElementResolutionFailed {
            attempts: vec![
                LocatorAttempt {
                    slot: 0,
                    strategy: LocatorStrategy::Id,
                    value: "btn_login".to_string(),
                    elapsed_ms: 3000,
                    success: false,
                    error: Some("no such element".to_string()),
                },
                LocatorAttempt {
                    slot: 2,
                    strategy: LocatorStrategy::Xpath,
                    value: "//button".to_string(),
                    elapsed_ms: 3001,
                    success: false,
                    error: Some("timed out after 3000ms".to_string()),
                },
            ],
        };

        let message = err.to_string();
        assert!(message.contains("slot 1: id=btn_login"));
        assert!(message.contains("no such element"));
        assert!(message.contains("slot 3: xpath=//button"));
        assert!(message.contains("timed out"));
    }

    #[test]
    fn test_step_scoped_classification() {
        assert!(EngineError::ActionExecution {
            action: "click".to_string(),
            reason: "x".to_string(),
        }
        .is_step_scoped());
        assert!(!EngineError::SessionCreation {
            diagnostic: "x".to_string(),
        }
        .is_step_scoped());
        assert!(!EngineError::Cancelled.is_step_scoped());
    }
}
