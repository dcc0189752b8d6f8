//! App lifecycle control
//!
//! Installs and foregrounds the app under test through the backend's
//! structured app-management API. Launch mechanics differ across OS
//! versions, so activation always goes through the backend, never
//! through hand-built intents or shell commands.

use std::path::Path;
use std::time::Duration;

use crate::backend::{AppState, AutomationBackend, InstallOptions};

use super::error::EngineError;
use super::events::EventEmitter;
use super::poll::{poll_until, sleep_cancellable, CancelToken, PollOutcome};

const FOREGROUND_TIMEOUT: Duration = Duration::from_secs(10);
const FOREGROUND_POLL: Duration = Duration::from_millis(500);

pub struct AppLifecycleController<'a> {
    backend: &'a dyn AutomationBackend,
    emitter: &'a EventEmitter,
    cancel: &'a CancelToken,
    foreground_timeout: Duration,
    foreground_poll: Duration,
}

impl<'a> AppLifecycleController<'a> {
    pub fn new(
        backend: &'a dyn AutomationBackend,
        emitter: &'a EventEmitter,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            backend,
            emitter,
            cancel,
            foreground_timeout: FOREGROUND_TIMEOUT,
            foreground_poll: FOREGROUND_POLL,
        }
    }

    /// Shrink the foreground budget (used by tests)
    pub fn with_foreground_timeout(mut self, timeout: Duration, poll: Duration) -> Self {
        self.foreground_timeout = timeout;
        self.foreground_poll = poll;
        self
    }

    /// Make sure the app is installed, deploying the binary if needed
    pub async fn ensure_installed(
        &self,
        app_id: &str,
        binary_path: Option<&Path>,
    ) -> Result<(), EngineError> {
        let installed = self
            .backend
            .is_app_installed(app_id)
            .await
            .map_err(|e| EngineError::AppInstall {
                path: app_id.to_string(),
                reason: format!("install-state query failed: {:#}", e),
            })?;

        if installed {
            return Ok(());
        }

        let path = binary_path.ok_or_else(|| EngineError::AppInstall {
            path: app_id.to_string(),
            reason: "app is not installed and no app binary was provided".to_string(),
        })?;

        self.emitter
            .phase(format!("installing {}", path.display()));
        self.backend
            .install_app(path, &InstallOptions::default())
            .await
            .map_err(|e| EngineError::AppInstall {
                path: path.display().to_string(),
                reason: format!("{:#}", e),
            })
    }

    /// Activate the app, terminating any running instance first so
    /// every case starts from a known state.
    pub async fn launch(&self, app_id: &str) -> Result<(), EngineError> {
        if let Ok(AppState::Background | AppState::Foreground) =
            self.backend.query_app_state(app_id).await
        {
            if let Err(e) = self.backend.terminate_app(app_id).await {
                log::debug!("pre-launch terminate failed: {:#}", e);
            }
            sleep_cancellable(Duration::from_millis(500), self.cancel).await;
        }

        self.emitter.phase(format!("launching {}", app_id));
        self.backend
            .activate_app(app_id)
            .await
            .map_err(|e| EngineError::AppLaunch {
                app_id: app_id.to_string(),
                reason: format!("{:#}", e),
            })
    }

    /// Wait for the app to report the foreground state.
    ///
    /// Advisory, not a hard precondition: some legitimate app states do
    /// not report cleanly, so a timeout records a warning and the run
    /// proceeds. Returns whether foreground was actually confirmed.
    pub async fn await_foreground(&self, app_id: &str) -> Result<bool, EngineError> {
        let backend = self.backend;
        let outcome = poll_until(
            move || {
                let app_id = app_id.to_string();
                async move {
                    match backend.query_app_state(&app_id).await {
                        Ok(AppState::Foreground) => true,
                        Ok(AppState::Background) => {
                            // Pull it forward and re-check on the next poll
                            let _ = backend.activate_app(&app_id).await;
                            false
                        }
                        _ => false,
                    }
                }
            },
            self.foreground_poll,
            self.foreground_timeout,
            self.cancel,
        )
        .await;

        match outcome {
            PollOutcome::Satisfied => Ok(true),
            PollOutcome::TimedOut => {
                self.emitter.warning(format!(
                    "{} did not confirm foreground within {}s, proceeding anyway",
                    app_id,
                    self.foreground_timeout.as_secs()
                ));
                Ok(false)
            }
            PollOutcome::Cancelled => Err(EngineError::Cancelled),
        }
    }

    /// Remove the app at teardown when the run is configured to leave
    /// no footprint. Never fatal.
    pub async fn uninstall(&self, app_id: &str) {
        self.emitter.phase(format!("uninstalling {}", app_id));
        if let Err(e) = self.backend.remove_app(app_id).await {
            log::warn!("uninstall of {} failed: {:#}", app_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::engine::events::EngineEvent;

    fn fast<'a>(
        backend: &'a FakeBackend,
        emitter: &'a EventEmitter,
        cancel: &'a CancelToken,
    ) -> AppLifecycleController<'a> {
        AppLifecycleController::new(backend, emitter, cancel)
            .with_foreground_timeout(Duration::from_millis(100), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_ensure_installed_noop_when_present() {
        let backend = FakeBackend::new().with_installed(true);
        let emitter = EventEmitter::default();
        let cancel = CancelToken::new();

        fast(&backend, &emitter, &cancel)
            .ensure_installed("com.example.app", None)
            .await
            .unwrap();
        assert!(!backend.call_log().iter().any(|c| c.starts_with("install")));
    }

    #[tokio::test]
    async fn test_ensure_installed_deploys_binary() {
        let backend = FakeBackend::new().with_installed(false);
        let emitter = EventEmitter::default();
        let cancel = CancelToken::new();

        fast(&backend, &emitter, &cancel)
            .ensure_installed("com.example.app", Some(Path::new("/tmp/app.apk")))
            .await
            .unwrap();
        assert!(backend
            .call_log()
            .iter()
            .any(|c| c == "install /tmp/app.apk"));
    }

    #[tokio::test]
    async fn test_ensure_installed_fails_without_binary() {
        let backend = FakeBackend::new().with_installed(false);
        let emitter = EventEmitter::default();
        let cancel = CancelToken::new();

        let err = fast(&backend, &emitter, &cancel)
            .ensure_installed("com.example.app", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AppInstall { .. }));
    }

    #[tokio::test]
    async fn test_launch_terminates_running_instance() {
        let backend = FakeBackend::new().with_app_states(&[AppState::Foreground]);
        let emitter = EventEmitter::default();
        let cancel = CancelToken::new();

        fast(&backend, &emitter, &cancel)
            .launch("com.example.app")
            .await
            .unwrap();

        let log = backend.call_log();
        let terminate = log.iter().position(|c| c == "terminate com.example.app");
        let activate = log.iter().position(|c| c == "activate com.example.app");
        assert!(terminate.unwrap() < activate.unwrap());
    }

    #[tokio::test]
    async fn test_await_foreground_confirms() {
        let backend = FakeBackend::new().with_app_states(&[
            AppState::NotRunning,
            AppState::Background,
            AppState::Foreground,
        ]);
        let emitter = EventEmitter::default();
        let cancel = CancelToken::new();

        let confirmed = fast(&backend, &emitter, &cancel)
            .await_foreground("com.example.app")
            .await
            .unwrap();
        assert!(confirmed);
        // The background observation triggered a re-activation
        assert!(backend
            .call_log()
            .iter()
            .any(|c| c == "activate com.example.app"));
    }

    #[tokio::test]
    async fn test_await_foreground_timeout_warns_and_continues() {
        let backend = FakeBackend::new().with_app_states(&[AppState::NotRunning]);
        let emitter = EventEmitter::default();
        let mut events = emitter.subscribe();
        let cancel = CancelToken::new();

        let confirmed = fast(&backend, &emitter, &cancel)
            .await_foreground("com.example.app")
            .await
            .unwrap();
        assert!(!confirmed);

        let mut warned = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::Warning { .. }) {
                warned = true;
            }
        }
        assert!(warned);
    }
}
