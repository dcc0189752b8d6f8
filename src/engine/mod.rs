//! Test execution engine
//!
//! Coordinates the device, session, and app lifecycles, then runs each
//! case's steps in definition order. Bring-up failures abort a case
//! (remaining steps are skipped, the case is failed); step failures
//! stay inside the executor and the skip-on-fail policy decides
//! whether later steps still run. Session teardown happens on every
//! exit path, including cancellation.

pub mod aggregate;
pub mod app;
pub mod device;
pub mod error;
pub mod events;
pub mod executor;
pub mod locator;
pub mod poll;
pub mod session;

use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::backend::client::DEFAULT_SERVER_URL;
use crate::backend::AutomationBackend;
use crate::bridge::AdbBridge;
use crate::model::{Platform, StepStatus, TestCase, TestResult};

use app::AppLifecycleController;
use device::DeviceLifecycleManager;
use executor::StepExecutor;
use session::{AutomationSessionManager, DeviceSession};

pub use error::EngineError;
pub use events::{ConsoleEventListener, EngineEvent, EventEmitter};
pub use poll::CancelToken;

/// Which device to run against and where the backend server lives
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    /// Explicit device serial; first matching device otherwise
    pub selector: Option<String>,
    /// Virtual device profile to launch when nothing is connected
    pub preferred_avd: Option<String>,
    /// Automation server address
    pub server_url: String,
}

impl Default for DeviceSpec {
    fn default() -> Self {
        Self {
            selector: None,
            preferred_avd: None,
            server_url: DEFAULT_SERVER_URL.to_string(),
        }
    }
}

/// Run policies and app configuration
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Launch a virtual device when no device is connected
    pub auto_launch_device: bool,
    /// Keep attempting steps after a failure instead of halting
    pub skip_on_fail: bool,
    pub screenshots_enabled: bool,
    /// App under test; steps may override per-step via input data
    pub app_id: Option<String>,
    /// App binary to install when the app is missing from the device
    pub app_binary_path: Option<PathBuf>,
    /// Reuse one session across all cases in a suite
    pub keep_session_alive: bool,
    /// Remove the app from the device at teardown
    pub uninstall_on_teardown: bool,
    pub output_dir: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            auto_launch_device: true,
            skip_on_fail: false,
            screenshots_enabled: true,
            app_id: None,
            app_binary_path: None,
            keep_session_alive: false,
            uninstall_on_teardown: false,
            output_dir: PathBuf::from("./output"),
        }
    }
}

pub struct Engine {
    options: RunOptions,
    emitter: EventEmitter,
    cancel: CancelToken,
}

impl Engine {
    /// Create an engine with a console listener attached
    pub fn new(options: RunOptions) -> Self {
        let (emitter, receiver) = EventEmitter::new();
        tokio::spawn(ConsoleEventListener::listen(receiver));
        Self {
            options,
            emitter,
            cancel: CancelToken::new(),
        }
    }

    /// Token embedders (or the Ctrl-C handler) use to stop the run
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.emitter.subscribe()
    }

    /// Run one test case against a fresh session
    pub async fn run_test_case(
        &self,
        case: &mut TestCase,
        spec: &DeviceSpec,
    ) -> TestResult {
        let run_id = new_run_id();
        let shots_dir = self.prepare_output_dir(&run_id);
        let mut session: Option<DeviceSession> = None;

        let result = self
            .run_case_inner(&run_id, case, spec, &mut session, &shots_dir)
            .await;
        self.teardown_session(&mut session).await;
        result
    }

    /// Run cases sequentially against one device session
    pub async fn run_suite(
        &self,
        cases: &mut [TestCase],
        spec: &DeviceSpec,
    ) -> Vec<TestResult> {
        let run_id = new_run_id();
        let shots_dir = self.prepare_output_dir(&run_id);

        self.emitter.emit(EngineEvent::SuiteStarted {
            run_id: run_id.clone(),
            case_count: cases.len(),
        });

        let mut session: Option<DeviceSession> = None;
        let mut results = Vec::with_capacity(cases.len());

        for case in cases.iter_mut() {
            let result = self
                .run_case_inner(&run_id, case, spec, &mut session, &shots_dir)
                .await;
            results.push(result);

            if !self.options.keep_session_alive {
                self.teardown_session(&mut session).await;
            }
        }

        self.teardown_session(&mut session).await;

        let summary = aggregate::suite_summary(&results);
        self.emitter.emit(EngineEvent::SuiteFinished { summary });
        results
    }

    async fn run_case_inner(
        &self,
        run_id: &str,
        case: &mut TestCase,
        spec: &DeviceSpec,
        session: &mut Option<DeviceSession>,
        shots_dir: &Path,
    ) -> TestResult {
        let started_at = Utc::now();
        for step in case.steps.iter_mut() {
            step.outcome.reset();
        }

        self.emitter.emit(EngineEvent::CaseStarted {
            module: case.module.clone(),
            step_count: case.steps.len(),
        });

        let backend = match self.prepare(case.platform, spec, session).await {
            Ok(current) => current.backend(),
            Err(e) => {
                // No step can meaningfully run without a ready device,
                // session, and app.
                log::error!("bring-up failed for case '{}': {}", case.module, e);
                self.skip_remaining(case, "device/session bring-up failed");
                let result =
                    aggregate::finalize_case(run_id, case, started_at, Some(e.to_string()));
                self.emit_case_finished(&result);
                return result;
            }
        };
        self.run_steps(backend, case, shots_dir).await;

        if self.options.uninstall_on_teardown {
            if let Some(app_id) = self.options.app_id.as_deref() {
                AppLifecycleController::new(backend, &self.emitter, &self.cancel)
                    .uninstall(app_id)
                    .await;
            }
        }

        let error = if self.cancel.is_cancelled() {
            Some(EngineError::Cancelled.to_string())
        } else {
            None
        };
        let result = aggregate::finalize_case(run_id, case, started_at, error);
        self.emit_case_finished(&result);
        result
    }

    /// Bring the device, session, and app to the ready state
    async fn prepare<'s>(
        &self,
        platform: Platform,
        spec: &DeviceSpec,
        session: &'s mut Option<DeviceSession>,
    ) -> Result<&'s DeviceSession, EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        if session.is_none() {
            let bridge = AdbBridge;
            let device_manager = DeviceLifecycleManager::new(&bridge, &self.emitter, &self.cancel);
            let serial = device_manager
                .ensure_ready(platform, spec, self.options.auto_launch_device)
                .await?;

            self.emitter.phase("opening automation session");
            let session_manager = AutomationSessionManager::new(&spec.server_url);
            *session = Some(session_manager.open(platform, &serial).await?);
        }

        let current = session.as_ref().ok_or_else(|| EngineError::SessionCreation {
            diagnostic: "session handle missing after bring-up".to_string(),
        })?;
        self.prepare_app(current).await?;
        Ok(current)
    }

    async fn prepare_app(&self, session: &DeviceSession) -> Result<(), EngineError> {
        let app_id = match self.options.app_id.as_deref() {
            Some(id) => id,
            None => {
                self.emitter
                    .warning("no app id configured, skipping app bring-up");
                return Ok(());
            }
        };

        let controller = AppLifecycleController::new(session.backend(), &self.emitter, &self.cancel);
        controller
            .ensure_installed(app_id, self.options.app_binary_path.as_deref())
            .await?;
        controller.launch(app_id).await?;
        controller.await_foreground(app_id).await?;
        Ok(())
    }

    /// Execute steps in definition order. Step N+1 never starts before
    /// step N's outcome is finalized.
    pub(crate) async fn run_steps(
        &self,
        backend: &dyn AutomationBackend,
        case: &mut TestCase,
        shots_dir: &Path,
    ) {
        let executor = StepExecutor::new(
            backend,
            &self.emitter,
            &self.cancel,
            self.options.screenshots_enabled,
            shots_dir.to_path_buf(),
            self.options.app_id.clone(),
        );

        let mut halted = false;
        for (index, step) in case.steps.iter_mut().enumerate() {
            if self.cancel.is_cancelled() {
                step.outcome.skip("run cancelled");
                self.emitter.emit(EngineEvent::StepSkipped {
                    index,
                    reason: "run cancelled".to_string(),
                });
                continue;
            }
            if halted {
                step.outcome.skip("previous step failed");
                self.emitter.emit(EngineEvent::StepSkipped {
                    index,
                    reason: "previous step failed".to_string(),
                });
                continue;
            }

            let status = executor.execute(step, index).await;
            if status == StepStatus::Failed && !self.options.skip_on_fail {
                halted = true;
            }
        }
    }

    fn skip_remaining(&self, case: &mut TestCase, reason: &str) {
        for (index, step) in case.steps.iter_mut().enumerate() {
            if !step.outcome.status.is_terminal() {
                step.outcome.skip(reason);
                self.emitter.emit(EngineEvent::StepSkipped {
                    index,
                    reason: reason.to_string(),
                });
            }
        }
    }

    async fn teardown_session(&self, session: &mut Option<DeviceSession>) {
        if let Some(current) = session.take() {
            AutomationSessionManager::close(&current).await;
            self.emitter.phase("automation session closed");
        }
    }

    fn prepare_output_dir(&self, run_id: &str) -> PathBuf {
        let dir = self.options.output_dir.join(run_id);
        if self.options.screenshots_enabled {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                log::warn!("could not create output dir {}: {}", dir.display(), e);
            }
        }
        dir
    }

    fn emit_case_finished(&self, result: &TestResult) {
        self.emitter.emit(EngineEvent::CaseFinished {
            module: result.module.clone(),
            status: result.status,
            counts: result.counts,
            duration_ms: result.duration_ms,
        });
    }
}

fn new_run_id() -> String {
    Uuid::new_v4().to_string().chars().take(8).collect()
}
