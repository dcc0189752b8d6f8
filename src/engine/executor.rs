//! Step execution
//!
//! Runs one step to completion and produces exactly one outcome.
//! Resolution and action failures are converted into a failed outcome
//! with the full causal chain in the message; they never unwind past
//! the executor. Whether later steps still run is the run policy's
//! call, not the executor's.

use regex::Regex;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::backend::{AutomationBackend, ElementHandle};
use crate::model::{ActionKind, Step, StepStatus, SwipeDirection};

use super::error::EngineError;
use super::events::{EngineEvent, EventEmitter};
use super::locator::LocatorResolver;
use super::poll::{sleep_cancellable, CancelToken};

/// Settle time after a UI-mutating action before the next step
const POST_ACTION_SETTLE: Duration = Duration::from_millis(300);

const LONG_PRESS_MS: u64 = 2000;
const MAX_SCROLL_ATTEMPTS: u32 = 3;
const DEFAULT_WAIT_SECS: f64 = 5.0;

pub struct StepExecutor<'a> {
    backend: &'a dyn AutomationBackend,
    emitter: &'a EventEmitter,
    cancel: &'a CancelToken,
    resolver: LocatorResolver,
    screenshots_enabled: bool,
    output_dir: PathBuf,
    /// Default app target for close-app / launch-app steps
    app_id: Option<String>,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        backend: &'a dyn AutomationBackend,
        emitter: &'a EventEmitter,
        cancel: &'a CancelToken,
        screenshots_enabled: bool,
        output_dir: PathBuf,
        app_id: Option<String>,
    ) -> Self {
        Self {
            backend,
            emitter,
            cancel,
            resolver: LocatorResolver::default(),
            screenshots_enabled,
            output_dir,
            app_id,
        }
    }

    /// Override the per-attempt locator budget (used by tests)
    pub fn with_resolver(mut self, resolver: LocatorResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Run one step: Pending -> Running -> Passed | Failed
    pub async fn execute(&self, step: &mut Step, index: usize) -> StepStatus {
        let started = Instant::now();
        step.outcome.start();
        self.emitter.emit(EngineEvent::StepStarted {
            index,
            number: step.number,
            description: step.description.clone(),
            action: step.action,
        });

        if self.should_capture(step.action) {
            let name = format!("step_{:02}_before.png", step.number);
            step.outcome.screenshot_before = self.capture(&name).await;
        }

        let result = self.dispatch(step).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        step.outcome.duration_ms = Some(duration_ms);

        match result {
            Ok(message) => {
                if self.should_capture(step.action) {
                    let name = format!("step_{:02}_after.png", step.number);
                    step.outcome.screenshot_after = self.capture(&name).await;
                }
                step.outcome.pass(message);
                self.emitter
                    .emit(EngineEvent::StepPassed { index, duration_ms });
            }
            Err(e) => {
                let error = e.to_string();
                step.outcome.fail(error.clone());
                self.emitter.emit(EngineEvent::StepFailed {
                    index,
                    error,
                    duration_ms,
                });
            }
        }

        step.outcome.status
    }

    async fn dispatch(&self, step: &mut Step) -> Result<String, EngineError> {
        match step.action {
            ActionKind::Click => {
                let element = self.resolve_target(step).await?;
                self.action(step.action, self.backend.click(&element))
                    .await?;
                self.settle().await;
                Ok("clicked element".to_string())
            }

            ActionKind::EnterText => {
                let text = self.required_input(step, "text to enter")?.to_string();
                let element = self.resolve_target(step).await?;
                self.action(step.action, self.backend.clear(&element))
                    .await?;
                self.action(step.action, self.backend.send_keys(&element, &text))
                    .await?;
                self.settle().await;
                Ok(format!("entered text '{}'", text))
            }

            ActionKind::VerifyPresence => {
                self.resolve_target(step).await?;
                Ok("element is present".to_string())
            }

            ActionKind::VerifyText => {
                let expected = self.required_input(step, "expected text")?.to_string();
                let element = self.resolve_target(step).await?;
                let actual = self
                    .action(step.action, self.backend.element_text(&element))
                    .await?;
                match text_matches(&expected, &actual) {
                    Ok(true) => Ok(format!("text verified: '{}'", actual)),
                    Ok(false) => Err(EngineError::ActionExecution {
                        action: step.action.as_str().to_string(),
                        reason: format!("expected '{}', got '{}'", expected, actual),
                    }),
                    Err(reason) => Err(EngineError::ActionExecution {
                        action: step.action.as_str().to_string(),
                        reason,
                    }),
                }
            }

            ActionKind::Wait => {
                let secs = parse_wait_secs(step.input_str()).map_err(|reason| {
                    EngineError::ActionExecution {
                        action: step.action.as_str().to_string(),
                        reason,
                    }
                })?;
                if !sleep_cancellable(Duration::from_secs_f64(secs), self.cancel).await {
                    return Err(EngineError::Cancelled);
                }
                Ok(format!("waited {}s", secs))
            }

            ActionKind::Scroll => self.scroll_until_visible(step).await,

            ActionKind::Swipe => {
                let direction =
                    SwipeDirection::parse(step.input_str()).ok_or_else(|| {
                        EngineError::ActionExecution {
                            action: step.action.as_str().to_string(),
                            reason: format!(
                                "unknown swipe direction '{}' (expected up/down/left/right)",
                                step.input_str()
                            ),
                        }
                    })?;
                self.action(step.action, self.backend.swipe(direction))
                    .await?;
                self.settle().await;
                Ok(format!("swiped {}", direction.as_str()))
            }

            ActionKind::LongPress => {
                let element = self.resolve_target(step).await?;
                self.action(
                    step.action,
                    self.backend.long_press(&element, LONG_PRESS_MS),
                )
                .await?;
                self.settle().await;
                Ok("long-pressed element".to_string())
            }

            ActionKind::Back => {
                self.action(step.action, self.backend.back()).await?;
                self.settle().await;
                Ok("navigated back".to_string())
            }

            ActionKind::Screenshot => {
                let name = format!("step_{:02}_capture.png", step.number);
                match self.capture(&name).await {
                    Some(reference) => {
                        step.outcome.screenshot_after = Some(reference.clone());
                        Ok(format!("captured screenshot {}", reference))
                    }
                    None => Err(EngineError::ActionExecution {
                        action: step.action.as_str().to_string(),
                        reason: "screenshot could not be captured".to_string(),
                    }),
                }
            }

            ActionKind::CloseApp => {
                let app_id = self.target_app(step)?;
                self.action(step.action, self.backend.terminate_app(&app_id))
                    .await?;
                Ok(format!("closed {}", app_id))
            }

            ActionKind::LaunchApp => {
                let app_id = self.target_app(step)?;
                self.action(step.action, self.backend.activate_app(&app_id))
                    .await?;
                self.settle().await;
                Ok(format!("launched {}", app_id))
            }
        }
    }

    /// Resolve the step's locators, keeping the attempt trace on the
    /// outcome whether or not resolution succeeded.
    async fn resolve_target(&self, step: &mut Step) -> Result<ElementHandle, EngineError> {
        if !step.has_locator() {
            return Err(EngineError::ActionExecution {
                action: step.action.as_str().to_string(),
                reason: "at least one locator is required".to_string(),
            });
        }

        match self.resolver.resolve(self.backend, &step.locators).await {
            Ok(resolved) => {
                step.outcome.attempts = resolved.attempts;
                Ok(resolved.handle)
            }
            Err(EngineError::ElementResolutionFailed { attempts }) => {
                step.outcome.attempts = attempts.clone();
                Err(EngineError::ElementResolutionFailed { attempts })
            }
            Err(e) => Err(e),
        }
    }

    /// Scroll until one of the step's locators resolves
    async fn scroll_until_visible(&self, step: &mut Step) -> Result<String, EngineError> {
        if !step.has_locator() {
            return Err(EngineError::ActionExecution {
                action: step.action.as_str().to_string(),
                reason: "at least one locator is required".to_string(),
            });
        }

        for attempt in 0..=MAX_SCROLL_ATTEMPTS {
            match self.resolver.resolve(self.backend, &step.locators).await {
                Ok(resolved) => {
                    step.outcome.attempts = resolved.attempts;
                    return Ok(if attempt == 0 {
                        "element already visible".to_string()
                    } else {
                        format!("element visible after {} scroll(s)", attempt)
                    });
                }
                Err(EngineError::ElementResolutionFailed { attempts }) => {
                    step.outcome.attempts = attempts;
                }
                Err(e) => return Err(e),
            }

            if attempt < MAX_SCROLL_ATTEMPTS {
                self.action(step.action, self.backend.swipe(SwipeDirection::Up))
                    .await?;
                self.settle().await;
            }
        }

        Err(EngineError::ActionExecution {
            action: step.action.as_str().to_string(),
            reason: format!(
                "element not visible after {} scrolls",
                MAX_SCROLL_ATTEMPTS
            ),
        })
    }

    /// Wrap a backend call, converting its error into a step-scoped
    /// action failure.
    async fn action<T>(
        &self,
        kind: ActionKind,
        fut: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> Result<T, EngineError> {
        fut.await.map_err(|e| EngineError::ActionExecution {
            action: kind.as_str().to_string(),
            reason: format!("{:#}", e),
        })
    }

    fn required_input<'s>(&self, step: &'s Step, what: &str) -> Result<&'s str, EngineError> {
        let input = step.input_str();
        if input.is_empty() {
            return Err(EngineError::ActionExecution {
                action: step.action.as_str().to_string(),
                reason: format!("{} is required in the input data column", what),
            });
        }
        Ok(input)
    }

    fn target_app(&self, step: &Step) -> Result<String, EngineError> {
        let input = step.input_str();
        if !input.is_empty() {
            return Ok(input.to_string());
        }
        self.app_id
            .clone()
            .ok_or_else(|| EngineError::ActionExecution {
                action: step.action.as_str().to_string(),
                reason: "no app id in the input data column and none configured for the run"
                    .to_string(),
            })
    }

    /// Whether this action produces a visual result worth documenting
    fn should_capture(&self, action: ActionKind) -> bool {
        if !self.screenshots_enabled {
            return false;
        }
        matches!(
            action,
            ActionKind::Click
                | ActionKind::EnterText
                | ActionKind::VerifyPresence
                | ActionKind::VerifyText
                | ActionKind::LongPress
        )
    }

    /// Capture the screen into the run's output directory, returning
    /// the stable file reference. Screenshot trouble never fails a
    /// step on its own.
    async fn capture(&self, name: &str) -> Option<String> {
        match self.backend.screenshot().await {
            Ok(bytes) => {
                let path = self.output_dir.join(name);
                match std::fs::write(&path, bytes) {
                    Ok(()) => Some(name.to_string()),
                    Err(e) => {
                        log::warn!("could not write screenshot {}: {}", path.display(), e);
                        None
                    }
                }
            }
            Err(e) => {
                log::warn!("screenshot capture failed: {:#}", e);
                None
            }
        }
    }

    async fn settle(&self) {
        sleep_cancellable(POST_ACTION_SETTLE, self.cancel).await;
    }
}

/// Match verify-text input against the element's text: a `re:` prefix
/// switches to regex, otherwise exact or substring match.
fn text_matches(expected: &str, actual: &str) -> Result<bool, String> {
    if let Some(pattern) = expected.strip_prefix("re:") {
        let re = Regex::new(pattern.trim()).map_err(|e| format!("invalid pattern: {}", e))?;
        Ok(re.is_match(actual))
    } else {
        Ok(actual == expected || actual.contains(expected))
    }
}

fn parse_wait_secs(input: &str) -> Result<f64, String> {
    if input.is_empty() {
        return Ok(DEFAULT_WAIT_SECS);
    }
    match input.parse::<f64>() {
        Ok(secs) if secs >= 0.0 => Ok(secs),
        Ok(_) => Err("wait duration must not be negative".to_string()),
        Err(_) => Err(format!("'{}' is not a valid duration in seconds", input)),
    }
}
