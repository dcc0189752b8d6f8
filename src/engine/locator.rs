//! Element resolution with ordered fallback
//!
//! A step carries up to three locator slots. Different environments
//! (local vs. CI, OS versions) expose different reliable attributes
//! for the same logical element, so the slots are ordered by expected
//! specificity and tried strictly in sequence: stop at the first
//! success, skip empty slots without spending any budget, and on
//! exhaustion report every attempt with its individual failure.

use std::time::{Duration, Instant};

use crate::backend::{AutomationBackend, ElementHandle};
use crate::model::{Locator, LocatorAttempt};

use super::error::EngineError;

/// Budget for a single locator attempt
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(3);

/// Outcome of a successful resolution
#[derive(Debug)]
pub struct ResolvedElement {
    pub handle: ElementHandle,
    /// 0-based slot index that resolved
    pub slot: usize,
    /// Full attempt trace including the successful attempt
    pub attempts: Vec<LocatorAttempt>,
}

pub struct LocatorResolver {
    attempt_timeout: Duration,
}

impl Default for LocatorResolver {
    fn default() -> Self {
        Self {
            attempt_timeout: ATTEMPT_TIMEOUT,
        }
    }
}

impl LocatorResolver {
    pub fn with_attempt_timeout(attempt_timeout: Duration) -> Self {
        Self { attempt_timeout }
    }

    /// Try each populated slot in order until one resolves
    pub async fn resolve(
        &self,
        backend: &dyn AutomationBackend,
        locators: &[Option<Locator>; 3],
    ) -> Result<ResolvedElement, EngineError> {
        let mut attempts = Vec::new();

        for (slot, locator) in locators
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.as_ref().map(|l| (i, l)))
        {
            let started = Instant::now();
            let result = tokio::time::timeout(
                self.attempt_timeout,
                backend.find_element(locator.strategy, &locator.value),
            )
            .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(Ok(handle)) => {
                    attempts.push(LocatorAttempt {
                        slot,
                        strategy: locator.strategy,
                        value: locator.value.clone(),
                        elapsed_ms,
                        success: true,
                        error: None,
                    });
                    log::debug!("resolved {} on slot {}", locator, slot + 1);
                    return Ok(ResolvedElement {
                        handle,
                        slot,
                        attempts,
                    });
                }
                Ok(Err(e)) => {
                    attempts.push(LocatorAttempt {
                        slot,
                        strategy: locator.strategy,
                        value: locator.value.clone(),
                        elapsed_ms,
                        success: false,
                        error: Some(format!("{:#}", e)),
                    });
                }
                Err(_) => {
                    attempts.push(LocatorAttempt {
                        slot,
                        strategy: locator.strategy,
                        value: locator.value.clone(),
                        elapsed_ms,
                        success: false,
                        error: Some(format!(
                            "timed out after {}ms",
                            self.attempt_timeout.as_millis()
                        )),
                    });
                }
            }
        }

        Err(EngineError::ElementResolutionFailed { attempts })
    }
}
