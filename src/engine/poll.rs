//! Bounded polling primitive
//!
//! Every waiting loop in the engine (device boot checks, foreground
//! checks, bridge reconciliation) goes through [`poll_until`] so
//! timeout and cancellation semantics stay consistent and testable in
//! one place. There are no unbounded busy-waits anywhere else.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared across the engine
///
/// Set by the Ctrl-C handler (or an embedder); observed between poll
/// probes and between steps. Cancellation never skips teardown.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Wire this token to Ctrl-C. May only succeed once per process.
    pub fn install_ctrlc_handler(&self) {
        let token = self.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            log::warn!("interrupt received, finishing current step and tearing down");
            token.cancel();
        }) {
            log::warn!("could not install interrupt handler: {}", e);
        }
    }
}

/// Result of a bounded poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The predicate returned true within the budget
    Satisfied,
    /// The budget elapsed without the predicate returning true
    TimedOut,
    /// The cancel token fired between probes
    Cancelled,
}

impl PollOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PollOutcome::Satisfied)
    }
}

/// Poll `probe` every `interval` until it returns true, the `timeout`
/// budget elapses, or `cancel` fires. The probe always runs at least
/// once.
pub async fn poll_until<F, Fut>(
    mut probe: F,
    interval: Duration,
    timeout: Duration,
    cancel: &CancelToken,
) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }

        if probe().await {
            return PollOutcome::Satisfied;
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return PollOutcome::TimedOut;
        }

        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

/// Sleep for `duration`, waking early if `cancel` fires.
///
/// Returns false when interrupted.
pub async fn sleep_cancellable(duration: Duration, cancel: &CancelToken) -> bool {
    const SLICE: Duration = Duration::from_millis(200);
    let start = Instant::now();

    while start.elapsed() < duration {
        if cancel.is_cancelled() {
            return false;
        }
        let remaining = duration - start.elapsed();
        tokio::time::sleep(SLICE.min(remaining)).await;
    }

    !cancel.is_cancelled()
}
