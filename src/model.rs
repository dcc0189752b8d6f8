//! In-memory test model
//!
//! These structures are produced by the tabular test-definition parser
//! (an external collaborator) and handed to the engine already parsed.
//! The engine treats everything as read-only except [`Step::outcome`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Target platform for a test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

/// Locator strategy for resolving a UI element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocatorStrategy {
    /// Resource id (Android) / element id
    Id,
    /// Accessibility id / content description
    AccessibilityId,
    /// XPath expression
    Xpath,
    /// Widget class name
    ClassName,
    /// Visible text
    Text,
}

impl LocatorStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocatorStrategy::Id => "id",
            LocatorStrategy::AccessibilityId => "accessibility-id",
            LocatorStrategy::Xpath => "xpath",
            LocatorStrategy::ClassName => "class-name",
            LocatorStrategy::Text => "text",
        }
    }
}

/// A (strategy, value) pair identifying a UI element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub strategy: LocatorStrategy,
    pub value: String,
}

impl Locator {
    pub fn new(strategy: LocatorStrategy, value: impl Into<String>) -> Self {
        Self {
            strategy,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.strategy.as_str(), self.value)
    }
}

/// Closed set of step action kinds
///
/// Dispatch is an exhaustive `match` in the executor, so adding a
/// variant here forces every handler site to be updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Click,
    EnterText,
    VerifyPresence,
    VerifyText,
    Wait,
    Scroll,
    Swipe,
    LongPress,
    Back,
    Screenshot,
    CloseApp,
    LaunchApp,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::EnterText => "enter-text",
            ActionKind::VerifyPresence => "verify-presence",
            ActionKind::VerifyText => "verify-text",
            ActionKind::Wait => "wait",
            ActionKind::Scroll => "scroll",
            ActionKind::Swipe => "swipe",
            ActionKind::LongPress => "long-press",
            ActionKind::Back => "back",
            ActionKind::Screenshot => "screenshot",
            ActionKind::CloseApp => "close-app",
            ActionKind::LaunchApp => "launch-app",
        }
    }
}

/// Swipe direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    Up,
    Down,
    Left,
    Right,
}

impl SwipeDirection {
    /// Parse from step input data; defaults to Up for empty input.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "up" => Some(SwipeDirection::Up),
            "down" => Some(SwipeDirection::Down),
            "left" => Some(SwipeDirection::Left),
            "right" => Some(SwipeDirection::Right),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwipeDirection::Up => "up",
            SwipeDirection::Down => "down",
            SwipeDirection::Left => "left",
            SwipeDirection::Right => "right",
        }
    }
}

/// Step execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Passed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// One locator attempt, recorded for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorAttempt {
    /// 0-based slot index into the step's locator list
    pub slot: usize,
    pub strategy: LocatorStrategy,
    pub value: String,
    pub elapsed_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl std::fmt::Display for LocatorAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.success {
            write!(
                f,
                "slot {}: {}={} -> resolved in {}ms",
                self.slot + 1,
                self.strategy.as_str(),
                self.value,
                self.elapsed_ms
            )
        } else {
            write!(
                f,
                "slot {}: {}={} -> {} ({}ms)",
                self.slot + 1,
                self.strategy.as_str(),
                self.value,
                self.error.as_deref().unwrap_or("not found"),
                self.elapsed_ms
            )
        }
    }
}

/// Mutable outcome of one step execution
///
/// Written exactly once per execution: `start()` moves Pending to
/// Running, and exactly one of `pass()`/`fail()`/`skip()` finalizes it.
/// A second finalize attempt is ignored and logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub status: StepStatus,
    pub message: String,
    pub attempts: Vec<LocatorAttempt>,
    pub screenshot_before: Option<String>,
    pub screenshot_after: Option<String>,
    pub duration_ms: Option<u64>,
}

impl Default for StepOutcome {
    fn default() -> Self {
        Self {
            status: StepStatus::Pending,
            message: String::new(),
            attempts: Vec::new(),
            screenshot_before: None,
            screenshot_after: None,
            duration_ms: None,
        }
    }
}

impl StepOutcome {
    pub fn start(&mut self) {
        if self.status == StepStatus::Pending {
            self.status = StepStatus::Running;
        }
    }

    pub fn pass(&mut self, message: impl Into<String>) {
        self.finalize(StepStatus::Passed, message.into());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.finalize(StepStatus::Failed, message.into());
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.finalize(StepStatus::Skipped, reason.into());
    }

    fn finalize(&mut self, status: StepStatus, message: String) {
        if self.status.is_terminal() {
            log::warn!(
                "step outcome already finalized as {:?}, ignoring {:?}",
                self.status,
                status
            );
            return;
        }
        self.status = status;
        self.message = message;
    }

    /// Reset to Pending so the same case can be re-executed.
    pub fn reset(&mut self) {
        *self = StepOutcome::default();
    }
}

/// One test step from the tabular definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Sequence number as written in the test definition (1-based)
    pub number: u32,
    pub description: String,
    pub action: ActionKind,
    /// Up to three ordered fallback locators; empty slots are valid
    #[serde(default)]
    pub locators: [Option<Locator>; 3],
    /// Input data (text to type, wait seconds, app id, ...)
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub outcome: StepOutcome,
}

impl Step {
    pub fn new(number: u32, description: impl Into<String>, action: ActionKind) -> Self {
        Self {
            number,
            description: description.into(),
            action,
            locators: [None, None, None],
            input: None,
            outcome: StepOutcome::default(),
        }
    }

    pub fn with_locator(mut self, slot: usize, locator: Locator) -> Self {
        self.locators[slot] = Some(locator);
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Whether at least one locator slot is populated
    pub fn has_locator(&self) -> bool {
        self.locators.iter().any(|l| l.is_some())
    }

    pub fn input_str(&self) -> &str {
        self.input.as_deref().unwrap_or("").trim()
    }
}

/// One test case: an ordered sequence of steps for one app module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub platform: Platform,
    /// Module / screen name this case exercises (used for grouping)
    pub module: String,
    /// Steps in definition order; the engine never reorders them
    pub steps: Vec<Step>,
}

impl TestCase {
    pub fn new(platform: Platform, module: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            platform,
            module: module.into(),
            steps,
        }
    }
}

/// Overall status of a finished test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failed,
}

/// Step counts for a case or a suite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounts {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl StepCounts {
    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.skipped
    }

    pub fn add(&mut self, other: &StepCounts) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Immutable result snapshot for one completed (or aborted) test case
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub run_id: String,
    pub platform: Platform,
    pub module: String,
    pub status: CaseStatus,
    pub counts: StepCounts,
    /// Fatal bring-up/cancellation error, if the case was aborted
    pub error: Option<String>,
    pub steps: Vec<StepReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Per-step entry inside a [`TestResult`] snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub number: u32,
    pub description: String,
    pub action: ActionKind,
    pub status: StepStatus,
    pub message: String,
    pub attempts: Vec<LocatorAttempt>,
    pub screenshot_before: Option<String>,
    pub screenshot_after: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Suite-level rollup across test cases
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteSummary {
    pub total_cases: u32,
    pub passed_cases: u32,
    pub failed_cases: u32,
    pub counts: StepCounts,
    /// Step counts grouped by module name
    pub modules: BTreeMap<String, StepCounts>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_written_once() {
        let mut outcome = StepOutcome::default();
        outcome.start();
        assert_eq!(outcome.status, StepStatus::Running);

        outcome.pass("ok");
        assert_eq!(outcome.status, StepStatus::Passed);

        // A second finalize must not overwrite the first
        outcome.fail("late failure");
        assert_eq!(outcome.status, StepStatus::Passed);
        assert_eq!(outcome.message, "ok");
    }

    #[test]
    fn test_outcome_reset_allows_reexecution() {
        let mut outcome = StepOutcome::default();
        outcome.start();
        outcome.fail("boom");
        outcome.reset();
        assert_eq!(outcome.status, StepStatus::Pending);
        outcome.start();
        outcome.pass("ok");
        assert_eq!(outcome.status, StepStatus::Passed);
    }

    #[test]
    fn test_swipe_direction_parse() {
        assert_eq!(SwipeDirection::parse(""), Some(SwipeDirection::Up));
        assert_eq!(SwipeDirection::parse("Down"), Some(SwipeDirection::Down));
        assert_eq!(SwipeDirection::parse(" left "), Some(SwipeDirection::Left));
        assert_eq!(SwipeDirection::parse("diagonal"), None);
    }

    #[test]
    fn test_step_counts_total() {
        let counts = StepCounts {
            passed: 2,
            failed: 1,
            skipped: 3,
        };
        assert_eq!(counts.total(), 6);
    }

    #[test]
    fn test_case_roundtrip_json() {
        let case = TestCase::new(
            Platform::Android,
            "login",
            vec![Step::new(1, "Tap login", ActionKind::Click)
                .with_locator(0, Locator::new(LocatorStrategy::Id, "btn_login"))],
        );
        let json = serde_json::to_string(&case).unwrap();
        let back: TestCase = serde_json::from_str(&json).unwrap();
        assert_eq!(back.steps.len(), 1);
        assert_eq!(back.steps[0].outcome.status, StepStatus::Pending);
        assert!(back.steps[0].has_locator());
    }
}
