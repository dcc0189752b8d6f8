//! Result aggregation
//!
//! Deterministic summary counts from step outcomes. A case is passed
//! iff no step failed and the run saw no fatal error; skipped steps
//! never count toward passes. One immutable snapshot is produced per
//! case, whether the case finished normally or was aborted.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::model::{
    CaseStatus, StepCounts, StepReport, StepStatus, SuiteSummary, TestCase, TestResult,
};

/// Snapshot a case's step outcomes into an immutable result
pub fn finalize_case(
    run_id: &str,
    case: &TestCase,
    started_at: DateTime<Utc>,
    error: Option<String>,
) -> TestResult {
    let mut counts = StepCounts::default();
    for step in &case.steps {
        match step.outcome.status {
            StepStatus::Passed => counts.passed += 1,
            StepStatus::Failed => counts.failed += 1,
            StepStatus::Skipped => counts.skipped += 1,
            StepStatus::Pending | StepStatus::Running => {
                // The engine finalizes every step before aggregation;
                // a non-terminal status here is a sequencing bug.
                debug_assert!(false, "step {} left non-terminal", step.number);
                counts.skipped += 1;
            }
        }
    }

    let status = if counts.failed == 0 && error.is_none() {
        CaseStatus::Passed
    } else {
        CaseStatus::Failed
    };

    let steps = case
        .steps
        .iter()
        .map(|step| StepReport {
            number: step.number,
            description: step.description.clone(),
            action: step.action,
            status: step.outcome.status,
            message: step.outcome.message.clone(),
            attempts: step.outcome.attempts.clone(),
            screenshot_before: step.outcome.screenshot_before.clone(),
            screenshot_after: step.outcome.screenshot_after.clone(),
            duration_ms: step.outcome.duration_ms,
        })
        .collect();

    let finished_at = Utc::now();
    TestResult {
        run_id: run_id.to_string(),
        platform: case.platform,
        module: case.module.clone(),
        status,
        counts,
        error,
        steps,
        started_at,
        finished_at,
        duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
    }
}

/// Roll case results into a suite summary with a per-module breakdown
pub fn suite_summary(results: &[TestResult]) -> SuiteSummary {
    let mut counts = StepCounts::default();
    let mut modules: BTreeMap<String, StepCounts> = BTreeMap::new();
    let mut passed_cases = 0;
    let mut failed_cases = 0;
    let mut duration_ms = 0;

    for result in results {
        counts.add(&result.counts);
        modules
            .entry(result.module.clone())
            .or_default()
            .add(&result.counts);
        match result.status {
            CaseStatus::Passed => passed_cases += 1,
            CaseStatus::Failed => failed_cases += 1,
        }
        duration_ms += result.duration_ms;
    }

    SuiteSummary {
        total_cases: results.len() as u32,
        passed_cases,
        failed_cases,
        counts,
        modules,
        duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionKind, Platform, Step};

    fn case_with_statuses(module: &str, statuses: &[StepStatus]) -> TestCase {
        let steps = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let mut step = Step::new(i as u32 + 1, "step", ActionKind::Click);
                step.outcome.start();
                match status {
                    StepStatus::Passed => step.outcome.pass("ok"),
                    StepStatus::Failed => step.outcome.fail("boom"),
                    StepStatus::Skipped => step.outcome.skip("skipped"),
                    _ => {}
                }
                step
            })
            .collect();
        TestCase::new(Platform::Android, module, steps)
    }

    #[test]
    fn test_counts_cover_every_step() {
        let case = case_with_statuses(
            "login",
            &[
                StepStatus::Passed,
                StepStatus::Failed,
                StepStatus::Skipped,
                StepStatus::Skipped,
            ],
        );
        let result = finalize_case("run-1", &case, Utc::now(), None);

        assert_eq!(result.counts.passed, 1);
        assert_eq!(result.counts.failed, 1);
        assert_eq!(result.counts.skipped, 2);
        assert_eq!(result.counts.total() as usize, case.steps.len());
        assert_eq!(result.status, CaseStatus::Failed);
    }

    #[test]
    fn test_skipped_steps_do_not_pass_a_case() {
        let case = case_with_statuses("login", &[StepStatus::Passed, StepStatus::Skipped]);
        let result = finalize_case("run-1", &case, Utc::now(), None);
        // No failures and no fatal error: still a pass, skips are not failures
        assert_eq!(result.status, CaseStatus::Passed);
    }

    #[test]
    fn test_abort_error_fails_case_even_without_failed_steps() {
        let case = case_with_statuses("login", &[StepStatus::Skipped, StepStatus::Skipped]);
        let result = finalize_case(
            "run-1",
            &case,
            Utc::now(),
            Some("session could not be created".to_string()),
        );
        assert_eq!(result.status, CaseStatus::Failed);
        assert_eq!(result.counts.failed, 0);
        assert_eq!(result.counts.skipped, 2);
    }

    #[test]
    fn test_suite_summary_groups_by_module() {
        let login = finalize_case(
            "run-1",
            &case_with_statuses("login", &[StepStatus::Passed, StepStatus::Passed]),
            Utc::now(),
            None,
        );
        let checkout = finalize_case(
            "run-1",
            &case_with_statuses("checkout", &[StepStatus::Failed]),
            Utc::now(),
            None,
        );

        let summary = suite_summary(&[login, checkout]);
        assert_eq!(summary.total_cases, 2);
        assert_eq!(summary.passed_cases, 1);
        assert_eq!(summary.failed_cases, 1);
        assert_eq!(summary.counts.passed, 2);
        assert_eq!(summary.counts.failed, 1);
        assert_eq!(summary.modules["login"].passed, 2);
        assert_eq!(summary.modules["checkout"].failed, 1);
    }
}
