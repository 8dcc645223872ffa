/// Test Evaluator - Classification and Scoring Logic
///
/// **Core Responsibility:**
/// Turn a raw invocation outcome into a `PerCaseResult` and aggregate the
/// results of a run.
///
/// **Critical Properties:**
/// - Knows nothing about processes or JavaScript engines
/// - Pure function: (invocation, test case) → result
///
/// **Classification Rules:**
/// - Returned value → deep-compare with `expected` → Passed / Failed
/// - Thrown error → RuntimeError with the error's display string
/// - Budget exceeded → Timeout
///
/// `actual` is kept for both Passed and Failed so it can be displayed.

use crate::engine::Invocation;
use gradebox_common::compare::{deep_equal_with, CompareOptions};
use gradebox_common::types::{CaseStatus, PerCaseResult, RunSummary, TestCase};
use std::time::Duration;

pub fn evaluate_test(
    case_index: usize,
    test_case: &TestCase,
    invocation: Invocation,
    options: &CompareOptions,
    budget: Duration,
) -> PerCaseResult {
    let (status, actual, error_message, console_output, elapsed) = match invocation {
        Invocation::Returned {
            value,
            console,
            elapsed,
        } => {
            let status = if deep_equal_with(&test_case.expected, &value, options) {
                CaseStatus::Passed
            } else {
                CaseStatus::Failed
            };
            (status, Some(value), None, console, elapsed)
        }
        Invocation::Threw {
            message,
            console,
            elapsed,
        } => (CaseStatus::RuntimeError, None, Some(message), console, elapsed),
        Invocation::TimedOut { elapsed } => (
            CaseStatus::Timeout,
            None,
            Some(format!("exceeded the {}ms time budget", budget.as_millis())),
            Vec::new(),
            elapsed,
        ),
    };

    PerCaseResult {
        case_index,
        test_case: test_case.clone(),
        status,
        actual,
        error_message,
        console_output,
        execution_time_ms: elapsed.as_millis() as u64,
    }
}

/// Summary counts for the top-line "N/M passed" message
pub fn aggregate_results(results: &[PerCaseResult]) -> RunSummary {
    RunSummary {
        passed_count: results
            .iter()
            .filter(|r| r.status == CaseStatus::Passed)
            .count(),
        total_count: results.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradebox_common::Value;

    /// Helper to create a test case
    fn make_test_case(input: Vec<Value>, expected: Value) -> TestCase {
        TestCase {
            input,
            expected,
            description: "case".to_string(),
        }
    }

    /// Helper to create a returned invocation
    fn make_returned(value: Value, ms: u64) -> Invocation {
        Invocation::Returned {
            value,
            console: Vec::new(),
            elapsed: Duration::from_millis(ms),
        }
    }

    fn budget() -> Duration {
        Duration::from_millis(3000)
    }

    #[test]
    fn test_evaluate_test_pass() {
        let case = make_test_case(vec![2i64.into(), 3i64.into()], 5i64.into());
        let result = evaluate_test(0, &case, make_returned(5i64.into(), 12), &CompareOptions::default(), budget());

        assert_eq!(result.status, CaseStatus::Passed);
        assert_eq!(result.actual, Some(Value::Number(5.0)));
        assert_eq!(result.error_message, None);
        assert_eq!(result.execution_time_ms, 12);
    }

    #[test]
    fn test_evaluate_test_mismatch_keeps_actual() {
        let case = make_test_case(vec![2i64.into(), 3i64.into()], 5i64.into());
        let result = evaluate_test(0, &case, make_returned((-1i64).into(), 3), &CompareOptions::default(), budget());

        assert_eq!(result.status, CaseStatus::Failed);
        assert_eq!(result.actual, Some(Value::Number(-1.0)));
    }

    #[test]
    fn test_evaluate_test_runtime_error() {
        let case = make_test_case(vec![], Value::Null);
        let invocation = Invocation::Threw {
            message: "Error: x".to_string(),
            console: vec!["before".to_string()],
            elapsed: Duration::from_millis(4),
        };
        let result = evaluate_test(3, &case, invocation, &CompareOptions::default(), budget());

        assert_eq!(result.status, CaseStatus::RuntimeError);
        assert_eq!(result.actual, None);
        assert_eq!(result.error_message.as_deref(), Some("Error: x"));
        assert_eq!(result.console_output, vec!["before".to_string()]);
        assert_eq!(result.case_index, 3);
    }

    #[test]
    fn test_evaluate_test_timeout() {
        let case = make_test_case(vec![], Value::Null);
        let invocation = Invocation::TimedOut { elapsed: Duration::from_millis(3001) };
        let result = evaluate_test(0, &case, invocation, &CompareOptions::default(), budget());

        assert_eq!(result.status, CaseStatus::Timeout);
        assert_eq!(result.actual, None);
        assert!(result.error_message.unwrap().contains("3000ms"));
    }

    #[test]
    fn test_undefined_is_not_null() {
        let case = make_test_case(vec![], Value::Null);
        let result = evaluate_test(0, &case, make_returned(Value::Undefined, 1), &CompareOptions::default(), budget());
        assert_eq!(result.status, CaseStatus::Failed);
    }

    #[test]
    fn test_compare_options_respected() {
        let case = make_test_case(vec![], Value::Number(f64::NAN));
        let strict = CompareOptions { nan_equals_nan: false, ..CompareOptions::default() };
        let loose = evaluate_test(0, &case, make_returned(Value::Number(f64::NAN), 1), &CompareOptions::default(), budget());
        let exact = evaluate_test(0, &case, make_returned(Value::Number(f64::NAN), 1), &strict, budget());
        assert_eq!(loose.status, CaseStatus::Passed);
        assert_eq!(exact.status, CaseStatus::Failed);
    }

    #[test]
    fn test_aggregate_results() {
        let case = make_test_case(vec![], 1i64.into());
        let results = vec![
            evaluate_test(0, &case, make_returned(1i64.into(), 1), &CompareOptions::default(), budget()),
            evaluate_test(1, &case, make_returned(2i64.into(), 1), &CompareOptions::default(), budget()),
            evaluate_test(2, &case, Invocation::TimedOut { elapsed: budget() }, &CompareOptions::default(), budget()),
        ];
        let summary = aggregate_results(&results);
        assert_eq!(summary.passed_count, 1);
        assert_eq!(summary.total_count, 3);
        assert!(!summary.all_passed());
        assert_eq!(aggregate_results(&[]), RunSummary::default());
    }
}
