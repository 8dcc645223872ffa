// Test case orchestration: drives a compiled function through every case

use crate::engine::{CompiledFunction, Sandbox};
use crate::evaluator;
use gradebox_common::compare::CompareOptions;
use gradebox_common::types::{CaseStatus, PerCaseResult, TestCase};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cooperative cancellation flag shared between a run and its owner
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Results of a run that may have been cut short
#[derive(Debug, Clone, PartialEq)]
pub struct CaseRun {
    pub results: Vec<PerCaseResult>,
    pub cancelled: bool,
}

/// Run every test case in declared order
///
/// Each case gets its own invocation; a failure, error or timeout in one
/// case never stops the next. The token is checked before each case.
pub async fn run_all<S: Sandbox>(
    sandbox: &S,
    compiled: &CompiledFunction,
    test_cases: &[TestCase],
    budget: Duration,
    options: &CompareOptions,
    cancel: &CancelToken,
) -> CaseRun {
    let mut results = Vec::with_capacity(test_cases.len());

    for (case_index, test_case) in test_cases.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(
                completed = results.len(),
                total = test_cases.len(),
                "Run cancelled, skipping remaining cases"
            );
            return CaseRun { results, cancelled: true };
        }

        let invocation = sandbox.invoke(compiled, &test_case.input, budget).await;
        let result = evaluator::evaluate_test(case_index, test_case, invocation, options, budget);

        match result.status {
            CaseStatus::Passed => debug!(
                case_index,
                execution_ms = result.execution_time_ms,
                "Case passed"
            ),
            status => info!(
                case_index,
                status = ?status,
                execution_ms = result.execution_time_ms,
                "Case did not pass"
            ),
        }

        results.push(result);
    }

    CaseRun { results, cancelled: false }
}
