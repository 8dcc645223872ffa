/// Grader - High-Level Orchestration
///
/// **Responsibility:**
/// Coordinate the sandbox, runner and evaluator to produce a `RunOutcome`.
///
/// **Architecture:**
/// 1. Compile the source once through the `Sandbox` (engine.rs)
/// 2. Drive every test case through the runner (runner.rs)
/// 3. Aggregate with the evaluator (evaluator.rs)
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's job)
/// - How correctness is judged (evaluator's job)

use crate::engine::Sandbox;
use crate::evaluator;
use crate::runner::{self, CancelToken};
use chrono::Utc;
use gradebox_common::types::{Mode, ProblemDefinition, RunOutcome, RunReport};
use gradebox_common::GraderConfig;
use tracing::{info, warn};
use uuid::Uuid;

pub struct Grader<S: Sandbox> {
    sandbox: S,
    config: GraderConfig,
}

impl<S: Sandbox> Grader<S> {
    pub fn new(sandbox: S, config: GraderConfig) -> Self {
        Self { sandbox, config }
    }

    pub fn config(&self) -> &GraderConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    /// Compile `source` and run every test case of `problem` against it
    ///
    /// A compile error aborts the run before any case is attempted.
    #[tracing::instrument(skip_all, fields(problem = %problem.title, function = %problem.function_name))]
    pub async fn grade(
        &self,
        problem: &ProblemDefinition,
        source: &str,
        cancel: &CancelToken,
    ) -> RunOutcome {
        let compiled = match self.sandbox.compile(source, &problem.function_name).await {
            Ok(compiled) => compiled,
            Err(error) => {
                warn!(kind = ?error.kind, error = %error, "Compilation failed; no test cases run");
                return RunOutcome::CompileFailed { error };
            }
        };

        let run = runner::run_all(
            &self.sandbox,
            &compiled,
            &problem.test_cases,
            self.config.time_budget(),
            &self.config.compare,
            cancel,
        )
        .await;

        if run.cancelled {
            return RunOutcome::Cancelled { results: run.results };
        }

        let summary = evaluator::aggregate_results(&run.results);
        info!(
            passed = summary.passed_count,
            total = summary.total_count,
            "Grading completed"
        );
        RunOutcome::Completed {
            results: run.results,
            summary,
        }
    }

    /// Grade and wrap the outcome with its identity and timing
    pub async fn grade_report(
        &self,
        problem: &ProblemDefinition,
        source: &str,
        mode: Mode,
        cancel: &CancelToken,
    ) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let outcome = self.grade(problem, source, cancel).await;
        let finished_at = Utc::now();

        info!(
            run_id = %run_id,
            mode = ?mode,
            execution_ms = (finished_at - started_at).num_milliseconds(),
            "Run finished"
        );

        RunReport {
            run_id,
            mode,
            source: source.to_string(),
            started_at,
            finished_at,
            outcome,
        }
    }
}
