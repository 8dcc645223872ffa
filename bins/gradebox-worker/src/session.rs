/// Problem Session - editor state for one problem
///
/// **State:**
/// - `current_source` starts as the problem's starter code
/// - `mode` is `Editing` or `ShowingSolution`
/// - `last_run` holds the most recent finished run, if any
///
/// **Run Protocol:**
/// Hosts with their own event loop use `begin_run` / `finish_run` /
/// `cancel_run`; only one run may be in flight and a result whose ticket
/// is no longer current is rejected. `run` composes the three.

use crate::engine::Sandbox;
use crate::executor::Grader;
use crate::runner::CancelToken;
use chrono::{DateTime, Utc};
use gradebox_common::types::{Mode, ProblemDefinition, RunOutcome, RunReport};
use gradebox_common::GraderConfig;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a run is already in progress")]
    RunInProgress,
    #[error("run {generation} was cancelled or superseded")]
    StaleRun { generation: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Drop the last results on edit instead of marking them stale
    pub clear_results_on_edit: bool,
}

impl From<&GraderConfig> for SessionOptions {
    fn from(config: &GraderConfig) -> Self {
        Self {
            clear_results_on_edit: config.clear_results_on_edit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub current_source: String,
    pub mode: Mode,
    pub last_run: Option<RunReport>,
    /// Learner text kept aside while the solution is shown
    pub cached_learner_source: Option<String>,
    pub run_in_flight: bool,
}

impl SessionState {
    /// True when the last results were produced from different source text
    pub fn results_are_stale(&self) -> bool {
        self.last_run
            .as_ref()
            .is_some_and(|report| report.source != self.current_source)
    }
}

/// Handle for one in-flight run
#[derive(Debug, Clone)]
pub struct RunTicket {
    generation: u64,
    run_id: Uuid,
    source: String,
    mode: Mode,
    started_at: DateTime<Utc>,
    cancel: CancelToken,
}

impl RunTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Source snapshot taken when the run began
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

struct InFlight {
    generation: u64,
    cancel: CancelToken,
}

pub struct ProblemSession {
    problem: ProblemDefinition,
    options: SessionOptions,
    state: SessionState,
    generation: u64,
    in_flight: Option<InFlight>,
}

impl ProblemSession {
    pub fn new(problem: ProblemDefinition, options: SessionOptions) -> Self {
        let state = SessionState {
            current_source: problem.starter_code.clone(),
            mode: Mode::Editing,
            last_run: None,
            cached_learner_source: None,
            run_in_flight: false,
        };
        Self {
            problem,
            options,
            state,
            generation: 0,
            in_flight: None,
        }
    }

    pub fn problem(&self) -> &ProblemDefinition {
        &self.problem
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn set_source(&mut self, text: impl Into<String>) {
        self.state.current_source = text.into();
        if self.options.clear_results_on_edit && self.state.last_run.take().is_some() {
            debug!("Cleared previous results after edit");
        }
    }

    /// Switch between the learner's text and the reference solution
    ///
    /// Returning to `Editing` restores the learner's text exactly; edits
    /// made while the solution was shown are discarded.
    pub fn toggle_solution(&mut self) -> Mode {
        match self.state.mode {
            Mode::Editing => {
                let learner = std::mem::replace(
                    &mut self.state.current_source,
                    self.problem.solution_code.clone(),
                );
                self.state.cached_learner_source = Some(learner);
                self.state.mode = Mode::ShowingSolution;
            }
            Mode::ShowingSolution => {
                let learner = self
                    .state
                    .cached_learner_source
                    .take()
                    .unwrap_or_else(|| self.problem.starter_code.clone());
                self.state.current_source = learner;
                self.state.mode = Mode::Editing;
            }
        }
        if self.options.clear_results_on_edit {
            self.state.last_run = None;
        }
        info!(mode = ?self.state.mode, "Toggled solution view");
        self.state.mode
    }

    pub fn begin_run(&mut self) -> Result<RunTicket, SessionError> {
        if self.in_flight.is_some() {
            return Err(SessionError::RunInProgress);
        }

        self.generation += 1;
        let ticket = RunTicket {
            generation: self.generation,
            run_id: Uuid::new_v4(),
            source: self.state.current_source.clone(),
            mode: self.state.mode,
            started_at: Utc::now(),
            cancel: CancelToken::new(),
        };
        self.in_flight = Some(InFlight {
            generation: ticket.generation,
            cancel: ticket.cancel.clone(),
        });
        self.state.run_in_flight = true;

        debug!(run_id = %ticket.run_id, generation = ticket.generation, "Run started");
        Ok(ticket)
    }

    /// Store the outcome of the run identified by `ticket`
    ///
    /// Cancelled outcomes end the run without replacing the last report.
    pub fn finish_run(&mut self, ticket: RunTicket, outcome: RunOutcome) -> Result<(), SessionError> {
        let current = self
            .in_flight
            .as_ref()
            .is_some_and(|flight| flight.generation == ticket.generation);
        if !current {
            warn!(run_id = %ticket.run_id, generation = ticket.generation, "Discarding stale run result");
            return Err(SessionError::StaleRun {
                generation: ticket.generation,
            });
        }

        self.in_flight = None;
        self.state.run_in_flight = false;

        if let RunOutcome::Cancelled { results } = &outcome {
            info!(run_id = %ticket.run_id, completed = results.len(), "Run cancelled");
            return Ok(());
        }

        info!(run_id = %ticket.run_id, all_passed = outcome.all_passed(), "Run stored");
        self.state.last_run = Some(RunReport {
            run_id: ticket.run_id,
            mode: ticket.mode,
            source: ticket.source,
            started_at: ticket.started_at,
            finished_at: Utc::now(),
            outcome,
        });
        Ok(())
    }

    /// Cancel the in-flight run; its result will be rejected on arrival
    pub fn cancel_run(&mut self) -> bool {
        match self.in_flight.take() {
            Some(flight) => {
                flight.cancel.cancel();
                self.state.run_in_flight = false;
                info!(generation = flight.generation, "Run cancelled by request");
                true
            }
            None => false,
        }
    }

    /// Grade the current source and store the report
    pub async fn run<S: Sandbox>(&mut self, grader: &Grader<S>) -> Result<&RunReport, SessionError> {
        let ticket = self.begin_run()?;
        let outcome = grader
            .grade(&self.problem, ticket.source(), ticket.cancel_token())
            .await;
        let generation = ticket.generation;
        self.finish_run(ticket, outcome)?;
        self.state
            .last_run
            .as_ref()
            .ok_or(SessionError::StaleRun { generation })
    }
}
