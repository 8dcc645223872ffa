// Interactive session loop: stdin commands drive one ProblemSession
use crate::commands;
use anyhow::{Context, Result};
use gradebox_common::types::{Mode, ProblemDefinition, RunOutcome};
use gradebox_worker::engine::ProcessSandbox;
use gradebox_worker::executor::Grader;
use gradebox_worker::reporter::Reporter;
use gradebox_worker::session::{ProblemSession, RunTicket, SessionError, SessionOptions};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const HELP: &str = "\
Commands:
  run           grade the current source
  toggle        switch between your code and the reference solution
  load <file>   replace the current source with the contents of <file>
  source        print the current source
  state         print the session state and last results
  cancel        cancel the run in progress
  help          show this message
  quit          leave the session";

enum Command {
    Run,
    Toggle,
    Load(String),
    Source,
    State,
    Cancel,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    match word {
        "" => Command::Empty,
        "run" | "r" => Command::Run,
        "toggle" | "t" => Command::Toggle,
        "load" | "l" if !rest.is_empty() => Command::Load(rest.to_string()),
        "source" | "s" => Command::Source,
        "state" => Command::State,
        "cancel" | "c" => Command::Cancel,
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    }
}

struct Interactive {
    session: ProblemSession,
    problem: Arc<ProblemDefinition>,
    grader: Arc<Grader<ProcessSandbox>>,
    reporter: Reporter,
    finished: mpsc::Sender<(RunTicket, RunOutcome)>,
}

pub async fn run_session(
    config_path: Option<&Path>,
    problem_path: &Path,
    source_path: Option<&Path>,
) -> Result<()> {
    let config = commands::load_config(config_path)?;
    let problem = commands::load_problem(problem_path)?;
    let reporter = commands::reporter_for(&problem, &config);
    let options = SessionOptions::from(&config);
    let grader = Arc::new(commands::make_grader(config)?);

    let mut session = ProblemSession::new(problem.clone(), options);
    if let Some(path) = source_path {
        session.set_source(commands::read_source(path)?);
    }

    let (tx, mut rx) = mpsc::channel(4);
    let mut app = Interactive {
        session,
        problem: Arc::new(problem),
        grader,
        reporter,
        finished: tx,
    };

    println!("{} ({})", app.problem.title, app.problem.difficulty);
    println!("Type `help` for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.context("Failed to read from stdin")?;
                let Some(line) = line else {
                    debug!("stdin closed");
                    break;
                };
                if !app.handle(parse_command(&line)) {
                    break;
                }
            }
            Some((ticket, outcome)) = rx.recv() => app.on_finished(ticket, outcome),
        }
    }

    app.session.cancel_run();
    Ok(())
}

impl Interactive {
    /// Returns false when the session should end
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Run => self.start_run(),
            Command::Toggle => {
                let mode = self.session.toggle_solution();
                match mode {
                    Mode::ShowingSolution => println!("Showing the reference solution:"),
                    Mode::Editing => println!("Back to your code:"),
                }
                println!("{}", self.session.state().current_source);
            }
            Command::Load(path) => match commands::read_source(Path::new(&path)) {
                Ok(text) => {
                    if self.session.state().mode == Mode::ShowingSolution {
                        println!("Note: edits to the solution are discarded when you toggle back");
                    }
                    self.session.set_source(text);
                    println!("Loaded {} bytes from {}", self.session.state().current_source.len(), path);
                    if self.session.state().results_are_stale() {
                        println!("Previous results are now out of date");
                    }
                }
                Err(e) => println!("{:#}", e),
            },
            Command::Source => println!("{}", self.session.state().current_source),
            Command::State => self.print_state(),
            Command::Cancel => {
                if self.session.cancel_run() {
                    println!("Run cancelled");
                } else {
                    println!("No run in progress");
                }
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => return false,
            Command::Empty => {}
            Command::Unknown(text) => println!("Unknown command `{}`; type `help`", text),
        }
        true
    }

    fn start_run(&mut self) {
        let ticket = match self.session.begin_run() {
            Ok(ticket) => ticket,
            Err(SessionError::RunInProgress) => {
                println!("A run is already in progress; use `cancel` to abandon it");
                return;
            }
            Err(e) => {
                println!("{}", e);
                return;
            }
        };

        println!("Running {} test case(s)...", self.problem.test_cases.len());
        debug!(run_id = %ticket.run_id(), generation = ticket.generation(), "dispatching run");
        let grader = Arc::clone(&self.grader);
        let problem = Arc::clone(&self.problem);
        let finished = self.finished.clone();
        tokio::spawn(async move {
            let outcome = grader
                .grade(&problem, ticket.source(), ticket.cancel_token())
                .await;
            if finished.send((ticket, outcome)).await.is_err() {
                debug!("session closed before run finished");
            }
        });
    }

    fn on_finished(&mut self, ticket: RunTicket, outcome: RunOutcome) {
        let cancelled = matches!(outcome, RunOutcome::Cancelled { .. });
        debug!(run_id = %ticket.run_id(), generation = ticket.generation(), cancelled, "run finished");
        match self.session.finish_run(ticket, outcome) {
            Ok(()) if cancelled => println!("Run cancelled"),
            Ok(()) => {
                let state = self.session.state();
                if let Some(report) = &state.last_run {
                    print!("{}", self.reporter.format_report(report, state.results_are_stale()));
                }
            }
            Err(SessionError::StaleRun { generation }) => {
                debug!(generation, "ignored result of an abandoned run");
            }
            Err(e) => warn!(error = %e, "unexpected session error"),
        }
    }

    fn print_state(&self) {
        let state = self.session.state();
        let mode = match state.mode {
            Mode::Editing => "editing",
            Mode::ShowingSolution => "showing solution",
        };
        println!("Mode: {}", mode);
        println!("Source: {} bytes", state.current_source.len());
        println!("Run in progress: {}", if state.run_in_flight { "yes" } else { "no" });
        match &state.last_run {
            Some(report) => {
                println!("Last run: {} at {}", report.run_id, report.finished_at.format("%H:%M:%S"));
                print!("{}", self.reporter.format_report(report, state.results_are_stale()));
            }
            None => println!("Last run: none"),
        }
    }
}
