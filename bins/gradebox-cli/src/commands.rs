// CLI commands for grading problems
use anyhow::{bail, Context, Result};
use gradebox_common::config::DEFAULT_CONFIG_PATH;
use gradebox_common::types::{CaseStatus, Mode, ProblemDefinition, RunReport};
use gradebox_common::GraderConfig;
use gradebox_worker::engine::{ProcessSandbox, Sandbox};
use gradebox_worker::executor::Grader;
use gradebox_worker::reporter::{DisplayModel, Reporter};
use gradebox_worker::runner::CancelToken;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const WORKER_BIN_ENV: &str = "GRADEBOX_WORKER_BIN";
const TIME_BUDGET_ENV: &str = "GRADEBOX_TIME_BUDGET_MS";

/// Load the grader configuration and apply environment overrides
pub fn load_config(config_path: Option<&Path>) -> Result<GraderConfig> {
    let mut config = match config_path {
        Some(path) => GraderConfig::load(path)?,
        None => GraderConfig::load_or_default(Path::new(DEFAULT_CONFIG_PATH))?,
    };

    if let Ok(raw) = std::env::var(TIME_BUDGET_ENV) {
        config.time_budget_ms = raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number of milliseconds, got '{}'", TIME_BUDGET_ENV, raw))?;
    }
    if let Ok(path) = std::env::var(WORKER_BIN_ENV) {
        config.worker_path = Some(PathBuf::from(path));
    }

    config.validate()?;
    debug!(time_budget_ms = config.time_budget_ms, "Configuration loaded");
    Ok(config)
}

/// Worker binary: configured path, else next to this executable
fn resolve_worker(config: &GraderConfig) -> Result<PathBuf> {
    if let Some(path) = &config.worker_path {
        return Ok(path.clone());
    }
    let exe = std::env::current_exe().context("Failed to locate the gradebox executable")?;
    let dir = exe
        .parent()
        .context("gradebox executable has no parent directory")?;
    Ok(dir.join(format!("gradebox-worker{}", std::env::consts::EXE_SUFFIX)))
}

pub fn make_grader(config: GraderConfig) -> Result<Grader<ProcessSandbox>> {
    let worker = resolve_worker(&config)?;
    let sandbox = ProcessSandbox::new(&worker, &config).with_context(|| {
        format!("Build the isolate with `cargo build -p gradebox-worker` or set {}", WORKER_BIN_ENV)
    })?;
    info!(worker = %sandbox.worker_path().display(), "Using isolate worker");
    Ok(Grader::new(sandbox, config))
}

pub fn load_problem(path: &Path) -> Result<ProblemDefinition> {
    ProblemDefinition::load(path).with_context(|| format!("Invalid problem file {}", path.display()))
}

pub fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read source file {}", path.display()))
}

pub fn reporter_for(problem: &ProblemDefinition, config: &GraderConfig) -> Reporter {
    Reporter::new(&problem.function_name).with_compare_options(config.compare)
}

#[derive(Serialize)]
struct JsonReport<'a> {
    report: &'a RunReport,
    display: &'a DisplayModel,
}

/// Grade once; returns whether every case passed
pub async fn run_problem(
    config_path: Option<&Path>,
    problem_path: &Path,
    source_path: Option<&Path>,
    solution: bool,
    json: bool,
) -> Result<bool> {
    let config = load_config(config_path)?;
    let problem = load_problem(problem_path)?;
    let reporter = reporter_for(&problem, &config);
    let grader = make_grader(config)?;

    let (source, mode) = match (source_path, solution) {
        (_, true) => (problem.solution_code.clone(), Mode::ShowingSolution),
        (Some(path), false) => (read_source(path)?, Mode::Editing),
        (None, false) => (problem.starter_code.clone(), Mode::Editing),
    };

    let report = grader
        .grade_report(&problem, &source, mode, &CancelToken::new())
        .await;
    let display = reporter.format_report(&report, false);

    if json {
        let out = serde_json::to_string_pretty(&JsonReport {
            report: &report,
            display: &display,
        })
        .context("Failed to serialize report")?;
        println!("{}", out);
    } else {
        println!("{} ({})", problem.title, problem.difficulty);
        println!();
        print!("{}", display);
    }

    Ok(report.outcome.all_passed())
}

/// Authoring check: every reference solution passes and every starter compiles
pub async fn verify_problems(config_path: Option<&Path>, files: &[PathBuf]) -> Result<bool> {
    if files.is_empty() {
        bail!("No problem files given");
    }

    let config = load_config(config_path)?;
    let grader = make_grader(config)?;
    let mut failures = 0usize;

    for path in files {
        let problem = match load_problem(path) {
            Ok(problem) => problem,
            Err(e) => {
                println!("✗ {}: {:#}", path.display(), e);
                failures += 1;
                continue;
            }
        };

        let outcome = grader
            .grade(&problem, &problem.solution_code, &CancelToken::new())
            .await;
        let starter = grader
            .sandbox()
            .compile(&problem.starter_code, &problem.function_name)
            .await;

        let passed = outcome
            .results()
            .iter()
            .filter(|r| r.status == CaseStatus::Passed)
            .count();
        let total = problem.test_cases.len();

        match (outcome.all_passed(), starter) {
            (true, Ok(_)) => println!("✓ {}: {}/{} passed", problem.title, passed, total),
            (false, _) => {
                failures += 1;
                println!("✗ {}: reference solution {}/{} passed", problem.title, passed, total);
                let display = reporter_for(&problem, grader.config()).format_outcome(&outcome);
                for line in display.to_string().lines() {
                    println!("    {}", line);
                }
            }
            (true, Err(e)) => {
                failures += 1;
                println!("✗ {}: starter code does not compile ({:?}): {}", problem.title, e.kind, e);
            }
        }
    }

    println!();
    println!("{}/{} problems verified", files.len() - failures, files.len());
    Ok(failures == 0)
}

pub fn show_problem(problem_path: &Path) -> Result<()> {
    let problem = load_problem(problem_path)?;

    println!("{} ({})", problem.title, problem.difficulty);
    println!();
    println!("{}", problem.description.trim_end());

    for (i, example) in problem.examples.iter().enumerate() {
        println!();
        println!("Example {}:", i + 1);
        println!("  Input: {}", example.input);
        println!("  Output: {}", example.output);
        if let Some(explanation) = &example.explanation {
            println!("  Explanation: {}", explanation);
        }
    }

    println!();
    println!("Function: {} ({} test cases)", problem.function_name, problem.test_cases.len());
    Ok(())
}
