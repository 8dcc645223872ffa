mod commands;
mod interactive;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gradebox")]
#[command(about = "Gradebox - Grade JavaScript solutions against problem test cases", long_about = None)]
struct Cli {
    /// Grader configuration file (defaults to config/gradebox.json when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a source file (or the starter code) once
    Run {
        /// Problem definition JSON
        #[arg(short, long)]
        problem: PathBuf,

        /// Source file to grade; defaults to the starter code
        #[arg(short, long, conflicts_with = "solution")]
        source: Option<PathBuf>,

        /// Grade the reference solution instead
        #[arg(long, default_value = "false")]
        solution: bool,

        /// Print the report as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Check that every problem's reference solution passes its own tests
    Verify {
        /// Problem definition JSON files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Interactive session: edit, run and toggle the solution from stdin
    Session {
        /// Problem definition JSON
        #[arg(short, long)]
        problem: PathBuf,

        /// Initial source file; defaults to the starter code
        #[arg(short, long)]
        source: Option<PathBuf>,
    },

    /// Print a problem's statement and examples
    Show {
        /// Problem definition JSON
        #[arg(short, long)]
        problem: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is reserved for transcripts
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let success = match cli.command {
        Commands::Run {
            problem,
            source,
            solution,
            json,
        } => commands::run_problem(config_path, &problem, source.as_deref(), solution, json).await?,
        Commands::Verify { files } => commands::verify_problems(config_path, &files).await?,
        Commands::Session { problem, source } => {
            interactive::run_session(config_path, &problem, source.as_deref()).await?;
            true
        }
        Commands::Show { problem } => {
            commands::show_problem(&problem)?;
            true
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
