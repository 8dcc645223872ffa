//! Isolate process: reads one `IsolateRequest` from stdin, writes one
//! `IsolateResponse` to stdout and exits. The host kills it on timeout.

use anyhow::{Context, Result};
use gradebox_common::protocol::{decode_message, IsolateRequest, IsolateResponse};
use gradebox_worker::{isolate, ISOLATE_STACK_BYTES};
use std::io::{Read, Write};
use tracing::{debug, error};

fn main() -> Result<()> {
    // stdout carries the response, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut input = Vec::new();
    std::io::stdin()
        .read_to_end(&mut input)
        .context("Failed to read request from stdin")?;

    let response = run_on_large_stack(input)?;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &response).context("Failed to write response")?;
    stdout.flush().context("Failed to flush response")?;
    Ok(())
}

/// Decoding and evaluation both recurse on nested values
fn run_on_large_stack(input: Vec<u8>) -> Result<IsolateResponse> {
    let handle = std::thread::Builder::new()
        .name("isolate".to_string())
        .stack_size(ISOLATE_STACK_BYTES)
        .spawn(move || serve(&input))
        .context("Failed to spawn isolate thread")?;

    Ok(handle.join().unwrap_or_else(|_| IsolateResponse::Internal {
        message: "isolate thread panicked".to_string(),
    }))
}

fn serve(input: &[u8]) -> IsolateResponse {
    match decode_message::<IsolateRequest>(input) {
        Ok(request) => {
            debug!(
                function = %request.function_name,
                source_bytes = request.source.len(),
                invoke = request.args.is_some(),
                "Serving isolate request"
            );
            isolate::execute(&request)
        }
        Err(e) => {
            error!(error = %e, "Malformed isolate request");
            IsolateResponse::Internal {
                message: format!("malformed request: {}", e),
            }
        }
    }
}
