/// Execution Engine - Abstraction for Code Execution
///
/// **Core Responsibility:**
/// Compile the learner's source and invoke the resulting function with test
/// inputs, returning raw outcomes.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (isolate process, in-memory script, ...)
/// - Engine does NOT know expected values
/// - Engine does NOT judge correctness
/// - Engine never lets an error from user code escape as a panic or `Err`
///
/// Production uses `ProcessSandbox`: one short-lived `gradebox-worker`
/// process per compile check or invocation, killed when it overruns its
/// time budget.

use anyhow::{bail, Context, Result};
use gradebox_common::protocol::{
    decode_message, IsolateLimits, IsolateRequest, IsolateResponse, WireValue,
};
use gradebox_common::types::{CompileError, CompileErrorKind};
use gradebox_common::{GraderConfig, Value};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, error, warn};

/// Default cap on one isolate response; larger ones are a sandbox failure
pub const MAX_RESPONSE_BYTES: u64 = 16 * 1024 * 1024;

/// A source that compiled and defines the expected function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFunction {
    pub source: Arc<str>,
    pub function_name: String,
}

/// Raw outcome of one invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Returned {
        value: Value,
        console: Vec<String>,
        elapsed: Duration,
    },
    Threw {
        message: String,
        console: Vec<String>,
        elapsed: Duration,
    },
    TimedOut { elapsed: Duration },
}

/// Narrow boundary between grading logic and untrusted code
#[allow(async_fn_in_trait)]
pub trait Sandbox {
    async fn compile(&self, source: &str, function_name: &str)
        -> Result<CompiledFunction, CompileError>;

    /// Arguments are copied into the sandbox; the caller's values are never
    /// handed to user code.
    async fn invoke(&self, function: &CompiledFunction, args: &[Value], budget: Duration)
        -> Invocation;
}

/// Kills the isolate if the exchange is abandoned before it exits
struct ChildGuard {
    child: Child,
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        // Best-effort; the child is also spawned with kill_on_drop
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "isolate already exited");
        }
    }
}

enum Exchange {
    Finished(IsolateResponse),
    TimedOut,
}

/// Sandbox backed by one isolate process per request
///
/// **Process Rules:**
/// 1. Spawns the worker binary with piped stdin/stdout/stderr
/// 2. Writes one `IsolateRequest`, closes stdin
/// 3. Reads one `IsolateResponse` from stdout
/// 4. Hard timeout via `tokio::time::timeout`; the process is killed on expiry
/// 5. Abnormal exits are reported with the tail of the isolate's stderr
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    worker_path: PathBuf,
    limits: IsolateLimits,
    compile_budget: Duration,
    max_source_bytes: usize,
    max_response_bytes: u64,
}

impl ProcessSandbox {
    pub fn new(worker_path: impl Into<PathBuf>, config: &GraderConfig) -> Result<Self> {
        let worker_path = worker_path.into();
        if !worker_path.exists() {
            bail!("Isolate worker binary not found: {}", worker_path.display());
        }
        Ok(Self {
            worker_path,
            limits: config.isolate_limits(),
            compile_budget: config.time_budget(),
            max_source_bytes: config.max_source_bytes,
            max_response_bytes: MAX_RESPONSE_BYTES,
        })
    }

    pub fn with_max_response_bytes(mut self, bytes: u64) -> Self {
        self.max_response_bytes = bytes;
        self
    }

    pub fn worker_path(&self) -> &Path {
        &self.worker_path
    }

    async fn exchange(&self, request: &IsolateRequest, budget: Duration) -> Result<Exchange> {
        let payload = serde_json::to_vec(request).context("Failed to encode isolate request")?;

        let child = Command::new(&self.worker_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn isolate {}", self.worker_path.display()))?;
        let mut guard = ChildGuard { child };

        let talk = talk_to(&mut guard.child, payload, self.max_response_bytes);
        let outcome = tokio::time::timeout(budget, talk).await;
        match outcome {
            Ok(Ok((status, stdout, stderr))) => {
                if !stderr.is_empty() {
                    debug!(stderr = %String::from_utf8_lossy(&stderr), "isolate stderr");
                }
                match decode_response(stdout).await? {
                    Ok(response) => Ok(Exchange::Finished(response)),
                    Err(e) => {
                        let tail = String::from_utf8_lossy(&stderr);
                        let last = tail.lines().last().unwrap_or("").trim().to_string();
                        bail!(
                            "isolate exited with {} without a readable response ({}){}",
                            status,
                            e,
                            if last.is_empty() { String::new() } else { format!(": {}", last) }
                        )
                    }
                }
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                // TIMEOUT: kill immediately
                warn!(budget_ms = budget.as_millis() as u64, "isolate exceeded its budget, killing");
                if let Err(e) = guard.child.kill().await {
                    error!(error = %e, "failed to kill timed-out isolate");
                }
                Ok(Exchange::TimedOut)
            }
        }
    }
}

async fn talk_to(
    child: &mut Child,
    payload: Vec<u8>,
    max_response_bytes: u64,
) -> Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let mut stdin = child.stdin.take().context("isolate stdin unavailable")?;
    let mut stdout = child.stdout.take().context("isolate stdout unavailable")?;
    let mut stderr = child.stderr.take().context("isolate stderr unavailable")?;

    let write = async move {
        stdin.write_all(&payload).await?;
        stdin.shutdown().await?;
        drop(stdin);
        Ok::<(), std::io::Error>(())
    };

    let mut out = Vec::new();
    let mut err = Vec::new();
    let read_out = async {
        (&mut stdout).take(max_response_bytes + 1).read_to_end(&mut out).await?;
        if out.len() as u64 > max_response_bytes {
            // The isolate would block on a full pipe and never close stderr
            child.start_kill()?;
        }
        Ok::<(), std::io::Error>(())
    };
    let (written, read_out, read_err) = tokio::join!(write, read_out, stderr.read_to_end(&mut err));

    if out.len() as u64 > max_response_bytes {
        bail!("isolate response exceeds the {} byte limit", max_response_bytes);
    }
    written.context("Failed to send request to isolate")?;
    read_out.context("Failed to read isolate response")?;
    read_err.context("Failed to read isolate stderr")?;

    let status = child.wait().await.context("Failed to wait for isolate")?;
    Ok((status, out, err))
}

/// Decode on a dedicated thread: nested values recurse deeper than an async
/// worker's stack allows.
async fn decode_response(stdout: Vec<u8>) -> Result<serde_json::Result<IsolateResponse>> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::Builder::new()
        .name("isolate-decode".to_string())
        .stack_size(crate::ISOLATE_STACK_BYTES)
        .spawn(move || {
            if tx.send(decode_message::<IsolateResponse>(&stdout)).is_err() {
                debug!("response decoder abandoned");
            }
        })
        .context("Failed to spawn response decoder")?;
    rx.await.context("Response decoder stopped without a result")
}

impl Sandbox for ProcessSandbox {
    #[tracing::instrument(skip(self, source), fields(function = %function_name, source_bytes = source.len()))]
    async fn compile(
        &self,
        source: &str,
        function_name: &str,
    ) -> Result<CompiledFunction, CompileError> {
        // GUARDRAIL: validate input size before spawning anything
        if source.len() > self.max_source_bytes {
            return Err(CompileError::new(
                CompileErrorKind::Sandbox,
                format!("source exceeds maximum size of {} bytes", self.max_source_bytes),
            ));
        }

        let request = IsolateRequest {
            source: source.to_string(),
            function_name: function_name.to_string(),
            args: None,
            limits: self.limits.clone(),
        };

        let start = Instant::now();
        let exchange = self.exchange(&request, self.compile_budget).await;
        debug!(compile_ms = start.elapsed().as_millis() as u64, "compile check finished");

        match exchange {
            Ok(Exchange::Finished(IsolateResponse::Ready)) => Ok(CompiledFunction {
                source: Arc::from(source),
                function_name: function_name.to_string(),
            }),
            Ok(Exchange::Finished(IsolateResponse::CompileError {
                error_kind,
                message,
                line,
                column,
            })) => Err(CompileError {
                kind: error_kind,
                message,
                line,
                column,
            }),
            Ok(Exchange::Finished(other)) => Err(CompileError::new(
                CompileErrorKind::Sandbox,
                format!("unexpected isolate response to compile check: {:?}", other),
            )),
            Ok(Exchange::TimedOut) => Err(CompileError::new(
                CompileErrorKind::Timeout,
                format!(
                    "top-level code did not finish within {}ms",
                    self.compile_budget.as_millis()
                ),
            )),
            Err(e) => {
                error!(error = %e, "compile check failed inside the sandbox");
                Err(CompileError::new(CompileErrorKind::Sandbox, format!("sandbox error: {:#}", e)))
            }
        }
    }

    #[tracing::instrument(skip(self, function, args), fields(function = %function.function_name, budget_ms = budget.as_millis() as u64))]
    async fn invoke(
        &self,
        function: &CompiledFunction,
        args: &[Value],
        budget: Duration,
    ) -> Invocation {
        let request = IsolateRequest {
            source: function.source.to_string(),
            function_name: function.function_name.clone(),
            args: Some(args.iter().map(WireValue::from).collect()),
            limits: self.limits.clone(),
        };

        let start = Instant::now();
        let exchange = self.exchange(&request, budget).await;
        let elapsed = start.elapsed();

        match exchange {
            Ok(Exchange::Finished(IsolateResponse::Returned { value, console })) => {
                Invocation::Returned {
                    value: value.into(),
                    console,
                    elapsed,
                }
            }
            Ok(Exchange::Finished(IsolateResponse::Threw { message, console })) => {
                Invocation::Threw {
                    message,
                    console,
                    elapsed,
                }
            }
            Ok(Exchange::Finished(other)) => {
                error!(response = ?other, "unexpected isolate response to invocation");
                Invocation::Threw {
                    message: format!("sandbox error: unexpected response {:?}", other),
                    console: Vec::new(),
                    elapsed,
                }
            }
            Ok(Exchange::TimedOut) => Invocation::TimedOut { elapsed },
            Err(e) => {
                error!(error = %e, "invocation failed inside the sandbox");
                Invocation::Threw {
                    message: format!("sandbox error: {:#}", e),
                    console: Vec::new(),
                    elapsed,
                }
            }
        }
    }
}
