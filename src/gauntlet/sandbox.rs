//! Sandboxed Candidate Execution
//!
//! Runs a tool's code and test case in an isolated subprocess:
//! - fresh temp workspace per run, removed afterwards
//! - sanitized environment (env_clear + minimal allowlist)
//! - hard wall-clock timeout with kill
//! - output capture with size ceiling
//!
//! The runner script combines tool code and test case and emits markers
//! on stdout/stderr so load failures are distinguishable from test
//! failures.

use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::GauntletConfig;
use crate::models::PerformanceProfile;

/// Marker printed by the runner when the test case completes cleanly.
pub const MARKER_PASSED: &str = "TEST_PASSED";
/// Marker printed on stderr when the test case raises.
pub const MARKER_FAILED: &str = "TEST_FAILED";
/// Marker printed on stderr when the tool code itself fails to load.
pub const MARKER_LOAD_ERROR: &str = "TOOL_LOAD_ERROR";

/// Why an execution did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    NonZeroExit,
    LaunchError,
}

/// Result of one sandbox run.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub execution_time_ms: f64,
    pub error_message: String,
    pub failure: Option<FailureKind>,
}

impl SandboxOutcome {
    /// Flatten into the profile stored on the provenance record.
    pub fn to_performance_profile(&self) -> PerformanceProfile {
        PerformanceProfile {
            execution_time_ms: round2(self.execution_time_ms),
            // Not measurable with plain subprocess isolation
            memory_peak_mb: 0.0,
            output_size_bytes: self.stdout.len(),
            test_passed: self.success,
            test_output: truncate(&self.stdout, 1000),
            error_message: self.error_message.clone(),
        }
    }
}

/// Subprocess-based sandbox. One instance is reusable across runs; each
/// run gets its own temp workspace.
pub struct Sandbox {
    config: GauntletConfig,
}

impl Sandbox {
    pub fn new(config: GauntletConfig) -> Self {
        Self { config }
    }

    /// Execute code + test case in an isolated subprocess.
    pub async fn execute(&self, code: &str, test_case: &str) -> Result<SandboxOutcome> {
        let run_id = Uuid::new_v4().to_string()[..8].to_string();
        let workspace = tempfile::Builder::new()
            .prefix(&format!("agentforge_{run_id}_"))
            .tempdir()
            .context("failed to create sandbox workspace")?;

        let runner_path = workspace.path().join("runner.py");
        tokio::fs::write(&runner_path, build_runner_script(code, test_case))
            .await
            .context("failed to write runner script")?;

        debug!(run_id = %run_id, "starting sandbox execution");
        let start = Instant::now();

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(&runner_path)
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .kill_on_drop(true);
        for (key, value) in safe_env() {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(SandboxOutcome {
                    success: false,
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: None,
                    execution_time_ms: elapsed_ms(start),
                    error_message: format!(
                        "Failed to launch interpreter '{}': {e}",
                        self.config.interpreter
                    ),
                    failure: Some(FailureKind::LaunchError),
                });
            }
        };

        let max_output = self.config.max_output_bytes;
        let result = tokio::time::timeout(self.config.execution_timeout, async {
            let mut stdout_pipe = child
                .stdout
                .take()
                .context("sandbox child had no stdout pipe")?;
            let mut stderr_pipe = child
                .stderr
                .take()
                .context("sandbox child had no stderr pipe")?;

            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            let (a, b) = tokio::join!(
                read_limited(&mut stdout_pipe, &mut stdout_buf, max_output),
                read_limited(&mut stderr_pipe, &mut stderr_buf, max_output),
            );
            a?;
            b?;

            let status = child.wait().await?;
            Ok::<_, anyhow::Error>((stdout_buf, stderr_buf, status))
        })
        .await;

        let elapsed = elapsed_ms(start);

        match result {
            Ok(Ok((stdout_buf, stderr_buf, status))) => {
                let stdout = String::from_utf8_lossy(&stdout_buf).to_string();
                let stderr = String::from_utf8_lossy(&stderr_buf).to_string();

                if status.success() {
                    Ok(SandboxOutcome {
                        success: true,
                        stdout,
                        stderr,
                        exit_code: status.code(),
                        execution_time_ms: elapsed,
                        error_message: String::new(),
                        failure: None,
                    })
                } else {
                    let error_message = if stderr.is_empty() {
                        "Non-zero exit code".to_string()
                    } else {
                        truncate(&stderr, 500)
                    };
                    Ok(SandboxOutcome {
                        success: false,
                        stdout,
                        stderr,
                        exit_code: status.code(),
                        execution_time_ms: elapsed,
                        error_message,
                        failure: Some(FailureKind::NonZeroExit),
                    })
                }
            }
            Ok(Err(e)) => Ok(SandboxOutcome {
                success: false,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                execution_time_ms: elapsed,
                error_message: format!("Sandbox error: {e}"),
                failure: Some(FailureKind::LaunchError),
            }),
            Err(_) => {
                let _ = child.kill().await;
                warn!(
                    run_id = %run_id,
                    timeout_secs = self.config.execution_timeout.as_secs(),
                    "sandbox execution timed out"
                );
                Ok(SandboxOutcome {
                    success: false,
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: None,
                    execution_time_ms: elapsed,
                    error_message: format!(
                        "Execution timed out after {}s",
                        self.config.execution_timeout.as_secs()
                    ),
                    failure: Some(FailureKind::Timeout),
                })
            }
        }
    }
}

/// Combine tool code and test case into one runnable script. Load errors
/// and test failures exit non-zero with distinct stderr markers.
fn build_runner_script(code: &str, test_case: &str) -> String {
    format!(
        r#"import sys
import traceback

try:
{tool}
except Exception as e:
    print(f"{load_err}: {{type(e).__name__}}: {{e}}", file=sys.stderr)
    sys.exit(1)

try:
{test}
    print("{passed}")
except AssertionError as e:
    print(f"{failed}: Assertion: {{e}}", file=sys.stderr)
    sys.exit(1)
except Exception as e:
    print(f"{failed}: {{type(e).__name__}}: {{e}}", file=sys.stderr)
    traceback.print_exc(file=sys.stderr)
    sys.exit(1)
"#,
        tool = indent(code, 4),
        test = indent(test_case, 4),
        load_err = MARKER_LOAD_ERROR,
        passed = MARKER_PASSED,
        failed = MARKER_FAILED,
    )
}

fn indent(code: &str, spaces: usize) -> String {
    let prefix = " ".repeat(spaces);
    code.lines()
        .map(|l| format!("{prefix}{l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Minimal environment for the guest process. Everything else is cleared.
fn safe_env() -> Vec<(String, String)> {
    let mut env = Vec::new();
    for key in ["PATH", "HOME", "TMPDIR", "LANG"] {
        if let Ok(value) = std::env::var(key) {
            env.push((key.to_string(), value));
        }
    }
    env.push(("PYTHONPATH".to_string(), String::new()));
    env
}

async fn read_limited<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < max {
                    let take = n.min(max - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                }
                // Keep draining past the cap so the child never blocks on a
                // full pipe.
            }
            Err(_) => break,
        }
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
