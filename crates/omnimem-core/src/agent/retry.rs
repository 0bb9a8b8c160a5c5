//! External-tool invocation with transient-error retry.
//!
//! The classifier is substring-based over the tool's combined output:
//! rate-limit and overload shapes retry with jittered exponential backoff
//! (honoring any `retry-after` hint), everything else fails fast.

use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use serde::Serialize;

use crate::error::{MemoryError, Result};

// ============================================================================
// TOOL RUNNER SEAM
// ============================================================================

/// Captured output of one tool invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stderr, self.stdout)
    }
}

/// Seam for invoking external agent tools; tests substitute a mock.
pub trait ToolRunner: Send + Sync {
    fn run(&self, cmd: &[String], cwd: Option<&Path>) -> Result<ToolOutput>;
}

/// Real subprocess runner.
pub struct SubprocessToolRunner;

impl ToolRunner for SubprocessToolRunner {
    fn run(&self, cmd: &[String], cwd: Option<&Path>) -> Result<ToolOutput> {
        let (program, args) = cmd.split_first().ok_or_else(|| {
            MemoryError::InvalidArgument("empty tool command".to_string())
        })?;
        let mut command = Command::new(program);
        command.args(args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        let output = command.output()?;
        Ok(ToolOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

const TRANSIENT_HINTS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "429",
    "503",
    "overload",
    "try again",
    "temporarily unavailable",
    "service unavailable",
];

/// Does this output look like a retryable provider hiccup?
pub fn is_transient_tool_error(text: &str) -> bool {
    let lowered = text.to_lowercase();
    TRANSIENT_HINTS.iter().any(|h| lowered.contains(h))
}

/// Pull a `retry-after: N` (or `retry_after=N`) hint out of the error text.
pub fn extract_retry_after_seconds(text: &str) -> Option<f64> {
    static HINT: OnceLock<Regex> = OnceLock::new();
    let re = HINT.get_or_init(|| {
        Regex::new(r"(?i)retry[-_\s]?after\s*[:=]?\s*([0-9]+(?:\.[0-9]+)?)").expect("static")
    });
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

// ============================================================================
// RETRY POLICY
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(800),
            max_backoff: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolRunReport {
    pub output: ToolOutput,
    pub attempts: u32,
    pub retried: u32,
    pub transient_failures: u32,
}

/// Multiplicative jitter in `[1 - spread, 1 + spread]`.
fn jittered(base: Duration, spread: f64) -> Duration {
    let mut rng = rand::rng();
    let factor = 1.0 - spread + rng.random::<f64>() * 2.0 * spread;
    base.mul_f64(factor.max(0.0))
}

/// Run a tool, retrying transient failures with capped, jittered backoff.
/// Non-transient failures return after the first attempt.
pub fn run_tool_with_retry(
    runner: &dyn ToolRunner,
    cmd: &[String],
    cwd: Option<&Path>,
    policy: &RetryPolicy,
    mut sleep: impl FnMut(Duration),
) -> Result<ToolRunReport> {
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff.max(Duration::from_millis(10));
    let mut attempts = 0u32;
    let mut retried = 0u32;
    let mut transient_failures = 0u32;

    loop {
        attempts += 1;
        let output = runner.run(cmd, cwd)?;
        if output.success() {
            return Ok(ToolRunReport {
                output,
                attempts,
                retried,
                transient_failures,
            });
        }
        let text = output.combined();
        if !is_transient_tool_error(&text) || attempts >= max_attempts {
            return Ok(ToolRunReport {
                output,
                attempts,
                retried,
                transient_failures,
            });
        }
        transient_failures += 1;
        retried += 1;
        let mut delay = jittered(backoff, 0.2);
        if let Some(hint) = extract_retry_after_seconds(&text) {
            let hinted = Duration::from_secs_f64(hint);
            if hinted > delay {
                delay = hinted;
            }
        }
        tracing::debug!(attempt = attempts, ?delay, "transient tool failure, backing off");
        sleep(delay);
        backoff = (backoff * 2).min(policy.max_backoff);
    }
}

// ============================================================================
// TESTS
// ============================================================================
