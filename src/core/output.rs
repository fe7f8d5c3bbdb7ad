//! Execution results - one attempt's Output and the per-run trace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of one execution attempt (a command or an agent call)
///
/// Immutable once produced. A timed-out attempt is still an `Output` -
/// the timeout flag is data for the retry layer, not an error by itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Parsed JSON payload, present when the step requested structured mode
    pub structured: Option<serde_json::Map<String, serde_json::Value>>,

    /// Exit code of the process, `None` if it was killed by a signal
    pub exit_code: Option<i32>,

    /// Whether the attempt was cut short by the timeout watchdog
    pub timed_out: bool,
}

impl Output {
    /// An attempt succeeded if it exited zero and was not timed out
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Short human-readable description of why the attempt failed
    pub fn failure_summary(&self) -> String {
        if self.timed_out {
            return "timed out".to_string();
        }
        let detail = if !self.stderr.trim().is_empty() {
            tail(&self.stderr, 3)
        } else {
            tail(&self.stdout, 3)
        };
        match self.exit_code {
            Some(code) if detail.is_empty() => format!("exit code {}", code),
            Some(code) => format!("exit code {}: {}", code, detail),
            None => format!("killed by signal: {}", detail),
        }
    }

    /// Render the output for template substitution: stdout, then stderr
    pub fn render(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.trim_end().to_string()
        } else if self.stdout.trim().is_empty() {
            self.stderr.trim_end().to_string()
        } else {
            format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end())
        }
    }
}

fn tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n").trim().to_string()
}

/// The recorded result of one attempted pipeline step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Position of the step in the pipeline (1-based)
    pub index: usize,

    /// Step label, e.g. `agent:claude` or `validate:cargo test`
    pub step: String,

    /// Terminal output of the step (last attempt if retries were exhausted)
    pub output: Output,
}

/// Terminal record of one pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Unique id for this run
    pub run_id: Uuid,

    /// Name of the pipeline that ran
    pub pipeline: String,

    /// Overall success or failure
    pub success: bool,

    /// Output of the last completed step, if any step completed
    pub output: Option<Output>,

    /// Per-step outputs, one per step actually attempted, in order
    pub trace: Vec<StepOutcome>,

    /// Label of the failing step when `success` is false
    pub failed_step: Option<String>,

    /// Failure description when `success` is false
    pub error: Option<String>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (including continuations)
    pub finished_at: DateTime<Utc>,
}
