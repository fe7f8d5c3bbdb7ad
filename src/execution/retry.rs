//! Retry controller - the attempt loop shared by agent calls and validations

use crate::core::action::RetryPolicy;
use crate::core::config::AgentCommand;
use crate::core::output::Output;
use crate::execution::process::{BoundedExecutor, CommandLine, SpawnError};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Appended to the prompt when a step requests structured output
const STRUCTURED_INSTRUCTION: &str =
    "\n\nRespond with a single JSON object and no text outside of it.";

/// Base delay of the exponential backoff between attempts
const BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Backoff never sleeps longer than this
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RetryError {
    /// Every attempt failed; carries the last attempt's output
    #[error("all {attempts} attempts failed; last attempt: {}", .last.failure_summary())]
    Exhausted { attempts: u32, last: Output },

    /// The repair step itself failed, aborting the remaining retries
    #[error("repair step failed: {source}")]
    RepairFailed {
        /// Output of the command attempt that triggered the repair
        last: Output,
        #[source]
        source: anyhow::Error,
    },

    /// No agent with this name is configured
    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    /// The underlying command could not be started
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// The run was cancelled by the operator
    #[error("cancelled")]
    Cancelled,
}

/// Wraps the bounded executor with an attempt budget
///
/// Attempt failures (non-zero exit, timeout, structured-parse failure) are
/// absorbed and retried here; only exhaustion crosses the component
/// boundary.
#[derive(Debug, Clone)]
pub struct RetryController {
    executor: BoundedExecutor,
    agents: HashMap<String, AgentCommand>,
}

impl RetryController {
    pub fn new(executor: BoundedExecutor, agents: HashMap<String, AgentCommand>) -> Self {
        Self { executor, agents }
    }

    /// Invoke a named agent, retrying failed attempts up to the budget
    ///
    /// With `structured`, the prompt demands a JSON object response and the
    /// captured stdout must parse as one; a parse failure consumes an
    /// attempt exactly like a non-zero exit.
    pub async fn run_agent(
        &self,
        prompt: &str,
        agent: &str,
        structured: bool,
        cwd: &Path,
        policy: &RetryPolicy,
    ) -> Result<Output, RetryError> {
        let command = self
            .agents
            .get(agent)
            .ok_or_else(|| RetryError::UnknownAgent(agent.to_string()))?;

        let full_prompt = if structured {
            format!("{}{}", prompt, STRUCTURED_INSTRUCTION)
        } else {
            prompt.to_string()
        };
        let argv = CommandLine::Argv(command.resolve(&full_prompt, structured));

        let mut last: Option<Output> = None;
        for attempt in 1..=policy.max_attempts {
            if self.executor.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            debug!(agent, attempt, max = policy.max_attempts, "invoking agent");
            let mut output = self.executor.run(&argv, cwd, policy.timeout()).await?;
            if self.executor.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let parsed = !structured || parse_structured(&mut output);
            if output.success() && parsed {
                info!(agent, attempt, "agent call succeeded");
                return Ok(output);
            }

            if output.success() && !parsed {
                warn!(agent, attempt, "agent output was not a JSON object");
            } else {
                warn!(agent, attempt, reason = %output.failure_summary(), "agent attempt failed");
            }
            last = Some(output);

            if attempt < policy.max_attempts {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }

        Err(exhausted(policy.max_attempts, last))
    }

    /// Run `command` until it succeeds, invoking `repair` between attempts
    ///
    /// Only executions of `command` consume attempts and only a successful
    /// one produces the returned Output. A repair that itself fails aborts
    /// the loop; its output is never returned.
    pub async fn run_validate<F, Fut>(
        &self,
        command: &str,
        cwd: &Path,
        policy: &RetryPolicy,
        mut repair: F,
    ) -> Result<Output, RetryError>
    where
        F: FnMut(Output) -> Fut,
        Fut: Future<Output = anyhow::Result<Output>>,
    {
        let shell = CommandLine::Shell(command.to_string());

        let mut last: Option<Output> = None;
        for attempt in 1..=policy.max_attempts {
            if self.executor.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            debug!(command, attempt, max = policy.max_attempts, "validating");
            let output = self.executor.run(&shell, cwd, policy.timeout()).await?;
            if self.executor.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            if output.success() {
                info!(command, attempt, "validation succeeded");
                return Ok(output);
            }

            warn!(command, attempt, reason = %output.failure_summary(), "validation failed");
            last = Some(output.clone());

            if attempt < policy.max_attempts {
                info!(command, "running repair step");
                let repaired = repair(output.clone()).await;
                match repaired {
                    Ok(repair_output) => {
                        debug!(
                            repair_exit = ?repair_output.exit_code,
                            "repair step finished"
                        );
                    }
                    Err(source) => {
                        return Err(RetryError::RepairFailed {
                            last: output,
                            source,
                        });
                    }
                }
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }

        Err(exhausted(policy.max_attempts, last))
    }

    pub fn executor(&self) -> &BoundedExecutor {
        &self.executor
    }
}

fn exhausted(attempts: u32, last: Option<Output>) -> RetryError {
    RetryError::Exhausted {
        attempts,
        last: last.unwrap_or(Output {
            stdout: String::new(),
            stderr: String::new(),
            structured: None,
            exit_code: None,
            timed_out: false,
        }),
    }
}

/// Parse captured stdout as a JSON object into `output.structured`
///
/// Returns false when the payload is missing or is not an object; the
/// original exit status is left untouched.
fn parse_structured(output: &mut Output) -> bool {
    match serde_json::from_str::<serde_json::Value>(output.stdout.trim()) {
        Ok(serde_json::Value::Object(map)) => {
            output.structured = Some(map);
            true
        }
        Ok(_) | Err(_) => false,
    }
}

/// Exponential backoff: 200ms, 400ms, 800ms, ... capped at 30s
fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(20);
    BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_CAP)
}
