//! Action domain model - retry policies, step variants, pipeline definitions

use std::collections::HashMap;
use std::time::Duration;

/// Timeout and attempt budget for one step
///
/// Embedded by value in every action; there is no shared retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, at least 1
    pub max_attempts: u32,

    /// Wall-clock timeout per attempt, in seconds, at least 1
    pub timeout_secs: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, timeout_secs: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            timeout_secs: timeout_secs.max(1),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_secs: 120,
        }
    }
}

/// A single declarative pipeline step
///
/// New step kinds are added here and dispatched exhaustively by the
/// pipeline executor.
#[derive(Debug, Clone)]
pub enum ActionSpec {
    /// Invoke a named agent with an expanded prompt
    AgentCall {
        /// Prompt template, expanded against the pipeline context
        prompt: String,
        /// Name of the agent command in the project configuration
        agent: String,
        /// Demand and parse a JSON object response
        structured: bool,
        retry: RetryPolicy,
    },

    /// Run a shell command until it succeeds, repairing between attempts
    Validate {
        /// Command template, run through the shell
        command: String,
        /// Prompt template for the repair agent call; sees `{{ output }}`
        repair_prompt: String,
        /// Agent that performs the repair
        agent: String,
        retry: RetryPolicy,
    },

    /// Recursively invoke another pipeline with a derived context
    NestedPipeline {
        /// Name of the pipeline definition to invoke
        pipeline: String,
        /// Variable bindings for the child context (templates)
        args: HashMap<String, String>,
        /// Variables copied back from the child context on success
        returns: Vec<String>,
    },
}

impl ActionSpec {
    /// Short label used in traces, events and error messages
    pub fn label(&self) -> String {
        match self {
            ActionSpec::AgentCall { agent, .. } => format!("agent:{}", agent),
            ActionSpec::Validate { command, .. } => {
                format!("validate:{}", first_words(command, 4))
            }
            ActionSpec::NestedPipeline { pipeline, .. } => format!("pipeline:{}", pipeline),
        }
    }

    /// The retry policy for this step, if the variant carries one
    pub fn retry(&self) -> Option<&RetryPolicy> {
        match self {
            ActionSpec::AgentCall { retry, .. } | ActionSpec::Validate { retry, .. } => Some(retry),
            ActionSpec::NestedPipeline { .. } => None,
        }
    }
}

fn first_words(text: &str, n: usize) -> String {
    let mut words: Vec<&str> = text.split_whitespace().take(n + 1).collect();
    let truncated = words.len() > n;
    words.truncate(n);
    let mut label = words.join(" ");
    if truncated {
        label.push('…');
    }
    label
}

/// An ordered step list plus its success and fail continuation lists
#[derive(Debug, Clone)]
pub struct PipelineDef {
    pub name: String,
    pub steps: Vec<ActionSpec>,

    /// Run once after the last step succeeds
    pub on_success: Vec<ActionSpec>,

    /// Run once after a step fails
    pub on_fail: Vec<ActionSpec>,
}
