//! Test utilities - sh-backed agents and in-memory pipeline definitions

use drover::core::{
    ActionSpec, AgentCommand, PipelineDef, PipelineLibrary, PipelineResult, ProjectConfig,
    RetryDefaults, RetryPolicy,
};
use drover::execution::{PipelineError, PipelineExecutor};
use std::collections::HashMap;
use std::path::Path;

/// An agent backed by a shell script; the prompt arrives as `$1`
pub fn sh_agent(script: &str) -> AgentCommand {
    AgentCommand {
        command: vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "agent".to_string(),
            "{{ prompt }}".to_string(),
        ],
        structured_args: vec![],
    }
}

/// Project configuration with the given named shell agents
pub fn project_with_agents(agents: &[(&str, &str)]) -> ProjectConfig {
    let mut config = ProjectConfig::default();
    for (name, script) in agents {
        config.agents.insert(name.to_string(), sh_agent(script));
    }
    config
}

/// Executor over in-memory pipeline definitions, without output mirroring
pub fn executor_with(config: &ProjectConfig, defs: Vec<PipelineDef>) -> PipelineExecutor {
    let mut library = PipelineLibrary::in_memory(RetryDefaults::default());
    for def in defs {
        library.insert(def);
    }
    PipelineExecutor::new(config, library, false)
}

pub fn agent_step(agent: &str, prompt: &str, attempts: u32) -> ActionSpec {
    ActionSpec::AgentCall {
        prompt: prompt.to_string(),
        agent: agent.to_string(),
        structured: false,
        retry: RetryPolicy::new(attempts, 30),
    }
}

pub fn structured_step(agent: &str, prompt: &str, attempts: u32) -> ActionSpec {
    ActionSpec::AgentCall {
        prompt: prompt.to_string(),
        agent: agent.to_string(),
        structured: true,
        retry: RetryPolicy::new(attempts, 30),
    }
}

pub fn validate_step(command: &str, repair_prompt: &str, agent: &str, attempts: u32) -> ActionSpec {
    ActionSpec::Validate {
        command: command.to_string(),
        repair_prompt: repair_prompt.to_string(),
        agent: agent.to_string(),
        retry: RetryPolicy::new(attempts, 30),
    }
}

pub fn pipeline(name: &str, steps: Vec<ActionSpec>) -> PipelineDef {
    PipelineDef {
        name: name.to_string(),
        steps,
        on_success: vec![],
        on_fail: vec![],
    }
}

/// Run a pipeline in `dir` with no extra bindings
pub async fn run_in(
    executor: &PipelineExecutor,
    name: &str,
    dir: &Path,
) -> Result<PipelineResult, PipelineError> {
    executor
        .run(
            name,
            HashMap::new(),
            dir.to_path_buf(),
            dir.to_path_buf(),
        )
        .await
}

/// Number of invocations recorded in a counter file (one line per call)
pub fn count_file(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|content| content.lines().count())
        .unwrap_or(0)
}
