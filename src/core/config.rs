//! Project and pipeline configuration from YAML

use crate::core::action::{ActionSpec, PipelineDef, RetryPolicy};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Name of the project configuration file, looked up in the project root
pub const PROJECT_CONFIG_FILE: &str = "drover.yml";

/// Directory of pipeline definitions under the project root
pub const PIPELINES_DIR: &str = "pipelines";

/// Directory of interactive action scripts under the project root
pub const ACTIONS_DIR: &str = "actions";

/// A named agent command template
///
/// `command` is an argv template; every element may reference
/// `{{ prompt }}`, which is substituted verbatim at call time. When a step
/// requests structured output, `structured_args` are appended to the argv.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCommand {
    pub command: Vec<String>,

    #[serde(default)]
    pub structured_args: Vec<String>,
}

impl AgentCommand {
    /// Build the concrete argv for one invocation
    pub fn resolve(&self, prompt: &str, structured: bool) -> Vec<String> {
        let mut argv: Vec<String> = self
            .command
            .iter()
            .map(|arg| arg.replace("{{ prompt }}", prompt).replace("{{prompt}}", prompt))
            .collect();
        if structured {
            argv.extend(self.structured_args.iter().cloned());
        }
        argv
    }
}

/// Global retry defaults, overridable per step
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryDefaults {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RetryDefaults {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.timeout_secs)
    }
}

/// Project metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
}

/// Top-level project configuration (`drover.yml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub project: Option<ProjectInfo>,

    /// Named agent command templates
    #[serde(default)]
    pub agents: HashMap<String, AgentCommand>,

    #[serde(default)]
    pub defaults: Option<RetryDefaults>,

    /// Arbitrary key space exposed to template resolution (VM bindings and
    /// other status values stay opaque here)
    #[serde(default)]
    pub vars: serde_yaml::Value,

    /// Markdown checklist whose checkbox fraction becomes the `progress`
    /// context variable
    #[serde(default)]
    pub checklist: Option<PathBuf>,
}

impl ProjectConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read {}", path.as_ref().display()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ProjectConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `drover.yml` from the project root, or fall back to defaults
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(PROJECT_CONFIG_FILE);
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the parsed configuration
    pub fn validate(&self) -> Result<()> {
        for (name, agent) in &self.agents {
            if agent.command.is_empty() {
                bail!("agent '{}' has an empty command", name);
            }
        }
        if let Some(defaults) = &self.defaults {
            if defaults.max_attempts == 0 {
                bail!("defaults.max_attempts must be at least 1");
            }
            if defaults.timeout_secs == 0 {
                bail!("defaults.timeout_secs must be at least 1");
            }
        }
        Ok(())
    }

    pub fn agent(&self, name: &str) -> Option<&AgentCommand> {
        self.agents.get(name)
    }

    pub fn retry_defaults(&self) -> RetryDefaults {
        self.defaults.unwrap_or_default()
    }
}

/// One step as written in a pipeline YAML file
///
/// Exactly one of `agent`, `validate` or `pipeline` selects the kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Agent call: agent name
    #[serde(default)]
    pub agent: Option<String>,

    /// Agent call: prompt template
    #[serde(default)]
    pub prompt: Option<String>,

    /// Agent call: demand and parse a JSON object response
    #[serde(default)]
    pub structured: bool,

    /// Validation: shell command template
    #[serde(default)]
    pub validate: Option<String>,

    /// Validation: repair prompt template, expanded with `{{ output }}`
    #[serde(default)]
    pub repair_prompt: Option<String>,

    /// Nested invocation: pipeline name
    #[serde(default)]
    pub pipeline: Option<String>,

    /// Nested invocation: variable bindings (templates)
    #[serde(default)]
    pub args: HashMap<String, String>,

    /// Nested invocation: variables copied back on success
    #[serde(default)]
    pub returns: Vec<String>,

    /// Retry override for this step
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Timeout override for this step
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl StepConfig {
    /// Convert to the domain action, applying defaults
    pub fn to_spec(&self, defaults: &RetryDefaults) -> Result<ActionSpec> {
        let retry = RetryPolicy::new(
            self.max_attempts.unwrap_or(defaults.max_attempts),
            self.timeout_secs.unwrap_or(defaults.timeout_secs),
        );

        let kinds = [
            self.agent.is_some() && self.validate.is_none(),
            self.validate.is_some(),
            self.pipeline.is_some(),
        ];
        if kinds.iter().filter(|k| **k).count() != 1 {
            bail!("step must set exactly one of 'agent'+'prompt', 'validate' or 'pipeline'");
        }

        if let Some(command) = &self.validate {
            let repair_prompt = self
                .repair_prompt
                .clone()
                .context("validate step requires 'repair_prompt'")?;
            let agent = self
                .agent
                .clone()
                .context("validate step requires 'agent' for the repair call")?;
            return Ok(ActionSpec::Validate {
                command: command.clone(),
                repair_prompt,
                agent,
                retry,
            });
        }

        if let Some(pipeline) = &self.pipeline {
            return Ok(ActionSpec::NestedPipeline {
                pipeline: pipeline.clone(),
                args: self.args.clone(),
                returns: self.returns.clone(),
            });
        }

        let agent = self.agent.clone().context("step requires 'agent'")?;
        let prompt = self
            .prompt
            .clone()
            .context("agent step requires 'prompt'")?;
        Ok(ActionSpec::AgentCall {
            prompt,
            agent,
            structured: self.structured,
            retry,
        })
    }
}

/// A pipeline definition file: ordered steps plus continuation lists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFile {
    pub name: String,

    pub steps: Vec<StepConfig>,

    /// Continuation list executed once after the last step succeeds
    #[serde(default)]
    pub success: Vec<StepConfig>,

    /// Continuation list executed once after a step fails
    #[serde(default)]
    pub fail: Vec<StepConfig>,
}

impl PipelineFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read {}", path.as_ref().display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: PipelineFile = serde_yaml::from_str(yaml)?;
        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("pipeline name must not be empty");
        }
        if self.steps.is_empty() {
            bail!("pipeline '{}' has no steps", self.name);
        }
        let defaults = RetryDefaults::default();
        for (i, step) in self
            .steps
            .iter()
            .chain(&self.success)
            .chain(&self.fail)
            .enumerate()
        {
            step.to_spec(&defaults)
                .with_context(|| format!("pipeline '{}', step {}", self.name, i + 1))?;
            if let Some(attempts) = step.max_attempts {
                if attempts == 0 {
                    bail!(
                        "pipeline '{}', step {}: max_attempts must be at least 1",
                        self.name,
                        i + 1
                    );
                }
            }
            if step.timeout_secs == Some(0) {
                bail!(
                    "pipeline '{}', step {}: timeout_secs must be at least 1",
                    self.name,
                    i + 1
                );
            }
            if !step.returns.is_empty() && step.pipeline.is_none() {
                bail!(
                    "pipeline '{}', step {}: 'returns' is only valid on nested pipeline steps",
                    self.name,
                    i + 1
                );
            }
        }
        Ok(())
    }

    /// Convert to the domain definition, applying project defaults
    pub fn to_def(&self, defaults: &RetryDefaults) -> Result<PipelineDef> {
        let convert = |steps: &[StepConfig]| -> Result<Vec<ActionSpec>> {
            steps.iter().map(|s| s.to_spec(defaults)).collect()
        };
        Ok(PipelineDef {
            name: self.name.clone(),
            steps: convert(&self.steps)?,
            on_success: convert(&self.success)?,
            on_fail: convert(&self.fail)?,
        })
    }
}

/// Resolves pipeline definitions by name
///
/// Names resolve to `<project>/pipelines/<name>.yml` (or `.yaml`), to a
/// direct file path, or to a preloaded definition (used by nested
/// invocations and tests).
#[derive(Debug, Clone)]
pub struct PipelineLibrary {
    dir: Option<PathBuf>,
    defaults: RetryDefaults,
    preloaded: HashMap<String, PipelineDef>,
}

impl PipelineLibrary {
    pub fn new(project_dir: &Path, defaults: RetryDefaults) -> Self {
        Self {
            dir: Some(project_dir.join(PIPELINES_DIR)),
            defaults,
            preloaded: HashMap::new(),
        }
    }

    /// A library with no backing directory; definitions are inserted directly
    pub fn in_memory(defaults: RetryDefaults) -> Self {
        Self {
            dir: None,
            defaults,
            preloaded: HashMap::new(),
        }
    }

    pub fn insert(&mut self, def: PipelineDef) {
        self.preloaded.insert(def.name.clone(), def);
    }

    /// Resolve a pipeline by name or path
    pub fn resolve(&self, name: &str) -> Result<PipelineDef> {
        if let Some(def) = self.preloaded.get(name) {
            return Ok(def.clone());
        }

        let direct = Path::new(name);
        if direct.is_file() {
            return PipelineFile::from_file(direct)?.to_def(&self.defaults);
        }

        if let Some(dir) = &self.dir {
            for ext in ["yml", "yaml"] {
                let candidate = dir.join(format!("{}.{}", name, ext));
                if candidate.is_file() {
                    return PipelineFile::from_file(&candidate)?.to_def(&self.defaults);
                }
            }
        }

        bail!("pipeline '{}' not found", name)
    }
}
