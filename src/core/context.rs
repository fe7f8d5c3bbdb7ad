//! Pipeline context - the mutable variable space of one invocation

use crate::core::output::Output;
use std::collections::HashMap;
use std::path::PathBuf;

/// Execution context for a pipeline run
///
/// Exactly one instance exists per pipeline invocation. Nested pipelines
/// receive a derived copy that may shadow bindings but never mutates the
/// parent, except for explicitly declared return variables.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Flat user-defined variables (bindings, overrides, loaded status keys)
    pub vars: HashMap<String, String>,

    /// Output of the most recent execution (rebound to the failing attempt
    /// while a repair step runs)
    pub output: Option<Output>,

    /// Output of the immediately preceding completed step
    pub last_output: Option<Output>,

    /// Directory commands and agents run in
    pub working_dir: PathBuf,

    /// Project root, where configuration and pipelines live
    pub project_dir: PathBuf,

    /// Arbitrary configuration tree, addressable with dotted/indexed paths
    config: serde_yaml::Value,
}

impl PipelineContext {
    pub fn new(working_dir: PathBuf, project_dir: PathBuf, config: serde_yaml::Value) -> Self {
        Self {
            vars: HashMap::new(),
            output: None,
            last_output: None,
            working_dir,
            project_dir,
            config,
        }
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Record a completed step's output: it becomes both the most recent
    /// output and, for the next step, the previous one
    pub fn record_step_output(&mut self, output: Output) {
        self.last_output = Some(output.clone());
        self.output = Some(output);
    }

    /// Derive the context a nested pipeline starts from
    ///
    /// The child sees the parent's variables, directories and configuration
    /// tree, but starts with a clean output history.
    pub fn derive_child(&self) -> Self {
        let mut child = self.clone();
        child.output = None;
        child.last_output = None;
        child
    }

    /// Copy declared return variables from a finished child context
    pub fn adopt_returns(&mut self, child: &PipelineContext, names: &[String]) {
        for name in names {
            if let Some(value) = child.vars.get(name) {
                self.vars.insert(name.clone(), value.clone());
            }
        }
    }

    /// Look up a template variable by dotted/indexed path
    ///
    /// Resolution order: built-ins (`output`, `last_output`, directories),
    /// flat variables, then the configuration tree.
    pub fn lookup(&self, path: &str) -> Option<String> {
        let segments = parse_path(path)?;
        let (head, head_indices) = &segments[0];

        if head_indices.is_empty() {
            match head.as_str() {
                "output" => return lookup_output(self.output.as_ref()?, &segments[1..]),
                "last_output" => {
                    return lookup_output(self.last_output.as_ref()?, &segments[1..]);
                }
                "working_dir" if segments.len() == 1 => {
                    return Some(self.working_dir.display().to_string());
                }
                "project_dir" if segments.len() == 1 => {
                    return Some(self.project_dir.display().to_string());
                }
                _ => {}
            }
        }

        if segments.len() == 1 && head_indices.is_empty() {
            if let Some(value) = self.vars.get(head) {
                return Some(value.clone());
            }
        }

        lookup_yaml(&self.config, &segments)
    }
}

/// One path segment: a field name plus any trailing `[n]` indices
type Segment = (String, Vec<usize>);

fn parse_path(path: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    for raw in path.split('.') {
        let (name, rest) = match raw.find('[') {
            Some(pos) => (&raw[..pos], &raw[pos..]),
            None => (raw, ""),
        };
        if name.is_empty() {
            return None;
        }
        let mut indices = Vec::new();
        let mut rest = rest;
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped.find(']')?;
            indices.push(stripped[..close].parse().ok()?);
            rest = &stripped[close + 1..];
        }
        if !rest.is_empty() {
            return None;
        }
        segments.push((name.to_string(), indices));
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments)
}

fn lookup_output(output: &Output, rest: &[Segment]) -> Option<String> {
    match rest {
        [] => Some(output.render()),
        [(field, indices)] if indices.is_empty() && field != "structured" => {
            match field.as_str() {
                "stdout" => Some(output.stdout.trim_end().to_string()),
                "stderr" => Some(output.stderr.trim_end().to_string()),
                "exit_code" => Some(
                    output
                        .exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "signal".to_string()),
                ),
                _ => None,
            }
        }
        [(field, indices), tail @ ..] if field == "structured" && indices.is_empty() => {
            let map = output.structured.as_ref()?;
            let root = serde_json::Value::Object(map.clone());
            if tail.is_empty() {
                return serde_json::to_string(&root).ok();
            }
            lookup_json(&root, tail)
        }
        _ => None,
    }
}

fn lookup_yaml(root: &serde_yaml::Value, segments: &[Segment]) -> Option<String> {
    let mut node = root;
    for (name, indices) in segments {
        node = node.get(name.as_str())?;
        for index in indices {
            node = node.get(index)?;
        }
    }
    yaml_to_string(node)
}

fn lookup_json(root: &serde_json::Value, segments: &[Segment]) -> Option<String> {
    let mut node = root;
    for (name, indices) in segments {
        node = node.get(name)?;
        for index in indices {
            node = node.get(index)?;
        }
    }
    Some(match node {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn yaml_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => None,
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        other => serde_yaml::to_string(other)
            .ok()
            .map(|s| s.trim_end().to_string()),
    }
}
