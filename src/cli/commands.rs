//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Pipeline name (resolved under <project>/pipelines/) or a YAML path
    pub pipeline: String,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Working directory for commands and agents (defaults to the project root)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Project root (defaults to the enclosing git root, then the cwd)
    #[arg(long)]
    pub project: Option<PathBuf>,

    /// Don't mirror agent/command output while steps run
    #[arg(long)]
    pub quiet: bool,
}

/// Supervise an interactive command with scripted actions
#[derive(Debug, Args, Clone)]
pub struct ExecCommand {
    /// The command to run, e.g. `drover exec -- claude`
    #[arg(required = true, trailing_var_arg = true)]
    pub command: Vec<String>,

    /// Shortcut that opens the action menu (ctrl-<letter> or a character)
    #[arg(long, default_value = "ctrl-a")]
    pub shortcut: String,

    /// Project root to load actions from (defaults like `run`)
    #[arg(long)]
    pub project: Option<PathBuf>,
}

/// Validate a pipeline definition file
#[derive(Debug, Args, Clone)]
pub struct CheckCommand {
    /// Path to the pipeline YAML file
    pub file: PathBuf,

    /// Output the parsed definition as JSON
    #[arg(long)]
    pub json: bool,
}

/// Update one field of a YAML document by key path
#[derive(Debug, Args, Clone)]
pub struct SetCommand {
    /// Path to the YAML file
    pub file: PathBuf,

    /// Field query, e.g. `server.ports[0]`
    pub query: String,

    /// New value (parsed as YAML: numbers and booleans keep their type)
    pub value: String,
}

/// Show checklist progress for a markdown file
#[derive(Debug, Args, Clone)]
pub struct ProgressCommand {
    /// Path to the markdown checklist
    pub file: PathBuf,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
