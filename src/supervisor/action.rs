//! Interactive actions - named, scripted interactions against a live session

use crate::supervisor::session::{ProcessSession, SessionError};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Default wait budget for an `expect:` step, in seconds
fn default_expect_timeout() -> u64 {
    30
}

/// A named unit of interaction the operator can trigger against a session
///
/// At most one action is ever active per session; the supervisor suspends
/// pass-through before dispatch and resumes after `execute` returns.
#[async_trait]
pub trait InteractiveAction: Send + Sync {
    /// Display name shown in the action menu
    fn name(&self) -> &str;

    /// Run the interaction; `Ok(false)` means an expectation was not met
    async fn execute(&self, session: &ProcessSession) -> Result<bool, SessionError>;
}

/// One step of a scripted action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    /// Write text to the process's stdin (no implicit newline)
    Send { send: String },

    /// Wait until the pattern appears in the transcript
    Expect {
        expect: String,
        #[serde(default = "default_expect_timeout")]
        timeout_secs: u64,
    },
}

/// A declarative action loaded from YAML: a name plus send/expect steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionScript {
    pub name: String,
    pub steps: Vec<ScriptStep>,
}

impl ActionScript {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read {}", path.as_ref().display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let script: ActionScript = serde_yaml::from_str(yaml)?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("action name must not be empty");
        }
        if self.steps.is_empty() {
            bail!("action '{}' has no steps", self.name);
        }
        for step in &self.steps {
            if let ScriptStep::Expect { timeout_secs: 0, .. } = step {
                bail!("action '{}': expect timeout must be at least 1s", self.name);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl InteractiveAction for ActionScript {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, session: &ProcessSession) -> Result<bool, SessionError> {
        for step in &self.steps {
            match step {
                ScriptStep::Send { send } => {
                    debug!(action = %self.name, bytes = send.len(), "sending input");
                    session.send_input(send).await?;
                }
                ScriptStep::Expect {
                    expect,
                    timeout_secs,
                } => {
                    debug!(action = %self.name, pattern = %expect, "waiting for output");
                    let found = session
                        .wait_for_output(expect, Duration::from_secs(*timeout_secs))
                        .await?;
                    if !found {
                        warn!(action = %self.name, pattern = %expect, "expected output never appeared");
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }
}

/// Load every action script from a directory, sorted by file name
///
/// Missing directory is not an error - projects without actions are normal.
pub fn load_actions(dir: &Path) -> Result<Vec<ActionScript>> {
    let mut scripts = Vec::new();
    if !dir.is_dir() {
        return Ok(scripts);
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yml") | Some("yaml")
            )
        })
        .collect();
    paths.sort();

    for path in paths {
        match ActionScript::from_file(&path) {
            Ok(script) => scripts.push(script),
            Err(e) => warn!(path = %path.display(), err = %format!("{:#}", e), "skipping unloadable action"),
        }
    }

    Ok(scripts)
}
