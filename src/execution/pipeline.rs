//! Pipeline executor - sequences declarative actions over one context

use crate::core::action::{ActionSpec, PipelineDef};
use crate::core::config::{PipelineLibrary, ProjectConfig};
use crate::core::context::PipelineContext;
use crate::core::output::{Output, PipelineResult, StepOutcome};
use crate::core::template;
use crate::execution::process::BoundedExecutor;
use crate::execution::retry::{RetryController, RetryError};
use crate::execution::CancelToken;
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Nested pipeline invocations deeper than this are refused
const MAX_NESTING: usize = 8;

/// Progress notifications emitted while a pipeline runs
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    PipelineStarted {
        run_id: Uuid,
        pipeline: String,
        steps: usize,
    },
    StepStarted {
        index: usize,
        total: usize,
        step: String,
    },
    StepCompleted {
        index: usize,
        step: String,
    },
    StepFailed {
        index: usize,
        step: String,
        error: String,
    },
    ContinuationStarted {
        branch: &'static str,
        steps: usize,
    },
    PipelineCompleted {
        run_id: Uuid,
        pipeline: String,
        success: bool,
    },
}

/// Callback receiving pipeline events
pub type EventSink = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The named pipeline definition could not be resolved
    #[error("cannot resolve pipeline: {0}")]
    UnknownPipeline(String),

    /// A continuation step failed; terminal for the whole invocation
    #[error("{branch} continuation failed: {source}")]
    ContinuationFailed {
        branch: &'static str,
        #[source]
        source: Box<PipelineError>,
    },

    /// A step inside a continuation list failed
    #[error("step {step} failed: {message}")]
    StepFailed { step: String, message: String },

    /// Nested invocations exceeded the depth limit
    #[error("pipeline nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// The run was cancelled; remaining steps and continuations skipped
    #[error("run cancelled")]
    Cancelled,
}

/// How a single step went wrong
enum StepError {
    /// The step never ran (template failure, unresolvable agent/pipeline)
    NotAttempted { message: String },

    /// The step ran and failed; carries the last attempt's output
    Attempted { output: Output, message: String },

    /// Not a step-local failure; propagate as-is
    Fatal(PipelineError),
}

/// Result of running one pipeline definition (including continuations)
struct DefRun {
    success: bool,
    ctx: PipelineContext,
    trace: Vec<StepOutcome>,
    failed_step: Option<String>,
    error: Option<String>,
}

/// Interprets pipeline definitions step by step
///
/// Retry policy lives exclusively in the retry controller; this layer never
/// re-runs a failed step. Steps execute strictly sequentially.
pub struct PipelineExecutor {
    retry: RetryController,
    library: PipelineLibrary,
    config_vars: serde_yaml::Value,
    cancel: Arc<CancelToken>,
    events: Option<EventSink>,
}

impl PipelineExecutor {
    pub fn new(config: &ProjectConfig, library: PipelineLibrary, mirror: bool) -> Self {
        let cancel = Arc::new(CancelToken::new());
        let executor = BoundedExecutor::new(cancel.clone()).with_mirror(mirror);
        Self {
            retry: RetryController::new(executor, config.agents.clone()),
            library,
            config_vars: config.vars.clone(),
            cancel,
            events: None,
        }
    }

    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// Token that cancels the active execution and skips the rest of the run
    pub fn cancel_token(&self) -> Arc<CancelToken> {
        self.cancel.clone()
    }

    /// Run a pipeline by name with initial variable bindings
    pub async fn run(
        &self,
        pipeline: &str,
        bindings: HashMap<String, String>,
        working_dir: PathBuf,
        project_dir: PathBuf,
    ) -> Result<PipelineResult, PipelineError> {
        let def = self
            .library
            .resolve(pipeline)
            .map_err(|e| PipelineError::UnknownPipeline(format!("{:#}", e)))?;

        let mut ctx = PipelineContext::new(working_dir, project_dir, self.config_vars.clone());
        for (key, value) in bindings {
            ctx.set_var(key, value);
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let name = def.name.clone();

        info!(pipeline = %name, %run_id, steps = def.steps.len(), "pipeline started");
        self.emit(PipelineEvent::PipelineStarted {
            run_id,
            pipeline: name.clone(),
            steps: def.steps.len(),
        });

        let run = self.run_def(def, ctx, 0).await?;

        info!(pipeline = %name, %run_id, success = run.success, "pipeline finished");
        self.emit(PipelineEvent::PipelineCompleted {
            run_id,
            pipeline: name.clone(),
            success: run.success,
        });

        Ok(PipelineResult {
            run_id,
            pipeline: name,
            success: run.success,
            output: run.ctx.output.clone(),
            trace: run.trace,
            failed_step: run.failed_step,
            error: run.error,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Run one definition: steps, then exactly one continuation list
    ///
    /// Boxed so nested pipeline steps can recurse.
    fn run_def(
        &self,
        def: PipelineDef,
        mut ctx: PipelineContext,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<DefRun, PipelineError>> + Send + '_>> {
        Box::pin(async move {
            if depth >= MAX_NESTING {
                return Err(PipelineError::NestingTooDeep(MAX_NESTING));
            }

            let total = def.steps.len();
            let mut trace = Vec::new();
            let mut failure: Option<(String, String)> = None;

            for (i, step) in def.steps.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }

                let label = step.label();
                let index = i + 1;
                self.emit(PipelineEvent::StepStarted {
                    index,
                    total,
                    step: label.clone(),
                });

                match self.run_step(step, &mut ctx, depth).await {
                    Ok(output) => {
                        trace.push(StepOutcome {
                            index,
                            step: label.clone(),
                            output: output.clone(),
                        });
                        export_structured(&mut ctx, &output);
                        ctx.record_step_output(output);
                        self.emit(PipelineEvent::StepCompleted {
                            index,
                            step: label,
                        });
                    }
                    Err(StepError::Attempted { output, message }) => {
                        warn!(step = %label, %message, "step failed");
                        trace.push(StepOutcome {
                            index,
                            step: label.clone(),
                            output: output.clone(),
                        });
                        // The fail continuation sees the failing output
                        ctx.output = Some(output);
                        self.emit(PipelineEvent::StepFailed {
                            index,
                            step: label.clone(),
                            error: message.clone(),
                        });
                        failure = Some((label, message));
                        break;
                    }
                    Err(StepError::NotAttempted { message }) => {
                        warn!(step = %label, %message, "step failed before execution");
                        self.emit(PipelineEvent::StepFailed {
                            index,
                            step: label.clone(),
                            error: message.clone(),
                        });
                        failure = Some((label, message));
                        break;
                    }
                    Err(StepError::Fatal(e)) => return Err(e),
                }
            }

            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let (branch, continuation) = match &failure {
                None => ("success", &def.on_success),
                Some(_) => ("fail", &def.on_fail),
            };
            if !continuation.is_empty() {
                self.emit(PipelineEvent::ContinuationStarted {
                    branch,
                    steps: continuation.len(),
                });
                self.run_continuation(continuation, &mut ctx, depth)
                    .await
                    .map_err(|source| PipelineError::ContinuationFailed {
                        branch,
                        source: Box::new(source),
                    })?;
            }

            let (failed_step, error) = match failure {
                Some((step, message)) => (Some(step), Some(message)),
                None => (None, None),
            };
            Ok(DefRun {
                success: failed_step.is_none(),
                ctx,
                trace,
                failed_step,
                error,
            })
        })
    }

    /// Run a continuation list sharing the caller's context
    ///
    /// Continuations run at most once; a failure here never triggers the
    /// opposite list.
    async fn run_continuation(
        &self,
        steps: &[ActionSpec],
        ctx: &mut PipelineContext,
        depth: usize,
    ) -> Result<(), PipelineError> {
        for step in steps {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let label = step.label();
            match self.run_step(step, ctx, depth).await {
                Ok(output) => {
                    export_structured(ctx, &output);
                    ctx.record_step_output(output);
                }
                Err(StepError::Fatal(e)) => return Err(e),
                Err(StepError::Attempted { message, .. })
                | Err(StepError::NotAttempted { message }) => {
                    return Err(PipelineError::StepFailed {
                        step: label,
                        message,
                    });
                }
            }
        }
        Ok(())
    }

    /// Dispatch one step to the retry controller or a nested invocation
    async fn run_step(
        &self,
        step: &ActionSpec,
        ctx: &mut PipelineContext,
        depth: usize,
    ) -> Result<Output, StepError> {
        match step {
            ActionSpec::AgentCall {
                prompt,
                agent,
                structured,
                retry,
            } => {
                let prompt = template::resolve(prompt, ctx).map_err(not_attempted)?;
                self.retry
                    .run_agent(&prompt, agent, *structured, &ctx.working_dir, retry)
                    .await
                    .map_err(step_error)
            }

            ActionSpec::Validate {
                command,
                repair_prompt,
                agent,
                retry,
            } => {
                let command = template::resolve(command, ctx).map_err(not_attempted)?;
                let repair_ctx = ctx.clone();
                let repair_prompt = repair_prompt.clone();
                let repair_agent = agent.clone();
                let policy = *retry;
                let controller = &self.retry;

                controller
                    .run_validate(&command, &ctx.working_dir, retry, move |failing: Output| {
                        let mut rc = repair_ctx.clone();
                        rc.output = Some(failing);
                        let repair_prompt = repair_prompt.clone();
                        let repair_agent = repair_agent.clone();
                        async move {
                            let prompt = template::resolve(&repair_prompt, &rc)?;
                            let output = controller
                                .run_agent(&prompt, &repair_agent, false, &rc.working_dir, &policy)
                                .await?;
                            Ok(output)
                        }
                    })
                    .await
                    .map_err(step_error)
            }

            ActionSpec::NestedPipeline {
                pipeline,
                args,
                returns,
            } => {
                let def = self.library.resolve(pipeline).map_err(|e| {
                    StepError::NotAttempted {
                        message: format!("cannot resolve pipeline '{}': {:#}", pipeline, e),
                    }
                })?;

                let mut child_ctx = ctx.derive_child();
                for (key, value) in args {
                    let value = template::resolve(value, ctx).map_err(not_attempted)?;
                    child_ctx.set_var(key.clone(), value);
                }

                let run = match self.run_def(def, child_ctx, depth + 1).await {
                    Ok(run) => run,
                    Err(e) => return Err(StepError::Fatal(e)),
                };

                if run.success {
                    ctx.adopt_returns(&run.ctx, returns);
                    Ok(run.ctx.output.clone().unwrap_or(Output {
                        stdout: String::new(),
                        stderr: String::new(),
                        structured: None,
                        exit_code: Some(0),
                        timed_out: false,
                    }))
                } else {
                    let message = format!(
                        "nested pipeline '{}' failed at {}: {}",
                        pipeline,
                        run.failed_step.as_deref().unwrap_or("?"),
                        run.error.as_deref().unwrap_or("unknown error"),
                    );
                    match run.ctx.output.clone() {
                        Some(output) => Err(StepError::Attempted { output, message }),
                        None => Err(StepError::NotAttempted { message }),
                    }
                }
            }
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(sink) = &self.events {
            sink(&event);
        }
    }
}

/// Expose scalar fields of a structured payload as context variables
///
/// This is how a step (and, through `returns`, a nested pipeline) hands
/// values to later steps; nested structures stay reachable via
/// `output.structured` paths.
fn export_structured(ctx: &mut PipelineContext, output: &Output) {
    let Some(map) = &output.structured else {
        return;
    };
    for (key, value) in map {
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        ctx.set_var(key.clone(), rendered);
    }
}

fn not_attempted(err: template::TemplateError) -> StepError {
    StepError::NotAttempted {
        message: err.to_string(),
    }
}

fn step_error(err: RetryError) -> StepError {
    match err {
        RetryError::Exhausted { attempts, last } => StepError::Attempted {
            message: format!("retry budget exhausted after {} attempts", attempts),
            output: last,
        },
        RetryError::RepairFailed { last, source } => StepError::Attempted {
            message: format!("repair step failed: {:#}", source),
            output: last,
        },
        RetryError::UnknownAgent(name) => StepError::NotAttempted {
            message: format!("unknown agent '{}'", name),
        },
        RetryError::Spawn(e) => StepError::NotAttempted {
            message: e.to_string(),
        },
        RetryError::Cancelled => StepError::Fatal(PipelineError::Cancelled),
    }
}
