//! drover - drives AI coding agents and shell checks through declarative
//! pipelines, with an interactive supervisor for long-running sessions

pub mod cli;
pub mod core;
pub mod execution;
pub mod project;
pub mod supervisor;

// Re-export commonly used types
pub use crate::core::{
    ActionSpec, AgentCommand, Output, PipelineContext, PipelineDef, PipelineFile, PipelineLibrary,
    PipelineResult, ProjectConfig, RetryDefaults, RetryPolicy, StepOutcome, TemplateError,
};
pub use crate::execution::{
    BoundedExecutor, CancelToken, CommandLine, PipelineError, PipelineEvent, PipelineExecutor,
    RetryController, RetryError, SpawnError,
};
pub use crate::supervisor::{
    ActionScript, InteractiveAction, ProcessSession, SessionError, Supervisor, SupervisedProcess,
    Transcript,
};
