//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{CheckCommand, ExecCommand, ProgressCommand, RunCommand, SetCommand};

/// Drive AI coding agents and shell checks through declarative pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "drover")]
#[command(version = "0.1.0")]
#[command(about = "Drives agents and shell checks through declarative pipelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Supervise an interactive command with scripted actions
    Exec(ExecCommand),

    /// Validate a pipeline definition file
    Check(CheckCommand),

    /// Update one field of a YAML document by key path
    Set(SetCommand),

    /// Show checklist progress for a markdown file
    Progress(ProgressCommand),
}

impl Cli {
    /// Parse CLI arguments from the environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

use std::ffi::OsString;
