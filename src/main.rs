use anyhow::{Context, Result};
use drover::cli::commands::{
    CheckCommand, ExecCommand, ProgressCommand, RunCommand, SetCommand,
};
use drover::cli::output::*;
use drover::cli::{Cli, Command};
use drover::core::{PipelineFile, PipelineLibrary, ProjectConfig};
use drover::execution::PipelineExecutor;
use drover::project;
use drover::supervisor::{self, InteractiveAction, Supervisor};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Exec(cmd) => exec_supervised(cmd).await?,
        Command::Check(cmd) => check_pipeline(cmd)?,
        Command::Set(cmd) => set_field(cmd)?,
        Command::Progress(cmd) => show_progress(cmd)?,
    }

    Ok(())
}

/// Resolve the project root: flag, enclosing git root, then cwd
fn resolve_project_dir(flag: &Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir.clone());
    }
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    Ok(project::default_project_dir(&cwd))
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let project_dir = resolve_project_dir(&cmd.project)?;
    let config = ProjectConfig::load_or_default(&project_dir)
        .context("Failed to load project configuration")?;
    let working_dir = cmd.dir.clone().unwrap_or_else(|| project_dir.clone());

    // Initial bindings: operator overrides plus loaded status variables
    let mut bindings = HashMap::new();
    let changed = project::changed_files(&working_dir);
    bindings.insert("changed_files".to_string(), changed.join(","));
    if let Some(checklist) = &config.checklist {
        let path = project_dir.join(checklist);
        match project::progress(&path) {
            Ok(fraction) => {
                bindings.insert("progress".to_string(), project::format_progress(fraction));
            }
            Err(e) => eprintln!("{} cannot read checklist: {:#}", WARN, e),
        }
    }
    for (key, value) in &cmd.variable {
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
        bindings.insert(key.clone(), value.clone());
    }

    let library = PipelineLibrary::new(&project_dir, config.retry_defaults());
    let executor = PipelineExecutor::new(&config, library, !cmd.quiet).with_events(Arc::new(
        |event: &drover::execution::PipelineEvent| {
            println!("{}", format_pipeline_event(event));
        },
    ));

    // Operator interrupt cancels the active step and skips the rest
    let cancel = executor.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} interrupt received, cancelling run", WARN);
            cancel.cancel();
        }
    });

    println!();
    let result = executor
        .run(&cmd.pipeline, bindings, working_dir, project_dir)
        .await;

    match result {
        Ok(result) => {
            println!("\n{}", format_result_summary(&result));
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            println!("\n{} {}", CROSS, style(&e).red());
            std::process::exit(1);
        }
    }
}

async fn exec_supervised(cmd: &ExecCommand) -> Result<()> {
    let project_dir = resolve_project_dir(&cmd.project)?;
    let shortcut = supervisor::parse_shortcut(&cmd.shortcut)?;

    let scripts = supervisor::load_actions(&project_dir.join(drover::core::config::ACTIONS_DIR))?;
    if !scripts.is_empty() {
        println!(
            "{} {} actions loaded; press {} for the menu",
            INFO,
            style(scripts.len()).cyan(),
            style(&cmd.shortcut).bold()
        );
    }
    let actions: Vec<Arc<dyn InteractiveAction>> = scripts
        .into_iter()
        .map(|script| Arc::new(script) as Arc<dyn InteractiveAction>)
        .collect();

    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    let supervisor = Supervisor::new(actions, shortcut);
    println!("{}", style(separator()).dim());
    let mut process = supervisor.start(&cmd.command, &cwd)?;
    let code = supervisor.interact(&mut process).await?;

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn check_pipeline(cmd: &CheckCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match PipelineFile::from_file(&cmd.file) {
        Ok(file) => {
            println!("{} Pipeline definition is valid!", CHECK);
            println!("  Name: {}", style(&file.name).bold());
            println!("  Steps: {}", style(file.steps.len()).cyan());
            println!(
                "  Continuations: {} success, {} fail",
                style(file.success.len()).cyan(),
                style(file.fail.len()).cyan()
            );

            if cmd.json {
                let json = serde_json::to_string_pretty(&file)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

fn set_field(cmd: &SetCommand) -> Result<()> {
    project::update_yaml_file(&cmd.file, &cmd.query, &cmd.value)?;
    println!(
        "{} {} = {} in {}",
        CHECK,
        style(&cmd.query).cyan(),
        style(&cmd.value).bold(),
        cmd.file.display()
    );
    Ok(())
}

fn show_progress(cmd: &ProgressCommand) -> Result<()> {
    let fraction = project::progress(&cmd.file)?;
    println!(
        "{} {} {}",
        INFO,
        style(project::format_progress(fraction)).bold(),
        style(format!("of {}", cmd.file.display())).dim()
    );
    Ok(())
}
