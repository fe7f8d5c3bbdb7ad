//! CLI output formatting

use crate::core::output::PipelineResult;
use crate::execution::PipelineEvent;
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format a pipeline event for display
pub fn format_pipeline_event(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::PipelineStarted {
            run_id,
            pipeline,
            steps,
        } => format!(
            "{} Starting pipeline {} ({}, {} steps)",
            ROCKET,
            style(pipeline).bold(),
            style(&run_id.to_string()[..8]).dim(),
            steps
        ),
        PipelineEvent::StepStarted { index, total, step } => format!(
            "{} [{}/{}] {}",
            SPINNER,
            style(index).cyan(),
            style(total).dim(),
            style(step).cyan()
        ),
        PipelineEvent::StepCompleted { step, .. } => {
            format!("{} {}", CHECK, style(step).green())
        }
        PipelineEvent::StepFailed { step, error, .. } => {
            format!("{} {}: {}", CROSS, style(step).red(), style(error).dim())
        }
        PipelineEvent::ContinuationStarted { branch, steps } => format!(
            "{} Running {} continuation ({} steps)",
            INFO,
            style(branch).yellow(),
            steps
        ),
        PipelineEvent::PipelineCompleted {
            run_id, success, ..
        } => {
            let status = if *success {
                format!("completed {}", style("successfully").green())
            } else {
                style("failed").red().to_string()
            };
            format!(
                "{} Pipeline ({}) {}",
                INFO,
                style(&run_id.to_string()[..8]).dim(),
                status
            )
        }
    }
}

/// Summarize a finished run for the operator
pub fn format_result_summary(result: &PipelineResult) -> String {
    if result.success {
        format!(
            "{} {} completed {} ({} steps)",
            CHECK,
            style(&result.pipeline).bold(),
            style("successfully").green(),
            result.trace.len()
        )
    } else {
        let step = result.failed_step.as_deref().unwrap_or("?");
        let error = result.error.as_deref().unwrap_or("unknown error");
        let mut summary = format!(
            "{} {} {} at {}: {}",
            CROSS,
            style(&result.pipeline).bold(),
            style("failed").red(),
            style(step).red(),
            error
        );
        if let Some(output) = &result.output {
            let detail = format_output(&output.render(), 10);
            if !detail.trim().is_empty() {
                summary.push_str(&format!("\n{}", style(detail).dim()));
            }
        }
        summary
    }
}

/// Format captured output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

/// Horizontal rule spanning the terminal
pub fn separator() -> String {
    let width = term_size::dimensions_stdout().map(|(w, _)| w).unwrap_or(80);
    "─".repeat(width)
}
