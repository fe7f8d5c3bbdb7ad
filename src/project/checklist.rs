//! Checklist progress - the fraction of checked markdown checkboxes

use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn checkbox_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*[-*+]\s+\[( |[xX])\]").expect("checkbox regex is valid")
    })
}

/// Fraction of checked checkboxes in `text`, 0.0 when there are none
pub fn progress_in(text: &str) -> f64 {
    let mut total = 0usize;
    let mut checked = 0usize;
    for captures in checkbox_re().captures_iter(text) {
        total += 1;
        if &captures[1] != " " {
            checked += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        checked as f64 / total as f64
    }
}

/// Checkbox progress of the file at `path`
pub fn progress(path: &Path) -> Result<f64> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(progress_in(&content))
}

/// Render a fraction as a percentage string, e.g. `60%`
pub fn format_progress(fraction: f64) -> String {
    format!("{:.0}%", fraction * 100.0)
}
