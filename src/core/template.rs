//! Template resolution - `{{ variable }}` substitution against the context

use crate::core::context::PipelineContext;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// An unresolvable variable reference fails the step immediately; a
/// placeholder is never left in the expanded text as literal noise.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unresolved template variable '{0}'")]
    Unresolved(String),
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\[\d+\])*(?:\.[A-Za-z_][A-Za-z0-9_\-]*(?:\[\d+\])*)*)\s*\}\}")
            .expect("placeholder regex is valid")
    })
}

/// Expand every `{{ name }}` placeholder in `template` from the context
///
/// Names may use dotted/indexed paths into outputs and the configuration
/// tree (`output.stderr`, `vm.ports[0]`). The first unresolved name aborts
/// resolution.
pub fn resolve(template: &str, ctx: &PipelineContext) -> Result<String, TemplateError> {
    let mut result = String::with_capacity(template.len());
    let mut cursor = 0;

    for captures in placeholder_re().captures_iter(template) {
        let matched = match captures.get(0) {
            Some(m) => m,
            None => continue,
        };
        let path = &captures[1];

        let value = ctx
            .lookup(path)
            .ok_or_else(|| TemplateError::Unresolved(path.to_string()))?;

        result.push_str(&template[cursor..matched.start()]);
        result.push_str(&value);
        cursor = matched.end();
    }

    result.push_str(&template[cursor..]);
    Ok(result)
}
