//! Key-path updates over YAML documents
//!
//! Field queries use dotted names with `[n]` array indexing, e.g.
//! `server.ports[0]` or `jobs[2].name`. Intermediate mappings are created
//! as needed; array elements must already exist.

use anyhow::{bail, Context, Result};
use serde_yaml::Value;
use std::path::Path;

/// One parsed query segment: a field name plus trailing indices
#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    name: String,
    indices: Vec<usize>,
}

fn parse_query(query: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    for raw in query.split('.') {
        let (name, mut rest) = match raw.find('[') {
            Some(pos) => (&raw[..pos], &raw[pos..]),
            None => (raw, ""),
        };
        if name.is_empty() {
            bail!("invalid field query '{}'", query);
        }
        let mut indices = Vec::new();
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped
                .find(']')
                .with_context(|| format!("invalid field query '{}'", query))?;
            let index: usize = stripped[..close]
                .parse()
                .with_context(|| format!("invalid array index in '{}'", query))?;
            indices.push(index);
            rest = &stripped[close + 1..];
        }
        if !rest.is_empty() {
            bail!("invalid field query '{}'", query);
        }
        segments.push(Segment {
            name: name.to_string(),
            indices,
        });
    }
    if segments.is_empty() {
        bail!("empty field query");
    }
    Ok(segments)
}

/// Set `query` to `value` in the YAML document at `path`
///
/// The value string is itself parsed as YAML, so `5` becomes a number and
/// `true` a boolean; anything unparsable stays a string.
pub fn update_yaml_file(path: &Path, query: &str, value: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut doc: Value = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    if doc.is_null() {
        doc = Value::Mapping(Default::default());
    }

    let new_value: Value =
        serde_yaml::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    update_value(&mut doc, &parse_query(query)?, new_value)?;

    let rendered = serde_yaml::to_string(&doc)?;
    std::fs::write(path, rendered)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn update_value(doc: &mut Value, segments: &[Segment], new_value: Value) -> Result<()> {
    let mut node = doc;
    let last = segments.len() - 1;

    for (i, segment) in segments.iter().enumerate() {
        let is_last = i == last;

        // Descend by name, creating intermediate mappings as needed
        let mapping = match node {
            Value::Mapping(mapping) => mapping,
            other => {
                *other = Value::Mapping(Default::default());
                match other {
                    Value::Mapping(mapping) => mapping,
                    _ => unreachable!("just assigned a mapping"),
                }
            }
        };
        let key = Value::String(segment.name.clone());
        if is_last && segment.indices.is_empty() {
            mapping.insert(key, new_value);
            return Ok(());
        }
        node = mapping
            .entry(key)
            .or_insert_with(|| Value::Mapping(Default::default()));

        // Descend through indices; arrays are never created implicitly
        for (j, index) in segment.indices.iter().enumerate() {
            let sequence = match node {
                Value::Sequence(sequence) => sequence,
                _ => bail!("'{}' is not an array", segment.name),
            };
            let len = sequence.len();
            let slot = sequence.get_mut(*index).with_context(|| {
                format!("index {} out of range for '{}' (len {})", index, segment.name, len)
            })?;
            if is_last && j == segment.indices.len() - 1 {
                *slot = new_value;
                return Ok(());
            }
            node = slot;
        }
    }

    Ok(())
}

/// Read the value at `query` from the YAML document at `path`
pub fn read_yaml_path(path: &Path, query: &str) -> Result<Option<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let doc: Value = serde_yaml::from_str(&content)?;

    let mut node = &doc;
    for segment in parse_query(query)? {
        match node.get(segment.name.as_str()) {
            Some(next) => node = next,
            None => return Ok(None),
        }
        for index in &segment.indices {
            match node.get(index) {
                Some(next) => node = next,
                None => return Ok(None),
            }
        }
    }
    Ok(Some(node.clone()))
}
