//! Definition parsing: test-design text, JSON, and YAML sources, all
//! producing the same canonical [`WorkflowDefinition`].

use std::path::Path;

use flowpilot_types::WorkflowDefinition;

use crate::error::EngineError;

pub mod actions;
pub mod json;
pub mod text;

pub use actions::{keyword_classifier, StepClassifier};
pub use json::{parse_json, parse_yaml};
pub use text::{parse_text, parse_text_with, TextParseOptions};

/// Parses a definition from a file, picking the format by extension
/// (`.json`, `.yaml`/`.yml`, anything else is treated as text). The file
/// stem is the fallback workflow id for text sources.
pub fn parse_definition_file(path: impl AsRef<Path>) -> Result<WorkflowDefinition, EngineError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let source_name = path.display().to_string();
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().trim_end_matches(".tdd").to_string())
        .unwrap_or_else(|| "unnamed".to_string());
    // Compound extensions like `.tdd.md` fold into the text branch.
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_json(&source, &source_name),
        Some("yaml") | Some("yml") => parse_yaml(&source, &source_name),
        _ => parse_definition_str(&source, &stem),
    }
}

/// Parses a definition from an in-memory source, sniffing the format from
/// content: a leading `{` means JSON, otherwise the text grammar applies.
pub fn parse_definition_str(source: &str, fallback_id: &str) -> Result<WorkflowDefinition, EngineError> {
    if source.trim_start().starts_with('{') {
        parse_json(source, fallback_id)
    } else {
        parse_text(source, fallback_id)
    }
}
