//! Parser for the semi-structured test-design text format.
//!
//! The format mixes header lines (`Title:`, `Prerequisites:`, ...), field
//! declarations in bracket notation, and Given/When/Then prose that becomes
//! ordered steps. `{{field_id}}` placeholders pass through untouched; the
//! merger substitutes them later against validated values.

use flowpilot_types::{FieldSpec, FieldType, StepAction, StepSpec, WorkflowDefinition};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::EngineError;
use crate::parser::actions::{extract_wait_secs, infer_critical, keyword_classifier, StepClassifier};

/// Knobs for text parsing. The defaults match the stock grammar; swap the
/// classifier to teach the parser a different prose vocabulary.
#[derive(Clone, Copy)]
pub struct TextParseOptions {
    pub classifier: StepClassifier,
}

impl Default for TextParseOptions {
    fn default() -> Self {
        Self {
            classifier: keyword_classifier,
        }
    }
}

static FIELD_BRACKET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\[\]]+)\]").unwrap_or_else(|_| unreachable!()));

/// Parses a test-design document into a workflow definition.
///
/// `fallback_id` is used when the source carries no `Workflow:` header
/// (typically the file stem). A source with neither fields nor steps is
/// rejected as malformed.
pub fn parse_text(source: &str, fallback_id: &str) -> Result<WorkflowDefinition, EngineError> {
    parse_text_with(source, fallback_id, TextParseOptions::default())
}

/// [`parse_text`] with an explicit classifier.
pub fn parse_text_with(source: &str, fallback_id: &str, options: TextParseOptions) -> Result<WorkflowDefinition, EngineError> {
    let mut definition = WorkflowDefinition {
        id: fallback_id.to_string(),
        ..WorkflowDefinition::default()
    };
    let mut next_step_id: u32 = 1;
    let mut last_clause: Option<Clause> = None;

    for raw_line in source.lines() {
        let line = raw_line.trim().trim_start_matches('-').trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = header_value(line, &["Workflow"]) {
            definition.id = slugify(rest);
            continue;
        }
        if let Some(rest) = header_value(line, &["Title", "Name"]) {
            definition.name = rest.to_string();
            continue;
        }
        if let Some(rest) = header_value(line, &["Description"]) {
            definition.description = rest.to_string();
            continue;
        }
        if let Some(rest) = header_value(line, &["Category"]) {
            definition.category = rest.to_string();
            continue;
        }
        if let Some(rest) = header_value(line, &["Prerequisites", "Depends on"]) {
            definition.prerequisites = id_list(rest);
            continue;
        }
        if let Some(rest) = header_value(line, &["Optional"]) {
            definition.optional_dependencies = id_list(rest);
            continue;
        }
        if let Some(rest) = header_value(line, &["Duration"]) {
            if let Some(secs) = parse_duration_secs(rest) {
                definition.estimated_duration = secs;
            }
            continue;
        }

        if FIELD_BRACKET.is_match(line) {
            let field = parse_field_line(line, fallback_id)?;
            definition.fields.push(field);
            continue;
        }

        if let Some((clause, prose)) = split_step_clause(line, last_clause) {
            last_clause = Some(clause);
            let step = build_step(next_step_id, clause, prose, options.classifier);
            next_step_id += 1;
            definition.steps.push(step);
        }
    }

    if definition.fields.is_empty() && definition.steps.is_empty() {
        return Err(EngineError::malformed(fallback_id, "no fields or steps found in source"));
    }
    if definition.name.is_empty() {
        definition.name = definition.id.clone();
    }
    check_unique_field_ids(&definition)?;

    debug!(
        workflow = %definition.id,
        field_count = definition.fields.len(),
        step_count = definition.steps.len(),
        "parsed text definition"
    );
    Ok(definition)
}

fn check_unique_field_ids(definition: &WorkflowDefinition) -> Result<(), EngineError> {
    for (index, field) in definition.fields.iter().enumerate() {
        if definition.fields[..index].iter().any(|other| other.field_id == field.field_id) {
            return Err(EngineError::malformed(
                &definition.id,
                format!("duplicate field id '{}'", field.field_id),
            ));
        }
    }
    Ok(())
}

fn header_value<'a>(line: &'a str, keys: &[&str]) -> Option<&'a str> {
    for key in keys {
        // `get` rejects non-boundary offsets, so multi-byte prose lines
        // shorter than the keyword fall through instead of panicking.
        let Some(prefix) = line.get(..key.len()) else { continue };
        if !prefix.eq_ignore_ascii_case(key) {
            continue;
        }
        if let Some(value) = line[key.len()..].strip_prefix(':') {
            return Some(value.trim());
        }
    }
    None
}

fn id_list(raw: &str) -> Vec<String> {
    let mut ids = Vec::new();
    for part in raw.split(',') {
        let id = slugify(part);
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

fn slugify(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn parse_duration_secs(raw: &str) -> Option<u64> {
    let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    let value: u64 = digits.parse().ok()?;
    let unit = raw[digits.len()..].trim().to_ascii_lowercase();
    if unit.starts_with("min") || unit == "m" {
        Some(value * 60)
    } else {
        Some(value)
    }
}

/// Parses a field declaration line.
///
/// Grammar inside the bracket: `field_id:type:required|optional[:default=V]`.
/// Dropdown defaults may carry the option list as `default=a|b|c` (first
/// entry is the default). Text before the bracket, up to a trailing colon,
/// becomes the label.
fn parse_field_line(line: &str, source_name: &str) -> Result<FieldSpec, EngineError> {
    let captures = FIELD_BRACKET
        .captures(line)
        .unwrap_or_else(|| unreachable!("caller checked for a bracket"));
    let bracket = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let full_match = captures.get(0).map(|m| m.as_str()).unwrap_or_default();

    let segments: Vec<&str> = bracket.splitn(4, ':').collect();
    if segments.len() < 3 {
        return Err(EngineError::malformed(
            source_name,
            format!("field declaration '[{bracket}]' needs at least field_id:type:required segments"),
        ));
    }

    let field_id = segments[0].trim().to_string();
    if field_id.is_empty() {
        return Err(EngineError::malformed(source_name, "field declaration with empty field id"));
    }
    let field_type = FieldType::from(segments[1].trim().to_string());
    let required = match segments[2].trim().to_ascii_lowercase().as_str() {
        "required" => true,
        "optional" => false,
        other => {
            return Err(EngineError::malformed(
                source_name,
                format!("field '{field_id}' requirement must be 'required' or 'optional', got '{other}'"),
            ))
        }
    };

    let (default_value, options) = match segments.get(3) {
        Some(tail) => parse_default_clause(tail.trim(), &field_type),
        None => (String::new(), Vec::new()),
    };

    let label = line
        .split(full_match)
        .next()
        .unwrap_or_default()
        .trim()
        .trim_end_matches(':')
        .trim()
        .to_string();

    Ok(FieldSpec {
        field_id,
        label,
        field_type,
        required,
        default_value,
        description: String::new(),
        validation: Default::default(),
        options,
    })
}

fn parse_default_clause(tail: &str, field_type: &FieldType) -> (String, Vec<String>) {
    let Some(raw_default) = tail.strip_prefix("default=") else {
        return (String::new(), Vec::new());
    };
    if *field_type == FieldType::Dropdown && raw_default.contains('|') {
        let options: Vec<String> = raw_default.split('|').map(|option| option.trim().to_string()).collect();
        let default_value = options.first().cloned().unwrap_or_default();
        (default_value, options)
    } else {
        (raw_default.trim().to_string(), Vec::new())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Clause {
    Given,
    When,
    Then,
}

fn split_step_clause(line: &str, last: Option<Clause>) -> Option<(Clause, &str)> {
    for (keyword, clause) in [("Given", Clause::Given), ("When", Clause::When), ("Then", Clause::Then)] {
        if let Some(rest) = clause_rest(line, keyword) {
            return Some((clause, rest));
        }
    }
    // "And" continues the previous clause kind.
    if let Some(rest) = clause_rest(line, "And") {
        return last.map(|clause| (clause, rest));
    }
    None
}

fn clause_rest<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let prefix = line.get(..keyword.len())?;
    if !prefix.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &line[keyword.len()..];
    if rest.starts_with(' ') || rest.starts_with(':') {
        return Some(rest.trim_start_matches(':').trim());
    }
    None
}

fn build_step(step_id: u32, clause: Clause, prose: &str, classifier: StepClassifier) -> StepSpec {
    let marked_critical = prose.to_ascii_lowercase().contains("(critical)");
    let description = prose.trim_end_matches("(critical)").trim().to_string();

    let action = classifier(&description).unwrap_or(match clause {
        Clause::Then => StepAction::Verify,
        Clause::When => StepAction::Click,
        Clause::Given => StepAction::Unknown,
    });

    let wait_secs = if action == StepAction::Wait { extract_wait_secs(&description) } else { None };
    let value = if action == StepAction::Fill { extract_value_token(&description) } else { None };

    StepSpec {
        step_id,
        action,
        description: description.clone(),
        selector: None,
        value,
        verification: if clause == Clause::Then { description } else { String::new() },
        critical: marked_critical || infer_critical(action, prose),
        wait_secs,
    }
}

/// Pulls the literal being typed out of fill prose: a `{{token}}` if one is
/// present, otherwise the first quoted string.
fn extract_value_token(prose: &str) -> Option<String> {
    if let Some(start) = prose.find("{{") {
        if let Some(len) = prose[start..].find("}}") {
            return Some(prose[start..start + len + 2].to_string());
        }
    }
    let first_quote = prose.find('"')?;
    let rest = &prose[first_quote + 1..];
    let second_quote = rest.find('"')?;
    Some(rest[..second_quote].to_string())
}
