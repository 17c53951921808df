//! Parsers for the structured template formats (JSON and YAML).
//!
//! Both deserialize straight into [`WorkflowDefinition`]; the work here is
//! the schema check and normalization on top: a template must carry a
//! workflow id and at least one field or step, field ids must be unique,
//! and blank names fall back to the id.

use flowpilot_types::WorkflowDefinition;
use tracing::debug;

use crate::error::EngineError;

/// Parses a JSON template. `source_name` only feeds error messages.
pub fn parse_json(source: &str, source_name: &str) -> Result<WorkflowDefinition, EngineError> {
    let definition: WorkflowDefinition =
        serde_json::from_str(source).map_err(|error| EngineError::malformed(source_name, error.to_string()))?;
    normalize(definition, source_name)
}

/// Parses a YAML template into the same definition shape.
pub fn parse_yaml(source: &str, source_name: &str) -> Result<WorkflowDefinition, EngineError> {
    let definition: WorkflowDefinition =
        serde_yaml::from_str(source).map_err(|error| EngineError::malformed(source_name, error.to_string()))?;
    normalize(definition, source_name)
}

fn normalize(mut definition: WorkflowDefinition, source_name: &str) -> Result<WorkflowDefinition, EngineError> {
    if definition.id.trim().is_empty() {
        return Err(EngineError::malformed(source_name, "template is missing 'workflow_id'"));
    }
    if definition.fields.is_empty() && definition.steps.is_empty() {
        return Err(EngineError::malformed(source_name, "template has neither fields nor steps"));
    }
    for (index, field) in definition.fields.iter().enumerate() {
        if field.field_id.trim().is_empty() {
            return Err(EngineError::malformed(source_name, format!("field {index} has an empty field_id")));
        }
        if definition.fields[..index].iter().any(|other| other.field_id == field.field_id) {
            return Err(EngineError::malformed(source_name, format!("duplicate field id '{}'", field.field_id)));
        }
    }
    for (index, step) in definition.steps.iter().enumerate() {
        if definition.steps[..index].iter().any(|other| other.step_id == step.step_id) {
            return Err(EngineError::malformed(source_name, format!("duplicate step id {}", step.step_id)));
        }
    }
    if definition.name.is_empty() {
        definition.name = definition.id.clone();
    }

    debug!(
        workflow = %definition.id,
        field_count = definition.fields.len(),
        step_count = definition.steps.len(),
        "parsed structured definition"
    );
    Ok(definition)
}
