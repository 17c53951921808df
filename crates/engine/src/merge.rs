//! Template merging: resolved workflow chain plus caller field values in,
//! flat execution plan out.
//!
//! Per workflow, in chain order: defaults fill the aggregate value map
//! (caller values always win, earlier defaults win over later ones), values
//! are validated against each field's declared rules, `{{field_id}}`
//! placeholders in steps are substituted, and the workflow's steps are
//! appended tagged with their origin id and a per-action dispatch timeout.
//! Unknown placeholders are an error, never passed through to the executor.

use flowpilot_types::{ExecutionPlan, FieldSpec, FieldType, PlannedStep, StepAction, StepSpec, WorkflowDefinition};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::EngineError;
use crate::registry::Registry;

static URL_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://\S+$").unwrap_or_else(|_| unreachable!()));

/// Builds a flat [`ExecutionPlan`] for an already-resolved workflow chain.
pub fn merge(registry: &Registry, resolved_ids: &[String], field_values: &Map<String, Value>) -> Result<ExecutionPlan, EngineError> {
    let mut aggregate = field_values.clone();
    let mut plan = ExecutionPlan::default();

    for workflow_id in resolved_ids {
        let definition = registry.get(workflow_id)?;
        apply_defaults(definition, &mut aggregate);
        validate_fields(definition, &aggregate)?;
        append_steps(definition, &aggregate, &mut plan)?;
        plan.estimated_duration += definition.estimated_duration;
    }

    plan.field_values = aggregate;
    debug!(
        workflow_count = resolved_ids.len(),
        step_count = plan.steps.len(),
        estimated_duration = plan.estimated_duration,
        "merged execution plan"
    );
    Ok(plan)
}

/// Fills non-empty defaults for fields the aggregate map does not cover yet.
fn apply_defaults(definition: &WorkflowDefinition, aggregate: &mut Map<String, Value>) {
    for field in &definition.fields {
        if !aggregate.contains_key(&field.field_id) && !field.default_value.is_empty() {
            aggregate.insert(field.field_id.clone(), Value::String(field.default_value.clone()));
        }
    }
}

fn validate_fields(definition: &WorkflowDefinition, aggregate: &Map<String, Value>) -> Result<(), EngineError> {
    for field in &definition.fields {
        let value = aggregate.get(&field.field_id);
        let text = value.map(value_as_text);
        match text {
            None => {
                if field.required {
                    return Err(EngineError::validation(
                        &field.field_id,
                        "required",
                        format!("field '{}' is required and has no value or default", field.field_id),
                    ));
                }
            }
            // Empty optional values are treated as absent, not type-checked.
            Some(text) if text.is_empty() => {
                if field.required {
                    return Err(EngineError::validation(&field.field_id, "required", "value is empty"));
                }
            }
            Some(text) => validate_typed(field, &text)?,
        }
    }
    Ok(())
}

fn validate_typed(field: &FieldSpec, text: &str) -> Result<(), EngineError> {
    let rules = &field.validation;
    match &field.field_type {
        FieldType::Number => {
            let number: f64 = text
                .parse()
                .map_err(|_| EngineError::validation(&field.field_id, "number", format!("'{text}' is not a number")))?;
            if let Some(min) = rules.min {
                if number < min {
                    return Err(EngineError::validation(&field.field_id, "min", format!("{number} is below minimum {min}")));
                }
            }
            if let Some(max) = rules.max {
                if number > max {
                    return Err(EngineError::validation(&field.field_id, "max", format!("{number} is above maximum {max}")));
                }
            }
        }
        FieldType::Ip => {
            text.parse::<std::net::IpAddr>()
                .map_err(|_| EngineError::validation(&field.field_id, "ip", format!("'{text}' is not an IP address")))?;
        }
        FieldType::Boolean => {
            let normalized = text.to_ascii_lowercase();
            if !matches!(normalized.as_str(), "true" | "false" | "yes" | "no" | "1" | "0") {
                return Err(EngineError::validation(&field.field_id, "boolean", format!("'{text}' is not boolean-like")));
            }
        }
        FieldType::Dropdown => {
            if !field.options.is_empty() && !field.options.iter().any(|option| option == text) {
                return Err(EngineError::validation(
                    &field.field_id,
                    "options",
                    format!("'{text}' is not one of the allowed options"),
                ));
            }
        }
        FieldType::Url => {
            if !URL_SHAPE.is_match(text) {
                return Err(EngineError::validation(&field.field_id, "url", format!("'{text}' is not a URL")));
            }
            validate_text_rules(field, text)?;
        }
        FieldType::Text | FieldType::Textarea | FieldType::Password | FieldType::Other(_) => {
            validate_text_rules(field, text)?;
        }
    }
    Ok(())
}

fn validate_text_rules(field: &FieldSpec, text: &str) -> Result<(), EngineError> {
    let rules = &field.validation;
    if let Some(min_length) = rules.min_length {
        if text.chars().count() < min_length {
            return Err(EngineError::validation(
                &field.field_id,
                "min_length",
                format!("value is shorter than {min_length} characters"),
            ));
        }
    }
    if let Some(max_length) = rules.max_length {
        if text.chars().count() > max_length {
            return Err(EngineError::validation(
                &field.field_id,
                "max_length",
                format!("value is longer than {max_length} characters"),
            ));
        }
    }
    if let Some(pattern) = &rules.pattern {
        let regex =
            Regex::new(pattern).map_err(|error| EngineError::validation(&field.field_id, "pattern", format!("invalid pattern: {error}")))?;
        if !regex.is_match(text) {
            return Err(EngineError::validation(
                &field.field_id,
                "pattern",
                format!("value does not match pattern '{pattern}'"),
            ));
        }
    }
    Ok(())
}

fn append_steps(definition: &WorkflowDefinition, aggregate: &Map<String, Value>, plan: &mut ExecutionPlan) -> Result<(), EngineError> {
    for step in &definition.steps {
        let mut resolved = step.clone();
        resolved.description = substitute(&step.description, aggregate, &definition.id, step.step_id)?;
        if let Some(selector) = &step.selector {
            resolved.selector = Some(substitute(selector, aggregate, &definition.id, step.step_id)?);
        }
        if let Some(value) = &step.value {
            resolved.value = Some(substitute(value, aggregate, &definition.id, step.step_id)?);
        }
        let timeout_secs = step_timeout(&resolved);
        plan.steps.push(PlannedStep {
            origin_workflow: definition.id.clone(),
            step: resolved,
            timeout_secs,
        });
    }
    Ok(())
}

/// Dispatch timeout per action kind. Navigation is given the most slack;
/// wait steps get their declared duration plus headroom so a legitimate
/// long wait is not misread as a hung executor.
pub fn step_timeout(step: &StepSpec) -> u64 {
    match step.action {
        StepAction::Navigate => 300,
        StepAction::Wait => step.wait_secs.map_or(180, |secs| secs + 60),
        _ => 180,
    }
}

/// Replaces every `{{token}}` in `text` from the aggregate value map.
fn substitute(text: &str, aggregate: &Map<String, Value>, workflow: &str, step_id: u32) -> Result<String, EngineError> {
    let mut output = String::with_capacity(text.len());
    let mut remainder = text;

    while let Some(start) = remainder.find("{{") {
        output.push_str(&remainder[..start]);
        let after_open = &remainder[start + 2..];
        let Some(end) = after_open.find("}}") else {
            // Unterminated braces are literal text, not a placeholder.
            output.push_str(&remainder[start..]);
            return Ok(output);
        };
        let token = after_open[..end].trim();
        match aggregate.get(token) {
            Some(value) => output.push_str(&value_as_text(value)),
            None => {
                return Err(EngineError::UnresolvedPlaceholder {
                    workflow: workflow.to_string(),
                    step: step_id,
                    token: token.to_string(),
                })
            }
        }
        remainder = &after_open[end + 2..];
    }
    output.push_str(remainder);
    Ok(output)
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_types::ValidationRules;
    use serde_json::json;

    fn field(id: &str, field_type: FieldType, required: bool, default_value: &str) -> FieldSpec {
        FieldSpec {
            field_id: id.into(),
            field_type,
            required,
            default_value: default_value.into(),
            ..Default::default()
        }
    }

    fn step(step_id: u32, action: StepAction, value: Option<&str>) -> StepSpec {
        StepSpec {
            step_id,
            action,
            description: format!("step {step_id}"),
            value: value.map(String::from),
            ..Default::default()
        }
    }

    fn registry_with(definitions: Vec<WorkflowDefinition>) -> Registry {
        let mut registry = Registry::new();
        registry.load_all(definitions);
        registry
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn merges_chain_with_origin_tags_and_defaults() {
        let login = WorkflowDefinition {
            id: "login_flow".into(),
            estimated_duration: 120,
            fields: vec![field("username", FieldType::Text, true, "admin")],
            steps: vec![step(1, StepAction::Fill, Some("{{username}}"))],
            ..Default::default()
        };
        let fabric = WorkflowDefinition {
            id: "create_fabric".into(),
            estimated_duration: 600,
            fields: vec![field("fabric_name", FieldType::Text, true, "")],
            steps: vec![step(1, StepAction::Navigate, None), step(2, StepAction::Fill, Some("{{fabric_name}}"))],
            ..Default::default()
        };
        let registry = registry_with(vec![login, fabric]);

        let mut values = Map::new();
        values.insert("fabric_name".into(), json!("Fabric-01"));
        let plan = merge(&registry, &ids(&["login_flow", "create_fabric"]), &values).expect("merge");

        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[0].origin_workflow, "login_flow");
        assert_eq!(plan.steps[0].step.value.as_deref(), Some("admin"));
        assert_eq!(plan.steps[2].origin_workflow, "create_fabric");
        assert_eq!(plan.steps[2].step.value.as_deref(), Some("Fabric-01"));
        assert_eq!(plan.estimated_duration, 720);
        assert_eq!(plan.field_values["username"], json!("admin"));

        // Duplicate step ids across origins stay distinguishable.
        assert_eq!(plan.steps[0].step.step_id, 1);
        assert_eq!(plan.steps[1].step.step_id, 1);
    }

    #[test]
    fn number_range_is_enforced() {
        let fabric = WorkflowDefinition {
            id: "create_fabric".into(),
            fields: vec![FieldSpec {
                field_id: "bgp_asn".into(),
                field_type: FieldType::Number,
                required: true,
                validation: ValidationRules {
                    min: Some(1.0),
                    max: Some(65535.0),
                    ..Default::default()
                },
                ..Default::default()
            }],
            steps: vec![step(1, StepAction::Navigate, None)],
            ..Default::default()
        };
        let registry = registry_with(vec![fabric]);

        let mut values = Map::new();
        values.insert("bgp_asn".into(), json!("70000"));
        let error = merge(&registry, &ids(&["create_fabric"]), &values).expect_err("out of range");
        assert!(matches!(error, EngineError::Validation { field, rule, .. } if field == "bgp_asn" && rule == "max"));

        let mut values = Map::new();
        values.insert("bgp_asn".into(), json!(65001));
        merge(&registry, &ids(&["create_fabric"]), &values).expect("in range");
    }

    #[test]
    fn missing_required_value_without_default_fails() {
        let flow = WorkflowDefinition {
            id: "flow".into(),
            fields: vec![field("site_name", FieldType::Text, true, "")],
            steps: vec![step(1, StepAction::Click, None)],
            ..Default::default()
        };
        let registry = registry_with(vec![flow]);
        let error = merge(&registry, &ids(&["flow"]), &Map::new()).expect_err("required");
        assert!(matches!(error, EngineError::Validation { rule, .. } if rule == "required"));
    }

    #[test]
    fn unresolved_placeholder_is_an_error_not_passthrough() {
        let flow = WorkflowDefinition {
            id: "flow".into(),
            steps: vec![step(3, StepAction::Fill, Some("{{ghost_field}}"))],
            ..Default::default()
        };
        let registry = registry_with(vec![flow]);
        let error = merge(&registry, &ids(&["flow"]), &Map::new()).expect_err("unknown token");
        match error {
            EngineError::UnresolvedPlaceholder { workflow, step, token } => {
                assert_eq!(workflow, "flow");
                assert_eq!(step, 3);
                assert_eq!(token, "ghost_field");
            }
            other => panic!("expected unresolved placeholder, got {other}"),
        }
    }

    #[test]
    fn merged_plan_contains_no_placeholder_syntax() {
        let flow = WorkflowDefinition {
            id: "flow".into(),
            fields: vec![field("host", FieldType::Ip, true, "10.0.0.1")],
            steps: vec![StepSpec {
                step_id: 1,
                action: StepAction::Navigate,
                description: "open https://{{host}}/ui".into(),
                selector: Some("a[href*='{{host}}']".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let registry = registry_with(vec![flow]);
        let plan = merge(&registry, &ids(&["flow"]), &Map::new()).expect("merge");
        let step = &plan.steps[0].step;
        assert_eq!(step.description, "open https://10.0.0.1/ui");
        assert_eq!(step.selector.as_deref(), Some("a[href*='10.0.0.1']"));
        assert!(!format!("{step:?}").contains("{{"));
    }

    #[test]
    fn ip_and_dropdown_and_boolean_rules() {
        let flow = WorkflowDefinition {
            id: "flow".into(),
            fields: vec![
                field("seed_ip", FieldType::Ip, false, ""),
                FieldSpec {
                    field_id: "size".into(),
                    field_type: FieldType::Dropdown,
                    options: vec!["small".into(), "large".into()],
                    ..Default::default()
                },
                field("enabled", FieldType::Boolean, false, ""),
            ],
            steps: vec![step(1, StepAction::Verify, None)],
            ..Default::default()
        };
        let registry = registry_with(vec![flow]);

        let mut values = Map::new();
        values.insert("seed_ip".into(), json!("not-an-ip"));
        let error = merge(&registry, &ids(&["flow"]), &values).expect_err("bad ip");
        assert!(matches!(error, EngineError::Validation { rule, .. } if rule == "ip"));

        let mut values = Map::new();
        values.insert("size".into(), json!("medium"));
        let error = merge(&registry, &ids(&["flow"]), &values).expect_err("bad option");
        assert!(matches!(error, EngineError::Validation { rule, .. } if rule == "options"));

        let mut values = Map::new();
        values.insert("seed_ip".into(), json!("192.168.1.10"));
        values.insert("size".into(), json!("large"));
        values.insert("enabled".into(), json!(true));
        merge(&registry, &ids(&["flow"]), &values).expect("all valid");
    }

    #[test]
    fn timeout_table_per_action() {
        assert_eq!(step_timeout(&step(1, StepAction::Navigate, None)), 300);
        assert_eq!(step_timeout(&step(1, StepAction::Click, None)), 180);
        let wait = StepSpec {
            action: StepAction::Wait,
            wait_secs: Some(300),
            ..Default::default()
        };
        assert_eq!(step_timeout(&wait), 360);
    }
}
