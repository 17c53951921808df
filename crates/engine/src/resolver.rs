//! Dependency resolution: target workflow plus confirmed facts in, ordered
//! prerequisite chain out.
//!
//! Mandatory `prerequisites` edges are always walked. Optional dependencies
//! join only when a dependency question's directive asks for them, given the
//! caller's confirmed facts (or the question's default when a fact is
//! unsupplied). The walk is depth-first post-order, so every prerequisite
//! precedes its dependents, each workflow appears exactly once, and the
//! target is always last.

use std::collections::HashSet;

use flowpilot_types::{QuestionDirective, WorkflowDefinition};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::EngineError;
use crate::registry::Registry;

/// Resolves the ordered workflow chain for `target_id`.
///
/// `confirmed_facts` maps dependency-question fact ids to booleans; any
/// non-boolean value is a validation error, never coerced.
pub fn resolve(registry: &Registry, target_id: &str, confirmed_facts: &Map<String, Value>) -> Result<Vec<String>, EngineError> {
    let mut walk = Walk {
        registry,
        confirmed_facts,
        in_progress: Vec::new(),
        visited: HashSet::new(),
        order: Vec::new(),
    };
    walk.visit(target_id)?;

    debug!(target = %target_id, chain = ?walk.order, "resolved dependency chain");
    Ok(walk.order)
}

struct Walk<'a> {
    registry: &'a Registry,
    confirmed_facts: &'a Map<String, Value>,
    /// Ids on the current DFS path; membership means a back edge, a cycle.
    in_progress: Vec<String>,
    visited: HashSet<String>,
    order: Vec<String>,
}

impl Walk<'_> {
    fn visit(&mut self, id: &str) -> Result<(), EngineError> {
        if self.visited.contains(id) {
            return Ok(());
        }
        if let Some(position) = self.in_progress.iter().position(|p| p == id) {
            let mut path: Vec<String> = self.in_progress[position..].to_vec();
            path.push(id.to_string());
            return Err(EngineError::CyclicDependency { path });
        }

        let definition = self.registry.get(id)?;
        self.in_progress.push(id.to_string());

        for prerequisite in &definition.prerequisites {
            self.visit(prerequisite)?;
        }
        for optional in included_optionals(definition, self.confirmed_facts)? {
            self.visit(&optional)?;
        }

        self.in_progress.pop();
        self.visited.insert(id.to_string());
        self.order.push(id.to_string());
        Ok(())
    }
}

/// Evaluates the definition's dependency questions and returns the optional
/// workflow ids whose active directive asks for inclusion, in question order.
fn included_optionals(definition: &WorkflowDefinition, confirmed_facts: &Map<String, Value>) -> Result<Vec<String>, EngineError> {
    let mut included = Vec::new();
    for question in &definition.dependency_questions {
        let answer = match confirmed_facts.get(&question.field) {
            None => question.default,
            Some(Value::Bool(answer)) => *answer,
            Some(other) => {
                return Err(EngineError::validation(
                    &question.field,
                    "boolean_fact",
                    format!("expected a boolean answer, got {other}"),
                ))
            }
        };
        let directive = if answer { &question.if_true } else { &question.if_false };
        if let Some(QuestionDirective::IncludeWorkflow(workflow_id)) = directive {
            if !included.contains(workflow_id) {
                included.push(workflow_id.clone());
            }
        }
    }
    Ok(included)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_types::DependencyQuestion;
    use serde_json::json;

    fn definition(id: &str, prerequisites: &[&str]) -> WorkflowDefinition {
        WorkflowDefinition {
            id: id.into(),
            name: id.into(),
            prerequisites: prerequisites.iter().map(|p| p.to_string()).collect(),
            steps: vec![Default::default()],
            ..Default::default()
        }
    }

    fn registry_with(definitions: Vec<WorkflowDefinition>) -> Registry {
        let mut registry = Registry::new();
        registry.load_all(definitions);
        registry
    }

    #[test]
    fn chain_orders_prerequisites_before_dependents() {
        let registry = registry_with(vec![
            definition("login_flow", &[]),
            definition("network_hierarchy", &["login_flow"]),
            definition("create_fabric", &["network_hierarchy"]),
        ]);
        let chain = resolve(&registry, "create_fabric", &Map::new()).expect("resolve");
        assert_eq!(chain, vec!["login_flow", "network_hierarchy", "create_fabric"]);
    }

    #[test]
    fn diamond_emits_shared_prerequisite_once() {
        let registry = registry_with(vec![
            definition("base", &[]),
            definition("left", &["base"]),
            definition("right", &["base"]),
            definition("top", &["left", "right"]),
        ]);
        let chain = resolve(&registry, "top", &Map::new()).expect("resolve");
        assert_eq!(chain, vec!["base", "left", "right", "top"]);
    }

    #[test]
    fn cycle_is_an_error_never_a_hang() {
        let registry = registry_with(vec![
            definition("a", &["b"]),
            definition("b", &["c"]),
            definition("c", &["a"]),
        ]);
        let error = resolve(&registry, "a", &Map::new()).expect_err("cycle");
        match error {
            EngineError::CyclicDependency { path } => {
                assert_eq!(path.first(), path.last());
                assert!(path.len() >= 3);
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn unknown_prerequisite_is_an_error() {
        let registry = registry_with(vec![definition("top", &["ghost"])]);
        let error = resolve(&registry, "top", &Map::new()).expect_err("missing prerequisite");
        assert!(matches!(error, EngineError::UnknownWorkflow(id) if id == "ghost"));
    }

    #[test]
    fn optional_dependency_included_by_fact() {
        let mut fabric = definition("create_fabric", &[]);
        fabric.optional_dependencies = vec!["network_hierarchy".into()];
        fabric.dependency_questions = vec![DependencyQuestion {
            question: "Does a site hierarchy already exist?".into(),
            field: "hierarchy_exists".into(),
            default: true,
            if_false: Some(QuestionDirective::IncludeWorkflow("network_hierarchy".into())),
            ..Default::default()
        }];
        let registry = registry_with(vec![definition("network_hierarchy", &[]), fabric]);

        // Fact says the hierarchy is missing: pull the builder in first.
        let mut facts = Map::new();
        facts.insert("hierarchy_exists".into(), json!(false));
        let chain = resolve(&registry, "create_fabric", &facts).expect("resolve");
        assert_eq!(chain, vec!["network_hierarchy", "create_fabric"]);

        // Unspecified fact falls back to the question default (true here).
        let chain = resolve(&registry, "create_fabric", &Map::new()).expect("resolve");
        assert_eq!(chain, vec!["create_fabric"]);
    }

    #[test]
    fn non_boolean_fact_is_rejected() {
        let mut fabric = definition("create_fabric", &[]);
        fabric.dependency_questions = vec![DependencyQuestion {
            question: "Hierarchy exists?".into(),
            field: "hierarchy_exists".into(),
            ..Default::default()
        }];
        let registry = registry_with(vec![fabric]);

        let mut facts = Map::new();
        facts.insert("hierarchy_exists".into(), json!("yes"));
        let error = resolve(&registry, "create_fabric", &facts).expect_err("non-boolean fact");
        assert!(matches!(error, EngineError::Validation { field, .. } if field == "hierarchy_exists"));
    }
}
