//! Typed error taxonomy for the engine.
//!
//! Parse, resolution, and merge errors reject a request before any execution
//! state exists. Run-time step failures are not errors at this level; they
//! are absorbed into step records and only escalate an execution's status.

use flowpilot_types::ExecutionId;

/// Errors surfaced by the parser, registry, resolver, merger, and
/// orchestrator control surface.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A definition source could not be turned into a workflow.
    #[error("malformed definition '{source_name}': {reason}")]
    MalformedDefinition { source_name: String, reason: String },

    /// A workflow id was requested that no registered definition carries.
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),

    /// The prerequisite graph loops back on itself.
    #[error("cyclic dependency: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    /// A supplied field value violated its declared rules.
    #[error("validation failed for field '{field}' ({rule}): {message}")]
    Validation {
        field: String,
        rule: String,
        message: String,
    },

    /// A `{{token}}` in a step referenced no known field.
    #[error("unresolved placeholder '{{{{{token}}}}}' in step {step} of workflow '{workflow}'")]
    UnresolvedPlaceholder {
        workflow: String,
        step: u32,
        token: String,
    },

    /// A control command is not legal from the execution's current state.
    #[error("cannot {action} an execution that is {from}")]
    InvalidTransition { from: String, action: String },

    /// A control command arrived after the execution reached a terminal state.
    #[error("execution '{0}' has already terminated")]
    AlreadyTerminated(ExecutionId),

    /// No live or retained execution has this id.
    #[error("unknown execution '{0}'")]
    UnknownExecution(ExecutionId),

    /// Filesystem trouble while loading definitions.
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Shorthand for a [`EngineError::Validation`] with owned strings.
    pub fn validation(field: impl Into<String>, rule: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
            rule: rule.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`EngineError::MalformedDefinition`].
    pub fn malformed(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::MalformedDefinition {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}
