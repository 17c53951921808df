//! Strongly typed workflow schema definitions shared across the engine and CLI.
//!
//! The models here describe two halves of the system: the authoring side
//! (workflow definitions parsed from test-design documents and JSON
//! templates) and the runtime side (execution plans, state snapshots, and
//! the events an execution publishes while it runs). Authoring order is
//! preserved wherever it is meaningful so user interfaces can render fields
//! and steps in a predictable sequence.

pub mod definition;
pub mod execution;

pub use definition::{
    DependencyQuestion, FieldSpec, FieldType, QuestionDirective, StepAction, StepSpec, ValidationRules, WorkflowDefinition,
};
pub use execution::{
    ExecutionEvent, ExecutionId, ExecutionPlan, ExecutionSnapshot, ExecutionStatus, ExecutionSummary, PlannedStep, StepDisposition,
    StepRecord,
};
