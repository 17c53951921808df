//! Runtime-side types: execution plans, state snapshots, and lifecycle
//! events published while a plan runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::definition::StepSpec;

/// Opaque identifier for one run-time execution.
pub type ExecutionId = String;

/// One fully-resolved step inside an [`ExecutionPlan`], tagged with the
/// workflow it came from. Duplicate `step_id`s across origins are legal;
/// `(origin_workflow, step_id)` is the unique key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedStep {
    /// Id of the workflow that contributed this step.
    pub origin_workflow: String,
    /// The step with every `{{field_id}}` placeholder substituted.
    pub step: StepSpec,
    /// Bounded wait for the dispatch of this step.
    pub timeout_secs: u64,
}

/// The fully resolved, placeholder-substituted, ordered list of steps ready
/// to run. Created by the merger per execution request; immutable; owned
/// exclusively by one execution.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ExecutionPlan {
    /// Steps in execution order: resolver inter-workflow order, each
    /// workflow's intra-workflow order preserved.
    pub steps: Vec<PlannedStep>,
    /// Aggregate field values the merge actually used, defaults included.
    pub field_values: serde_json::Map<String, Value>,
    /// Sum of the merged workflows' duration estimates, in seconds.
    pub estimated_duration: u64,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Lifecycle states of one execution.
///
/// `initializing → running ⇄ paused → {completed | failed | stopped}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Plan accepted, first step not yet dispatched.
    Initializing,
    /// Steps are being dispatched.
    Running,
    /// Cooperatively paused between steps.
    Paused,
    /// Every step finished and no critical step failed.
    Completed,
    /// A critical step failed or timed out.
    Failed,
    /// Externally cancelled.
    Stopped,
}

impl ExecutionStatus {
    /// True for states no further transition may leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Final disposition of one dispatched (or skipped) step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepDisposition {
    Passed,
    Failed,
    Skipped,
}

/// Append-only record of one step's outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub origin_workflow: String,
    pub step_id: u32,
    pub description: String,
    pub disposition: StepDisposition,
    /// Executor error text, present for failed steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Terminal counts reported when an execution finishes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Events published to the event sink while an execution runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Started {
        at: DateTime<Utc>,
        total_steps: usize,
    },
    StatusChanged {
        status: ExecutionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    StepStarted {
        index: usize,
        origin_workflow: String,
        step_id: u32,
        description: String,
        at: DateTime<Utc>,
    },
    StepFinished {
        index: usize,
        record: StepRecord,
    },
    Progress {
        percent: u8,
    },
    Completed {
        status: ExecutionStatus,
        summary: ExecutionSummary,
        finished_at: DateTime<Utc>,
    },
}

/// Point-in-time view of an execution, safe to hand to observers.
///
/// Produced from the live state by the orchestrator; only the driving task
/// ever writes the state this is cloned from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionSnapshot {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    /// Floor of `completed_steps / total_steps * 100`; monotone while
    /// running, exactly 100 only in `completed`.
    pub progress_percent: u8,
    /// Index of the next step to dispatch (or one past the end).
    pub current_step: usize,
    pub total_steps: usize,
    pub step_results: Vec<StepRecord>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Stopped.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(!ExecutionStatus::Initializing.is_terminal());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ExecutionEvent::Progress { percent: 40 };
        let json = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(json["type"], "progress");
        assert_eq!(json["percent"], 40);
    }
}
