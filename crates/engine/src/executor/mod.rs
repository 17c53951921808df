//! Execution seam: the step executor trait the browser driver implements,
//! the event sink observers listen on, and the orchestrator that drives
//! plans through both.

use async_trait::async_trait;
use flowpilot_types::{ExecutionEvent, ExecutionId, PlannedStep};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

pub mod orchestrator;

pub use orchestrator::Orchestrator;

/// Read-only context handed to the executor with each step.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub execution_id: ExecutionId,
    /// Zero-based position of the step in the flat plan.
    pub index: usize,
    pub total_steps: usize,
    /// Aggregate field values the plan was merged with.
    pub field_values: serde_json::Map<String, Value>,
}

/// What one dispatched step reported back.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    /// Free-form detail for logs and timelines.
    pub detail: Option<String>,
}

/// Executes a single planned step against the real target.
///
/// Implementations drive a browser, an API, or nothing at all; an `Err`
/// return is a step failure, not an engine error. Implementations must be
/// cancel-safe at their await points: the orchestrator drops the in-flight
/// future when an execution is stopped.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &PlannedStep, ctx: &StepContext) -> anyhow::Result<StepOutcome>;
}

/// Executor that succeeds every step with a synthetic echo of its inputs.
/// Used for previews, dry runs, and tests; wait steps do not actually sleep.
pub struct NoopExecutor;

#[async_trait]
impl StepExecutor for NoopExecutor {
    async fn execute(&self, step: &PlannedStep, _ctx: &StepContext) -> anyhow::Result<StepOutcome> {
        let action: String = step.step.action.into();
        let mut detail = format!("noop {action}");
        if let Some(selector) = &step.step.selector {
            detail.push_str(&format!(" selector={selector}"));
        }
        if let Some(value) = &step.step.value {
            detail.push_str(&format!(" value={value}"));
        }
        Ok(StepOutcome { detail: Some(detail) })
    }
}

/// Receives execution events as they happen.
///
/// Publishing is fire-and-forget: a sink that has gone away must never
/// stall or fail an execution.
pub trait EventSink: Send + Sync {
    fn publish(&self, execution_id: &ExecutionId, event: ExecutionEvent);
}

/// Sink that drops every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _execution_id: &ExecutionId, _event: ExecutionEvent) {}
}

/// Sink that forwards events over an unbounded channel, typically to a
/// websocket fan-out or a test collector.
pub struct ChannelSink {
    tx: UnboundedSender<(ExecutionId, ExecutionEvent)>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<(ExecutionId, ExecutionEvent)>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, execution_id: &ExecutionId, event: ExecutionEvent) {
        // Receiver may be gone; that is the receiver's business.
        let _ = self.tx.send((execution_id.clone(), event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_types::{StepAction, StepSpec};

    fn planned(action: StepAction, value: Option<&str>) -> PlannedStep {
        PlannedStep {
            origin_workflow: "demo".into(),
            step: StepSpec {
                step_id: 1,
                action,
                value: value.map(String::from),
                ..Default::default()
            },
            timeout_secs: 180,
        }
    }

    fn ctx() -> StepContext {
        StepContext {
            execution_id: "session_test".into(),
            index: 0,
            total_steps: 1,
            field_values: Default::default(),
        }
    }

    #[tokio::test]
    async fn noop_executor_echoes_the_step() {
        let outcome = NoopExecutor
            .execute(&planned(StepAction::Fill, Some("admin")), &ctx())
            .await
            .expect("noop never fails");
        let detail = outcome.detail.expect("detail");
        assert!(detail.contains("fill"));
        assert!(detail.contains("value=admin"));
    }

    #[tokio::test]
    async fn channel_sink_survives_a_dropped_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let sink = ChannelSink::new(tx);
        sink.publish(&"session_test".to_string(), ExecutionEvent::Progress { percent: 10 });
    }
}
