//! Orchestrator lifecycle scenarios: critical failure, pause/resume, and
//! stop-while-paused, observed through a channel sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowpilot_engine::{ChannelSink, EngineError, Orchestrator, StepContext, StepExecutor, StepOutcome};
use flowpilot_types::{
    ExecutionEvent, ExecutionPlan, ExecutionStatus, PlannedStep, StepDisposition, StepSpec,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::Semaphore;

fn plan_of(step_count: u32, critical: &[u32]) -> ExecutionPlan {
    ExecutionPlan {
        steps: (1..=step_count)
            .map(|step_id| PlannedStep {
                origin_workflow: "demo".into(),
                step: StepSpec {
                    step_id,
                    description: format!("step {step_id}"),
                    critical: critical.contains(&step_id),
                    ..Default::default()
                },
                timeout_secs: 5,
            })
            .collect(),
        ..Default::default()
    }
}

/// Fails the step whose 1-based id matches `fail_at`; passes the rest.
struct ScriptedExecutor {
    fail_at: u32,
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, step: &PlannedStep, _ctx: &StepContext) -> anyhow::Result<StepOutcome> {
        if step.step.step_id == self.fail_at {
            anyhow::bail!("element not found: #provision-button");
        }
        Ok(StepOutcome::default())
    }
}

/// Blocks each step until the test hands out a permit.
struct GatedExecutor {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl StepExecutor for GatedExecutor {
    async fn execute(&self, _step: &PlannedStep, _ctx: &StepContext) -> anyhow::Result<StepOutcome> {
        let permit = self.gate.acquire().await?;
        permit.forget();
        Ok(StepOutcome::default())
    }
}

fn channel_orchestrator(executor: Arc<dyn StepExecutor>) -> (Orchestrator, UnboundedReceiver<(String, ExecutionEvent)>) {
    let (tx, rx) = unbounded_channel();
    (Orchestrator::new(executor, Arc::new(ChannelSink::new(tx))), rx)
}

async fn wait_for_status(orchestrator: &Orchestrator, execution_id: &str, wanted: ExecutionStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = orchestrator.status(execution_id).expect("known execution").status;
            if status == wanted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("execution never reached {wanted}"));
}

/// Blocks until the step at `index` has been announced as started.
async fn wait_for_step_started(events: &mut UnboundedReceiver<(String, ExecutionEvent)>, index: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some((_, event)) = events.recv().await {
            if matches!(event, ExecutionEvent::StepStarted { index: started, .. } if started == index) {
                return;
            }
        }
        panic!("event channel closed before step {index} started");
    })
    .await
    .unwrap_or_else(|_| panic!("step {index} never started"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn critical_failure_fails_the_run_and_skips_the_rest() {
    let (orchestrator, mut events) = channel_orchestrator(Arc::new(ScriptedExecutor { fail_at: 3 }));
    let execution_id = orchestrator.start(plan_of(5, &[3]));
    let snapshot = orchestrator.join(&execution_id).await.expect("join");

    assert_eq!(snapshot.status, ExecutionStatus::Failed);
    // Steps 4 and 5 are never attempted and leave no record.
    assert_eq!(snapshot.step_results.len(), 3);
    let dispositions: Vec<StepDisposition> = snapshot.step_results.iter().map(|r| r.disposition).collect();
    assert_eq!(
        dispositions,
        vec![StepDisposition::Passed, StepDisposition::Passed, StepDisposition::Failed]
    );
    assert!(snapshot.step_results[2]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("element not found")));
    // Only dispatched steps count toward progress; skipped ones never do.
    assert_eq!(snapshot.progress_percent, 60);

    // The terminal summary still accounts for the unattempted steps.
    let mut terminal_summary = None;
    while let Ok((_, event)) = events.try_recv() {
        if let ExecutionEvent::Completed { summary, .. } = event {
            terminal_summary = Some(summary);
        }
    }
    let summary = terminal_summary.expect("completed event");
    assert_eq!((summary.passed, summary.failed, summary.skipped), (2, 1, 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_critical_failure_continues_to_completion() {
    let (orchestrator, _events) = channel_orchestrator(Arc::new(ScriptedExecutor { fail_at: 2 }));
    let execution_id = orchestrator.start(plan_of(3, &[]));
    let snapshot = orchestrator.join(&execution_id).await.expect("join");

    assert_eq!(snapshot.status, ExecutionStatus::Completed);
    assert_eq!(snapshot.progress_percent, 100);
    let dispositions: Vec<StepDisposition> = snapshot.step_results.iter().map(|r| r.disposition).collect();
    assert_eq!(
        dispositions,
        vec![StepDisposition::Passed, StepDisposition::Failed, StepDisposition::Passed]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_resume_round_trip() {
    let gate = Arc::new(Semaphore::new(0));
    let (orchestrator, mut events) = channel_orchestrator(Arc::new(GatedExecutor { gate: Arc::clone(&gate) }));
    let execution_id = orchestrator.start(plan_of(2, &[]));
    wait_for_step_started(&mut events, 0).await;

    // The pause arrives while step 1 is in flight and is honored at the
    // next step boundary, once the gate lets the step finish.
    orchestrator.pause(&execution_id).expect("pause accepted");
    gate.add_permits(1);
    wait_for_status(&orchestrator, &execution_id, ExecutionStatus::Paused).await;

    // Pausing twice is a state-machine violation.
    assert!(matches!(orchestrator.pause(&execution_id), Err(EngineError::InvalidTransition { .. })));

    orchestrator.resume(&execution_id).expect("resume accepted");
    gate.add_permits(1);
    let snapshot = orchestrator.join(&execution_id).await.expect("join");
    assert_eq!(snapshot.status, ExecutionStatus::Completed);
    assert_eq!(snapshot.step_results.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_while_paused_terminates_without_running_again() {
    let gate = Arc::new(Semaphore::new(0));
    let (orchestrator, mut events) = channel_orchestrator(Arc::new(GatedExecutor { gate: Arc::clone(&gate) }));
    let execution_id = orchestrator.start(plan_of(3, &[]));
    wait_for_step_started(&mut events, 0).await;

    orchestrator.pause(&execution_id).expect("pause accepted");
    gate.add_permits(1);
    wait_for_status(&orchestrator, &execution_id, ExecutionStatus::Paused).await;

    orchestrator.stop(&execution_id).expect("stop accepted");
    let snapshot = orchestrator.join(&execution_id).await.expect("join");
    assert_eq!(snapshot.status, ExecutionStatus::Stopped);
    // Step 1 ran before the pause; the rest never ran and are on record
    // as skipped.
    assert_eq!(snapshot.step_results.len(), 3);
    assert_eq!(snapshot.step_results[0].disposition, StepDisposition::Passed);
    assert!(snapshot.step_results[1..].iter().all(|r| r.disposition == StepDisposition::Skipped));
    assert_eq!(snapshot.progress_percent, 33);

    // The event stream must never show Running after the pause was acknowledged.
    let mut saw_paused = false;
    while let Ok((_, event)) = events.try_recv() {
        if let ExecutionEvent::StatusChanged { status, .. } = event {
            match status {
                ExecutionStatus::Paused => saw_paused = true,
                ExecutionStatus::Running => assert!(!saw_paused, "re-entered running after pause"),
                _ => {}
            }
        }
    }
    assert!(saw_paused);

    // Stopping again is rejected: the execution already terminated.
    assert!(matches!(orchestrator.stop(&execution_id), Err(EngineError::AlreadyTerminated(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_cancels_an_in_flight_step() {
    let gate = Arc::new(Semaphore::new(0));
    let (orchestrator, mut events) = channel_orchestrator(Arc::new(GatedExecutor { gate: Arc::clone(&gate) }));
    let execution_id = orchestrator.start(plan_of(2, &[]));
    wait_for_step_started(&mut events, 0).await;

    // Step 1 is blocked on the gate; stop must not wait for it.
    orchestrator.stop(&execution_id).expect("stop accepted");
    let snapshot = orchestrator.join(&execution_id).await.expect("join");

    assert_eq!(snapshot.status, ExecutionStatus::Stopped);
    // The cancelled in-flight step plus the never-attempted second step.
    assert_eq!(snapshot.step_results.len(), 2);
    assert!(snapshot.step_results.iter().all(|r| r.disposition == StepDisposition::Skipped));
    assert!(snapshot.step_results[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("stopped while in flight")));
    assert!(snapshot.step_results[1].error.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn step_timeout_is_a_step_failure() {
    struct SlowExecutor;
    #[async_trait]
    impl StepExecutor for SlowExecutor {
        async fn execute(&self, _step: &PlannedStep, _ctx: &StepContext) -> anyhow::Result<StepOutcome> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(StepOutcome::default())
        }
    }

    let mut plan = plan_of(1, &[1]);
    plan.steps[0].timeout_secs = 1;
    let (orchestrator, _events) = channel_orchestrator(Arc::new(SlowExecutor));
    let execution_id = orchestrator.start(plan);
    let snapshot = orchestrator.join(&execution_id).await.expect("join");

    assert_eq!(snapshot.status, ExecutionStatus::Failed);
    assert!(snapshot.step_results[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("timed out")));
}
