//! Drives execution plans: one tokio task per execution, strictly
//! sequential step dispatch, cooperative pause between steps, best-effort
//! cancellation of in-flight steps on stop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use flowpilot_types::{
    ExecutionEvent, ExecutionId, ExecutionPlan, ExecutionSnapshot, ExecutionStatus, ExecutionSummary, StepDisposition, StepRecord,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::executor::{EventSink, StepContext, StepExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlCommand {
    Pause,
    Resume,
    Stop,
}

/// Live state of one execution, written only by its drive task. Control
/// methods read it (and flip `pause_pending`) under the write lock to keep
/// transition validation serialized with the drive task's updates.
struct Shared {
    snapshot: ExecutionSnapshot,
    /// A pause was requested but the drive task has not yet acknowledged it.
    pause_pending: bool,
}

struct ExecutionHandle {
    control_tx: UnboundedSender<ControlCommand>,
    shared: Arc<RwLock<Shared>>,
    task: Option<JoinHandle<()>>,
}

/// Orchestrates concurrent executions of merged plans.
///
/// Terminal executions stay queryable until a client acknowledges them via
/// [`Orchestrator::remove`]; retention policy beyond that lives outside the
/// engine.
pub struct Orchestrator {
    executor: Arc<dyn StepExecutor>,
    sink: Arc<dyn EventSink>,
    executions: Mutex<HashMap<ExecutionId, ExecutionHandle>>,
}

impl Orchestrator {
    pub fn new(executor: Arc<dyn StepExecutor>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            executor,
            sink,
            executions: Mutex::new(HashMap::new()),
        }
    }

    /// Accepts a plan and starts driving it on a background task.
    ///
    /// Returns immediately with the new execution id; progress is observed
    /// through the event sink or [`Orchestrator::status`].
    pub fn start(&self, plan: ExecutionPlan) -> ExecutionId {
        let execution_id = new_execution_id();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(RwLock::new(Shared {
            snapshot: ExecutionSnapshot {
                execution_id: execution_id.clone(),
                status: ExecutionStatus::Initializing,
                progress_percent: 0,
                current_step: 0,
                total_steps: plan.steps.len(),
                step_results: Vec::new(),
                created_at: Utc::now(),
                ended_at: None,
            },
            pause_pending: false,
        }));

        info!(execution = %execution_id, step_count = plan.steps.len(), "execution accepted");
        let task = tokio::spawn(drive(
            Arc::clone(&self.executor),
            Arc::clone(&self.sink),
            execution_id.clone(),
            plan,
            Arc::clone(&shared),
            control_rx,
        ));

        let handle = ExecutionHandle {
            control_tx,
            shared,
            task: Some(task),
        };
        self.lock_executions().insert(execution_id.clone(), handle);
        execution_id
    }

    /// Requests a cooperative pause; takes effect at the next step boundary.
    pub fn pause(&self, execution_id: &str) -> Result<(), EngineError> {
        self.control(execution_id, ControlCommand::Pause)
    }

    /// Resumes a paused (or pause-pending) execution.
    pub fn resume(&self, execution_id: &str) -> Result<(), EngineError> {
        self.control(execution_id, ControlCommand::Resume)
    }

    /// Stops an execution. An in-flight step is cancelled best-effort; its
    /// late result is discarded.
    pub fn stop(&self, execution_id: &str) -> Result<(), EngineError> {
        self.control(execution_id, ControlCommand::Stop)
    }

    fn control(&self, execution_id: &str, command: ControlCommand) -> Result<(), EngineError> {
        let executions = self.lock_executions();
        let handle = executions
            .get(execution_id)
            .ok_or_else(|| EngineError::UnknownExecution(execution_id.to_string()))?;

        let mut shared = match handle.shared.write() {
            Ok(shared) => shared,
            Err(poisoned) => poisoned.into_inner(),
        };
        let status = shared.snapshot.status;
        if status.is_terminal() {
            return Err(EngineError::AlreadyTerminated(execution_id.to_string()));
        }

        match command {
            ControlCommand::Pause => {
                if status == ExecutionStatus::Paused || shared.pause_pending {
                    return Err(EngineError::InvalidTransition {
                        from: "paused".to_string(),
                        action: "pause".to_string(),
                    });
                }
                shared.pause_pending = true;
            }
            ControlCommand::Resume => {
                if status != ExecutionStatus::Paused && !shared.pause_pending {
                    return Err(EngineError::InvalidTransition {
                        from: status.to_string(),
                        action: "resume".to_string(),
                    });
                }
                shared.pause_pending = false;
            }
            ControlCommand::Stop => {}
        }

        // Drive task may have exited between the status read and the send;
        // the terminal check above already covered the observable cases.
        let _ = handle.control_tx.send(command);
        Ok(())
    }

    /// Point-in-time view of an execution.
    pub fn status(&self, execution_id: &str) -> Result<ExecutionSnapshot, EngineError> {
        let executions = self.lock_executions();
        let handle = executions
            .get(execution_id)
            .ok_or_else(|| EngineError::UnknownExecution(execution_id.to_string()))?;
        let shared = match handle.shared.read() {
            Ok(shared) => shared,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(shared.snapshot.clone())
    }

    /// Ids of every tracked execution, live and terminal.
    pub fn executions(&self) -> Vec<ExecutionId> {
        self.lock_executions().keys().cloned().collect()
    }

    /// Forgets a terminal execution. Removing a live execution is rejected;
    /// stop it first.
    pub fn remove(&self, execution_id: &str) -> Result<(), EngineError> {
        let mut executions = self.lock_executions();
        let handle = executions
            .get(execution_id)
            .ok_or_else(|| EngineError::UnknownExecution(execution_id.to_string()))?;
        let status = match handle.shared.read() {
            Ok(shared) => shared.snapshot.status,
            Err(poisoned) => poisoned.into_inner().snapshot.status,
        };
        if !status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: status.to_string(),
                action: "remove".to_string(),
            });
        }
        executions.remove(execution_id);
        Ok(())
    }

    /// Waits until the execution's drive task has finished. Intended for
    /// shutdown paths and tests; events remain the primary signal.
    pub async fn join(&self, execution_id: &str) -> Result<ExecutionSnapshot, EngineError> {
        let task = {
            let mut executions = self.lock_executions();
            let handle = executions
                .get_mut(execution_id)
                .ok_or_else(|| EngineError::UnknownExecution(execution_id.to_string()))?;
            handle.task.take()
        };
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(execution = %execution_id, error = %error, "drive task aborted");
            }
        } else {
            // Someone else already joined; fall back to polling.
            loop {
                let status = self.status(execution_id)?.status;
                if status.is_terminal() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        self.status(execution_id)
    }

    fn lock_executions(&self) -> std::sync::MutexGuard<'_, HashMap<ExecutionId, ExecutionHandle>> {
        match self.executions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn new_execution_id() -> ExecutionId {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("session_{stamp}_{}", &suffix[..8])
}

/// Outcome of waiting for control while paused or mid-step.
enum ControlOutcome {
    Continue,
    Stop,
}

struct Driver {
    executor: Arc<dyn StepExecutor>,
    sink: Arc<dyn EventSink>,
    execution_id: ExecutionId,
    shared: Arc<RwLock<Shared>>,
    control_rx: UnboundedReceiver<ControlCommand>,
    control_closed: bool,
    pause_requested: bool,
    stop_seen: bool,
    total_steps: usize,
    dispatched: usize,
}

async fn drive(
    executor: Arc<dyn StepExecutor>,
    sink: Arc<dyn EventSink>,
    execution_id: ExecutionId,
    plan: ExecutionPlan,
    shared: Arc<RwLock<Shared>>,
    control_rx: UnboundedReceiver<ControlCommand>,
) {
    let total_steps = plan.steps.len();
    let mut driver = Driver {
        executor,
        sink,
        execution_id,
        shared,
        control_rx,
        control_closed: false,
        pause_requested: false,
        stop_seen: false,
        total_steps,
        dispatched: 0,
    };
    driver.run(plan).await;
}

impl Driver {
    async fn run(&mut self, plan: ExecutionPlan) {
        self.set_status(ExecutionStatus::Running, None);
        self.publish(ExecutionEvent::Started {
            at: Utc::now(),
            total_steps: self.total_steps,
        });

        let mut critical_failure = false;
        let mut stopped = false;

        for (index, planned) in plan.steps.iter().enumerate() {
            self.drain_control();
            // Stop outranks a pause queued in the same drain; a stopped
            // execution must never park in paused.
            if self.take_stop_request() {
                stopped = true;
                break;
            }
            if self.pause_requested {
                match self.wait_for_resume().await {
                    ControlOutcome::Continue => {}
                    ControlOutcome::Stop => {
                        stopped = true;
                        break;
                    }
                }
            }

            self.set_current_step(index);
            self.publish(ExecutionEvent::StepStarted {
                index,
                origin_workflow: planned.origin_workflow.clone(),
                step_id: planned.step.step_id,
                description: planned.step.description.clone(),
                at: Utc::now(),
            });

            let ctx = StepContext {
                execution_id: self.execution_id.clone(),
                index,
                total_steps: self.total_steps,
                field_values: plan.field_values.clone(),
            };
            let started = std::time::Instant::now();
            let Some(dispatch) = self.dispatch(planned, &ctx).await else {
                // Stopped mid-flight; the step's late result is discarded.
                let record = StepRecord {
                    origin_workflow: planned.origin_workflow.clone(),
                    step_id: planned.step.step_id,
                    description: planned.step.description.clone(),
                    disposition: StepDisposition::Skipped,
                    error: Some("stopped while in flight".to_string()),
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                self.record_step(index, record);
                stopped = true;
                break;
            };

            self.dispatched += 1;
            let (disposition, error) = match dispatch {
                Ok(Ok(_outcome)) => (StepDisposition::Passed, None),
                Ok(Err(step_error)) => (StepDisposition::Failed, Some(step_error.to_string())),
                Err(_elapsed) => (
                    StepDisposition::Failed,
                    Some(format!("timed out after {} seconds", planned.timeout_secs)),
                ),
            };
            let failed = disposition == StepDisposition::Failed;
            let record = StepRecord {
                origin_workflow: planned.origin_workflow.clone(),
                step_id: planned.step.step_id,
                description: planned.step.description.clone(),
                disposition,
                error,
                duration_ms: started.elapsed().as_millis() as u64,
            };
            self.record_step(index, record);

            if failed && planned.step.critical {
                warn!(
                    execution = %self.execution_id,
                    origin = %planned.origin_workflow,
                    step_id = planned.step.step_id,
                    "critical step failed, aborting plan"
                );
                // Remaining steps are never attempted and never recorded;
                // the terminal summary still counts them as skipped.
                critical_failure = true;
                break;
            }
        }

        if stopped {
            self.record_remainder_skipped(&plan);
        }

        let final_status = if stopped {
            ExecutionStatus::Stopped
        } else if critical_failure {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        self.finish(final_status);
    }

    /// On stop, every step not yet attempted is recorded as skipped so the
    /// result log accounts for the whole plan.
    fn record_remainder_skipped(&mut self, plan: &ExecutionPlan) {
        let recorded = self.lock_shared().snapshot.step_results.len();
        for (offset, planned) in plan.steps[recorded..].iter().enumerate() {
            let record = StepRecord {
                origin_workflow: planned.origin_workflow.clone(),
                step_id: planned.step.step_id,
                description: planned.step.description.clone(),
                disposition: StepDisposition::Skipped,
                error: None,
                duration_ms: 0,
            };
            self.record_step(recorded + offset, record);
        }
    }

    /// Runs one step under its timeout while still listening for control.
    /// Pause and resume never interrupt the step; stop drops it.
    /// Returns `None` when the execution was stopped mid-flight.
    async fn dispatch(
        &mut self,
        planned: &flowpilot_types::PlannedStep,
        ctx: &StepContext,
    ) -> Option<Result<anyhow::Result<crate::executor::StepOutcome>, tokio::time::error::Elapsed>> {
        dispatch_step(
            Arc::clone(&self.executor),
            &mut self.control_rx,
            &mut self.control_closed,
            &mut self.pause_requested,
            planned,
            ctx,
        )
        .await
    }

    /// Parks the execution until resumed or stopped.
    async fn wait_for_resume(&mut self) -> ControlOutcome {
        if self.take_stop_request() {
            return ControlOutcome::Stop;
        }
        self.set_status(ExecutionStatus::Paused, None);
        info!(execution = %self.execution_id, "execution paused");
        loop {
            if self.control_closed {
                // Nobody can resume a paused execution anymore.
                return ControlOutcome::Stop;
            }
            match self.control_rx.recv().await {
                Some(ControlCommand::Resume) => {
                    self.pause_requested = false;
                    self.set_status(ExecutionStatus::Running, None);
                    info!(execution = %self.execution_id, "execution resumed");
                    return ControlOutcome::Continue;
                }
                Some(ControlCommand::Stop) => return ControlOutcome::Stop,
                Some(ControlCommand::Pause) => {}
                None => self.control_closed = true,
            }
        }
    }

    /// Applies queued control commands without blocking.
    fn drain_control(&mut self) {
        while let Ok(command) = self.control_rx.try_recv() {
            match command {
                ControlCommand::Pause => self.pause_requested = true,
                ControlCommand::Resume => self.pause_requested = false,
                ControlCommand::Stop => {
                    self.pause_requested = false;
                    self.stop_seen = true;
                }
            }
        }
    }

    fn take_stop_request(&mut self) -> bool {
        std::mem::take(&mut self.stop_seen)
    }

    fn record_step(&mut self, index: usize, record: StepRecord) {
        let percent = progress_percent(self.dispatched, self.total_steps);
        {
            let mut shared = self.lock_shared();
            shared.snapshot.step_results.push(record.clone());
            shared.snapshot.progress_percent = percent;
        }
        self.publish(ExecutionEvent::StepFinished { index, record });
        self.publish(ExecutionEvent::Progress { percent });
    }

    fn set_current_step(&mut self, index: usize) {
        self.lock_shared().snapshot.current_step = index;
    }

    fn set_status(&mut self, status: ExecutionStatus, message: Option<String>) {
        {
            let mut shared = self.lock_shared();
            shared.snapshot.status = status;
            // Acknowledging a pause folds the pending flag into the status.
            if status == ExecutionStatus::Paused {
                shared.pause_pending = false;
            }
        }
        self.publish(ExecutionEvent::StatusChanged { status, message });
    }

    fn finish(&mut self, status: ExecutionStatus) {
        let summary = {
            let mut shared = self.lock_shared();
            shared.snapshot.status = status;
            shared.snapshot.ended_at = Some(Utc::now());
            shared.pause_pending = false;
            shared.snapshot.current_step = shared.snapshot.step_results.len();
            let mut summary = summarize(&shared.snapshot.step_results);
            // Steps never attempted (critical abort) carry no record but
            // still count as skipped in the terminal summary.
            summary.skipped += self.total_steps - shared.snapshot.step_results.len();
            summary
        };
        self.publish(ExecutionEvent::StatusChanged { status, message: None });
        self.publish(ExecutionEvent::Completed {
            status,
            summary,
            finished_at: Utc::now(),
        });
        info!(
            execution = %self.execution_id,
            status = %status,
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            "execution finished"
        );
    }

    fn publish(&self, event: ExecutionEvent) {
        self.sink.publish(&self.execution_id, event);
    }

    fn lock_shared(&self) -> std::sync::RwLockWriteGuard<'_, Shared> {
        match self.shared.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Select loop for one step dispatch. Free function so the step future and
/// the control channel hold disjoint borrows.
async fn dispatch_step(
    executor: Arc<dyn StepExecutor>,
    control_rx: &mut UnboundedReceiver<ControlCommand>,
    control_closed: &mut bool,
    pause_requested: &mut bool,
    planned: &flowpilot_types::PlannedStep,
    ctx: &StepContext,
) -> Option<Result<anyhow::Result<crate::executor::StepOutcome>, tokio::time::error::Elapsed>> {
    let timeout = Duration::from_secs(planned.timeout_secs);
    let step_future = tokio::time::timeout(timeout, async move { executor.execute(planned, ctx).await });
    tokio::pin!(step_future);

    loop {
        tokio::select! {
            result = &mut step_future => return Some(result),
            command = control_rx.recv(), if !*control_closed => match command {
                Some(ControlCommand::Stop) => return None,
                Some(ControlCommand::Pause) => *pause_requested = true,
                Some(ControlCommand::Resume) => *pause_requested = false,
                None => *control_closed = true,
            },
        }
    }
}

/// Floor of `dispatched / total * 100`; an empty plan completes at 100.
fn progress_percent(dispatched: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((dispatched * 100) / total) as u8
}

fn summarize(records: &[StepRecord]) -> ExecutionSummary {
    let mut summary = ExecutionSummary::default();
    for record in records {
        match record.disposition {
            StepDisposition::Passed => summary.passed += 1,
            StepDisposition::Failed => summary.failed += 1,
            StepDisposition::Skipped => summary.skipped += 1,
        }
    }
    summary
}
