//! Workflow executor: phase-ordered scheduling with parallel groups, step
//! retries, compensating rollback, and cancellation.
//!
//! The `WorkflowEngine` owns the run-level machinery (run slots, cancellation
//! tokens, the execution store). Each run is driven by a `RunDriver`, the
//! single writer of that run's `WorkflowExecution`. Step actions execute in
//! `JoinSet` tasks and report back over a channel; the driver applies every
//! change and persists a fresh snapshot after each one.
//!
//! # Execution flow
//!
//! 1. Persist a `pending` run record and wait for a run slot.
//! 2. For each phase in declared order, dispatch ready steps: grouped steps up
//!    to their group's `max_concurrency`, ungrouped steps one at a time.
//! 3. Each step task runs its own attempt loop (timeout, linear backoff).
//! 4. A terminal failure of a required step stops dispatch; in-flight steps
//!    drain, completed steps are compensated in reverse completion order, and
//!    the run ends `failed`.
//! 5. Cancellation skips everything not yet finished and ends `cancelled`
//!    without compensation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use provisio_types::config::EngineConfig;
use provisio_types::error::RepositoryError;
use provisio_types::workflow::{
    ExecutionStatus, RollbackOutcome, RollbackRecord, RollbackStep, RunFailure, StepStatus,
    WorkflowDefinition, WorkflowErrorEntry, WorkflowExecution, WorkflowStep,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::repository::execution::ExecutionStore;

use super::action::{ActionInput, ActionMode, ActionRegistry, BoxStepAction, StepError};
use super::context::RunContext;
use super::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the execution engine.
///
/// `RetryExhausted` and `RollbackAction` are recorded in a run's error list;
/// the others are returned to callers.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("step '{step_id}' failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        step_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("rollback action '{action}' for step '{step_id}' failed: {error}")]
    RollbackAction {
        step_id: String,
        action: String,
        error: String,
    },

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Drives workflow runs against an `ExecutionStore`.
///
/// Generic over `S: ExecutionStore` for storage flexibility. Cheap to clone;
/// clones share run slots and cancellation tokens.
pub struct WorkflowEngine<S: ExecutionStore> {
    store: Arc<S>,
    actions: Arc<ActionRegistry>,
    settings: EngineConfig,
    /// Limits how many runs execute at once; waiting runs stay `pending`.
    run_slots: Arc<Semaphore>,
    /// Cancellation tokens of runs that have not finished, keyed by run ID.
    cancellation_tokens: Arc<DashMap<Uuid, CancellationToken>>,
}

impl<S: ExecutionStore> Clone for WorkflowEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            actions: Arc::clone(&self.actions),
            settings: self.settings.clone(),
            run_slots: Arc::clone(&self.run_slots),
            cancellation_tokens: Arc::clone(&self.cancellation_tokens),
        }
    }
}

impl<S: ExecutionStore + 'static> WorkflowEngine<S> {
    pub fn new(store: Arc<S>, actions: Arc<ActionRegistry>, settings: EngineConfig) -> Self {
        let slots = settings.max_concurrent_runs.max(1);
        Self {
            store,
            actions,
            settings,
            run_slots: Arc::new(Semaphore::new(slots)),
            cancellation_tokens: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Create a run and drive it in the background.
    ///
    /// Returns the execution ID as soon as the `pending` record is stored.
    pub async fn start(
        &self,
        definition: Arc<WorkflowDefinition>,
        variables: HashMap<String, Value>,
    ) -> Result<Uuid, ExecutorError> {
        let (execution, token) = self.prepare(&definition, variables).await?;
        let run_id = execution.id;
        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(definition, execution, token).await;
        });
        Ok(run_id)
    }

    /// Create a run and drive it to a terminal state on the current task.
    pub async fn execute(
        &self,
        definition: Arc<WorkflowDefinition>,
        variables: HashMap<String, Value>,
    ) -> Result<WorkflowExecution, ExecutorError> {
        let (execution, token) = self.prepare(&definition, variables).await?;
        Ok(self.drive(definition, execution, token).await)
    }

    /// Request cancellation of an unfinished run.
    ///
    /// Returns `false` when the run is not (or no longer) active.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.cancellation_tokens.get(&run_id) {
            Some(token) => {
                tracing::info!(run_id = %run_id, "cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a run is pending or executing in this engine.
    pub fn is_active(&self, run_id: Uuid) -> bool {
        self.cancellation_tokens.contains_key(&run_id)
    }

    async fn prepare(
        &self,
        definition: &WorkflowDefinition,
        variables: HashMap<String, Value>,
    ) -> Result<(WorkflowExecution, CancellationToken), ExecutorError> {
        let execution = WorkflowExecution::new(Uuid::now_v7(), definition, variables);
        self.store.put(&execution).await?;

        let token = CancellationToken::new();
        self.cancellation_tokens.insert(execution.id, token.clone());

        tracing::info!(
            run_id = %execution.id,
            workflow = definition.id.as_str(),
            steps = definition.steps.len(),
            "workflow run created"
        );
        Ok((execution, token))
    }

    async fn drive(
        &self,
        definition: Arc<WorkflowDefinition>,
        execution: WorkflowExecution,
        token: CancellationToken,
    ) -> WorkflowExecution {
        let run_id = execution.id;
        let driver = RunDriver::new(self, definition, execution, token);
        let finished = driver.run().await;
        self.cancellation_tokens.remove(&run_id);
        finished
    }

    fn step_timeout_ms(&self, step: &WorkflowStep) -> u64 {
        if step.timeout_ms == 0 {
            self.settings.default_step_timeout_ms
        } else {
            step.timeout_ms
        }
    }
}

// ---------------------------------------------------------------------------
// Step tasks
// ---------------------------------------------------------------------------

/// Progress reported by a step task while it is still running.
#[derive(Debug)]
enum StepEvent {
    Attempt {
        step_id: String,
        attempt: u32,
    },
    Retrying {
        step_id: String,
        attempt: u32,
        error: String,
        delay: Duration,
    },
}

/// Final result of a step task.
#[derive(Debug)]
struct StepReport {
    step_id: String,
    attempts: u32,
    result: Result<Value, StepError>,
}

/// Everything a step task needs; owned so the task is `'static`.
struct StepTask {
    run_id: Uuid,
    step_id: String,
    config: HashMap<String, Value>,
    action: Arc<BoxStepAction>,
    policy: RetryPolicy,
    timeout_ms: u64,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<StepEvent>,
}

/// Step-level attempt loop.
///
/// Every attempt re-invokes the whole action under the step deadline.
/// Retryable errors back off linearly until attempts run out.
async fn run_step_attempts(task: StepTask) -> StepReport {
    let timeout = Duration::from_millis(task.timeout_ms);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let _ = task.events.send(StepEvent::Attempt {
            step_id: task.step_id.clone(),
            attempt,
        });

        let input = ActionInput {
            run_id: task.run_id,
            step_id: task.step_id.clone(),
            attempt,
            mode: ActionMode::Execute,
            config: task.config.clone(),
            previous_output: None,
        };

        let result = tokio::select! {
            _ = task.cancel.cancelled() => Err(StepError::Cancelled),
            outcome = tokio::time::timeout(timeout, task.action.execute(&input)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(StepError::Timeout { timeout_ms: task.timeout_ms }),
            },
        };

        match result {
            Err(e) if e.is_retryable() && task.policy.should_retry(attempt) => {
                let delay = task.policy.delay_after(attempt);
                let _ = task.events.send(StepEvent::Retrying {
                    step_id: task.step_id.clone(),
                    attempt,
                    error: e.to_string(),
                    delay,
                });
                tokio::select! {
                    _ = task.cancel.cancelled() => {
                        return StepReport {
                            step_id: task.step_id,
                            attempts: attempt,
                            result: Err(StepError::Cancelled),
                        };
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            result => {
                return StepReport {
                    step_id: task.step_id,
                    attempts: attempt,
                    result,
                };
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RunDriver
// ---------------------------------------------------------------------------

enum PhaseOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// What woke the phase loop.
enum Wake {
    Cancelled,
    Deadline,
    Event(StepEvent),
    Joined(Result<StepReport, tokio::task::JoinError>),
    Idle,
}

/// Per-phase dispatch bookkeeping.
#[derive(Default)]
struct Dispatch {
    /// Child tokens of in-flight steps.
    in_flight: HashMap<String, CancellationToken>,
    /// Whether the ungrouped lane has a step in flight.
    lane_busy: bool,
    /// In-flight members per parallel group.
    group_load: HashMap<String, u32>,
}

/// Single writer of one run's `WorkflowExecution`.
struct RunDriver<'e, S: ExecutionStore> {
    engine: &'e WorkflowEngine<S>,
    definition: Arc<WorkflowDefinition>,
    execution: WorkflowExecution,
    context: RunContext,
    token: CancellationToken,
    deadline: Option<Instant>,
    deadline_hit: bool,
    /// Step IDs in the order they completed.
    completion_order: Vec<String>,
    /// The first terminal failure that dooms the run.
    failure: Option<RunFailure>,
}

impl<'e, S: ExecutionStore + 'static> RunDriver<'e, S> {
    fn new(
        engine: &'e WorkflowEngine<S>,
        definition: Arc<WorkflowDefinition>,
        execution: WorkflowExecution,
        token: CancellationToken,
    ) -> Self {
        let context = RunContext::new(execution.id, execution.variables.clone());
        Self {
            engine,
            definition,
            execution,
            context,
            token,
            deadline: None,
            deadline_hit: false,
            completion_order: Vec::new(),
            failure: None,
        }
    }

    async fn run(mut self) -> WorkflowExecution {
        let run_id = self.execution.id;

        let slots = Arc::clone(&self.engine.run_slots);
        let token = self.token.clone();
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = slots.acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.finish_cancelled().await;
            return self.execution;
        };

        self.deadline = self
            .engine
            .settings
            .run_timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        self.execution.transition(ExecutionStatus::Running);
        self.persist().await;
        tracing::info!(
            run_id = %run_id,
            workflow = self.definition.id.as_str(),
            "workflow run started"
        );

        let definition = Arc::clone(&self.definition);
        for phase in &definition.phases {
            self.execution.current_phase = Some(phase.clone());
            self.persist().await;
            tracing::debug!(run_id = %run_id, phase = phase.as_str(), "entering phase");

            match self.run_phase(phase).await {
                PhaseOutcome::Completed => {}
                PhaseOutcome::Failed => {
                    self.finish_failed().await;
                    return self.execution;
                }
                PhaseOutcome::Cancelled => {
                    self.finish_cancelled().await;
                    return self.execution;
                }
            }
        }

        self.execution.transition(ExecutionStatus::Completed);
        self.persist().await;
        tracing::info!(run_id = %run_id, "workflow run completed");
        self.execution
    }

    /// Dispatch and drain the steps of one phase.
    async fn run_phase(&mut self, phase: &str) -> PhaseOutcome {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<StepEvent>();
        let mut tasks: JoinSet<StepReport> = JoinSet::new();
        let mut dispatch = Dispatch::default();
        let mut cancelled = false;
        let token = self.token.clone();

        loop {
            if !cancelled && token.is_cancelled() {
                cancelled = true;
            }

            if !cancelled {
                self.skip_blocked_steps(phase).await;
            }
            if self.failure.is_none() && !cancelled && !self.deadline_hit {
                self.dispatch_ready(phase, &mut tasks, &mut dispatch, &events_tx)
                    .await;
            }
            if tasks.is_empty() {
                break;
            }

            let watch_deadline = self.deadline.is_some() && !self.deadline_hit && !cancelled;
            let deadline_at = self
                .deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

            let wake = tokio::select! {
                biased;
                _ = token.cancelled(), if !cancelled => Wake::Cancelled,
                _ = tokio::time::sleep_until(deadline_at), if watch_deadline => Wake::Deadline,
                Some(event) = events_rx.recv() => Wake::Event(event),
                Some(joined) = tasks.join_next() => Wake::Joined(joined),
                else => Wake::Idle,
            };

            match wake {
                Wake::Cancelled => {
                    // In-flight step tokens are children of the run token.
                    cancelled = true;
                }
                Wake::Deadline => {
                    self.deadline_hit = true;
                    if self.failure.is_none() {
                        self.failure = Some(RunFailure {
                            step_id: None,
                            message: self.deadline_message(),
                        });
                    }
                    tracing::warn!(
                        run_id = %self.execution.id,
                        in_flight = dispatch.in_flight.len(),
                        "run deadline exceeded, aborting in-flight steps"
                    );
                    for child in dispatch.in_flight.values() {
                        child.cancel();
                    }
                }
                Wake::Event(event) => self.apply_event(event).await,
                Wake::Joined(Ok(report)) => self.handle_report(report, &mut dispatch).await,
                Wake::Joined(Err(e)) => {
                    tracing::error!(run_id = %self.execution.id, error = %e, "step task aborted");
                }
                Wake::Idle => break,
            }
        }

        // Late progress events are stale once every task has reported.
        while events_rx.try_recv().is_ok() {}

        self.sweep_unfinished(phase, cancelled).await;

        if self.failure.is_some() {
            PhaseOutcome::Failed
        } else if cancelled {
            PhaseOutcome::Cancelled
        } else {
            PhaseOutcome::Completed
        }
    }

    /// Start every ready step the concurrency limits allow.
    async fn dispatch_ready(
        &mut self,
        phase: &str,
        tasks: &mut JoinSet<StepReport>,
        dispatch: &mut Dispatch,
        events: &mpsc::UnboundedSender<StepEvent>,
    ) {
        let definition = Arc::clone(&self.definition);
        let ready: Vec<&WorkflowStep> = definition
            .steps_in_phase(phase)
            .filter(|step| self.step_status(&step.id) == Some(StepStatus::Pending))
            .filter(|step| {
                step.depends_on
                    .iter()
                    .all(|dep| self.step_status(dep) == Some(StepStatus::Completed))
            })
            .collect();

        let mut dispatched = false;
        for step in ready {
            // An earlier fail-fast abort in this pass may have skipped it.
            if self.step_status(&step.id) != Some(StepStatus::Pending) {
                continue;
            }
            let action = match self.engine.actions.get(&step.step_type) {
                Ok(action) => action,
                Err(e) => {
                    self.mark_failed(step, 0, e.to_string()).await;
                    self.abort_fail_fast_group(&step.id, dispatch).await;
                    if self.failure.is_some() {
                        break;
                    }
                    continue;
                }
            };

            match definition.group_of(&step.id) {
                Some(group) => {
                    let load = dispatch.group_load.entry(group.id.clone()).or_default();
                    if *load >= group.max_concurrency {
                        continue;
                    }
                    *load += 1;
                }
                None => {
                    if dispatch.lane_busy {
                        continue;
                    }
                    dispatch.lane_busy = true;
                }
            }

            let child = self.token.child_token();
            dispatch.in_flight.insert(step.id.clone(), child.clone());

            if let Some(record) = self.execution.step_mut(&step.id) {
                record.status = StepStatus::Running;
                record.started_at = Some(Utc::now());
            }
            tracing::debug!(
                run_id = %self.execution.id,
                step_id = step.id.as_str(),
                step_type = step.step_type.as_str(),
                "dispatching step"
            );

            tasks.spawn(run_step_attempts(StepTask {
                run_id: self.execution.id,
                step_id: step.id.clone(),
                config: self.context.resolve_config(&step.config),
                action,
                policy: RetryPolicy::new(
                    step.retry_attempts,
                    Duration::from_millis(self.engine.settings.step_retry_base_delay_ms),
                ),
                timeout_ms: self.engine.step_timeout_ms(step),
                cancel: child,
                events: events.clone(),
            }));
            dispatched = true;
        }

        if dispatched {
            self.persist().await;
        }
    }

    async fn apply_event(&mut self, event: StepEvent) {
        match event {
            StepEvent::Attempt { step_id, attempt } => {
                if let Some(record) = self.execution.step_mut(&step_id) {
                    if record.status.is_terminal() {
                        return;
                    }
                    record.status = StepStatus::Running;
                    record.attempt = attempt;
                }
            }
            StepEvent::Retrying {
                step_id,
                attempt,
                error,
                delay,
            } => {
                let Some(record) = self.execution.step_mut(&step_id) else {
                    return;
                };
                if record.status.is_terminal() {
                    return;
                }
                record.status = StepStatus::Retrying;
                record.error = Some(error.clone());

                tracing::warn!(
                    run_id = %self.execution.id,
                    step_id = step_id.as_str(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = error.as_str(),
                    "step attempt failed, retrying"
                );
                self.record_error(&step_id, error, true);
            }
        }
        self.persist().await;
    }

    async fn handle_report(&mut self, report: StepReport, dispatch: &mut Dispatch) {
        let definition = Arc::clone(&self.definition);
        let Some(step) = definition.step(&report.step_id) else {
            return;
        };

        dispatch.in_flight.remove(&step.id);
        match definition.group_of(&step.id) {
            Some(group) => {
                if let Some(load) = dispatch.group_load.get_mut(&group.id) {
                    *load = load.saturating_sub(1);
                }
            }
            None => dispatch.lane_busy = false,
        }

        match report.result {
            Ok(output) => {
                let stored = self.context.set_step_output(&step.id, output);
                if let Some(record) = self.execution.step_mut(&step.id) {
                    record.status = StepStatus::Completed;
                    record.completed_at = Some(Utc::now());
                    record.attempt = report.attempts;
                    record.output = Some(stored);
                    record.error = None;
                }
                self.completion_order.push(step.id.clone());
                tracing::info!(
                    run_id = %self.execution.id,
                    step_id = step.id.as_str(),
                    attempts = report.attempts,
                    "step completed"
                );
                self.persist().await;
            }
            Err(StepError::Cancelled) if self.deadline_hit => {
                let message = self.deadline_message();
                self.mark_failed(step, report.attempts, message).await;
            }
            Err(StepError::Cancelled) => {
                self.mark_skipped(step, "cancelled").await;
            }
            Err(e) => {
                let message = if e.is_retryable() {
                    ExecutorError::RetryExhausted {
                        step_id: step.id.clone(),
                        attempts: report.attempts,
                        last_error: e.to_string(),
                    }
                    .to_string()
                } else {
                    e.to_string()
                };
                self.mark_failed(step, report.attempts, message).await;
                self.abort_fail_fast_group(&step.id, dispatch).await;
            }
        }
    }

    /// After a member of a fail-fast group fails terminally, cancel its
    /// in-flight siblings and skip the ones not yet started.
    async fn abort_fail_fast_group(&mut self, step_id: &str, dispatch: &Dispatch) {
        let definition = Arc::clone(&self.definition);
        let Some(group) = definition.group_of(step_id).filter(|g| g.fail_fast) else {
            return;
        };
        tracing::warn!(
            run_id = %self.execution.id,
            group = group.id.as_str(),
            failed_step = step_id,
            "fail-fast group aborting remaining members"
        );
        let reason = format!("group '{}' failed fast", group.id);
        for member in &group.steps {
            if let Some(child) = dispatch.in_flight.get(member) {
                child.cancel();
            } else if self.step_status(member) == Some(StepStatus::Pending) {
                if let Some(member_step) = definition.step(member) {
                    self.mark_skipped(member_step, &reason).await;
                }
            }
        }
    }

    /// Skip pending steps of the phase whose dependencies can no longer complete.
    async fn skip_blocked_steps(&mut self, phase: &str) {
        let definition = Arc::clone(&self.definition);
        loop {
            let blocked = definition.steps_in_phase(phase).find_map(|step| {
                if self.step_status(&step.id) != Some(StepStatus::Pending) {
                    return None;
                }
                step.depends_on
                    .iter()
                    .find(|dep| {
                        matches!(
                            self.step_status(dep),
                            Some(StepStatus::Failed | StepStatus::Skipped)
                        )
                    })
                    .map(|dep| (step, dep.clone()))
            });
            let Some((step, dep)) = blocked else {
                break;
            };

            let reason = format!("dependency '{dep}' did not complete");
            self.mark_skipped(step, &reason).await;
            if step.required && self.failure.is_none() {
                let message = format!("required step '{}' skipped: {reason}", step.id);
                self.record_error(&step.id, message.clone(), false);
                self.failure = Some(RunFailure {
                    step_id: Some(step.id.clone()),
                    message,
                });
                self.persist().await;
            }
        }
    }

    /// Close out steps left unfinished when a phase loop exits, then make
    /// sure no required step of the phase is left short of `completed`.
    async fn sweep_unfinished(&mut self, phase: &str, cancelled: bool) {
        let definition = Arc::clone(&self.definition);
        for step in definition.steps_in_phase(phase) {
            match self.step_status(&step.id) {
                Some(StepStatus::Running | StepStatus::Retrying) => {
                    let attempts = self.execution.step(&step.id).map_or(0, |s| s.attempt);
                    self.mark_failed(step, attempts, "step task ended without a result".to_string())
                        .await;
                }
                Some(StepStatus::Pending) if self.failure.is_some() || cancelled => {
                    // Left for the run-level sweep.
                }
                Some(StepStatus::Pending) => {
                    self.mark_skipped(step, "never became ready").await;
                }
                _ => {}
            }
        }

        if self.failure.is_some() || cancelled {
            return;
        }
        let unfinished = definition.steps_in_phase(phase).find(|step| {
            step.required && self.step_status(&step.id) != Some(StepStatus::Completed)
        });
        if let Some(step) = unfinished {
            let detail = self
                .execution
                .step(&step.id)
                .and_then(|s| s.error.clone())
                .unwrap_or_else(|| "not completed".to_string());
            let message = format!("required step '{}' did not complete: {detail}", step.id);
            self.record_error(&step.id, message.clone(), false);
            self.failure = Some(RunFailure {
                step_id: Some(step.id.clone()),
                message,
            });
            self.persist().await;
        }
    }

    fn deadline_message(&self) -> String {
        format!(
            "run exceeded its deadline of {} ms",
            self.engine.settings.run_timeout_ms.unwrap_or_default()
        )
    }

    async fn mark_failed(&mut self, step: &WorkflowStep, attempts: u32, message: String) {
        if let Some(record) = self.execution.step_mut(&step.id) {
            record.status = StepStatus::Failed;
            record.completed_at = Some(Utc::now());
            record.attempt = record.attempt.max(attempts);
            record.error = Some(message.clone());
        }
        self.record_error(&step.id, message.clone(), false);

        if step.required {
            tracing::error!(
                run_id = %self.execution.id,
                step_id = step.id.as_str(),
                error = message.as_str(),
                "required step failed"
            );
            if self.failure.is_none() {
                self.failure = Some(RunFailure {
                    step_id: Some(step.id.clone()),
                    message,
                });
            }
        } else {
            tracing::warn!(
                run_id = %self.execution.id,
                step_id = step.id.as_str(),
                error = message.as_str(),
                "optional step failed, continuing"
            );
        }
        self.persist().await;
    }

    async fn mark_skipped(&mut self, step: &WorkflowStep, reason: &str) {
        if let Some(record) = self.execution.step_mut(&step.id) {
            record.status = StepStatus::Skipped;
            record.completed_at = Some(Utc::now());
            record.error = Some(reason.to_string());
        }
        tracing::debug!(
            run_id = %self.execution.id,
            step_id = step.id.as_str(),
            reason,
            "step skipped"
        );
        self.persist().await;
    }

    /// Skip every step that never started.
    fn skip_pending(&mut self, reason: &str) {
        let now = Utc::now();
        for record in &mut self.execution.steps {
            if record.status == StepStatus::Pending {
                record.status = StepStatus::Skipped;
                record.completed_at = Some(now);
                record.error = Some(reason.to_string());
            }
        }
    }

    async fn finish_failed(&mut self) {
        self.skip_pending("run failed");

        let rollbacks: Vec<RollbackStep> = self
            .completion_order
            .iter()
            .rev()
            .filter_map(|step_id| self.definition.rollback_for(step_id).cloned())
            .collect();

        if !rollbacks.is_empty() {
            self.execution.transition(ExecutionStatus::RollingBack);
            self.persist().await;
            tracing::warn!(
                run_id = %self.execution.id,
                steps = rollbacks.len(),
                "rolling back completed steps"
            );
            for rollback in &rollbacks {
                self.compensate(rollback).await;
            }
        }

        let failure = self.failure.take().unwrap_or_else(|| RunFailure {
            step_id: None,
            message: "run failed".to_string(),
        });
        tracing::error!(
            run_id = %self.execution.id,
            step_id = failure.step_id.as_deref().unwrap_or("-"),
            error = failure.message.as_str(),
            "workflow run failed"
        );
        self.execution.failure = Some(failure);
        self.execution.transition(ExecutionStatus::Failed);
        self.persist().await;
    }

    async fn finish_cancelled(&mut self) {
        self.skip_pending("run cancelled");
        self.execution.failure = Some(RunFailure {
            step_id: None,
            message: "run cancelled by request".to_string(),
        });
        self.execution.transition(ExecutionStatus::Cancelled);
        self.persist().await;
        tracing::info!(run_id = %self.execution.id, "workflow run cancelled");
    }

    /// Invoke the compensating actions of one completed step, in order.
    ///
    /// Failures are recorded and never trigger further rollback.
    async fn compensate(&mut self, rollback: &RollbackStep) {
        let Some(step) = self.definition.step(&rollback.step_id).cloned() else {
            return;
        };
        let config = self.context.resolve_config(&step.config);
        let previous_output = self.context.step_output(&step.id).cloned();
        let timeout_ms = self.engine.step_timeout_ms(&step);

        for tag in &rollback.actions {
            let input = ActionInput {
                run_id: self.execution.id,
                step_id: step.id.clone(),
                attempt: 1,
                mode: ActionMode::Compensate,
                config: config.clone(),
                previous_output: previous_output.clone(),
            };

            let result = match self.engine.actions.get(tag) {
                Ok(action) => {
                    match tokio::time::timeout(
                        Duration::from_millis(timeout_ms),
                        action.execute(&input),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(StepError::Timeout { timeout_ms }),
                    }
                }
                Err(e) => Err(e),
            };

            let (outcome, error) = match result {
                Ok(_) => {
                    tracing::info!(
                        run_id = %self.execution.id,
                        step_id = step.id.as_str(),
                        action = tag.as_str(),
                        "compensating action completed"
                    );
                    (RollbackOutcome::Completed, None)
                }
                Err(e) => {
                    let message = ExecutorError::RollbackAction {
                        step_id: step.id.clone(),
                        action: tag.clone(),
                        error: e.to_string(),
                    }
                    .to_string();
                    tracing::error!(
                        run_id = %self.execution.id,
                        step_id = step.id.as_str(),
                        action = tag.as_str(),
                        error = message.as_str(),
                        "compensating action failed"
                    );
                    self.record_error(&step.id, message.clone(), false);
                    (RollbackOutcome::Failed, Some(message))
                }
            };

            self.execution.rollbacks.push(RollbackRecord {
                step_id: step.id.clone(),
                action: tag.clone(),
                outcome,
                error,
                timestamp: Utc::now(),
            });
            self.persist().await;
        }
    }

    fn record_error(&mut self, step_id: &str, message: String, recoverable: bool) {
        let phase = self
            .definition
            .step(step_id)
            .map(|s| s.phase.clone())
            .unwrap_or_default();
        self.execution.errors.push(WorkflowErrorEntry {
            step_id: step_id.to_string(),
            phase,
            message,
            timestamp: Utc::now(),
            recoverable,
        });
    }

    fn step_status(&self, step_id: &str) -> Option<StepStatus> {
        self.execution.step(step_id).map(|s| s.status)
    }

    async fn persist(&self) {
        if let Err(e) = self.engine.store.put(&self.execution).await {
            tracing::error!(
                run_id = %self.execution.id,
                error = %e,
                "failed to persist run snapshot"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
