//! Workflow domain types for Provisio.
//!
//! Defines the canonical definition model (`WorkflowDefinition` and its steps,
//! phases, parallel groups, and rollback steps) together with the execution
//! tracking records (`WorkflowExecution`, `WorkflowStepExecution`,
//! `WorkflowErrorEntry`) that the engine mutates and the operation registry
//! returns to status-polling callers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default per-step timeout (5 minutes).
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 300_000;

/// Default number of attempts for a step (first run plus two retries).
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_STEP_TIMEOUT_MS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_max_concurrency() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// An immutable, named graph of steps grouped into ordered phases.
///
/// Constructed once (usually from a template file), validated at registration,
/// and shared read-only by every run created from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Template identifier callers use to start runs (e.g. "project-bootstrap").
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Template version string (e.g. "1.2.0").
    pub version: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Phase names in execution order.
    pub phases: Vec<String>,
    /// Every step of the workflow, in declaration order.
    pub steps: Vec<WorkflowStep>,
    /// Sets of steps allowed to run concurrently.
    #[serde(default)]
    pub parallel_groups: Vec<ParallelGroup>,
    /// Compensations keyed by the step they undo.
    #[serde(default)]
    pub rollback_steps: Vec<RollbackStep>,
    /// Extensible metadata (owner, tags, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl WorkflowDefinition {
    /// Look up a step by its identifier.
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// The parallel group a step belongs to, if any.
    pub fn group_of(&self, step_id: &str) -> Option<&ParallelGroup> {
        self.parallel_groups
            .iter()
            .find(|g| g.steps.iter().any(|s| s == step_id))
    }

    /// The rollback step registered for a step, if any.
    pub fn rollback_for(&self, step_id: &str) -> Option<&RollbackStep> {
        self.rollback_steps.iter().find(|r| r.step_id == step_id)
    }

    /// Steps belonging to a phase, in declaration order.
    pub fn steps_in_phase<'a>(&'a self, phase: &'a str) -> impl Iterator<Item = &'a WorkflowStep> {
        self.steps.iter().filter(move |s| s.phase == phase)
    }
}

/// A single unit of work inside a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique identifier within the definition (e.g. "create-environment").
    pub id: String,
    /// Human-readable step name.
    pub name: String,
    /// Type tag selecting which registered action runs this step.
    #[serde(rename = "type")]
    pub step_type: String,
    /// Owning phase; must appear in `WorkflowDefinition::phases`.
    pub phase: String,
    /// Step IDs that must complete before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Whether the step may be placed in a parallel group.
    #[serde(default)]
    pub parallel: bool,
    /// Required steps fail the run when they fail; optional ones do not.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Deadline for one invocation of the step's action.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total attempts allowed for the step's action (minimum 1).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Opaque option map handed to the action.
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

/// A named subset of steps that may run concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelGroup {
    /// Group identifier.
    pub id: String,
    /// Member step identifiers.
    pub steps: Vec<String>,
    /// Maximum members in flight at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    /// Abort remaining members as soon as one fails terminally.
    #[serde(default)]
    pub fail_fast: bool,
}

/// Compensating actions that undo a completed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackStep {
    /// The step whose effect these actions undo.
    pub step_id: String,
    /// Action type tags, invoked in order.
    pub actions: Vec<String>,
    /// When the compensation fires.
    #[serde(default)]
    pub trigger: RollbackTrigger,
}

/// Condition under which a rollback step is invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTrigger {
    /// Run when the overall run fails.
    #[default]
    OnFailure,
}

// ---------------------------------------------------------------------------
// Execution Status
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    RollingBack,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Whether no further mutation can happen in this state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::RollingBack => "rolling_back",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Status of an individual step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Retrying,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Retrying => "retrying",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Workflow Execution (run record)
// ---------------------------------------------------------------------------

/// One run of a workflow definition against a concrete request.
///
/// Mutated only by the engine task that owns the run; readers receive
/// snapshots through the execution store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// UUIDv7 execution ID.
    pub id: Uuid,
    /// Identifier of the definition the run was created from.
    pub definition_id: String,
    /// Current overall status.
    pub status: ExecutionStatus,
    /// Every status the run has passed through, oldest first.
    #[serde(default)]
    pub status_history: Vec<ExecutionStatus>,
    /// Phase currently being executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    /// When the run record was created.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// One record per step, in definition order.
    pub steps: Vec<WorkflowStepExecution>,
    /// Run-scoped variables supplied by the request.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    /// Every error observed during the run, in order of occurrence.
    #[serde(default)]
    pub errors: Vec<WorkflowErrorEntry>,
    /// Compensating action invocations, in invocation order.
    #[serde(default)]
    pub rollbacks: Vec<RollbackRecord>,
    /// What ended the run, for `failed` and `cancelled` outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl WorkflowExecution {
    /// Create a pending run record with one pending step entry per step.
    pub fn new(
        id: Uuid,
        definition: &WorkflowDefinition,
        variables: HashMap<String, Value>,
    ) -> Self {
        Self {
            id,
            definition_id: definition.id.clone(),
            status: ExecutionStatus::Pending,
            status_history: vec![ExecutionStatus::Pending],
            current_phase: None,
            started_at: Utc::now(),
            completed_at: None,
            steps: definition
                .steps
                .iter()
                .map(|s| WorkflowStepExecution::pending(&s.id))
                .collect(),
            variables,
            errors: Vec::new(),
            rollbacks: Vec::new(),
            failure: None,
        }
    }

    /// Look up the execution record of a step.
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStepExecution> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Mutable lookup of a step's execution record.
    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut WorkflowStepExecution> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    /// Move to a new overall status, recording the transition.
    pub fn transition(&mut self, status: ExecutionStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        self.status_history.push(status);
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }
}

/// Execution record for a single step within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStepExecution {
    /// Step ID matching `WorkflowStep::id`.
    pub step_id: String,
    /// Current step status.
    pub status: StepStatus,
    /// When the first attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Current attempt number (1-based; 0 until the step starts).
    pub attempt: u32,
    /// Output captured from the successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Last error message, if the step failed or is retrying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowStepExecution {
    pub fn pending(step_id: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            attempt: 0,
            output: None,
            error: None,
        }
    }
}

/// An error observed during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowErrorEntry {
    /// Step the error belongs to.
    pub step_id: String,
    /// Phase the step belongs to.
    pub phase: String,
    /// Error message.
    pub message: String,
    /// When the error was recorded.
    pub timestamp: DateTime<Utc>,
    /// `true` when the error triggered a retry, `false` when it was terminal.
    pub recoverable: bool,
}

/// Outcome of one compensating action invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackOutcome {
    Completed,
    Failed,
}

/// Record of one compensating action invoked during rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    /// The step being compensated.
    pub step_id: String,
    /// The compensating action tag.
    pub action: String,
    pub outcome: RollbackOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Diagnostic summary attached to `failed` and `cancelled` runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    /// The step whose failure ended the run (absent for run-level causes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// The triggering error message.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
