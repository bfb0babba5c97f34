use crate::agent::AgentId;
use crate::{ErrorKind, OpsCrewError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One handoff of a task from one agent to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRecord {
    /// Agent that gave the task up.
    pub from: AgentId,
    /// Agent that received it.
    pub to: AgentId,
    /// The delegated task.
    pub task_id: Uuid,
    /// Why the task changed hands.
    pub reason: String,
    /// Position of this handoff in the trail, starting at 1.
    pub depth: usize,
    /// When the handoff happened.
    pub at: DateTime<Utc>,
}

/// Why a task failed. Cheap to clone so one failure can reach many waiters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Error category.
    pub kind: ErrorKind,
    /// Error detail, e.g. `missing-permission:<action>`.
    pub reason: String,
}

impl TaskFailure {
    /// A failure of `kind` with a human-readable reason.
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl From<&OpsCrewError> for TaskFailure {
    fn from(err: &OpsCrewError) -> Self {
        Self {
            kind: err.kind(),
            reason: err.reason(),
        }
    }
}

impl From<OpsCrewError> for TaskFailure {
    fn from(err: OpsCrewError) -> Self {
        Self::from(&err)
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// Success payload or failure detail of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The agent completed the task.
    Success {
        /// What the agent returned.
        payload: serde_json::Value,
    },
    /// The task failed; never cached.
    Failure(TaskFailure),
}

impl TaskOutcome {
    /// Whether the task succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }

    /// The payload, if the task succeeded.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            TaskOutcome::Success { payload } => Some(payload),
            TaskOutcome::Failure(_) => None,
        }
    }

    /// The failure, if the task failed.
    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            TaskOutcome::Failure(f) => Some(f),
            TaskOutcome::Success { .. } => None,
        }
    }
}

/// Where a result came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Agent that produced the payload (or was last assigned, on failure).
    pub agent: Option<AgentId>,
    /// Served from the result cache rather than a backend call.
    pub from_cache: bool,
    /// Every handoff, in order.
    pub delegations: Vec<DelegationRecord>,
    /// Backend invocations made for this task, retries included.
    pub attempts: u32,
}

impl Provenance {
    /// Number of handoffs the task went through.
    pub fn delegation_depth(&self) -> usize {
        self.delegations.len()
    }
}

/// The single result of a task that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task this result belongs to.
    pub task_id: Uuid,
    /// Success payload or failure.
    pub outcome: TaskOutcome,
    /// Where the outcome came from.
    pub provenance: Provenance,
    /// Wall time from dispatch to the terminal state.
    pub duration_ms: u64,
}

/// Status of a stage or a whole workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Not started.
    Pending,
    /// At least one task dispatched, not all finished.
    Running,
    /// Every task succeeded.
    Succeeded,
    /// Some tasks failed under continue-on-error.
    PartiallyFailed,
    /// The stage or workflow failed.
    Failed,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Succeeded => "succeeded",
            WorkflowStatus::PartiallyFailed => "partially_failed",
            WorkflowStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Identity, kind and reason of the failure that decided a terminal response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    /// Absent when the request was rejected before any task existed.
    pub task_id: Option<Uuid>,
    /// Name of the failed task, when there was one.
    pub task_name: Option<String>,
    /// Error category.
    pub kind: ErrorKind,
    /// Error detail.
    pub reason: String,
}
