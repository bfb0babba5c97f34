use crate::agent::AgentId;
use crate::{OpsCrewError, OpsCrewResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// What kind of operational work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// A production incident needing response.
    Incident,
    /// An infrastructure optimization request.
    Optimization,
    /// A read-only system analysis.
    Analysis,
    /// Anything else.
    Custom,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Incident => write!(f, "incident"),
            TaskKind::Optimization => write!(f, "optimization"),
            TaskKind::Analysis => write!(f, "analysis"),
            TaskKind::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = OpsCrewError;

    fn from_str(s: &str) -> OpsCrewResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "incident" => Ok(TaskKind::Incident),
            "optimization" => Ok(TaskKind::Optimization),
            "analysis" => Ok(TaskKind::Analysis),
            "custom" => Ok(TaskKind::Custom),
            other => Err(OpsCrewError::Validation(format!("unknown task type '{other}'"))),
        }
    }
}

/// Task priority. Also used as the severity scale of predicate results.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Routine work.
    Low,
    /// The default.
    #[default]
    Medium,
    /// Needs attention soon.
    High,
    /// Needs attention now.
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Priority {
    type Err = OpsCrewError;

    fn from_str(s: &str) -> OpsCrewResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(OpsCrewError::Validation(format!("unknown priority '{other}'"))),
        }
    }
}

/// Lifecycle of a task inside a stage.
///
/// `Pending → Gated → Dispatched → (Delegated →)* Running → {Succeeded, Failed}`,
/// with `Dispatched → Cached` on a cache hit and `→ Failed` from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Declared, not yet dispatched.
    Pending,
    /// Passed the security gate.
    Gated,
    /// Handed to the cache and router.
    Dispatched,
    /// Moved to another agent.
    Delegated,
    /// A backend call is in progress.
    Running,
    /// Completed by an agent.
    Succeeded,
    /// Terminal failure.
    Failed,
    /// Completed from the result cache.
    Cached,
}

impl TaskState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed | TaskState::Cached)
    }

    /// Terminal and carrying a success payload.
    pub fn is_success(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Cached)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_advance_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, Gated)
            | (Gated, Dispatched)
            | (Dispatched, Cached)
            | (Dispatched, Delegated)
            | (Dispatched, Running)
            | (Delegated, Delegated)
            | (Delegated, Running)
            | (Running, Delegated)
            | (Running, Succeeded) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Gated => "gated",
            TaskState::Dispatched => "dispatched",
            TaskState::Delegated => "delegated",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cached => "cached",
        };
        f.write_str(s)
    }
}

/// A unit of work routed through the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identity.
    pub id: Uuid,
    /// Short label, unique within a workflow (used for context keys and reports).
    pub name: String,
    /// Category of work.
    pub kind: TaskKind,
    /// Free-text instructions for the agent.
    pub description: String,
    /// Urgency; part of the cache fingerprint.
    #[serde(default)]
    pub priority: Priority,
    /// Capability tags the executing agent must hold.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Action names the task will perform; checked against agent permissions.
    #[serde(default)]
    pub requested_actions: Vec<String>,
    /// Preferred agent. When absent the first capable agent is chosen.
    #[serde(default)]
    pub assigned_to: Option<AgentId>,
    /// Cloud resource the requested actions target, if any.
    #[serde(default)]
    pub resource: Option<String>,
    /// Overrides the executor's default per-task timeout.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Current lifecycle state.
    pub state: TaskState,
    /// When the task was declared.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// A pending task with default priority and no routing hints.
    pub fn new(name: impl Into<String>, kind: TaskKind, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            description: description.into(),
            priority: Priority::default(),
            required_capabilities: Vec::new(),
            requested_actions: Vec::new(),
            assigned_to: None,
            resource: None,
            timeout: None,
            state: TaskState::Pending,
            created_at: Utc::now(),
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Require a capability tag of the executing agent.
    pub fn requiring(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.push(capability.into());
        self
    }

    /// Declare actions the task will perform.
    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested_actions
            .extend(actions.into_iter().map(Into::into));
        self
    }

    /// Prefer a specific agent.
    pub fn assigned_to(mut self, agent: impl Into<String>) -> Self {
        self.assigned_to = Some(AgentId::new(agent));
        self
    }

    /// Target a cloud resource.
    pub fn on_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Override the executor's task timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: TaskState) -> OpsCrewResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(OpsCrewError::Orchestrator(format!(
                "task '{}' cannot move from {} to {}",
                self.name, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }
}
