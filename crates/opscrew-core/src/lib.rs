//! Core types and error definitions for the OpsCrew orchestration engine.
//!
//! This crate provides the foundational types shared across all OpsCrew crates:
//! the error taxonomy, agents and their permission sets, tasks and their state
//! machine, per-task results with provenance, and the request/response types
//! of the task submission interface.
//!
//! # Main types
//!
//! - [`OpsCrewError`]: Unified error enum for every orchestration failure kind.
//! - [`OpsCrewResult`]: Convenience alias for `Result<T, OpsCrewError>`.
//! - [`ErrorKind`]: Serializable, copyable classification of an [`OpsCrewError`].
//! - [`Agent`]: A specialized executor with capability tags and permissions.
//! - [`Task`]: A unit of work routed through the orchestration engine.
//! - [`TaskResult`]: The outcome of a task together with its provenance.
//! - [`TaskRequest`] / [`TaskResponse`]: Submission interface payloads.

/// Agent identities, roles and permission sets.
pub mod agent;
/// Task results, failures, provenance and delegation records.
pub mod result;
/// Request and response types of the task submission interface.
pub mod submission;
/// Tasks and the per-task state machine.
pub mod task;

pub use agent::{Agent, AgentId, AgentRole, PermissionSet};
pub use result::{
    DelegationRecord, FailureSummary, Provenance, TaskFailure, TaskOutcome, TaskResult,
    WorkflowStatus,
};
pub use submission::{ResponseClass, TaskRequest, TaskResponse};
pub use task::{Priority, Task, TaskKind, TaskState};

use serde::{Deserialize, Serialize};

// --- Error types ---

/// Top-level error type for the OpsCrew engine.
///
/// Each variant corresponds to one failure kind of the orchestration
/// taxonomy; [`OpsCrewError::kind`] classifies it for retry decisions and
/// response mapping.
#[derive(Debug, thiserror::Error)]
pub enum OpsCrewError {
    /// A malformed task or workflow, rejected before any dispatch.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rejected by the security gate.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// An agent with the same identity is already registered.
    #[error("Duplicate agent: {0}")]
    DuplicateAgent(AgentId),

    /// No agent with this identity is registered.
    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// No registered agent outside the delegation trail holds the capabilities.
    #[error("No capable agent for capabilities [{}]", .capabilities.join(", "))]
    NoCapableAgent {
        /// Capabilities that had to be satisfied.
        capabilities: Vec<String>,
    },

    /// Accepting another handoff would exceed the delegation depth bound.
    #[error("Delegation depth exceeded (max {max_depth})")]
    DelegationDepthExceeded {
        /// Configured maximum depth.
        max_depth: usize,
    },

    /// The agent-execution backend could not be reached.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The agent-execution backend reported an error.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A dispatched task exceeded its timeout.
    #[error("Task timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// A cloud resource was not in a state that allows the requested action.
    #[error("Resource state conflict: {0}")]
    ResourceStateConflict(String),

    /// No branch of a conditional stage matched the predicate result.
    #[error("No matching branch: {0}")]
    NoMatchingBranch(String),

    /// The task was abandoned before producing a result.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An internal orchestration invariant was violated.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`OpsCrewError`].
pub type OpsCrewResult<T> = Result<T, OpsCrewError>;

/// Classification of an [`OpsCrewError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input.
    Validation,
    /// Security gate rejection.
    Forbidden,
    /// Agent registration conflict.
    DuplicateAgent,
    /// Agent lookup failure.
    UnknownAgent,
    /// Routing failure: nobody can take the task.
    NoCapableAgent,
    /// Routing failure: handoff chain too long.
    DelegationDepthExceeded,
    /// Backend transport failure.
    BackendUnavailable,
    /// Backend-reported failure.
    BackendError,
    /// Per-task timeout elapsed.
    Timeout,
    /// Cloud resource state conflict.
    ResourceStateConflict,
    /// Conditional stage without a matching branch.
    NoMatchingBranch,
    /// Abandoned work.
    Cancelled,
    /// Configuration problem.
    Config,
    /// Internal failure.
    Internal,
}

impl ErrorKind {
    /// Whether a failure of this kind is worth another backend attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::BackendUnavailable | ErrorKind::BackendError)
    }

    /// Whether the failure was caused by the caller's input.
    pub fn is_client_error(self) -> bool {
        matches!(self, ErrorKind::Validation | ErrorKind::Forbidden)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::DuplicateAgent => "duplicate_agent",
            ErrorKind::UnknownAgent => "unknown_agent",
            ErrorKind::NoCapableAgent => "no_capable_agent",
            ErrorKind::DelegationDepthExceeded => "delegation_depth_exceeded",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::BackendError => "backend_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ResourceStateConflict => "resource_state_conflict",
            ErrorKind::NoMatchingBranch => "no_matching_branch",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl OpsCrewError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OpsCrewError::Validation(_) => ErrorKind::Validation,
            OpsCrewError::Forbidden(_) => ErrorKind::Forbidden,
            OpsCrewError::DuplicateAgent(_) => ErrorKind::DuplicateAgent,
            OpsCrewError::UnknownAgent(_) => ErrorKind::UnknownAgent,
            OpsCrewError::NoCapableAgent { .. } => ErrorKind::NoCapableAgent,
            OpsCrewError::DelegationDepthExceeded { .. } => ErrorKind::DelegationDepthExceeded,
            OpsCrewError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            OpsCrewError::Backend(_) => ErrorKind::BackendError,
            OpsCrewError::Timeout { .. } => ErrorKind::Timeout,
            OpsCrewError::ResourceStateConflict(_) => ErrorKind::ResourceStateConflict,
            OpsCrewError::NoMatchingBranch(_) => ErrorKind::NoMatchingBranch,
            OpsCrewError::Cancelled(_) => ErrorKind::Cancelled,
            OpsCrewError::Config(_) => ErrorKind::Config,
            OpsCrewError::Orchestrator(_) | OpsCrewError::Json(_) | OpsCrewError::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether the executor may retry the backend call that produced this error.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// The human-readable reason without the kind prefix.
    pub fn reason(&self) -> String {
        match self {
            OpsCrewError::Validation(r)
            | OpsCrewError::Forbidden(r)
            | OpsCrewError::BackendUnavailable(r)
            | OpsCrewError::Backend(r)
            | OpsCrewError::ResourceStateConflict(r)
            | OpsCrewError::NoMatchingBranch(r)
            | OpsCrewError::Cancelled(r)
            | OpsCrewError::Config(r)
            | OpsCrewError::Orchestrator(r) => r.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_backend_failures_are_retryable() {
        assert!(OpsCrewError::BackendUnavailable("conn refused".into()).is_retryable());
        assert!(OpsCrewError::Backend("500".into()).is_retryable());
        assert!(!OpsCrewError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(!OpsCrewError::ResourceStateConflict("already stopped".into()).is_retryable());
        assert!(!OpsCrewError::Forbidden("blocked-pattern".into()).is_retryable());
    }

    #[test]
    fn test_forbidden_reason_is_verbatim() {
        let err = OpsCrewError::Forbidden("missing-permission:aws:iam:ListUsers".into());
        assert_eq!(err.reason(), "missing-permission:aws:iam:ListUsers");
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(err.kind().is_client_error());
    }

    #[test]
    fn test_no_capable_agent_message() {
        let err = OpsCrewError::NoCapableAgent {
            capabilities: vec!["dns".into(), "bgp".into()],
        };
        assert_eq!(err.to_string(), "No capable agent for capabilities [dns, bgp]");
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::DelegationDepthExceeded.to_string(), "delegation_depth_exceeded");
        assert_eq!(ErrorKind::Timeout.to_string(), "timeout");
    }
}
