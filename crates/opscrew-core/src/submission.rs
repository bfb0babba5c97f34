//! Payloads exchanged with whatever transport exposes task submission.

use crate::result::{FailureSummary, Provenance, WorkflowStatus};
use crate::task::{Priority, TaskKind};
use crate::{ErrorKind, OpsCrewResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// An incoming task submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// One of `incident`, `optimization`, `analysis`, `custom`.
    pub task_type: String,
    /// What needs to be done.
    pub description: String,
    /// One of `low`, `medium`, `high`, `critical`; `medium` when absent.
    #[serde(default)]
    pub priority: Option<String>,
    /// Free-form caller data, carried but not interpreted.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskRequest {
    /// A request with the default priority and no metadata.
    pub fn new(task_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            description: description.into(),
            priority: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the priority string, validated by [`TaskRequest::parse`].
    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Parse the stringly-typed fields.
    pub fn parse(&self) -> OpsCrewResult<(TaskKind, Priority)> {
        let kind = self.task_type.parse::<TaskKind>()?;
        let priority = match &self.priority {
            Some(p) => p.parse::<Priority>()?,
            None => Priority::default(),
        };
        Ok((kind, priority))
    }
}

/// Transport-independent response category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseClass {
    /// 2xx: the workflow succeeded, possibly from cache or partially.
    Success,
    /// 4xx: rejected input (validation or security gate).
    ClientError,
    /// 5xx: execution failed (routing, backend, timeout).
    ServerError,
}

impl ResponseClass {
    /// Category of a response with `status`, decided by `failure` when unsuccessful.
    pub fn classify(status: WorkflowStatus, failure: Option<ErrorKind>) -> Self {
        match status {
            WorkflowStatus::Succeeded | WorkflowStatus::PartiallyFailed => ResponseClass::Success,
            _ => match failure {
                Some(kind) if kind.is_client_error() => ResponseClass::ClientError,
                _ => ResponseClass::ServerError,
            },
        }
    }
}

/// The terminal response for a submitted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Workflow id, or a fresh id for requests rejected up front.
    pub task_id: Uuid,
    /// Overall workflow status.
    pub status: WorkflowStatus,
    /// Transport-independent category of the response.
    pub class: ResponseClass,
    /// Per-task payloads keyed by task name, present unless nothing succeeded.
    pub result: Option<serde_json::Value>,
    /// The failure that decided a non-successful status.
    pub error: Option<FailureSummary>,
    /// Provenance of every task that reached a terminal state, in declared order.
    pub provenance: Vec<Provenance>,
    /// Time from acceptance to response.
    pub execution_time_ms: u64,
    /// When the response was produced.
    pub timestamp: DateTime<Utc>,
}

impl TaskResponse {
    /// A response for a request rejected before any dispatch.
    pub fn rejected(task_id: Uuid, kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            task_id,
            status: WorkflowStatus::Failed,
            class: ResponseClass::classify(WorkflowStatus::Failed, Some(kind)),
            result: None,
            error: Some(FailureSummary {
                task_id: None,
                task_name: None,
                kind,
                reason: reason.into(),
            }),
            provenance: Vec::new(),
            execution_time_ms: 0,
            timestamp: Utc::now(),
        }
    }

    /// Canonical HTTP status code for this response.
    pub fn http_status(&self) -> u16 {
        let kind = self.error.as_ref().map(|e| e.kind);
        match (self.class, self.status, kind) {
            (ResponseClass::Success, WorkflowStatus::PartiallyFailed, _) => 207,
            (ResponseClass::Success, _, _) => 200,
            (ResponseClass::ClientError, _, Some(ErrorKind::Forbidden)) => 403,
            (ResponseClass::ClientError, _, _) => 400,
            (ResponseClass::ServerError, _, Some(ErrorKind::Timeout)) => 504,
            (ResponseClass::ServerError, _, _) => 500,
        }
    }
}
