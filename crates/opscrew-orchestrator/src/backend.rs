//! The agent-execution backend seam.
//!
//! The engine never talks to a language model or a cloud API directly; it
//! hands each unit of work to an [`AgentBackend`] and retries transient
//! failures according to a [`RetryPolicy`].

use crate::fleet::InstanceFleet;
use async_trait::async_trait;
use opscrew_core::{Agent, OpsCrewResult, Task};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What an agent produced for a task.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentReply {
    /// The task is done; `payload` becomes the task's result.
    Completed(serde_json::Value),
    /// The agent asks for the task to move to another agent.
    Handoff {
        /// Capability the next agent must hold.
        capability: String,
        /// Why the agent is handing off.
        reason: String,
    },
}

/// Executes one task on behalf of one agent.
///
/// Implementations report transient trouble as `BackendUnavailable` or
/// `Backend`; the engine retries those. Any other error is surfaced as is.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Run `task` as `agent`. `context` holds the payloads of earlier
    /// successful tasks in the same workflow, keyed by task name.
    async fn execute(
        &self,
        agent: &Agent,
        task: &Task,
        context: &serde_json::Value,
    ) -> OpsCrewResult<AgentReply>;

    /// Backend name for logs.
    fn name(&self) -> &str {
        "backend"
    }
}

/// Retry behaviour for transient backend failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Computes the backoff delay for a given attempt using exponential backoff
/// capped at `backoff_max_ms`.
pub fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    delay.min(policy.backoff_max_ms)
}

/// Offline backend that answers every task with a deterministic summary.
///
/// Tasks requesting `aws:ec2:StartInstances` or `aws:ec2:StopInstances` on a
/// `resource` are applied to the attached [`InstanceFleet`].
#[derive(Default)]
pub struct DryRunBackend {
    fleet: Option<Arc<InstanceFleet>>,
}

const START_INSTANCES: &str = "aws:ec2:StartInstances";
const STOP_INSTANCES: &str = "aws:ec2:StopInstances";

impl DryRunBackend {
    /// A backend without a fleet; resource actions are only described.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply start and stop actions to `fleet`.
    pub fn with_fleet(mut self, fleet: Arc<InstanceFleet>) -> Self {
        self.fleet = Some(fleet);
        self
    }
}

#[async_trait]
impl AgentBackend for DryRunBackend {
    async fn execute(
        &self,
        agent: &Agent,
        task: &Task,
        context: &serde_json::Value,
    ) -> OpsCrewResult<AgentReply> {
        let mut transitions = Vec::new();
        if let (Some(fleet), Some(resource)) = (&self.fleet, &task.resource) {
            for action in &task.requested_actions {
                let transition = match action.as_str() {
                    START_INSTANCES => fleet.start(resource)?,
                    STOP_INSTANCES => fleet.stop(resource)?,
                    _ => continue,
                };
                transitions.push(serde_json::to_value(transition)?);
            }
        }

        let headline = task
            .description
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        let context_keys: Vec<&String> = context
            .as_object()
            .map(|m| m.keys().collect())
            .unwrap_or_default();

        Ok(AgentReply::Completed(serde_json::json!({
            "agent": agent.id,
            "role": agent.role,
            "task": task.name,
            "summary": format!("{} agent reviewed: {headline}", agent.role),
            "assessment": task.description,
            "priority": task.priority,
            "context": context_keys,
            "transitions": transitions,
        })))
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fleet::InstanceState;
    use opscrew_core::{AgentRole, OpsCrewError, TaskKind};
    use serde_json::json;

    #[test]
    fn test_compute_backoff() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 1000,
        };
        assert_eq!(compute_backoff(&policy, 0), 100);
        assert_eq!(compute_backoff(&policy, 1), 200);
        assert_eq!(compute_backoff(&policy, 2), 400);
        assert_eq!(compute_backoff(&policy, 3), 800);
        assert_eq!(compute_backoff(&policy, 4), 1000);
        assert_eq!(compute_backoff(&policy, 63), 1000);
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy: RetryPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff_base_ms, 500);
        assert_eq!(policy.backoff_max_ms, 30_000);
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }

    #[tokio::test]
    async fn test_dry_run_summary() {
        let agent = Agent::new("monitoring", AgentRole::Monitoring);
        let task = Task::new("metrics", TaskKind::Incident, "\n  Latency up 10x\nsecond line");
        let reply = DryRunBackend::new()
            .execute(&agent, &task, &json!({"assess": {}}))
            .await
            .unwrap();
        let AgentReply::Completed(payload) = reply else {
            panic!("expected completion");
        };
        assert_eq!(payload["summary"], "monitoring agent reviewed: Latency up 10x");
        assert_eq!(payload["context"], json!(["assess"]));
    }

    #[tokio::test]
    async fn test_dry_run_applies_fleet_actions() {
        let fleet = Arc::new(InstanceFleet::new().with_instance("i-1", InstanceState::Running));
        let backend = DryRunBackend::new().with_fleet(Arc::clone(&fleet));
        let agent = Agent::new("infrastructure", AgentRole::Infrastructure);
        let task = Task::new("stop", TaskKind::Incident, "stop runaway host")
            .with_actions([STOP_INSTANCES])
            .on_resource("i-1");

        let reply = backend.execute(&agent, &task, &json!({})).await.unwrap();
        let AgentReply::Completed(payload) = reply else {
            panic!("expected completion");
        };
        assert_eq!(payload["transitions"][0]["current"], "stopping");

        let err = backend.execute(&agent, &task, &json!({})).await.unwrap_err();
        assert!(matches!(err, OpsCrewError::ResourceStateConflict(_)));
    }
}
