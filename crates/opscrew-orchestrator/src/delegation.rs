use crate::registry::AgentRegistry;
use chrono::Utc;
use opscrew_core::{Agent, AgentId, DelegationRecord, OpsCrewError, OpsCrewResult, Task};
use std::collections::HashSet;
use tracing::{info, warn};

/// Default maximum number of handoffs in one task's trail.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Routes a task to an agent holding the capabilities it needs.
///
/// Every handoff is appended to the task's trail. An agent appears at most
/// once in a trail, and a trail never grows beyond `max_depth` records.
#[derive(Debug, Clone, Copy)]
pub struct DelegationResolver {
    max_depth: usize,
}

impl Default for DelegationResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl DelegationResolver {
    /// A resolver allowing at most `max_depth` handoffs per task.
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// The configured depth bound.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Keep `current` if it holds every capability `task` requires, otherwise
    /// hand off to the first capable agent not yet in `trail`.
    pub fn resolve<'r>(
        &self,
        registry: &'r AgentRegistry,
        task: &Task,
        current: &'r Agent,
        trail: &mut Vec<DelegationRecord>,
    ) -> OpsCrewResult<&'r Agent> {
        if current.has_all(&task.required_capabilities) {
            return Ok(current);
        }
        let reason = format!(
            "{} lacks required capabilities [{}]",
            current.id,
            task.required_capabilities.join(", ")
        );
        self.delegate(registry, task, current, &task.required_capabilities, reason, trail)
    }

    /// Hand `task` off from `current` at the agent's own request. The target
    /// must hold `capability` in addition to the task's own requirements and
    /// is never `current`.
    pub fn handoff<'r>(
        &self,
        registry: &'r AgentRegistry,
        task: &Task,
        current: &'r Agent,
        capability: &str,
        reason: &str,
        trail: &mut Vec<DelegationRecord>,
    ) -> OpsCrewResult<&'r Agent> {
        let mut required = task.required_capabilities.clone();
        if !required.iter().any(|c| c == capability) {
            required.push(capability.to_string());
        }
        self.delegate(registry, task, current, &required, reason.to_string(), trail)
    }

    fn delegate<'r>(
        &self,
        registry: &'r AgentRegistry,
        task: &Task,
        current: &'r Agent,
        required: &[String],
        reason: String,
        trail: &mut Vec<DelegationRecord>,
    ) -> OpsCrewResult<&'r Agent> {
        if trail.len() >= self.max_depth {
            warn!(
                task_id = %task.id,
                agent = %current.id,
                depth = trail.len(),
                max_depth = self.max_depth,
                "delegation: depth exceeded"
            );
            return Err(OpsCrewError::DelegationDepthExceeded {
                max_depth: self.max_depth,
            });
        }

        let visited: HashSet<&AgentId> = std::iter::once(&current.id)
            .chain(trail.iter().flat_map(|r| [&r.from, &r.to]))
            .collect();

        let target = registry
            .find_capable(required)
            .into_iter()
            .find(|a| !visited.contains(&a.id))
            .ok_or_else(|| OpsCrewError::NoCapableAgent {
                capabilities: required.to_vec(),
            })?;

        let record = DelegationRecord {
            from: current.id.clone(),
            to: target.id.clone(),
            task_id: task.id,
            reason,
            depth: trail.len() + 1,
            at: Utc::now(),
        };
        info!(
            task_id = %task.id,
            from = %record.from,
            to = %record.to,
            depth = record.depth,
            reason = %record.reason,
            "delegation: handoff"
        );
        trail.push(record);
        Ok(target)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use opscrew_core::{AgentRole, TaskKind};

    fn registry() -> AgentRegistry {
        AgentRegistry::with_agents([
            Agent::new("a", AgentRole::Infrastructure).with_capabilities(["ops", "aws"]),
            Agent::new("b", AgentRole::Security).with_capabilities(["ops", "iam"]),
            Agent::new("c", AgentRole::Monitoring).with_capabilities(["ops", "metrics"]),
            Agent::new("d", AgentRole::Deployment).with_capabilities(["ops", "release"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_keeps_capable_agent() {
        let reg = registry();
        let task = Task::new("t", TaskKind::Custom, "x").requiring("aws");
        let current = reg.get(&AgentId::new("a")).unwrap();
        let mut trail = Vec::new();
        let chosen = DelegationResolver::default()
            .resolve(&reg, &task, current, &mut trail)
            .unwrap();
        assert_eq!(chosen.id.as_str(), "a");
        assert!(trail.is_empty());
    }

    #[test]
    fn test_delegates_to_capable_agent() {
        let reg = registry();
        let task = Task::new("t", TaskKind::Custom, "x").requiring("iam");
        let current = reg.get(&AgentId::new("a")).unwrap();
        let mut trail = Vec::new();
        let chosen = DelegationResolver::default()
            .resolve(&reg, &task, current, &mut trail)
            .unwrap();
        assert_eq!(chosen.id.as_str(), "b");
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].from.as_str(), "a");
        assert_eq!(trail[0].depth, 1);
    }

    #[test]
    fn test_no_capable_agent() {
        let reg = registry();
        let task = Task::new("t", TaskKind::Custom, "x").requiring("quantum");
        let current = reg.get(&AgentId::new("a")).unwrap();
        let err = DelegationResolver::default()
            .resolve(&reg, &task, current, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, OpsCrewError::NoCapableAgent { .. }));
    }

    #[test]
    fn test_handoff_never_revisits() {
        let reg = registry();
        let resolver = DelegationResolver::new(10);
        let task = Task::new("t", TaskKind::Custom, "x");
        let mut trail = Vec::new();
        let mut current = reg.get(&AgentId::new("a")).unwrap();
        let mut seen = vec![current.id.clone()];

        // Every agent hands off on "ops" until nobody is left.
        loop {
            match resolver.handoff(&reg, &task, current, "ops", "not mine", &mut trail) {
                Ok(next) => {
                    assert!(!seen.contains(&next.id), "revisited {}", next.id);
                    seen.push(next.id.clone());
                    current = next;
                }
                Err(OpsCrewError::NoCapableAgent { .. }) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(trail.len(), 3);
    }

    #[test]
    fn test_depth_limit() {
        let reg = registry();
        let resolver = DelegationResolver::new(2);
        let task = Task::new("t", TaskKind::Custom, "x");
        let mut trail = Vec::new();
        let a = reg.get(&AgentId::new("a")).unwrap();
        let b = resolver.handoff(&reg, &task, a, "ops", "r", &mut trail).unwrap();
        let c = resolver.handoff(&reg, &task, b, "ops", "r", &mut trail).unwrap();
        let err = resolver
            .handoff(&reg, &task, c, "ops", "r", &mut trail)
            .unwrap_err();
        assert!(matches!(
            err,
            OpsCrewError::DelegationDepthExceeded { max_depth: 2 }
        ));
        assert_eq!(trail.len(), 2);
    }
}
