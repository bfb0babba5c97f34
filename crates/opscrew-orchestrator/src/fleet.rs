use opscrew_core::{OpsCrewError, OpsCrewResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Lifecycle state of a compute instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Starting up.
    Pending,
    /// Up.
    Running,
    /// Shutting down.
    Stopping,
    /// Down.
    Stopped,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Result of a start or stop request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTransition {
    /// The instance acted on.
    pub instance_id: String,
    /// State before the request.
    pub previous: InstanceState,
    /// State after the request.
    pub current: InstanceState,
}

/// In-memory stand-in for the cloud compute API.
///
/// Start and stop only initiate a transition (`pending` / `stopping`);
/// [`InstanceFleet::settle`] completes every outstanding one.
#[derive(Debug, Default)]
pub struct InstanceFleet {
    instances: RwLock<BTreeMap<String, InstanceState>>,
}

impl InstanceFleet {
    /// An empty fleet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance in `state`.
    pub fn with_instance(self, id: impl Into<String>, state: InstanceState) -> Self {
        self.instances.write().insert(id.into(), state);
        self
    }

    /// Current state of `id`. Unknown ids are a `Validation` error.
    pub fn status(&self, id: &str) -> OpsCrewResult<InstanceState> {
        self.instances
            .read()
            .get(id)
            .copied()
            .ok_or_else(|| unknown(id))
    }

    /// Begin starting `id`. Fails with `ResourceStateConflict` if it is
    /// already running.
    pub fn start(&self, id: &str) -> OpsCrewResult<InstanceTransition> {
        self.transition(id, InstanceState::Pending, |s| s == InstanceState::Running)
    }

    /// Begin stopping `id`. Fails with `ResourceStateConflict` if it is
    /// already stopped or stopping.
    pub fn stop(&self, id: &str) -> OpsCrewResult<InstanceTransition> {
        self.transition(id, InstanceState::Stopping, |s| {
            matches!(s, InstanceState::Stopped | InstanceState::Stopping)
        })
    }

    /// Complete pending transitions.
    pub fn settle(&self) {
        for state in self.instances.write().values_mut() {
            *state = match *state {
                InstanceState::Pending => InstanceState::Running,
                InstanceState::Stopping => InstanceState::Stopped,
                other => other,
            };
        }
    }

    /// Snapshot of every instance.
    pub fn describe(&self) -> BTreeMap<String, InstanceState> {
        self.instances.read().clone()
    }

    fn transition(
        &self,
        id: &str,
        next: InstanceState,
        conflicts: impl Fn(InstanceState) -> bool,
    ) -> OpsCrewResult<InstanceTransition> {
        let mut instances = self.instances.write();
        let state = instances.get_mut(id).ok_or_else(|| unknown(id))?;
        let previous = *state;
        if conflicts(previous) {
            return Err(OpsCrewError::ResourceStateConflict(format!(
                "instance {id} is already {previous}"
            )));
        }
        *state = next;
        info!(instance = id, %previous, current = %next, "fleet: transition initiated");
        Ok(InstanceTransition {
            instance_id: id.to_string(),
            previous,
            current: next,
        })
    }
}

fn unknown(id: &str) -> OpsCrewError {
    OpsCrewError::Validation(format!("unknown instance '{id}'"))
}
