use opscrew_core::AgentRole;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Receives per-task measurements from the engine.
///
/// Calls are synchronous and must not block; exporting is the sink's concern.
pub trait MetricsSink: Send + Sync {
    /// A task took a worker slot.
    fn task_started(&self, task_id: Uuid);
    /// A task reached a terminal state. `role` is the executing agent's, or
    /// `None` when the task failed before an agent was chosen.
    fn task_finished(
        &self,
        task_id: Uuid,
        role: Option<AgentRole>,
        success: bool,
        duration: Duration,
    );
    /// A task was answered from the result cache.
    fn cache_hit(&self, task_id: Uuid, role: Option<AgentRole>);
}

/// Metrics tracked per agent role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Tasks that reached a terminal state.
    pub tasks: u64,
    /// Tasks that failed.
    pub errors: u64,
    /// Tasks answered from the result cache.
    pub cache_hits: u64,
    /// Total task wall time.
    pub duration_ms: u64,
}

impl AgentMetrics {
    fn add(&mut self, other: &AgentMetrics) {
        self.tasks += other.tasks;
        self.errors += other.errors;
        self.cache_hits += other.cache_hits;
        self.duration_ms += other.duration_ms;
    }
}

/// Snapshot of one role's metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// The role measured.
    pub role: AgentRole,
    /// Its counters.
    pub metrics: AgentMetrics,
}

/// Tracks metrics for all agent roles plus a global in-flight gauge.
pub struct AgentMonitor {
    states: RwLock<BTreeMap<AgentRole, AgentMetrics>>,
    /// Tasks that failed before routing.
    unrouted: RwLock<AgentMetrics>,
    in_flight: AtomicU64,
}

impl AgentMonitor {
    /// A monitor with zeroed counters for every role.
    pub fn new() -> Self {
        let states = AgentRole::ALL
            .iter()
            .map(|role| (*role, AgentMetrics::default()))
            .collect();
        Self {
            states: RwLock::new(states),
            unrouted: RwLock::new(AgentMetrics::default()),
            in_flight: AtomicU64::new(0),
        }
    }

    /// Tasks currently holding a worker slot.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all role states, in role order.
    pub fn snapshot(&self) -> Vec<AgentState> {
        self.states
            .read()
            .iter()
            .map(|(role, metrics)| AgentState {
                role: *role,
                metrics: metrics.clone(),
            })
            .collect()
    }

    /// Get the metrics of a specific role.
    pub fn get(&self, role: AgentRole) -> AgentMetrics {
        self.states.read().get(&role).cloned().unwrap_or_default()
    }

    /// Get aggregate metrics across all roles, unrouted tasks included.
    pub fn aggregate_metrics(&self) -> AgentMetrics {
        let mut total = self.unrouted.read().clone();
        for metrics in self.states.read().values() {
            total.add(metrics);
        }
        total
    }

    /// Serialize the current state as JSON (for dashboards).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "agents": self.snapshot(),
            "aggregate": self.aggregate_metrics(),
            "in_flight": self.in_flight(),
        })
    }

    fn with_metrics(&self, role: Option<AgentRole>, f: impl FnOnce(&mut AgentMetrics)) {
        match role {
            Some(role) => f(self.states.write().entry(role).or_default()),
            None => f(&mut *self.unrouted.write()),
        }
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for AgentMonitor {
    fn task_started(&self, _task_id: Uuid) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn task_finished(
        &self,
        _task_id: Uuid,
        role: Option<AgentRole>,
        success: bool,
        duration: Duration,
    ) {
        // Saturating so a stray finish never wraps the gauge.
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
        self.with_metrics(role, |m| {
            m.tasks += 1;
            if !success {
                m.errors += 1;
            }
            m.duration_ms += u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        });
    }

    fn cache_hit(&self, _task_id: Uuid, role: Option<AgentRole>) {
        self.with_metrics(role, |m| m.cache_hits += 1);
    }
}
