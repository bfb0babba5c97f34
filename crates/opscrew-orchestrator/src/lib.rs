//! Multi-agent task orchestration for the DevOps crew.
//!
//! Routes tasks among capability-tagged agents under a sequential, parallel
//! or conditional topology, gates every dispatch through the security gate,
//! deduplicates work through a single-flight result cache and folds the
//! outcomes into stage and workflow reports.
//!
//! # Main types
//!
//! - [`WorkflowExecutor`]: runs a [`Workflow`] against an [`ExecutionContext`].
//! - [`AgentRegistry`]: the fixed, ordered set of agents.
//! - [`ResultCache`]: fingerprint-keyed cache with in-flight reservations.
//! - [`DelegationResolver`]: depth-bounded, cycle-free handoffs.
//! - [`AgentBackend`]: the seam to whatever actually executes a task.
//! - [`Dispatcher`]: task submission in, [`opscrew_core::TaskResponse`] out.

/// Folding task reports into stage reports.
pub mod aggregator;
/// Agent-execution backend trait, retry policy and the dry-run backend.
pub mod backend;
/// Result cache with single-flight reservations.
pub mod cache;
/// Delegation resolution.
pub mod delegation;
/// Workflow executor and execution context.
pub mod engine;
/// In-memory compute instance fleet.
pub mod fleet;
/// Per-role metrics and the metrics sink trait.
pub mod monitor;
/// Default crew definitions.
pub mod profiles;
/// Agent registry.
pub mod registry;
/// Task submission dispatcher.
pub mod submission;
/// Canned crew workflows.
pub mod templates;
/// Workflow model, context and reports.
pub mod types;

pub use aggregator::combine;
pub use backend::{compute_backoff, AgentBackend, AgentReply, DryRunBackend, RetryPolicy};
pub use cache::{fingerprint, CacheEntry, Lookup, Reservation, ResultCache, Waiter};
pub use delegation::DelegationResolver;
pub use engine::{ExecutionContext, OrchestratorConfig, WorkflowExecutor};
pub use fleet::{InstanceFleet, InstanceState, InstanceTransition};
pub use monitor::{AgentMetrics, AgentMonitor, AgentState, MetricsSink};
pub use profiles::{default_agents, default_registry};
pub use registry::AgentRegistry;
pub use submission::Dispatcher;
pub use types::{
    Branch, BranchCondition, BranchReport, BranchTable, FailurePolicy, Stage, StageReport,
    TaskReport, Workflow, WorkflowContext, WorkflowReport,
};
