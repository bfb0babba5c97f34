use opscrew_core::{
    FailureSummary, OpsCrewError, OpsCrewResult, Priority, Task, TaskResult, TaskState,
    WorkflowStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// What a stage does when one of its tasks fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop dispatching once a task fails; the stage is `Failed`.
    #[default]
    FailFast,
    /// Keep going; a mix of successes and failures is `PartiallyFailed`.
    ContinueOnError,
}

/// Execution topology of a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topology", rename_all = "snake_case")]
pub enum Stage {
    /// One task at a time, in declared order.
    Sequential {
        /// Tasks in execution order.
        tasks: Vec<Task>,
        /// What a failure does to the rest.
        #[serde(default)]
        policy: FailurePolicy,
    },
    /// All tasks at once, bounded by the worker pool.
    Parallel {
        /// Tasks in result order.
        tasks: Vec<Task>,
        /// What a failure does to queued tasks.
        #[serde(default)]
        policy: FailurePolicy,
    },
    /// A predicate task picks exactly one branch.
    Conditional {
        /// Runs first; its payload selects the branch.
        predicate: Box<Task>,
        /// Candidate branches.
        branches: BranchTable,
    },
}

impl Stage {
    /// A sequential stage.
    pub fn sequential(tasks: Vec<Task>, policy: FailurePolicy) -> Self {
        Stage::Sequential { tasks, policy }
    }

    /// A parallel stage.
    pub fn parallel(tasks: Vec<Task>, policy: FailurePolicy) -> Self {
        Stage::Parallel { tasks, policy }
    }

    /// A conditional stage.
    pub fn conditional(predicate: Task, branches: BranchTable) -> Self {
        Stage::Conditional {
            predicate: Box::new(predicate),
            branches,
        }
    }

    /// Every task in declared order (predicate first, then each branch).
    pub fn tasks(&self) -> Vec<&Task> {
        match self {
            Stage::Sequential { tasks, .. } | Stage::Parallel { tasks, .. } => {
                tasks.iter().collect()
            }
            Stage::Conditional {
                predicate,
                branches,
            } => std::iter::once(predicate.as_ref())
                .chain(branches.stages().flat_map(Stage::tasks))
                .collect(),
        }
    }

    fn topology(&self) -> &'static str {
        match self {
            Stage::Sequential { .. } => "sequential",
            Stage::Parallel { .. } => "parallel",
            Stage::Conditional { .. } => "conditional",
        }
    }
}

/// Test applied to the predicate task's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum BranchCondition {
    /// The value at `field` (dot-separated path) equals `value`.
    Equals {
        /// Path into the payload.
        field: String,
        /// Expected value.
        value: serde_json::Value,
    },
    /// The value at `field` names a severity at or above `threshold`.
    SeverityAtLeast {
        /// Path into the payload.
        field: String,
        /// Lowest matching severity.
        threshold: Priority,
    },
    /// The payload text mentions any of `keywords` (case-insensitive).
    ContainsAny {
        /// Words to look for.
        keywords: Vec<String>,
    },
}

impl BranchCondition {
    /// Whether `payload` satisfies the condition.
    pub fn matches(&self, payload: &serde_json::Value) -> bool {
        match self {
            BranchCondition::Equals { field, value } => lookup(payload, field) == Some(value),
            BranchCondition::SeverityAtLeast { field, threshold } => lookup(payload, field)
                .and_then(serde_json::Value::as_str)
                .and_then(|s| s.parse::<Priority>().ok())
                .is_some_and(|severity| severity >= *threshold),
            BranchCondition::ContainsAny { keywords } => {
                let text = payload.to_string().to_lowercase();
                keywords.iter().any(|k| text.contains(&k.to_lowercase()))
            }
        }
    }
}

fn lookup<'a>(payload: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.')
        .try_fold(payload, |value, key| value.get(key))
}

/// One labelled arm of a branch table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    /// Name reported when the branch is taken.
    pub label: String,
    /// What runs when the branch is taken.
    pub stage: Stage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BranchArm {
    condition: BranchCondition,
    branch: Branch,
}

/// Ordered branch arms plus an optional default. The first matching arm wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchTable {
    arms: Vec<BranchArm>,
    default: Option<Box<Branch>>,
}

impl BranchTable {
    /// A table with no arms and no default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an arm; arms are tried in order.
    pub fn when(
        mut self,
        condition: BranchCondition,
        label: impl Into<String>,
        stage: Stage,
    ) -> Self {
        self.arms.push(BranchArm {
            condition,
            branch: Branch {
                label: label.into(),
                stage,
            },
        });
        self
    }

    /// Set the branch taken when no arm matches.
    pub fn otherwise(mut self, label: impl Into<String>, stage: Stage) -> Self {
        self.default = Some(Box::new(Branch {
            label: label.into(),
            stage,
        }));
        self
    }

    /// The branch selected by `payload`, if any.
    pub fn select(&self, payload: &serde_json::Value) -> Option<&Branch> {
        self.arms
            .iter()
            .find(|arm| arm.condition.matches(payload))
            .map(|arm| &arm.branch)
            .or(self.default.as_deref())
    }

    /// Every branch stage, arms first, default last.
    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.arms
            .iter()
            .map(|arm| &arm.branch)
            .chain(self.default.as_deref())
            .map(|b| &b.stage)
    }

    fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.arms.iter().map(|arm| &arm.branch).chain(self.default.as_deref())
    }
}

/// A declared set of tasks plus the topology they run under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identity.
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// The top-level stage.
    pub stage: Stage,
}

impl Workflow {
    /// A workflow with a fresh id.
    pub fn new(name: impl Into<String>, stage: Stage) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            stage,
        }
    }

    /// Structural checks run before anything is dispatched.
    pub fn validate(&self) -> OpsCrewResult<()> {
        let tasks = self.stage.tasks();
        if tasks.is_empty() {
            return Err(OpsCrewError::Validation(format!(
                "workflow '{}' has no tasks",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for task in &tasks {
            if !names.insert(task.name.as_str()) {
                return Err(OpsCrewError::Validation(format!(
                    "duplicate task name '{}' in workflow '{}'",
                    task.name, self.name
                )));
            }
            if task.state != TaskState::Pending {
                return Err(OpsCrewError::Validation(format!(
                    "task '{}' was already {}",
                    task.name, task.state
                )));
            }
        }

        if let Stage::Conditional { branches, .. } = &self.stage {
            for branch in branches.branches() {
                if matches!(branch.stage, Stage::Conditional { .. }) {
                    return Err(OpsCrewError::Validation(format!(
                        "branch '{}' must be sequential or parallel, not {}",
                        branch.label,
                        branch.stage.topology()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Payloads of successful tasks, keyed by task name, visible to later tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowContext {
    entries: BTreeMap<String, serde_json::Value>,
}

impl WorkflowContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `payload` under `name`.
    pub fn record(&mut self, name: impl Into<String>, payload: serde_json::Value) {
        self.entries.insert(name.into(), payload);
    }

    /// Record the payload of `report` if it succeeded. Failed tasks contribute
    /// nothing.
    pub fn absorb(&mut self, report: &TaskReport) {
        if let Some(payload) = report.payload() {
            self.record(report.name.clone(), payload.clone());
        }
    }

    /// The payload recorded under `name`.
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.entries.get(name)
    }

    /// Number of recorded payloads.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The context as a JSON object, as handed to backends.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Final state of one task in a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    /// The task reported on.
    pub task_id: Uuid,
    /// Its name.
    pub name: String,
    /// Final state; `Pending` if never dispatched.
    pub state: TaskState,
    /// Present exactly when `state` is terminal.
    pub result: Option<TaskResult>,
}

impl TaskReport {
    /// A task that was never dispatched.
    pub fn pending(task: &Task) -> Self {
        Self {
            task_id: task.id,
            name: task.name.clone(),
            state: TaskState::Pending,
            result: None,
        }
    }

    /// Whether the task ended successfully, cached or not.
    pub fn succeeded(&self) -> bool {
        self.state.is_success()
    }

    /// Whether the task failed.
    pub fn failed(&self) -> bool {
        self.state == TaskState::Failed
    }

    /// The success payload, if any.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.result.as_ref().and_then(|r| r.outcome.payload())
    }

    /// Failure summary if this task failed.
    pub fn failure(&self) -> Option<FailureSummary> {
        let failure = self.result.as_ref()?.outcome.failure()?;
        Some(FailureSummary {
            task_id: Some(self.task_id),
            task_name: Some(self.name.clone()),
            kind: failure.kind,
            reason: failure.reason.clone(),
        })
    }
}

/// The branch a conditional stage took.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchReport {
    /// Label of the branch taken.
    pub label: String,
    /// How its stage went.
    pub stage: Box<StageReport>,
}

/// Aggregated outcome of a stage. `tasks` is always in declared order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    /// Aggregated status.
    pub status: WorkflowStatus,
    /// Reports of the stage's own tasks.
    pub tasks: Vec<TaskReport>,
    /// Set for conditional stages whose predicate succeeded and matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchReport>,
    /// The failure that decided a non-successful status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
}

impl StageReport {
    /// Every task report, nested branches included, in declared order.
    pub fn all_tasks(&self) -> Vec<&TaskReport> {
        let mut out: Vec<&TaskReport> = self.tasks.iter().collect();
        if let Some(branch) = &self.branch {
            out.extend(branch.stage.all_tasks());
        }
        out
    }
}

/// Outcome of a whole workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    /// The workflow reported on.
    pub workflow_id: Uuid,
    /// Its name.
    pub name: String,
    /// Overall status.
    pub status: WorkflowStatus,
    /// Report of the top-level stage.
    pub stage: StageReport,
    /// The failure that decided a non-successful status.
    pub failure: Option<FailureSummary>,
    /// Context accumulated from successful tasks.
    pub context: WorkflowContext,
    /// Wall time of the run.
    pub duration_ms: u64,
}

impl WorkflowReport {
    /// Look up a task report by name.
    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.stage.all_tasks().into_iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use opscrew_core::TaskKind;
    use serde_json::json;

    fn task(name: &str) -> Task {
        Task::new(name, TaskKind::Custom, "check the fleet")
    }

    #[test]
    fn test_branch_selection_order() {
        let table = BranchTable::new()
            .when(
                BranchCondition::Equals {
                    field: "severity".into(),
                    value: json!("critical"),
                },
                "escalate",
                Stage::sequential(vec![task("page")], FailurePolicy::FailFast),
            )
            .otherwise(
                "routine",
                Stage::sequential(vec![task("ticket")], FailurePolicy::FailFast),
            );

        assert_eq!(table.select(&json!({"severity": "critical"})).unwrap().label, "escalate");
        assert_eq!(table.select(&json!({"severity": "low"})).unwrap().label, "routine");
        assert_eq!(table.select(&json!("no fields")).unwrap().label, "routine");
    }

    #[test]
    fn test_no_default_no_match() {
        let table = BranchTable::new().when(
            BranchCondition::ContainsAny {
                keywords: vec!["breach".into()],
            },
            "security",
            Stage::parallel(vec![], FailurePolicy::FailFast),
        );
        assert!(table.select(&json!({"summary": "disk full"})).is_none());
        assert!(table.select(&json!({"summary": "Possible BREACH"})).is_some());
    }

    #[test]
    fn test_severity_threshold() {
        let cond = BranchCondition::SeverityAtLeast {
            field: "incident.severity".into(),
            threshold: Priority::High,
        };
        assert!(cond.matches(&json!({"incident": {"severity": "critical"}})));
        assert!(cond.matches(&json!({"incident": {"severity": "high"}})));
        assert!(!cond.matches(&json!({"incident": {"severity": "medium"}})));
        assert!(!cond.matches(&json!({"incident": {"severity": "bogus"}})));
        assert!(!cond.matches(&json!({})));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty() {
        let dup = Workflow::new(
            "dup",
            Stage::sequential(vec![task("a"), task("a")], FailurePolicy::FailFast),
        );
        assert!(matches!(dup.validate(), Err(OpsCrewError::Validation(_))));

        let empty = Workflow::new("empty", Stage::parallel(vec![], FailurePolicy::FailFast));
        assert!(matches!(empty.validate(), Err(OpsCrewError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_nested_conditional() {
        let inner = Stage::conditional(task("inner"), BranchTable::new());
        let wf = Workflow::new(
            "nested",
            Stage::conditional(task("outer"), BranchTable::new().otherwise("x", inner)),
        );
        assert!(matches!(wf.validate(), Err(OpsCrewError::Validation(_))));
    }

    #[test]
    fn test_stage_tasks_declared_order() {
        let stage = Stage::conditional(
            task("p"),
            BranchTable::new()
                .when(
                    BranchCondition::ContainsAny { keywords: vec![] },
                    "a",
                    Stage::sequential(vec![task("a1"), task("a2")], FailurePolicy::FailFast),
                )
                .otherwise("b", Stage::parallel(vec![task("b1")], FailurePolicy::FailFast)),
        );
        let names: Vec<&str> = stage.tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["p", "a1", "a2", "b1"]);
    }

    #[test]
    fn test_context_skips_failures() {
        let ok = TaskReport {
            task_id: Uuid::new_v4(),
            name: "ok".into(),
            state: TaskState::Succeeded,
            result: Some(TaskResult {
                task_id: Uuid::new_v4(),
                outcome: opscrew_core::TaskOutcome::Success { payload: json!(1) },
                provenance: Default::default(),
                duration_ms: 0,
            }),
        };
        let failed = TaskReport {
            task_id: Uuid::new_v4(),
            name: "bad".into(),
            state: TaskState::Failed,
            result: Some(TaskResult {
                task_id: Uuid::new_v4(),
                outcome: opscrew_core::TaskOutcome::Failure(opscrew_core::TaskFailure::new(
                    opscrew_core::ErrorKind::BackendError,
                    "x",
                )),
                provenance: Default::default(),
                duration_ms: 0,
            }),
        };
        let mut ctx = WorkflowContext::new();
        ctx.absorb(&ok);
        ctx.absorb(&failed);
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.to_value(), json!({"ok": 1}));
        assert_eq!(failed.failure().unwrap().task_name.as_deref(), Some("bad"));
    }
}
