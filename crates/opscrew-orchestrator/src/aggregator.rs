use crate::types::{FailurePolicy, StageReport, TaskReport};
use opscrew_core::WorkflowStatus;

/// Fold per-task reports into a stage report.
///
/// `Succeeded` only if every task succeeded (an empty stage trivially does),
/// `PartiallyFailed` under continue-on-error with at least one success and
/// one failure, `Failed` otherwise. `tasks` must already be in declared
/// order; it is kept as is.
pub fn combine(tasks: Vec<TaskReport>, policy: FailurePolicy) -> StageReport {
    let succeeded = tasks.iter().filter(|t| t.succeeded()).count();
    let any_failed = tasks.iter().any(TaskReport::failed);

    let status = if succeeded == tasks.len() {
        WorkflowStatus::Succeeded
    } else if policy == FailurePolicy::ContinueOnError && any_failed && succeeded > 0 {
        WorkflowStatus::PartiallyFailed
    } else {
        WorkflowStatus::Failed
    };

    let failure = tasks.iter().find_map(TaskReport::failure);
    StageReport {
        status,
        tasks,
        branch: None,
        failure,
    }
}
