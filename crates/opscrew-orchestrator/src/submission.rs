use crate::engine::WorkflowExecutor;
use crate::templates;
use crate::types::{Workflow, WorkflowReport};
use opscrew_core::{
    ErrorKind, OpsCrewError, Priority, ResponseClass, TaskKind, TaskRequest, TaskResponse,
};
use opscrew_security::SecurityGate;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Turns task submissions into workflow runs and their responses.
#[derive(Clone)]
pub struct Dispatcher {
    executor: WorkflowExecutor,
    gate: Arc<SecurityGate>,
}

impl Dispatcher {
    /// A dispatcher running workflows on `executor` and screening with its gate.
    pub fn new(executor: WorkflowExecutor) -> Self {
        let gate = Arc::clone(&executor.context().gate);
        Self { executor, gate }
    }

    /// The underlying executor.
    pub fn executor(&self) -> &WorkflowExecutor {
        &self.executor
    }

    /// The workflow a request of `kind` runs.
    pub fn plan(kind: TaskKind, description: &str, priority: Priority) -> Workflow {
        match kind {
            TaskKind::Incident => templates::incident_response(description, priority),
            TaskKind::Optimization => templates::infrastructure_optimization(description, priority),
            TaskKind::Analysis => templates::system_analysis(description, priority),
            TaskKind::Custom => templates::triage(description, priority),
        }
    }

    /// Validate, screen, plan and run `request`.
    ///
    /// Malformed and blocked requests are answered without contacting any
    /// agent.
    pub async fn submit(&self, request: TaskRequest) -> TaskResponse {
        let start = Instant::now();
        let (kind, priority) = match request.parse() {
            Ok(parsed) => parsed,
            Err(e) => return self.reject(Uuid::new_v4(), &e),
        };
        if let Err(e) = self.gate.screen(&request.description) {
            return self.reject(Uuid::new_v4(), &e);
        }

        let workflow = Self::plan(kind, &request.description, priority);
        let workflow_id = workflow.id;
        info!(
            workflow_id = %workflow_id,
            task_type = %kind,
            priority = %priority,
            "Submission: accepted"
        );

        let report = match self.executor.run(workflow).await {
            Ok(report) => report,
            Err(e) => return self.reject(workflow_id, &e),
        };
        let mut response = respond(report);
        response.execution_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            workflow_id = %workflow_id,
            status = %response.status,
            http_status = response.http_status(),
            "Submission: answered"
        );
        response
    }

    fn reject(&self, id: Uuid, err: &OpsCrewError) -> TaskResponse {
        warn!(request_id = %id, kind = %err.kind(), reason = %err.reason(), "Submission: rejected");
        TaskResponse::rejected(id, err.kind(), err.reason())
    }
}

/// Build the response for a finished workflow. Successful payloads are
/// always included, next to the failure that decided the status.
pub fn respond(report: WorkflowReport) -> TaskResponse {
    let tasks = report.stage.all_tasks();
    let payloads: serde_json::Map<String, serde_json::Value> = tasks
        .iter()
        .filter_map(|t| t.payload().map(|p| (t.name.clone(), p.clone())))
        .collect();
    let provenance = tasks
        .iter()
        .filter_map(|t| t.result.as_ref().map(|r| r.provenance.clone()))
        .collect();
    let failure_kind: Option<ErrorKind> = report.failure.as_ref().map(|f| f.kind);

    TaskResponse {
        task_id: report.workflow_id,
        status: report.status,
        class: ResponseClass::classify(report.status, failure_kind),
        result: (!payloads.is_empty()).then_some(serde_json::Value::Object(payloads)),
        error: report.failure.clone(),
        provenance,
        execution_time_ms: report.duration_ms,
        timestamp: chrono::Utc::now(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::backend::DryRunBackend;
    use crate::engine::{ExecutionContext, OrchestratorConfig};
    use crate::profiles::default_registry;
    use opscrew_core::WorkflowStatus;
    use opscrew_security::{GatePolicy, RbacPolicy};

    fn dispatcher() -> Dispatcher {
        let registry = Arc::new(default_registry(&RbacPolicy::default()).unwrap());
        let gate = Arc::new(SecurityGate::new(&GatePolicy::default()).unwrap());
        let ctx = ExecutionContext::new(
            &OrchestratorConfig::default(),
            registry,
            gate,
            Arc::new(DryRunBackend::new()),
        );
        Dispatcher::new(WorkflowExecutor::new(ctx))
    }

    #[tokio::test]
    async fn test_incident_submission_succeeds() {
        let response = dispatcher()
            .submit(
                TaskRequest::new("incident", "High response times on web tier")
                    .with_priority("high"),
            )
            .await;
        assert_eq!(response.status, WorkflowStatus::Succeeded);
        assert_eq!(response.class, ResponseClass::Success);
        assert_eq!(response.http_status(), 200);
        let result = response.result.unwrap();
        for name in [
            "infrastructure_assessment",
            "security_analysis",
            "monitoring_analysis",
            "deployment_impact",
        ] {
            assert!(result.get(name).is_some(), "{name}");
        }
        assert_eq!(response.provenance.len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_type_is_client_error() {
        let response = dispatcher()
            .submit(TaskRequest::new("haiku", "write me a poem"))
            .await;
        assert_eq!(response.class, ResponseClass::ClientError);
        assert_eq!(response.http_status(), 400);
        assert_eq!(response.error.unwrap().kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_blocked_description_is_forbidden() {
        let response = dispatcher()
            .submit(TaskRequest::new("custom", "clean up with sudo rm -rf /var"))
            .await;
        assert_eq!(response.http_status(), 403);
        let error = response.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Forbidden);
        assert_eq!(error.reason, "blocked-pattern");
        assert!(response.provenance.is_empty());
    }

    #[tokio::test]
    async fn test_custom_request_runs_triage() {
        let response = dispatcher()
            .submit(TaskRequest::new("custom", "checkout is slow since noon"))
            .await;
        assert_eq!(response.status, WorkflowStatus::Succeeded);
        let result = response.result.unwrap();
        assert!(result.get("triage_assessment").is_some());
        assert!(result.get("monitoring_follow_up").is_some());
    }
}
