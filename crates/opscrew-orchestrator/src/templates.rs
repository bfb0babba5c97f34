//! Canned workflows for the DevOps crew.
//!
//! Each task is pinned to the specialist that leads it and names the cloud
//! actions it will perform, so the security gate checks them against that
//! specialist's role.

use crate::types::{BranchCondition, BranchTable, FailurePolicy, Stage, Workflow};
use opscrew_core::{Priority, Task, TaskKind};

fn crew_task(
    name: &str,
    kind: TaskKind,
    agent: &str,
    priority: Priority,
    description: String,
    actions: &[&str],
) -> Task {
    Task::new(name, kind, description)
        .assigned_to(agent)
        .requiring(agent)
        .with_priority(priority)
        .with_actions(actions.iter().copied())
}

/// Every specialist looks at the incident concurrently; one specialist
/// failing does not hide the others' findings.
pub fn incident_response(incident: &str, priority: Priority) -> Workflow {
    let tasks = vec![
        crew_task(
            "infrastructure_assessment",
            TaskKind::Incident,
            "infrastructure",
            priority,
            format!(
                "Incident Report: {incident}\n\
                 Lead the incident response: assess the current infrastructure state, \
                 identify affected systems and services, and provide immediate \
                 stabilization recommendations."
            ),
            &["aws:ec2:DescribeInstances", "aws:cloudwatch:GetMetricStatistics"],
        ),
        crew_task(
            "security_analysis",
            TaskKind::Incident,
            "security",
            priority,
            format!(
                "Security Analysis for incident: {incident}\n\
                 Check whether this could be a security incident, review access logs \
                 and security events, and assess potential data exposure."
            ),
            &["aws:guardduty:GetFindings", "aws:securityhub:GetFindings"],
        ),
        crew_task(
            "monitoring_analysis",
            TaskKind::Incident,
            "monitoring",
            priority,
            format!(
                "Monitoring Analysis for incident: {incident}\n\
                 Analyze relevant metrics and logs, identify anomalies leading to the \
                 incident, and create alerts to prevent recurrence."
            ),
            &["aws:cloudwatch:GetMetricStatistics", "aws:logs:FilterLogEvents"],
        ),
        crew_task(
            "deployment_impact",
            TaskKind::Incident,
            "deployment",
            priority,
            format!(
                "Deployment Impact Analysis for incident: {incident}\n\
                 Check whether recent deployments contributed, evaluate rollback \
                 options, and review deployment pipeline health."
            ),
            &["aws:codedeploy:ListDeployments"],
        ),
    ];
    Workflow::new(
        "incident_response",
        Stage::parallel(tasks, FailurePolicy::ContinueOnError),
    )
}

/// A single optimization plan led by the infrastructure specialist.
pub fn infrastructure_optimization(requirements: &str, priority: Priority) -> Workflow {
    let task = crew_task(
        "optimization_plan",
        TaskKind::Optimization,
        "infrastructure",
        priority,
        format!(
            "Infrastructure Optimization Request: {requirements}\n\
             Analyze current infrastructure state and usage patterns and provide a \
             detailed optimization plan with timeline and risk assessment."
        ),
        &["aws:ec2:DescribeInstances", "aws:cloudwatch:GetMetricStatistics"],
    );
    Workflow::new(
        "infrastructure_optimization",
        Stage::sequential(vec![task], FailurePolicy::FailFast),
    )
}

/// A read-only review of the whole system by every specialist.
pub fn system_analysis(scope: &str, priority: Priority) -> Workflow {
    let specialists: [(&str, &str, &[&str]); 4] = [
        (
            "infrastructure",
            "capacity and availability",
            &["aws:ec2:DescribeInstances"],
        ),
        ("security", "posture and findings", &["aws:securityhub:GetFindings"]),
        (
            "monitoring",
            "metric and log coverage",
            &["aws:cloudwatch:GetMetricStatistics"],
        ),
        (
            "deployment",
            "pipeline and release health",
            &["aws:codedeploy:ListDeployments"],
        ),
    ];
    let tasks = specialists
        .iter()
        .map(|(agent, focus, actions)| {
            crew_task(
                &format!("{agent}_review"),
                TaskKind::Analysis,
                agent,
                priority,
                format!("System analysis: {scope}\nReview {focus}."),
                actions,
            )
        })
        .collect();
    Workflow::new(
        "system_analysis",
        Stage::parallel(tasks, FailurePolicy::ContinueOnError),
    )
}

/// Gated release: each step runs only if the previous one succeeded.
pub fn deployment_pipeline(change: &str, priority: Priority) -> Workflow {
    let tasks = vec![
        crew_task(
            "security_validation",
            TaskKind::Custom,
            "security",
            priority,
            format!("Validate the change before release: {change}"),
            &["aws:iam:ListUsers", "aws:securityhub:GetFindings"],
        ),
        crew_task(
            "infrastructure_preparation",
            TaskKind::Custom,
            "infrastructure",
            priority,
            format!("Prepare capacity for the release: {change}"),
            &["aws:ec2:DescribeInstances"],
        ),
        crew_task(
            "deployment",
            TaskKind::Custom,
            "deployment",
            priority,
            format!("Roll out the release: {change}"),
            &["aws:codedeploy:CreateDeployment"],
        ),
        crew_task(
            "monitoring_setup",
            TaskKind::Custom,
            "monitoring",
            priority,
            format!("Watch the release and alert on regressions: {change}"),
            &["aws:cloudwatch:PutMetricAlarm"],
        ),
    ];
    Workflow::new(
        "deployment_pipeline",
        Stage::sequential(tasks, FailurePolicy::FailFast),
    )
}

/// Infrastructure assesses first; the assessment decides which specialist
/// follows up.
pub fn triage(report: &str, priority: Priority) -> Workflow {
    let predicate = crew_task(
        "triage_assessment",
        TaskKind::Custom,
        "infrastructure",
        priority,
        format!("Triage: {report}"),
        &["aws:ec2:DescribeInstances"],
    );

    let follow_up = |agent: &str, what: &str, actions: &[&str]| {
        Stage::sequential(
            vec![crew_task(
                &format!("{agent}_follow_up"),
                TaskKind::Custom,
                agent,
                priority,
                format!("Follow up on triage ({what}): {report}"),
                actions,
            )],
            FailurePolicy::FailFast,
        )
    };

    let branches = BranchTable::new()
        .when(
            BranchCondition::ContainsAny {
                keywords: vec!["security".into(), "breach".into()],
            },
            "security",
            follow_up("security", "threat review", &["aws:guardduty:GetFindings"]),
        )
        .when(
            BranchCondition::ContainsAny {
                keywords: vec!["performance".into(), "slow".into()],
            },
            "monitoring",
            follow_up("monitoring", "latency review", &["aws:cloudwatch:GetMetricStatistics"]),
        )
        .otherwise(
            "infrastructure",
            follow_up("infrastructure", "capacity review", &["aws:ec2:DescribeInstances"]),
        );

    Workflow::new("triage", Stage::conditional(predicate, branches))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::profiles::default_agents;
    use opscrew_security::{GatePolicy, RbacPolicy, SecurityGate};
    use serde_json::json;

    /// Every templated task must pass the gate for its own agent under the
    /// default RBAC policy.
    fn assert_authorized(workflow: &Workflow) {
        let agents = default_agents(&RbacPolicy::default());
        let gate = SecurityGate::new(&GatePolicy::default()).unwrap();
        for task in workflow.stage.tasks() {
            let agent = agents
                .iter()
                .find(|a| Some(&a.id) == task.assigned_to.as_ref())
                .unwrap();
            assert!(agent.has_all(&task.required_capabilities), "{}", task.name);
            gate.authorize(task, agent)
                .unwrap_or_else(|e| panic!("{} denied: {e}", task.name));
        }
        workflow.validate().unwrap();
    }

    #[test]
    fn test_templates_pass_gate() {
        assert_authorized(&incident_response("High response times", Priority::High));
        assert_authorized(&infrastructure_optimization("Cut cost by half", Priority::Medium));
        assert_authorized(&system_analysis("quarterly review", Priority::Low));
        assert_authorized(&deployment_pipeline("v2.3.1", Priority::Medium));
        assert_authorized(&triage("API errors", Priority::High));
    }

    #[test]
    fn test_incident_response_shape() {
        let wf = incident_response("disk full", Priority::Critical);
        let Stage::Parallel { tasks, policy } = &wf.stage else {
            panic!("expected parallel stage");
        };
        assert_eq!(*policy, FailurePolicy::ContinueOnError);
        let agents: Vec<&str> = tasks
            .iter()
            .map(|t| t.assigned_to.as_ref().unwrap().as_str())
            .collect();
        assert_eq!(agents, vec!["infrastructure", "security", "monitoring", "deployment"]);
        assert!(tasks.iter().all(|t| t.priority == Priority::Critical));
        assert!(tasks[0].description.contains("disk full"));
    }

    #[test]
    fn test_deployment_pipeline_order() {
        let wf = deployment_pipeline("v1", Priority::Medium);
        let names: Vec<&str> = wf.stage.tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "security_validation",
                "infrastructure_preparation",
                "deployment",
                "monitoring_setup"
            ]
        );
    }

    #[test]
    fn test_triage_routing() {
        let wf = triage("x", Priority::Medium);
        let Stage::Conditional { branches, .. } = &wf.stage else {
            panic!("expected conditional stage");
        };
        let pick = |text: &str| {
            branches
                .select(&json!({ "assessment": text }))
                .unwrap()
                .label
                .clone()
        };
        assert_eq!(pick("possible data BREACH"), "security");
        assert_eq!(pick("checkout is slow"), "monitoring");
        assert_eq!(pick("disk at 95%"), "infrastructure");
    }

    #[test]
    fn test_predicate_text_is_keyword_neutral() {
        // The template's own wording must not steer the branch choice.
        let wf = triage("disk at 95%", Priority::Medium);
        let Stage::Conditional { predicate, .. } = &wf.stage else {
            panic!("expected conditional stage");
        };
        let text = predicate.description.to_lowercase();
        for keyword in ["security", "breach", "performance", "slow"] {
            assert!(!text.contains(keyword), "{keyword}");
        }
        assert_eq!(predicate.assigned_to.as_ref().unwrap().as_str(), "infrastructure");
    }
}
