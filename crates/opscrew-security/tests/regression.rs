#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Regression tests for opscrew-security: AuditLog, SecurityGate, RbacPolicy
//! loading, Sanitizer.

use opscrew_core::{Agent, AgentRole, OpsCrewError, Task, TaskKind};
use opscrew_security::audit::AuditOutcome;
use opscrew_security::{AuditLog, GatePolicy, RbacPolicy, SecurityGate};
use std::sync::Arc;
use uuid::Uuid;

fn agent_for(role: AgentRole, policy: &RbacPolicy) -> Agent {
    Agent::new(role.to_string(), role).with_permissions(policy.permissions_for(role))
}

// --- AuditLog ---

#[tokio::test]
async fn test_audit_log_writes_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let log_dir = tmp.path().join("audit");
    let audit = AuditLog::new(log_dir.clone());

    let task_id = Uuid::new_v4();
    audit.log_action(
        task_id,
        Some("security".into()),
        "authorize",
        serde_json::json!({"key": "value"}),
        AuditOutcome::Allowed,
    );

    // Give the background task time to write
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let contents = tokio::fs::read_to_string(log_dir.join("audit.jsonl"))
        .await
        .unwrap();
    assert!(contents.contains("authorize"));
    assert!(contents.contains("\"allowed\""));
    assert!(contents.contains(&task_id.to_string()));
}

#[tokio::test]
async fn test_gate_decisions_are_audited() {
    let tmp = tempfile::tempdir().unwrap();
    let log_dir = tmp.path().join("audit");
    let audit = Arc::new(AuditLog::new(log_dir.clone()));
    let gate = SecurityGate::new(&GatePolicy::default())
        .unwrap()
        .with_audit(audit);

    let policy = RbacPolicy::default();
    let security = agent_for(AgentRole::Security, &policy);

    let ok = Task::new("findings", TaskKind::Analysis, "Review GuardDuty findings")
        .with_actions(["aws:guardduty:GetFindings"]);
    let denied = Task::new("stop", TaskKind::Incident, "Stop instance i-42")
        .with_actions(["aws:ec2:StopInstances"]);

    assert!(gate.authorize(&ok, &security).is_ok());
    assert!(gate.authorize(&denied, &security).is_err());

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let contents = tokio::fs::read_to_string(log_dir.join("audit.jsonl"))
        .await
        .unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["outcome"], "allowed");
    assert_eq!(lines[1]["outcome"], "denied");
    assert_eq!(
        lines[1]["details"]["reason"],
        "missing-permission:aws:ec2:StopInstances"
    );
    assert_eq!(lines[1]["agent"], "security");
}

// --- RbacPolicy ---

#[test]
fn test_rbac_policy_from_toml() {
    let policy: RbacPolicy = toml::from_str(
        r#"
        infrastructure = ["aws:ec2:*"]
        security = ["aws:iam:ListUsers"]
        "#,
    )
    .unwrap();

    let infra = policy.permissions_for(AgentRole::Infrastructure);
    assert!(infra.allows("aws:ec2:StartInstances"));
    assert!(policy.permissions_for(AgentRole::Monitoring).is_empty());
}

#[test]
fn test_rbac_policy_rejects_unknown_role() {
    let parsed: Result<RbacPolicy, _> = toml::from_str(r#"janitor = ["mop"]"#);
    assert!(parsed.is_err());
}

// --- Gate against the default RBAC matrix ---

#[test]
fn test_default_matrix_cross_role_denials() {
    let policy = RbacPolicy::default();
    let gate = SecurityGate::new(&GatePolicy::default()).unwrap();

    let cases = [
        (AgentRole::Infrastructure, "aws:ec2:StopInstances", true),
        (AgentRole::Infrastructure, "aws:iam:ListUsers", false),
        (AgentRole::Security, "aws:securityhub:GetFindings", true),
        (AgentRole::Security, "aws:codedeploy:CreateDeployment", false),
        (AgentRole::Monitoring, "aws:cloudwatch:PutMetricAlarm", true),
        (AgentRole::Monitoring, "aws:ec2:StartInstances", false),
        (AgentRole::Deployment, "aws:codedeploy:CreateDeployment", true),
        (AgentRole::Deployment, "kubernetes:apps:deployments", true),
        (AgentRole::Deployment, "aws:logs:GetLogEvents", false),
    ];

    for (role, action, allowed) in cases {
        let agent = agent_for(role, &policy);
        let task = Task::new("t", TaskKind::Custom, "routine operation").with_actions([action]);
        let result = gate.authorize(&task, &agent);
        assert_eq!(result.is_ok(), allowed, "{role} / {action}");
        if !allowed {
            match result {
                Err(OpsCrewError::Forbidden(reason)) => {
                    assert_eq!(reason, format!("missing-permission:{action}"));
                }
                other => panic!("expected Forbidden, got {other:?}"),
            }
        }
    }
}

#[test]
fn test_gate_policy_from_toml_overrides_patterns() {
    let policy: GatePolicy = toml::from_str(
        r#"
        blocked_patterns = ["drop\\s+table"]
        "#,
    )
    .unwrap();
    assert_eq!(policy.max_description_length, 10_000);

    let gate = SecurityGate::new(&policy).unwrap();
    assert!(gate.screen("DROP TABLE users").is_err());
    // Default patterns were replaced, not extended.
    assert!(gate.screen("sudo restart").is_ok());
}
