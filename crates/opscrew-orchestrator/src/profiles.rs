use crate::registry::AgentRegistry;
use opscrew_core::{Agent, AgentRole, OpsCrewResult};
use opscrew_security::RbacPolicy;

/// Create the default DevOps crew, one specialist per role.
///
/// Registration order (infrastructure, security, monitoring, deployment) is
/// the tie-break order for capability lookups, so the infrastructure
/// specialist leads whenever several agents qualify.
pub fn default_agents(policy: &RbacPolicy) -> Vec<Agent> {
    vec![
        infrastructure_agent(policy),
        security_agent(policy),
        monitoring_agent(policy),
        deployment_agent(policy),
    ]
}

/// A registry holding [`default_agents`].
pub fn default_registry(policy: &RbacPolicy) -> OpsCrewResult<AgentRegistry> {
    AgentRegistry::with_agents(default_agents(policy))
}

fn infrastructure_agent(policy: &RbacPolicy) -> Agent {
    Agent::new("infrastructure", AgentRole::Infrastructure)
        .with_goal(INFRASTRUCTURE_GOAL)
        .with_capabilities(["infrastructure", "aws", "scaling", "cost-optimization"])
        .with_permissions(policy.permissions_for(AgentRole::Infrastructure))
}

fn security_agent(policy: &RbacPolicy) -> Agent {
    Agent::new("security", AgentRole::Security)
        .with_goal(SECURITY_GOAL)
        .with_capabilities(["security", "compliance", "iam", "threat-modeling"])
        .with_permissions(policy.permissions_for(AgentRole::Security))
}

fn monitoring_agent(policy: &RbacPolicy) -> Agent {
    Agent::new("monitoring", AgentRole::Monitoring)
        .with_goal(MONITORING_GOAL)
        .with_capabilities(["monitoring", "metrics", "alerting", "logs"])
        .with_permissions(policy.permissions_for(AgentRole::Monitoring))
}

fn deployment_agent(policy: &RbacPolicy) -> Agent {
    Agent::new("deployment", AgentRole::Deployment)
        .with_goal(DEPLOYMENT_GOAL)
        .with_capabilities(["deployment", "ci-cd", "rollback", "release"])
        .with_permissions(policy.permissions_for(AgentRole::Deployment))
}

const INFRASTRUCTURE_GOAL: &str =
    "Manage and optimize cloud infrastructure, ensure high availability and performance";
const SECURITY_GOAL: &str =
    "Ensure infrastructure security, compliance, and implement security best practices";
const MONITORING_GOAL: &str =
    "Implement comprehensive monitoring, alerting, and observability solutions";
const DEPLOYMENT_GOAL: &str = "Manage CI/CD pipelines, deployments, and release strategies";
