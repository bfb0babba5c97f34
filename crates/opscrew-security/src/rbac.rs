use opscrew_core::{AgentRole, OpsCrewError, OpsCrewResult, PermissionSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

static POLICY: OnceLock<RbacPolicy> = OnceLock::new();

/// Mapping from agent role to the action names that role may perform.
///
/// Loaded once at process start and immutable afterwards. Roles missing from
/// a loaded policy get no permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RbacPolicy {
    roles: BTreeMap<AgentRole, PermissionSet>,
}

impl Default for RbacPolicy {
    fn default() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(
            AgentRole::Infrastructure,
            [
                "aws:ec2:DescribeInstances",
                "aws:ec2:StartInstances",
                "aws:ec2:StopInstances",
                "aws:cloudwatch:GetMetricStatistics",
            ]
            .into_iter()
            .collect(),
        );
        roles.insert(
            AgentRole::Security,
            [
                "aws:iam:ListUsers",
                "aws:guardduty:GetFindings",
                "aws:securityhub:GetFindings",
            ]
            .into_iter()
            .collect(),
        );
        roles.insert(
            AgentRole::Monitoring,
            ["aws:cloudwatch:*", "aws:logs:*"].into_iter().collect(),
        );
        roles.insert(
            AgentRole::Deployment,
            ["aws:codedeploy:*", "kubernetes:apps:deployments"]
                .into_iter()
                .collect(),
        );
        Self { roles }
    }
}

impl RbacPolicy {
    /// An empty policy: every role has no permissions.
    pub fn empty() -> Self {
        Self {
            roles: BTreeMap::new(),
        }
    }

    /// Grant `actions` to `role`, replacing what it had.
    pub fn with_role<I, S>(mut self, role: AgentRole, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.insert(role, actions.into_iter().collect());
        self
    }

    /// Permissions granted to `role`.
    pub fn permissions_for(&self, role: AgentRole) -> PermissionSet {
        self.roles.get(&role).cloned().unwrap_or_default()
    }

    /// Every configured role with its permissions.
    pub fn roles(&self) -> impl Iterator<Item = (AgentRole, &PermissionSet)> {
        self.roles.iter().map(|(role, perms)| (*role, perms))
    }

    /// Install `policy` as the process-wide policy.
    ///
    /// Fails if a policy was already installed or [`RbacPolicy::global`] was
    /// already read.
    pub fn install(policy: RbacPolicy) -> OpsCrewResult<&'static RbacPolicy> {
        POLICY
            .set(policy)
            .map_err(|_| OpsCrewError::Config("RBAC policy is already initialized".into()))?;
        POLICY
            .get()
            .ok_or_else(|| OpsCrewError::Config("RBAC policy failed to initialize".into()))
    }

    /// The process-wide policy, initialized to the defaults on first read if
    /// nothing was installed.
    pub fn global() -> &'static RbacPolicy {
        POLICY.get_or_init(RbacPolicy::default)
    }
}
