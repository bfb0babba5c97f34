use crate::{OpsCrewError, OpsCrewResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Opaque agent identity. Never a reference to a live agent object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Create an identity from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Specialization of each agent in the crew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Cloud infrastructure, scaling and cost.
    Infrastructure,
    /// Security review, compliance and threat analysis.
    Security,
    /// Metrics, logs, alerting and observability.
    Monitoring,
    /// CI/CD pipelines, releases and rollbacks.
    Deployment,
}

impl AgentRole {
    /// Every role, in the crew's declared order.
    pub const ALL: [AgentRole; 4] = [
        AgentRole::Infrastructure,
        AgentRole::Security,
        AgentRole::Monitoring,
        AgentRole::Deployment,
    ];
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Infrastructure => write!(f, "infrastructure"),
            AgentRole::Security => write!(f, "security"),
            AgentRole::Monitoring => write!(f, "monitoring"),
            AgentRole::Deployment => write!(f, "deployment"),
        }
    }
}

impl FromStr for AgentRole {
    type Err = OpsCrewError;

    fn from_str(s: &str) -> OpsCrewResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "infrastructure" => Ok(AgentRole::Infrastructure),
            "security" => Ok(AgentRole::Security),
            "monitoring" => Ok(AgentRole::Monitoring),
            "deployment" => Ok(AgentRole::Deployment),
            other => Err(OpsCrewError::Validation(format!("unknown agent role '{other}'"))),
        }
    }
}

/// The set of action names an agent may perform.
///
/// An entry whose last segment is `*` (e.g. `aws:logs:*`) grants every action
/// sharing its prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    actions: BTreeSet<String>,
}

impl PermissionSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `action`. A trailing `*` segment grants the whole prefix.
    pub fn grant(&mut self, action: impl Into<String>) {
        self.actions.insert(action.into());
    }

    /// Remove an exact entry.
    pub fn revoke(&mut self, action: &str) {
        self.actions.remove(action);
    }

    /// Whether `action` is granted, either literally or by a wildcard entry.
    pub fn allows(&self, action: &str) -> bool {
        self.actions.iter().any(|granted| match granted.strip_suffix('*') {
            Some(prefix) => action.starts_with(prefix),
            None => granted == action,
        })
    }

    /// The requested actions that this set does not allow, in request order.
    pub fn missing<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        requested
            .iter()
            .filter(|a| !self.allows(a))
            .map(String::as_str)
            .collect()
    }

    /// Whether nothing is granted.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of granted entries.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Granted entries in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            actions: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// A specialized executor. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique registry key.
    pub id: AgentId,
    /// RBAC role whose policy seeds the permissions.
    pub role: AgentRole,
    /// What this agent is for, as presented to the execution backend.
    #[serde(default)]
    pub goal: String,
    /// Specialization tags used for routing.
    pub capabilities: BTreeSet<String>,
    /// Actions this agent may perform.
    pub permissions: PermissionSet,
}

impl Agent {
    /// An agent with no goal, capabilities or permissions.
    pub fn new(id: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: AgentId::new(id),
            role,
            goal: String::new(),
            capabilities: BTreeSet::new(),
            permissions: PermissionSet::new(),
        }
    }

    /// Set the goal.
    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    /// Add capability tags.
    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(caps.into_iter().map(Into::into));
        self
    }

    /// Replace the permission set.
    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }

    /// Whether this agent holds `tag`.
    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.contains(tag)
    }

    /// Whether this agent holds every tag in `required`.
    pub fn has_all(&self, required: &[String]) -> bool {
        required.iter().all(|tag| self.capabilities.contains(tag))
    }
}
