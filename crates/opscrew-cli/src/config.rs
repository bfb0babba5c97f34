use opscrew_orchestrator::OrchestratorConfig;
use opscrew_security::{GatePolicy, RbacPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Contents of `opscrew.toml`. Every section is optional.
#[derive(Debug, Deserialize)]
pub struct OpsCrewConfig {
    /// `[orchestrator]`: worker pool, timeouts, cache and retries.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// `[security]`: gate policy and auditing.
    #[serde(default)]
    pub security: SecurityConfig,
    /// `[rbac]`: role to allowed actions.
    #[serde(default)]
    pub rbac: RbacPolicy,
    /// Where the audit log is written.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// The `[security]` section.
#[derive(Debug, Default, Deserialize)]
pub struct SecurityConfig {
    /// Denylist and description limits.
    #[serde(flatten)]
    pub gate: GatePolicy,
    /// Record gate decisions under `<data_dir>/audit`.
    #[serde(default)]
    pub audit: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for OpsCrewConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            security: SecurityConfig::default(),
            rbac: RbacPolicy::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl OpsCrewConfig {
    /// Load `path`, falling back to the defaults when the file does not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read config file '{}': {e}",
                    path.display()
                ))
            }
        };
        Self::parse(&text)
    }

    /// Parse TOML text.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
