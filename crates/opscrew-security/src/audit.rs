use chrono::{DateTime, Utc};
use opscrew_core::AgentId;
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// One line of `audit.jsonl`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    /// The task the decision is about.
    pub task_id: Uuid,
    /// The agent involved, if any.
    pub agent: Option<AgentId>,
    /// What was decided, e.g. `authorize`.
    pub action: String,
    /// Decision-specific detail.
    pub details: serde_json::Value,
    /// The decision.
    pub outcome: AuditOutcome,
}

/// Result of an audited decision.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// The action may proceed.
    Allowed,
    /// The action was refused.
    Denied,
    /// The decision could not be made.
    Error,
}

/// Append-only audit log of security decisions.
///
/// Entries are handed to a background writer over an unbounded channel, so
/// logging never blocks the caller.
pub struct AuditLog {
    tx: mpsc::UnboundedSender<AuditEntry>,
    writer: JoinHandle<()>,
}

impl AuditLog {
    /// Create a new AuditLog writing `audit.jsonl` under `log_dir`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(log_dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEntry>();

        let writer = tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
                warn!(dir = %log_dir.display(), error = %e, "audit: cannot create log dir");
                return;
            }
            let log_file = log_dir.join("audit.jsonl");
            let mut file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .await
            {
                Ok(f) => f,
                Err(e) => {
                    warn!(file = %log_file.display(), error = %e, "audit: cannot open log file");
                    return;
                }
            };

            while let Some(entry) = rx.recv().await {
                let Ok(mut line) = serde_json::to_string(&entry) else {
                    continue;
                };
                line.push('\n');
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!(error = %e, "audit: write failed");
                    continue;
                }
                let _ = file.flush().await;
            }
        });

        Self { tx, writer }
    }

    /// Stop accepting entries and wait until everything sent so far is on
    /// disk.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.writer.await {
            warn!(error = %e, "audit: writer task failed");
        }
    }

    /// Trace `entry` and queue it for the writer.
    pub fn log(&self, entry: AuditEntry) {
        info!(
            task_id = %entry.task_id,
            agent = entry.agent.as_ref().map(AgentId::as_str).unwrap_or("-"),
            action = %entry.action,
            outcome = ?entry.outcome,
            "audit"
        );
        let _ = self.tx.send(entry);
    }

    /// Record a decision made now.
    pub fn log_action(
        &self,
        task_id: Uuid,
        agent: Option<AgentId>,
        action: impl Into<String>,
        details: serde_json::Value,
        outcome: AuditOutcome,
    ) {
        self.log(AuditEntry {
            timestamp: Utc::now(),
            task_id,
            agent,
            action: action.into(),
            details,
            outcome,
        });
    }
}
