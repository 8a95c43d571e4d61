use crate::digest::paths::DigestPaths;
use crate::digest::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    pub message: String,
}

/// Append-only JSONL sink for job phase outcomes.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(paths: &DigestPaths) -> Self {
        Self {
            path: paths.audit_log(),
        }
    }

    pub fn append(&self, phase: &str, status: &str, message: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let event = AuditEvent {
            at_epoch_secs: now_epoch_secs()?,
            phase: phase.to_string(),
            status: status.to_string(),
            message: message.to_string(),
        };

        let line = format!("{}\n", serde_json::to_string(&event)?);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Audit failures never abort the work being audited.
    pub fn record(&self, phase: &str, status: &str, message: &str) {
        if let Err(err) = self.append(phase, status, message) {
            tracing::warn!(phase, status, error = %err, "failed to write audit event");
        }
    }
}
