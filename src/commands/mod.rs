pub mod daemon;
pub mod ingest;
pub mod purge;
pub mod run;
pub mod stats;
pub mod status;

use crate::digest::buffer::RetentionBuffer;
use crate::digest::config::{DigestConfig, load_config};
use crate::digest::paths::{DigestPaths, resolve_paths};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
            data: None,
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn attach(&mut self, data: impl Serialize) -> Result<()> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(())
    }
}

/// Paths, validated configuration and the buffer they point at.
pub struct Workspace {
    pub paths: DigestPaths,
    pub config: DigestConfig,
    pub buffer: RetentionBuffer,
}

pub fn load_workspace() -> Result<Workspace> {
    let paths = resolve_paths()?;
    let config = load_config()?;
    let buffer = RetentionBuffer::new(config.buffer_root(&paths));
    Ok(Workspace {
        paths,
        config,
        buffer,
    })
}
