use crate::error::DigestError;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;
use tracing::warn;

const SEND_RETRIES: usize = 1;

/// Outbound half of the chat transport.
pub trait Transport {
    fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), DigestError>;
}

/// Hands messages to an external bridge executable:
/// `<bin> send --chat <conversation> --text <text>`.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    bin: PathBuf,
    retries: usize,
}

fn ensure_executable_path(path: &Path) -> Result<()> {
    let meta = fs::metadata(path)
        .with_context(|| format!("bridge binary path does not exist: {}", path.display()))?;
    if !meta.is_file() {
        anyhow::bail!("bridge binary path is not a file: {}", path.display());
    }
    Ok(())
}

impl CommandTransport {
    pub fn new(bin: impl Into<PathBuf>) -> Result<Self, DigestError> {
        let bin = bin.into();
        ensure_executable_path(&bin)
            .map_err(|err| DigestError::Configuration(format!("{err:#}")))?;
        Ok(Self {
            bin,
            retries: SEND_RETRIES,
        })
    }

    fn run_bridge(&self, args: &[&str]) -> Result<Output> {
        Command::new(&self.bin)
            .args(args)
            .output()
            .with_context(|| format!("failed to run `{}`", self.bin.display()))
    }

    fn run_bridge_retry(&self, args: &[&str]) -> Result<Output> {
        let mut last_out: Option<Output> = None;

        for attempt in 0..=self.retries {
            let out = self.run_bridge(args)?;
            if out.status.success() {
                return Ok(out);
            }
            warn!(
                attempt = attempt + 1,
                status = %out.status,
                "bridge command failed"
            );
            last_out = Some(out);
            if attempt < self.retries {
                let delay_ms = 250 * (attempt + 1) as u64;
                thread::sleep(Duration::from_millis(delay_ms));
            }
        }

        let Some(out) = last_out else {
            anyhow::bail!("bridge command failed after retries without output");
        };
        anyhow::bail!(
            "bridge exited with {} after {} attempt(s): {}",
            out.status,
            self.retries + 1,
            String::from_utf8_lossy(&out.stderr).trim()
        )
    }
}

impl Transport for CommandTransport {
    fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), DigestError> {
        self.run_bridge_retry(&["send", "--chat", conversation_id, "--text", text])
            .map(|_| ())
            .map_err(|err| DigestError::Dispatch(format!("{err:#}")))
    }
}
