use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("storage failure at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("completion model failure: {0}")]
    Model(String),
    #[error("dispatch failed: {0}")]
    Dispatch(String),
    #[error("a summary run is already in progress (lock held by pid {0})")]
    RunInProgress(String),
}

impl DigestError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Stable short code used in audit lines and command reports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "E001_CONFIG",
            Self::Storage { .. } => "E002_STORAGE",
            Self::Model(_) => "E003_MODEL",
            Self::Dispatch(_) => "E004_DISPATCH",
            Self::RunInProgress(_) => "E005_LOCKED",
        }
    }
}

/// Finds the digest error class behind an `anyhow` chain, if any.
pub fn classify(err: &anyhow::Error) -> &'static str {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<DigestError>())
        .map(DigestError::code)
        .unwrap_or("E000_UNKNOWN")
}
