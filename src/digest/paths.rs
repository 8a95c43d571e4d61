use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DigestPaths {
    pub home: PathBuf,
    pub buffer_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl DigestPaths {
    pub fn under(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            buffer_dir: home.join("buffer"),
            logs_dir: home.join("logs"),
            home,
        }
    }

    pub fn audit_log(&self) -> PathBuf {
        self.logs_dir.join("audit.log")
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

/// `DIGEST_HOME` wins; otherwise `~/.chat-digest`. The buffer location may be
/// moved independently with `DIGEST_BUFFER_PATH` (see config).
pub fn resolve_paths() -> Result<DigestPaths> {
    let home = match env::var("DIGEST_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".chat-digest"),
    };
    let mut paths = DigestPaths::under(home);
    paths.logs_dir = env_or_default_path("DIGEST_LOGS_DIR", paths.logs_dir);
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::DigestPaths;
    use std::path::PathBuf;

    #[test]
    fn under_derives_buffer_and_logs() {
        let paths = DigestPaths::under("/srv/digest");
        assert_eq!(paths.buffer_dir, PathBuf::from("/srv/digest/buffer"));
        assert_eq!(paths.audit_log(), PathBuf::from("/srv/digest/logs/audit.log"));
    }
}
