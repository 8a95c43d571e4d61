use crate::error::DigestError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const RUN_LOCK_FILE: &str = "summary-run.lock";

/// Holds the exclusive summary-run lock until dropped. Both the scheduler and
/// the manual trigger go through here, so at most one run touches the buffer
/// at a time, across processes as well as threads.
#[derive(Debug)]
pub struct RunGuard {
    path: PathBuf,
    _file: File,
}

impl RunGuard {
    pub fn try_acquire(logs_dir: &Path) -> Result<Self, DigestError> {
        fs::create_dir_all(logs_dir).map_err(|err| DigestError::storage(logs_dir, err))?;
        let path = logs_dir.join(RUN_LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| DigestError::storage(&path, err))?;

        if FileExt::try_lock_exclusive(&file).is_err() {
            let holder = fs::read_to_string(&path)
                .ok()
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(DigestError::RunInProgress(holder));
        }

        write_pid(&mut file).map_err(|err| DigestError::storage(&path, err))?;

        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_pid(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(std::process::id().to_string().as_bytes())?;
    file.flush()
}
