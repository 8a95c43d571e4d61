//! Durable, day-partitioned message buffer.
//!
//! Layout: `<root>/<conversation>/<YYYY-MM-DD>.json`, each file a JSON array
//! of [`Message`] in append order, dated by the UTC day of the message
//! timestamp. Every mutation is a whole-file read-modify-write done under an
//! exclusive advisory lock on `<root>/<conversation>/.lock`, and the new
//! contents land through a temp file + rename so a bucket is never half
//! written.

use crate::digest::message::Message;
use crate::digest::zone::utc_bucket;
use crate::error::DigestError;
use chrono::NaiveDate;
use fs2::FileExt;
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const LOCK_FILE: &str = ".lock";
const BUCKET_EXT: &str = "json";
const BUCKET_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearOutcome {
    pub buckets_trimmed: usize,
    pub buckets_deleted: usize,
    pub messages_removed: usize,
}

impl ClearOutcome {
    pub fn merge(&mut self, other: ClearOutcome) {
        self.buckets_trimmed += other.buckets_trimmed;
        self.buckets_deleted += other.buckets_deleted;
        self.messages_removed += other.messages_removed;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub date: NaiveDate,
    pub messages: usize,
}

#[derive(Debug, Clone)]
pub struct RetentionBuffer {
    root: PathBuf,
}

impl RetentionBuffer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn append(&self, message: &Message) -> Result<(), DigestError> {
        let dir = self.conversation_dir(&message.conversation_id)?;
        fs::create_dir_all(&dir).map_err(|err| DigestError::storage(&dir, err))?;
        let _lock = lock_conversation(&dir)?;

        let path = bucket_path(&dir, utc_bucket(message.timestamp));
        let mut existing = read_bucket(&path)?;
        existing.push(message.clone());
        write_bucket(&path, &existing)
    }

    /// Conversations with at least one bucket file on disk.
    pub fn list_conversations(&self) -> Result<BTreeSet<String>, DigestError> {
        let mut out = BTreeSet::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(out),
            Err(err) => return Err(DigestError::storage(&self.root, err)),
        };

        for entry in entries {
            let entry = entry.map_err(|err| DigestError::storage(&self.root, err))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if bucket_dates(&path)?.is_empty() {
                continue;
            }
            out.insert(name.to_string());
        }
        Ok(out)
    }

    /// Every stored message with `timestamp >= since_ms`, ascending by
    /// timestamp. Only buckets dated on or after the UTC day of `since_ms` are
    /// opened.
    pub fn load_window(
        &self,
        conversation_id: &str,
        since_ms: i64,
    ) -> Result<Vec<Message>, DigestError> {
        let dir = self.conversation_dir(conversation_id)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let _lock = lock_conversation(&dir)?;

        let since_day = utc_bucket(since_ms);
        let mut messages = Vec::new();
        for date in bucket_dates(&dir)? {
            if date < since_day {
                continue;
            }
            let stored = match read_bucket(&bucket_path(&dir, date)) {
                Ok(stored) => stored,
                Err(err) => {
                    warn!(
                        conversation = conversation_id,
                        bucket = %date,
                        error = %err,
                        "skipping unreadable buffer bucket"
                    );
                    continue;
                }
            };
            messages.extend(stored.into_iter().filter(|m| m.timestamp >= since_ms));
        }
        // Stable sort keeps append order for equal timestamps.
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    /// Drop every message older than `cutoff_ms`. Buckets dated before the
    /// cutoff day are deleted outright; the cutoff-day bucket is trimmed and
    /// deleted if nothing survives.
    pub fn clear_older_than(
        &self,
        conversation_id: &str,
        cutoff_ms: i64,
    ) -> Result<ClearOutcome, DigestError> {
        self.retain(conversation_id, utc_bucket(cutoff_ms), |m| {
            m.timestamp >= cutoff_ms
        })
    }

    /// Drop exactly the messages named in `message_ids`, looking only at
    /// buckets dated up to the UTC day of `through_ms`. Messages appended
    /// after the ids were collected survive even when their timestamps fall
    /// in the same range.
    pub fn remove_messages(
        &self,
        conversation_id: &str,
        message_ids: &HashSet<String>,
        through_ms: i64,
    ) -> Result<ClearOutcome, DigestError> {
        if message_ids.is_empty() {
            return Ok(ClearOutcome::default());
        }
        self.retain(conversation_id, utc_bucket(through_ms), |m| {
            !message_ids.contains(&m.message_id)
        })
    }

    /// Rewrites every bucket dated on or before `last_day` to the messages
    /// `keep` accepts, all under one conversation lock.
    fn retain<F>(
        &self,
        conversation_id: &str,
        last_day: NaiveDate,
        keep: F,
    ) -> Result<ClearOutcome, DigestError>
    where
        F: Fn(&Message) -> bool,
    {
        let dir = self.conversation_dir(conversation_id)?;
        let mut outcome = ClearOutcome::default();
        if !dir.is_dir() {
            return Ok(outcome);
        }
        let _lock = lock_conversation(&dir)?;

        for date in bucket_dates(&dir)? {
            if date > last_day {
                continue;
            }
            let path = bucket_path(&dir, date);
            let messages = read_bucket(&path)?;
            let before = messages.len();
            let kept = messages.into_iter().filter(|m| keep(m)).collect::<Vec<_>>();
            outcome.messages_removed += before - kept.len();

            if kept.is_empty() {
                remove_file_if_present(&path)?;
                outcome.buckets_deleted += 1;
            } else if kept.len() < before {
                write_bucket(&path, &kept)?;
                outcome.buckets_trimmed += 1;
                info!(
                    conversation = conversation_id,
                    bucket = %date,
                    remaining = kept.len(),
                    "trimmed buffer bucket"
                );
            }
        }
        Ok(outcome)
    }

    /// Returns whether anything was removed.
    pub fn remove_conversation(&self, conversation_id: &str) -> Result<bool, DigestError> {
        let dir = self.conversation_dir(conversation_id)?;
        if !dir.exists() {
            return Ok(false);
        }
        let lock = lock_conversation(&dir)?;
        fs::remove_dir_all(&dir).map_err(|err| DigestError::storage(&dir, err))?;
        drop(lock);
        info!(conversation = conversation_id, "removed conversation buffer");
        Ok(true)
    }

    pub fn bucket_stats(&self, conversation_id: &str) -> Result<Vec<BucketInfo>, DigestError> {
        let dir = self.conversation_dir(conversation_id)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let _lock = lock_conversation(&dir)?;
        bucket_dates(&dir)?
            .into_iter()
            .map(|date| -> Result<BucketInfo, DigestError> {
                Ok(BucketInfo {
                    date,
                    messages: read_bucket(&bucket_path(&dir, date))?.len(),
                })
            })
            .collect()
    }

    fn conversation_dir(&self, conversation_id: &str) -> Result<PathBuf, DigestError> {
        if !is_storable_conversation_id(conversation_id) {
            return Err(DigestError::storage(
                self.root.join(conversation_id),
                io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("conversation id `{conversation_id}` is not usable as a directory name"),
                ),
            ));
        }
        Ok(self.root.join(conversation_id))
    }
}

/// Whether `conversation_id` can name a conversation directory under the
/// buffer root: non-empty, no surrounding whitespace, no leading dot and no
/// path separators.
pub fn is_storable_conversation_id(conversation_id: &str) -> bool {
    !conversation_id.is_empty()
        && conversation_id.trim() == conversation_id
        && !conversation_id.starts_with('.')
        && !conversation_id.contains(['/', '\\', '\0'])
}

fn bucket_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}.{BUCKET_EXT}", date.format(BUCKET_DATE_FORMAT)))
}

/// Bucket dates present in a conversation directory, ascending.
fn bucket_dates(dir: &Path) -> Result<Vec<NaiveDate>, DigestError> {
    let entries = fs::read_dir(dir).map_err(|err| DigestError::storage(dir, err))?;
    let mut dates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| DigestError::storage(dir, err))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(BUCKET_EXT) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Ok(date) = NaiveDate::parse_from_str(stem, BUCKET_DATE_FORMAT) {
            dates.push(date);
        }
    }
    dates.sort();
    Ok(dates)
}

fn lock_conversation(dir: &Path) -> Result<File, DigestError> {
    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|err| DigestError::storage(&path, err))?;
    file.lock_exclusive()
        .map_err(|err| DigestError::storage(&path, err))?;
    Ok(file)
}

/// A missing bucket reads as empty and any other read failure is a storage
/// error. A bucket that cannot be parsed is deleted so the next append
/// starts clean.
fn read_bucket(path: &Path) -> Result<Vec<Message>, DigestError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(DigestError::storage(path, err)),
    };

    match serde_json::from_slice::<Vec<Message>>(&raw) {
        Ok(messages) => Ok(messages),
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "failed to deserialize buffer bucket, removing it"
            );
            if let Err(rm_err) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %rm_err, "could not remove corrupt bucket");
            }
            Ok(Vec::new())
        }
    }
}

fn write_bucket(path: &Path, messages: &[Message]) -> Result<(), DigestError> {
    let data = serde_json::to_string_pretty(messages)
        .map_err(|err| DigestError::storage(path, io::Error::other(err)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, format!("{data}\n")).map_err(|err| DigestError::storage(&tmp, err))?;
    fs::rename(&tmp, path).map_err(|err| DigestError::storage(path, err))
}

fn remove_file_if_present(path: &Path) -> Result<(), DigestError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(DigestError::storage(path, err)),
    }
}
