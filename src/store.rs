//! Shared key-value store that live viewers read published turns from.
//!
//! Every published turn is a record under a fresh unique key with a fixed
//! expiry. Each participant's writing flag lives under `writing:<participant>`
//! without expiry and is overwritten in place.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::turn::{TurnRecord, WritingState};
use crate::{mlog_debug, mlog_warn, Error, Result};

pub trait MessageStore: Send + Sync {
    /// Write a turn record under `key`, expiring after `ttl`.
    fn publish(&self, key: &str, record: &TurnRecord, ttl: Duration) -> Result<()>;

    /// Overwrite a participant's writing flag.
    fn set_writing(&self, state: &WritingState) -> Result<()>;
}

/// Everything a store observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Published { key: String, record: TurnRecord },
    Writing(WritingState),
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: HashMap<String, (TurnRecord, Instant)>,
    writing: HashMap<String, WritingState>,
    history: Vec<StoreEvent>,
}

/// In-process store, used when no store directory is configured.
///
/// Only unexpired records and the current writing flags are held. The
/// operation log behind [`MemoryStore::history`] is kept only by stores built
/// with [`MemoryStore::recording`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    keep_history: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that also logs every operation, for inspection in tests.
    pub fn recording() -> Self {
        Self {
            keep_history: true,
            ..Self::default()
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))
    }

    /// Unexpired record for `key`.
    pub fn record(&self, key: &str) -> Option<TurnRecord> {
        let inner = self.lock().ok()?;
        inner
            .records
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(record, _)| record.clone())
    }

    pub fn writing(&self, participant: &str) -> Option<WritingState> {
        self.lock().ok()?.writing.get(participant).cloned()
    }

    /// Records currently held, expired ones purged on the last publish.
    pub fn len(&self) -> usize {
        self.lock().map(|i| i.records.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every operation in the order it happened. Empty unless recording.
    pub fn history(&self) -> Vec<StoreEvent> {
        self.lock().map(|i| i.history.clone()).unwrap_or_default()
    }

    /// Published records in publication order, expired ones included.
    pub fn published(&self) -> Vec<TurnRecord> {
        self.history()
            .into_iter()
            .filter_map(|event| match event {
                StoreEvent::Published { record, .. } => Some(record),
                StoreEvent::Writing(_) => None,
            })
            .collect()
    }

    /// Writing flags set for `participant`, in order.
    pub fn writing_history(&self, participant: &str) -> Vec<u8> {
        self.history()
            .into_iter()
            .filter_map(|event| match event {
                StoreEvent::Writing(state) if state.writer == participant => Some(state.state),
                _ => None,
            })
            .collect()
    }
}

impl MessageStore for MemoryStore {
    fn publish(&self, key: &str, record: &TurnRecord, ttl: Duration) -> Result<()> {
        let mut inner = self.lock()?;
        let now = Instant::now();
        inner.records.retain(|_, (_, expires)| *expires > now);
        inner
            .records
            .insert(key.to_string(), (record.clone(), now + ttl));
        if self.keep_history {
            inner.history.push(StoreEvent::Published {
                key: key.to_string(),
                record: record.clone(),
            });
        }
        Ok(())
    }

    fn set_writing(&self, state: &WritingState) -> Result<()> {
        let mut inner = self.lock()?;
        inner.writing.insert(state.writer.clone(), state.clone());
        if self.keep_history {
            inner.history.push(StoreEvent::Writing(state.clone()));
        }
        Ok(())
    }
}

/// On-disk form of a published record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: String,
    pub published_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: TurnRecord,
}

/// Directory-backed store a separate viewer process can poll.
///
/// Layout: `messages/<key>.json` and `writing/<participant>.json`. Expired
/// message files are purged on every publish.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root.join("messages"))?;
        fs::create_dir_all(root.join("writing"))?;
        mlog_debug!("FileStore::open root={}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn message_path(&self, key: &str) -> PathBuf {
        self.root.join("messages").join(format!("{}.json", key))
    }

    fn writing_path(&self, participant: &str) -> PathBuf {
        self.root.join("writing").join(format!("{}.json", participant))
    }

    /// Write through a temporary file so readers never see a partial record.
    fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Remove expired message files. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for entry in fs::read_dir(self.root.join("messages"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let expired = match fs::read_to_string(&path)
                .ok()
                .and_then(|s| serde_json::from_str::<StoredRecord>(&s).ok())
            {
                Some(stored) => stored.expires_at <= now,
                None => {
                    mlog_warn!("FileStore: unreadable record {}", path.display());
                    false
                }
            };
            if expired {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Unexpired records, oldest first.
    pub fn records(&self) -> Result<Vec<StoredRecord>> {
        let now = Utc::now();
        let mut records = Vec::new();
        for entry in fs::read_dir(self.root.join("messages"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stored: StoredRecord = serde_json::from_str(&fs::read_to_string(&path)?)?;
            if stored.expires_at > now {
                records.push(stored);
            }
        }
        records.sort_by_key(|r| r.published_at);
        Ok(records)
    }

    pub fn writing(&self, participant: &str) -> Result<Option<WritingState>> {
        let path = self.writing_path(participant);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&fs::read_to_string(path)?)?))
    }
}

impl MessageStore for FileStore {
    fn publish(&self, key: &str, record: &TurnRecord, ttl: Duration) -> Result<()> {
        let removed = self.purge_expired()?;
        if removed > 0 {
            mlog_debug!("FileStore: purged {} expired records", removed);
        }

        let published_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::Store(format!("invalid expiry: {}", e)))?;
        let stored = StoredRecord {
            key: key.to_string(),
            published_at,
            expires_at: published_at + ttl,
            record: record.clone(),
        };
        Self::write_atomic(&self.message_path(key), &serde_json::to_vec(&stored)?)
    }

    fn set_writing(&self, state: &WritingState) -> Result<()> {
        Self::write_atomic(
            &self.writing_path(&state.writer),
            &serde_json::to_vec(state)?,
        )
    }
}
