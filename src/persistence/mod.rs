//! Session Persistence Module
//!
//! Stores the session record (key, polling flag, last dataset, last aggregate)
//! so a restart resumes where the dashboard left off. The store is an
//! advisory cache: loads never fail and saves are best-effort.

use crate::types::SessionRecord;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Durable storage for the session record
pub trait SessionStore: Send + Sync {
    /// Restore the last saved record, or the empty record if none is usable
    fn load(&self) -> SessionRecord;

    /// Persist the record. Failures are logged, never returned.
    fn save(&self, record: &SessionRecord);
}

/// JSON file backed store
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn try_save(&self, record: &SessionRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(record)?;
        let tmp = self.tmp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> SessionRecord {
        if !self.path.exists() {
            info!(path = %self.path.display(), "💾 No session file found, starting fresh");
            return SessionRecord::empty();
        }

        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read session file, starting fresh");
                return SessionRecord::empty();
            }
        };

        match decode_record(&bytes) {
            Some(record) => {
                info!(
                    path = %self.path.display(),
                    key = ?record.key,
                    polling = record.polling,
                    strikes = record.dataset.len(),
                    modules = record.aggregate.len(),
                    "💾 Session restored"
                );
                record
            }
            None => {
                warn!(path = %self.path.display(), "Session file is malformed, discarding");
                SessionRecord::empty()
            }
        }
    }

    fn save(&self, record: &SessionRecord) {
        match self.try_save(record) {
            Ok(()) => debug!(path = %self.path.display(), "💾 Session saved"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to save session"),
        }
    }
}

/// In-process store holding the serialized record
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a record, as if saved by a previous run
    pub fn with_record(record: &SessionRecord) -> Self {
        let store = Self::new();
        store.save(record);
        store
    }

    /// Replace the stored bytes verbatim
    pub fn set_raw(&self, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut slot) = self.bytes.lock() {
            *slot = Some(bytes.into());
        }
    }

    /// The last saved record without going through `load`
    pub fn saved(&self) -> Option<SessionRecord> {
        let slot = self.bytes.lock().ok()?;
        slot.as_deref().and_then(decode_record)
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> SessionRecord {
        self.saved().unwrap_or_default()
    }

    fn save(&self, record: &SessionRecord) {
        match serde_json::to_vec(record) {
            Ok(bytes) => self.set_raw(bytes),
            Err(e) => warn!(error = %e, "Failed to serialize session"),
        }
    }
}

fn decode_record(bytes: &[u8]) -> Option<SessionRecord> {
    serde_json::from_slice(bytes).ok()
}
