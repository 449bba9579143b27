//! Out-of-band backup of the client identity and its two dates.
//!
//! The backup lives outside local state so the identity survives a lost or
//! wiped pref file. Loads are synchronous; stores are fire-and-forget and
//! report failures only through diagnostics.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::errors::{MsmError, Result};
use crate::logger::jsonl::{EventLog, EventType, LogEntry, log_event};
use crate::prefs::local_state::write_atomic;

/// Backup record for the durable client identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    pub client_id: String,
    /// Unix seconds; 0 when unknown.
    pub installation_date: i64,
    /// Unix seconds; 0 when unknown.
    pub reporting_enabled_date: i64,
}

/// Storage strategy for [`ClientInfo`] backups.
pub trait ClientInfoBackup: Send + Sync {
    /// Persist `info`. An empty `client_id` clears the backup.
    fn store(&self, info: &ClientInfo);
    /// Current backup, if one exists.
    fn load(&self) -> Option<ClientInfo>;
}

/// Backup disabled: nothing is stored, nothing is found.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopClientInfoBackup;

impl ClientInfoBackup for NoopClientInfoBackup {
    fn store(&self, _info: &ClientInfo) {}

    fn load(&self) -> Option<ClientInfo> {
        None
    }
}

/// Backup kept as a JSON file next to (but independent of) local state.
#[derive(Clone)]
pub struct FileClientInfoBackup {
    path: PathBuf,
    event_log: Option<EventLog>,
}

impl std::fmt::Debug for FileClientInfoBackup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileClientInfoBackup")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileClientInfoBackup {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            event_log: None,
        }
    }

    /// Report failed stores to `event_log` as well as stderr.
    #[must_use]
    pub fn with_event_log(mut self, event_log: Option<EventLog>) -> Self {
        self.event_log = event_log;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fallible store used by [`ClientInfoBackup::store`].
    pub fn try_store(&self, info: &ClientInfo) -> Result<()> {
        if info.client_id.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(error) => Err(MsmError::io(&self.path, error)),
            };
        }
        let data = serde_json::to_vec_pretty(info)?;
        write_atomic(&self.path, &data).map_err(|error| MsmError::ClientInfoBackup {
            details: format!("{}: {error}", self.path.display()),
        })
    }

    /// Fallible load used by [`ClientInfoBackup::load`].
    pub fn try_load(&self) -> Result<Option<ClientInfo>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(MsmError::io(&self.path, error)),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }
}

impl ClientInfoBackup for FileClientInfoBackup {
    fn store(&self, info: &ClientInfo) {
        if let Err(error) = self.try_store(info) {
            eprintln!("[MSM-BACKUP] store failed: {error}");
            log_event(
                self.event_log.as_ref(),
                &LogEntry::from_error(EventType::BackupStoreFailed, &error),
            );
        }
    }

    fn load(&self) -> Option<ClientInfo> {
        match self.try_load() {
            Ok(info) => info,
            Err(error) => {
                eprintln!("[MSM-BACKUP] ignoring unreadable backup: {error}");
                None
            }
        }
    }
}

/// Volatile backup that remembers every store, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryClientInfoBackup {
    current: Mutex<Option<ClientInfo>>,
    stored: Mutex<Vec<ClientInfo>>,
}

impl InMemoryClientInfoBackup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the backup without counting it as a store.
    #[must_use]
    pub fn with_backup(info: ClientInfo) -> Self {
        Self {
            current: Mutex::new(Some(info)),
            stored: Mutex::new(Vec::new()),
        }
    }

    /// Every record passed to `store`, oldest first.
    #[must_use]
    pub fn stored(&self) -> Vec<ClientInfo> {
        self.stored.lock().clone()
    }

    #[must_use]
    pub fn store_count(&self) -> usize {
        self.stored.lock().len()
    }
}

impl ClientInfoBackup for InMemoryClientInfoBackup {
    fn store(&self, info: &ClientInfo) {
        self.stored.lock().push(info.clone());
        *self.current.lock() = if info.client_id.is_empty() {
            None
        } else {
            Some(info.clone())
        };
    }

    fn load(&self) -> Option<ClientInfo> {
        self.current.lock().clone()
    }
}

/// Whether `id` parses as a UUID (any case, hyphenated or simple form).
#[must_use]
pub fn is_valid_client_id(id: &str) -> bool {
    Uuid::parse_str(id).is_ok()
}

/// Fresh random client id in lowercase hyphenated form.
#[must_use]
pub fn generate_client_id() -> String {
    Uuid::new_v4().to_string()
}
