//! Pref store abstraction plus file-backed and in-memory implementations.
//!
//! Values are JSON scalars keyed by dotted names (see [`crate::prefs::names`]).
//! Every read that fails, is missing, or has the wrong type is reported as
//! "absent" so callers fall through to their next resolution step instead of
//! aborting. Writes land in an in-memory cache and reach disk on `commit()`.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use crate::core::errors::{MsmError, Result};

/// Named-key persistent store ("local state").
///
/// Implementations are internally synchronized so a single store can be
/// shared between the state manager, the clean-exit beacon, and the
/// telemetry façade.
pub trait PrefStore: Send + Sync {
    /// Effective value: the user value if set, else the registered default.
    fn get(&self, name: &str) -> Option<Value>;
    /// Whether a user value (not just a default) exists for `name`.
    fn has_user_value(&self, name: &str) -> bool;
    fn set(&self, name: &str, value: Value);
    /// Remove the user value; the registered default (if any) shows through again.
    fn clear(&self, name: &str);
    /// Register the value returned by `get` when no user value exists.
    fn register_default(&self, name: &str, value: Value);
    /// Persist pending writes before returning.
    fn commit(&self) -> Result<()>;

    fn get_string(&self, name: &str) -> String {
        self.get(name)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    fn get_i64_opt(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.as_i64())
    }

    fn get_i64(&self, name: &str) -> i64 {
        self.get_i64_opt(name).unwrap_or(0)
    }

    fn get_bool(&self, name: &str) -> bool {
        self.get(name).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    fn set_string(&self, name: &str, value: &str) {
        self.set(name, Value::from(value));
    }

    fn set_i64(&self, name: &str, value: i64) {
        self.set(name, Value::from(value));
    }

    fn set_bool(&self, name: &str, value: bool) {
        self.set(name, Value::from(value));
    }
}

// ──────────────────── shared maps ────────────────────

#[derive(Debug, Default)]
struct PrefMaps {
    user: BTreeMap<String, Value>,
    defaults: BTreeMap<String, Value>,
}

impl PrefMaps {
    fn get(&self, name: &str) -> Option<Value> {
        self.user
            .get(name)
            .or_else(|| self.defaults.get(name))
            .cloned()
    }
}

// ──────────────────── in-memory store ────────────────────

/// Volatile store for tests and embedders that persist state elsewhere.
#[derive(Debug, Default)]
pub struct InMemoryPrefStore {
    maps: RwLock<PrefMaps>,
    commits: AtomicU64,
}

impl InMemoryPrefStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `commit()` calls observed.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Drop every user value, simulating lost local state.
    pub fn clear_all(&self) {
        self.maps.write().user.clear();
    }
}

impl PrefStore for InMemoryPrefStore {
    fn get(&self, name: &str) -> Option<Value> {
        self.maps.read().get(name)
    }

    fn has_user_value(&self, name: &str) -> bool {
        self.maps.read().user.contains_key(name)
    }

    fn set(&self, name: &str, value: Value) {
        self.maps.write().user.insert(name.to_string(), value);
    }

    fn clear(&self, name: &str) {
        self.maps.write().user.remove(name);
    }

    fn register_default(&self, name: &str, value: Value) {
        self.maps.write().defaults.insert(name.to_string(), value);
    }

    fn commit(&self) -> Result<()> {
        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ──────────────────── JSON file store ────────────────────

/// Local state persisted as a single JSON object file.
///
/// The file is read once at open. A missing file is an empty store; an
/// unreadable or corrupt file is logged and treated as empty. `commit()`
/// writes atomically (temp file + rename). Dropping the store commits any
/// pending writes on a best-effort basis.
#[derive(Debug)]
pub struct JsonPrefStore {
    path: PathBuf,
    maps: RwLock<PrefMaps>,
    dirty: AtomicBool,
    load_error: Option<String>,
}

impl JsonPrefStore {
    /// Open (or lazily create) the store at `path`.
    #[must_use]
    pub fn open(path: PathBuf) -> Self {
        let (user, load_error) = match read_user_values(&path) {
            Ok(values) => (values, None),
            Err(error) => {
                eprintln!(
                    "[MSM-PREFS] ignoring unreadable local state {}: {error}",
                    path.display()
                );
                (BTreeMap::new(), Some(error.to_string()))
            }
        };
        Self {
            path,
            maps: RwLock::new(PrefMaps {
                user,
                defaults: BTreeMap::new(),
            }),
            dirty: AtomicBool::new(false),
            load_error,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Why the on-disk state was discarded at open, if it was.
    #[must_use]
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Whether writes are waiting for `commit()`.
    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

impl PrefStore for JsonPrefStore {
    fn get(&self, name: &str) -> Option<Value> {
        self.maps.read().get(name)
    }

    fn has_user_value(&self, name: &str) -> bool {
        self.maps.read().user.contains_key(name)
    }

    fn set(&self, name: &str, value: Value) {
        let changed = {
            let mut maps = self.maps.write();
            maps.user.insert(name.to_string(), value.clone()) != Some(value)
        };
        if changed {
            self.mark_dirty();
        }
    }

    fn clear(&self, name: &str) {
        if self.maps.write().user.remove(name).is_some() {
            self.mark_dirty();
        }
    }

    fn register_default(&self, name: &str, value: Value) {
        self.maps.write().defaults.insert(name.to_string(), value);
    }

    fn commit(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let data = {
            let maps = self.maps.read();
            serde_json::to_vec_pretty(&maps.user)?
        };
        if let Err(error) = write_atomic(&self.path, &data) {
            self.mark_dirty();
            return Err(MsmError::PrefStore {
                path: self.path.clone(),
                details: error.to_string(),
            });
        }
        Ok(())
    }
}

impl Drop for JsonPrefStore {
    fn drop(&mut self) {
        if let Err(error) = self.commit() {
            eprintln!("[MSM-PREFS] final commit failed: {error}");
        }
    }
}

fn read_user_values(path: &Path) -> io::Result<BTreeMap<String, Value>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(error) => return Err(error),
    };
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&raw).map_err(|error| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("failed to parse local state: {error}"),
        )
    })
}

/// Write `data` to `path` via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)
}
