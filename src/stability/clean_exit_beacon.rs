//! Clean-exit beacon: whether the previous session shut down cleanly, and
//! how many unclean sessions happened in a row.
//!
//! The flag lives in local state and is mirrored to a small beacon file in
//! the user data directory. When both exist the file wins, since it is
//! written synchronously on every update.

#![allow(missing_docs)]

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::{MsmError, Result};
use crate::logger::histograms::{HistogramRecorder, names};
use crate::prefs::local_state::{PrefStore, write_atomic};
use crate::prefs::names as prefs;

/// Default beacon file name inside the user data directory.
pub const DEFAULT_BEACON_FILE_NAME: &str = "Variations";

const MAX_SAMPLED_CRASH_STREAK: i64 = 100;

/// Release channel of the running build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Unknown,
    Canary,
    Dev,
    Beta,
    Stable,
}

impl Channel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Canary => "canary",
            Self::Dev => "dev",
            Self::Beta => "beta",
            Self::Stable => "stable",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = MsmError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "unknown" => Ok(Self::Unknown),
            "canary" => Ok(Self::Canary),
            "dev" => Ok(Self::Dev),
            "beta" => Ok(Self::Beta),
            "stable" => Ok(Self::Stable),
            other => Err(MsmError::InvalidConfig {
                details: format!("unknown channel {other:?}"),
            }),
        }
    }
}

/// Whether the session started with a visible UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupVisibility {
    #[default]
    Unknown,
    Background,
    Foreground,
}

impl StartupVisibility {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Background => "background",
            Self::Foreground => "foreground",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct BeaconFile {
    exited_cleanly: bool,
    crash_streak: i64,
}

/// Tracks and records the clean-shutdown flag.
pub struct CleanExitBeacon {
    local_state: Arc<dyn PrefStore>,
    beacon_file: Option<PathBuf>,
    channel: Channel,
    startup_visibility: StartupVisibility,
    histograms: Option<Arc<HistogramRecorder>>,
    initialized: bool,
    did_previous_session_exit_cleanly: bool,
}

impl fmt::Debug for CleanExitBeacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanExitBeacon")
            .field("beacon_file", &self.beacon_file)
            .field("channel", &self.channel)
            .field("initialized", &self.initialized)
            .field(
                "did_previous_session_exit_cleanly",
                &self.did_previous_session_exit_cleanly,
            )
            .finish_non_exhaustive()
    }
}

impl CleanExitBeacon {
    /// `beacon_file_name` is joined onto `user_data_dir`; without a user
    /// data dir only local state is used.
    #[must_use]
    pub fn new(
        local_state: Arc<dyn PrefStore>,
        user_data_dir: Option<PathBuf>,
        beacon_file_name: &str,
        channel: Channel,
        startup_visibility: StartupVisibility,
    ) -> Self {
        Self::register_prefs(local_state.as_ref());
        let file_name = if beacon_file_name.is_empty() {
            DEFAULT_BEACON_FILE_NAME
        } else {
            beacon_file_name
        };
        Self {
            local_state,
            beacon_file: user_data_dir.map(|dir| dir.join(file_name)),
            channel,
            startup_visibility,
            histograms: None,
            initialized: false,
            did_previous_session_exit_cleanly: true,
        }
    }

    #[must_use]
    pub fn with_histograms(mut self, histograms: Arc<HistogramRecorder>) -> Self {
        self.histograms = Some(histograms);
        self
    }

    pub fn register_prefs(local_state: &dyn PrefStore) {
        local_state.register_default(prefs::STABILITY_EXITED_CLEANLY, Value::from(true));
        local_state.register_default(prefs::VARIATIONS_CRASH_STREAK, Value::from(0));
    }

    /// Read the previous session's flag and bump the crash streak if it was
    /// unclean. Later calls are no-ops.
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        let from_file = self.read_beacon_file();
        self.did_previous_session_exit_cleanly = match from_file {
            Some(file) => file.exited_cleanly,
            None => self.local_state.get_bool(prefs::STABILITY_EXITED_CLEANLY),
        };

        let mut streak = from_file
            .map_or_else(
                || self.local_state.get_i64(prefs::VARIATIONS_CRASH_STREAK),
                |file| file.crash_streak,
            )
            .max(0);
        if !self.did_previous_session_exit_cleanly {
            streak = streak.saturating_add(1);
            self.local_state
                .set_i64(prefs::VARIATIONS_CRASH_STREAK, streak);
            eprintln!(
                "[MSM-BEACON] previous session did not exit cleanly (streak {streak}, visibility {})",
                self.startup_visibility.as_str()
            );
        }
        if let Some(histograms) = &self.histograms {
            histograms.record(names::CRASH_STREAK, streak.min(MAX_SAMPLED_CRASH_STREAK));
        }
    }

    /// Record whether this session is exiting cleanly. With
    /// `write_synchronously` local state is committed before returning.
    pub fn write_beacon_value(&self, exited_cleanly: bool, write_synchronously: bool) -> Result<()> {
        self.local_state
            .set_bool(prefs::STABILITY_EXITED_CLEANLY, exited_cleanly);
        if let Some(path) = &self.beacon_file {
            let contents = BeaconFile {
                exited_cleanly,
                crash_streak: self.crash_streak(),
            };
            let data = serde_json::to_vec_pretty(&contents)?;
            write_atomic(path, &data).map_err(|source| MsmError::io(path, source))?;
        }
        if write_synchronously {
            self.local_state.commit()?;
        }
        Ok(())
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Meaningful only after [`Self::initialize`].
    #[must_use]
    pub const fn exited_cleanly(&self) -> bool {
        self.did_previous_session_exit_cleanly
    }

    #[must_use]
    pub fn crash_streak(&self) -> i64 {
        self.local_state.get_i64(prefs::VARIATIONS_CRASH_STREAK)
    }

    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    #[must_use]
    pub const fn startup_visibility(&self) -> StartupVisibility {
        self.startup_visibility
    }

    #[must_use]
    pub fn beacon_file_path(&self) -> Option<&PathBuf> {
        self.beacon_file.as_ref()
    }

    fn read_beacon_file(&self) -> Option<BeaconFile> {
        let path = self.beacon_file.as_ref()?;
        let raw = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(file) => Some(file),
            Err(error) => {
                eprintln!(
                    "[MSM-BEACON] ignoring unreadable beacon file {}: {error}",
                    path.display()
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::local_state::InMemoryPrefStore;

    fn beacon(store: &Arc<InMemoryPrefStore>, dir: Option<PathBuf>) -> CleanExitBeacon {
        CleanExitBeacon::new(
            store.clone(),
            dir,
            DEFAULT_BEACON_FILE_NAME,
            Channel::Stable,
            StartupVisibility::Foreground,
        )
    }

    #[test]
    fn fresh_state_counts_as_clean() {
        let store = Arc::new(InMemoryPrefStore::new());
        let mut beacon = beacon(&store, None);
        beacon.initialize();
        assert!(beacon.is_initialized());
        assert!(beacon.exited_cleanly());
        assert_eq!(beacon.crash_streak(), 0);
    }

    #[test]
    fn unclean_exit_increments_streak_once() {
        let store = Arc::new(InMemoryPrefStore::new());
        store.set_bool(prefs::STABILITY_EXITED_CLEANLY, false);
        store.set_i64(prefs::VARIATIONS_CRASH_STREAK, 2);
        let histograms = Arc::new(HistogramRecorder::new());
        let mut beacon = beacon(&store, None).with_histograms(histograms.clone());
        beacon.initialize();
        beacon.initialize();
        assert!(!beacon.exited_cleanly());
        assert_eq!(beacon.crash_streak(), 3);
        assert_eq!(histograms.bucket_count(names::CRASH_STREAK, 3), 1);
    }

    #[test]
    fn synchronous_write_commits_and_mirrors_to_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(InMemoryPrefStore::new());
        let beacon = beacon(&store, Some(dir.path().to_path_buf()));
        beacon.write_beacon_value(false, true).expect("write beacon");
        assert_eq!(store.commit_count(), 1);
        assert!(!store.get_bool(prefs::STABILITY_EXITED_CLEANLY));
        assert!(dir.path().join(DEFAULT_BEACON_FILE_NAME).exists());

        beacon.write_beacon_value(true, false).expect("write beacon");
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn beacon_file_overrides_local_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(InMemoryPrefStore::new());
        beacon(&store, Some(dir.path().to_path_buf()))
            .write_beacon_value(false, false)
            .expect("write beacon");

        let fresh_state = Arc::new(InMemoryPrefStore::new());
        let mut next = beacon(&fresh_state, Some(dir.path().to_path_buf()));
        next.initialize();
        assert!(!next.exited_cleanly());
        assert_eq!(next.crash_streak(), 1);
    }

    #[test]
    fn channel_parses_case_insensitively() {
        assert_eq!("Beta".parse::<Channel>().expect("channel"), Channel::Beta);
        assert_eq!("".parse::<Channel>().expect("channel"), Channel::Unknown);
        assert!("nightly".parse::<Channel>().is_err());
    }
}
