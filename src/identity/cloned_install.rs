//! Cloned-install detection.
//!
//! A hash of the machine identity is persisted in local state. When a later
//! session sees a different hash the install was copied to other hardware:
//! a reset-pending flag is written, and the identity core consumes it right
//! after the check to regenerate the client id and entropy sources.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::logger::histograms::{HistogramRecorder, names};
use crate::logger::jsonl::{EventLog, EventType, LogEntry, Severity, log_event};
use crate::platform::pal::MachineIdProvider;
use crate::prefs::local_state::PrefStore;
use crate::prefs::names as prefs;

/// Outcome of comparing the live machine id with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineIdState {
    IdGenerationFailed = 0,
    IdNoStoredValue = 1,
    IdChanged = 2,
    IdUnchanged = 3,
}

/// Where an install sits in the reset lifecycle, derived from local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneResetState {
    NeverReset,
    ResetPending,
    ResetApplied,
}

impl CloneResetState {
    #[must_use]
    pub fn from_prefs(local_state: &dyn PrefStore) -> Self {
        if local_state.get_bool(prefs::METRICS_RESET_IDS) {
            Self::ResetPending
        } else if ClonedInstallInfo::read(local_state).reset_count > 0 {
            Self::ResetApplied
        } else {
            Self::NeverReset
        }
    }
}

/// Persisted record of identity resets caused by cloning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClonedInstallInfo {
    pub reset_count: i64,
    /// Unix seconds of the first reset; 0 if never reset.
    pub first_reset_timestamp: i64,
    /// Unix seconds of the most recent reset; 0 if never reset.
    pub last_reset_timestamp: i64,
}

impl ClonedInstallInfo {
    #[must_use]
    pub fn read(local_state: &dyn PrefStore) -> Self {
        Self {
            reset_count: local_state.get_i64(prefs::CLONED_RESET_COUNT),
            first_reset_timestamp: local_state.get_i64(prefs::FIRST_CLONED_RESET_TIMESTAMP),
            last_reset_timestamp: local_state.get_i64(prefs::LAST_CLONED_RESET_TIMESTAMP),
        }
    }

    /// Count one more reset, stamping the first timestamp only once.
    pub fn record(local_state: &dyn PrefStore) {
        Self::record_at(local_state, Utc::now().timestamp());
    }

    pub fn record_at(local_state: &dyn PrefStore, now: i64) {
        let count = local_state.get_i64(prefs::CLONED_RESET_COUNT);
        if count == 0 {
            local_state.set_i64(prefs::FIRST_CLONED_RESET_TIMESTAMP, now);
        }
        local_state.set_i64(prefs::LAST_CLONED_RESET_TIMESTAMP, now);
        local_state.set_i64(prefs::CLONED_RESET_COUNT, count.saturating_add(1));
    }

    pub fn reset(local_state: &dyn PrefStore) {
        local_state.clear(prefs::CLONED_RESET_COUNT);
        local_state.clear(prefs::FIRST_CLONED_RESET_TIMESTAMP);
        local_state.clear(prefs::LAST_CLONED_RESET_TIMESTAMP);
    }
}

/// 24-bit hash of a raw machine identity: the first three SHA-256 bytes,
/// big-endian.
#[must_use]
pub fn hash_raw_machine_id(raw_id: &str) -> i64 {
    let digest = Sha256::digest(raw_id.as_bytes());
    (i64::from(digest[0]) << 16) | (i64::from(digest[1]) << 8) | i64::from(digest[2])
}

/// Compares the machine identity across sessions and latches the
/// reset-pending flag.
pub struct ClonedInstallDetector {
    provider: Arc<dyn MachineIdProvider>,
    histograms: Option<Arc<HistogramRecorder>>,
    event_log: Option<EventLog>,
    detected_this_session: AtomicBool,
    last_state: Mutex<Option<MachineIdState>>,
    // `Some` once the reset pref has been consumed.
    should_reset: Mutex<Option<bool>>,
}

impl std::fmt::Debug for ClonedInstallDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClonedInstallDetector")
            .field(
                "detected_this_session",
                &self.detected_this_session.load(Ordering::Relaxed),
            )
            .field("should_reset", &*self.should_reset.lock())
            .finish_non_exhaustive()
    }
}

impl ClonedInstallDetector {
    #[must_use]
    pub fn new(provider: Arc<dyn MachineIdProvider>) -> Self {
        Self {
            provider,
            histograms: None,
            event_log: None,
            detected_this_session: AtomicBool::new(false),
            last_state: Mutex::new(None),
            should_reset: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_histograms(mut self, histograms: Arc<HistogramRecorder>) -> Self {
        self.histograms = Some(histograms);
        self
    }

    #[must_use]
    pub fn with_event_log(mut self, event_log: Option<EventLog>) -> Self {
        self.event_log = event_log;
        self
    }

    /// Hash the live machine id, compare with the stored hash and persist
    /// the new one. Only a change sets the reset-pending flag.
    pub fn check_for_cloned_install(&self, local_state: &dyn PrefStore) -> MachineIdState {
        let raw_id = self.provider.machine_id();
        if raw_id.is_empty() {
            local_state.clear(prefs::METRICS_MACHINE_ID);
            self.sample(MachineIdState::IdGenerationFailed);
            return MachineIdState::IdGenerationFailed;
        }

        let hashed = hash_raw_machine_id(&raw_id);
        let stored = local_state.get_i64_opt(prefs::METRICS_MACHINE_ID);
        let state = match stored {
            None => MachineIdState::IdNoStoredValue,
            Some(previous) if previous == hashed => MachineIdState::IdUnchanged,
            Some(_) => MachineIdState::IdChanged,
        };

        if state == MachineIdState::IdChanged {
            self.detected_this_session.store(true, Ordering::Release);
            local_state.set_bool(prefs::METRICS_RESET_IDS, true);
            log_event(
                self.event_log.as_ref(),
                &LogEntry::new(EventType::ClonedInstallDetected, Severity::Warning)
                    .with_source("id_changed"),
            );
        }
        self.sample(state);
        local_state.set_i64(prefs::METRICS_MACHINE_ID, hashed);
        state
    }

    /// Result of the most recent [`Self::check_for_cloned_install`].
    #[must_use]
    pub fn last_machine_id_state(&self) -> Option<MachineIdState> {
        *self.last_state.lock()
    }

    /// Whether ids must be reset this session. The flag is consumed until a
    /// reset latches; a flag raised after that is left for the next start.
    pub fn should_reset_client_ids(&self, local_state: &dyn PrefStore) -> bool {
        let mut latched = self.should_reset.lock();
        if *latched != Some(true) && local_state.has_user_value(prefs::METRICS_RESET_IDS) {
            *latched = Some(local_state.get_bool(prefs::METRICS_RESET_IDS));
            local_state.clear(prefs::METRICS_RESET_IDS);
        }
        latched.unwrap_or(false)
    }

    #[must_use]
    pub fn cloned_install_detected_in_current_session(&self) -> bool {
        self.detected_this_session.load(Ordering::Acquire)
    }

    fn sample(&self, state: MachineIdState) {
        *self.last_state.lock() = Some(state);
        if let Some(histograms) = &self.histograms {
            histograms.record(names::MACHINE_ID_STATE, state as i64);
        }
    }
}
