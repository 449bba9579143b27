//! Low/high entropy sources used to randomize field-trial assignment.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;

use crate::logger::histograms::{HistogramRecorder, names};
use crate::prefs::local_state::PrefStore;
use crate::prefs::names as prefs;
use crate::variations::switches::{CommandLine, RESET_VARIATION_STATE};

/// Exclusive upper bound of every low entropy value.
pub const MAX_LOW_ENTROPY_SIZE: i64 = 8000;

/// Stored when no low entropy value has been generated yet. Out of range on
/// purpose so that 0 stays a legitimate value.
const UNSET_LOW_ENTROPY_SOURCE: i64 = -1;

/// Lazily computed, persisted entropy values.
///
/// Values are cached on first read and do not change for the lifetime of
/// the instance, even if the underlying prefs are cleared afterwards.
pub struct EntropyState {
    local_state: Arc<dyn PrefStore>,
    histograms: Option<Arc<HistogramRecorder>>,
    reset_pending: AtomicBool,
    low_entropy_source: Mutex<Option<i64>>,
    old_low_entropy_source: Mutex<Option<Option<i64>>>,
}

impl std::fmt::Debug for EntropyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntropyState")
            .field("low_entropy_source", &*self.low_entropy_source.lock())
            .field("old_low_entropy_source", &*self.old_low_entropy_source.lock())
            .finish_non_exhaustive()
    }
}

impl EntropyState {
    #[must_use]
    pub fn new(local_state: Arc<dyn PrefStore>, command_line: &CommandLine) -> Self {
        Self::register_prefs(local_state.as_ref());
        Self {
            local_state,
            histograms: None,
            reset_pending: AtomicBool::new(command_line.has_switch(RESET_VARIATION_STATE)),
            low_entropy_source: Mutex::new(None),
            old_low_entropy_source: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_histograms(mut self, histograms: Arc<HistogramRecorder>) -> Self {
        self.histograms = Some(histograms);
        self
    }

    pub fn register_prefs(local_state: &dyn PrefStore) {
        local_state.register_default(
            prefs::METRICS_LOW_ENTROPY_SOURCE,
            Value::from(UNSET_LOW_ENTROPY_SOURCE),
        );
        local_state.register_default(
            prefs::METRICS_OLD_LOW_ENTROPY_SOURCE,
            Value::from(UNSET_LOW_ENTROPY_SOURCE),
        );
    }

    /// Remove both persisted low entropy values.
    pub fn clear_prefs(local_state: &dyn PrefStore) {
        local_state.clear(prefs::METRICS_LOW_ENTROPY_SOURCE);
        local_state.clear(prefs::METRICS_OLD_LOW_ENTROPY_SOURCE);
    }

    #[must_use]
    pub const fn is_valid_low_entropy_source(value: i64) -> bool {
        value >= 0 && value < MAX_LOW_ENTROPY_SIZE
    }

    /// Current low entropy value in `[0, MAX_LOW_ENTROPY_SIZE)`, generated
    /// and persisted when missing or corrupt.
    pub fn low_entropy_source(&self) -> i64 {
        let mut cached = self.low_entropy_source.lock();
        if let Some(value) = *cached {
            return value;
        }
        self.apply_pending_reset();

        let stored = self
            .local_state
            .get_i64_opt(prefs::METRICS_LOW_ENTROPY_SOURCE)
            .filter(|value| Self::is_valid_low_entropy_source(*value));
        let value = match stored {
            Some(value) => value,
            None => {
                let value = rand::rng().random_range(0..MAX_LOW_ENTROPY_SIZE);
                self.local_state
                    .set_i64(prefs::METRICS_LOW_ENTROPY_SOURCE, value);
                value
            }
        };
        if let Some(histograms) = &self.histograms {
            histograms.record(names::LOW_ENTROPY_SOURCE_VALUE, value);
        }
        *cached = Some(value);
        value
    }

    /// Legacy low entropy value, if a valid one is still stored. An invalid
    /// stored value is cleared.
    pub fn old_low_entropy_source(&self) -> Option<i64> {
        let mut cached = self.old_low_entropy_source.lock();
        if let Some(value) = *cached {
            return value;
        }
        self.apply_pending_reset();

        let value = if self
            .local_state
            .has_user_value(prefs::METRICS_OLD_LOW_ENTROPY_SOURCE)
        {
            let stored = self
                .local_state
                .get_i64_opt(prefs::METRICS_OLD_LOW_ENTROPY_SOURCE)
                .filter(|value| Self::is_valid_low_entropy_source(*value));
            if stored.is_none() {
                self.local_state.clear(prefs::METRICS_OLD_LOW_ENTROPY_SOURCE);
            }
            stored
        } else {
            None
        };
        *cached = Some(value);
        value
    }

    /// `initial_client_id` followed by the decimal low entropy value, the
    /// legacy one when present. Never persisted.
    pub fn high_entropy_source(&self, initial_client_id: &str) -> String {
        let low = self
            .old_low_entropy_source()
            .unwrap_or_else(|| self.low_entropy_source());
        format!("{initial_client_id}{low}")
    }

    fn apply_pending_reset(&self) {
        if self.reset_pending.swap(false, Ordering::AcqRel) {
            Self::clear_prefs(self.local_state.as_ref());
        }
    }
}
