//! In-process histogram recorder for the telemetry samples this crate emits.
//!
//! Samples are bucketed by exact value; callers that need ranges bucket
//! before recording. The recorder is shared (`Arc`) and internally locked.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;

/// Histogram names recorded by the state manager and its collaborators.
pub mod names {
    pub const CLIENT_ID_SOURCE: &str = "UMA.ClientIdSource";
    pub const CLIENT_ID_BACKUP_RECOVERED_WITH_AGE: &str = "UMA.ClientIdBackupRecoveredWithAge";
    pub const METRICS_IDS_RESET: &str = "UMA.MetricsIDsReset";
    pub const ENTROPY_SOURCE_TYPE: &str = "UMA.EntropySourceType";
    pub const LOW_ENTROPY_SOURCE_VALUE: &str = "UMA.LowEntropySource3Value";
    pub const MACHINE_ID_STATE: &str = "UMA.MachineIdState";
    pub const IS_CLONED_INSTALL: &str = "UMA.IsClonedInstall";
    pub const DATA_VALIDATION_LOG_NORMAL: &str = "UMA.DataValidation.LogNormal";
    pub const CRASH_STREAK: &str = "Variations.SafeMode.Streak.Crashes";
}

/// Snapshot of one histogram.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistogramSnapshot {
    pub total: u64,
    pub buckets: BTreeMap<i64, u64>,
}

/// Thread-safe sample sink.
#[derive(Debug, Default)]
pub struct HistogramRecorder {
    histograms: Mutex<BTreeMap<String, HistogramSnapshot>>,
}

impl HistogramRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str, sample: i64) {
        let mut histograms = self.histograms.lock();
        let histogram = histograms.entry(name.to_string()).or_default();
        histogram.total += 1;
        *histogram.buckets.entry(sample).or_insert(0) += 1;
    }

    pub fn record_bool(&self, name: &str, sample: bool) {
        self.record(name, i64::from(sample));
    }

    /// Samples recorded under `name`.
    #[must_use]
    pub fn total_count(&self, name: &str) -> u64 {
        self.histograms.lock().get(name).map_or(0, |h| h.total)
    }

    /// Samples recorded under `name` with exactly `sample`.
    #[must_use]
    pub fn bucket_count(&self, name: &str, sample: i64) -> u64 {
        self.histograms
            .lock()
            .get(name)
            .and_then(|h| h.buckets.get(&sample).copied())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, HistogramSnapshot> {
        self.histograms.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_counts_per_bucket() {
        let recorder = HistogramRecorder::new();
        recorder.record("h", 2);
        recorder.record("h", 2);
        recorder.record("h", 5);
        recorder.record_bool("b", true);

        assert_eq!(recorder.total_count("h"), 3);
        assert_eq!(recorder.bucket_count("h", 2), 2);
        assert_eq!(recorder.bucket_count("h", 5), 1);
        assert_eq!(recorder.bucket_count("b", 1), 1);
        assert_eq!(recorder.total_count("missing"), 0);
    }

    #[test]
    fn snapshot_is_detached() {
        let recorder = HistogramRecorder::new();
        recorder.record("h", 1);
        let snap = recorder.snapshot();
        recorder.record("h", 1);
        assert_eq!(snap["h"].total, 1);
        assert_eq!(recorder.total_count("h"), 2);
    }
}
