//! Telemetry façade: writes the identity block of outgoing logs from a
//! snapshot of the state manager.

#![allow(missing_docs)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::config::CalibrationConfig;
use crate::identity::cloned_install::{ClonedInstallDetector, ClonedInstallInfo};
use crate::logger::histograms::{HistogramRecorder, names};
use crate::prefs::local_state::PrefStore;
use crate::prefs::names as prefs;
use crate::protocol::{
    ClonedInstallInfoProto, SystemProfile, UmaLog, hash_client_id, round_seconds_to_hour,
};
use crate::stability::clean_exit_beacon::Channel;

/// Calibration samples are bucketed up to this value.
const MAX_LOG_NORMAL_SAMPLE: f64 = 10_000.0;

pub struct MetricsStateMetricsProvider {
    local_state: Arc<dyn PrefStore>,
    histograms: Arc<HistogramRecorder>,
    calibration: CalibrationConfig,
    metrics_ids_were_reset: bool,
    previous_client_id: String,
    initial_client_id: String,
    cloned_install_detector: Option<Arc<ClonedInstallDetector>>,
    channel: Option<Channel>,
    rng: StdRng,
}

impl std::fmt::Debug for MetricsStateMetricsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsStateMetricsProvider")
            .field("metrics_ids_were_reset", &self.metrics_ids_were_reset)
            .field("initial_client_id", &self.initial_client_id)
            .field("calibration", &self.calibration)
            .finish_non_exhaustive()
    }
}

impl MetricsStateMetricsProvider {
    /// `seed` makes the calibration sample deterministic; `None` seeds from
    /// the OS.
    #[must_use]
    pub fn new(
        local_state: Arc<dyn PrefStore>,
        histograms: Arc<HistogramRecorder>,
        calibration: CalibrationConfig,
        seed: Option<u64>,
    ) -> Self {
        let rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Self {
            local_state,
            histograms,
            calibration,
            metrics_ids_were_reset: false,
            previous_client_id: String::new(),
            initial_client_id: String::new(),
            cloned_install_detector: None,
            channel: None,
            rng,
        }
    }

    #[must_use]
    pub fn with_identity(
        mut self,
        metrics_ids_were_reset: bool,
        previous_client_id: String,
        initial_client_id: String,
    ) -> Self {
        self.metrics_ids_were_reset = metrics_ids_were_reset;
        self.previous_client_id = previous_client_id;
        self.initial_client_id = initial_client_id;
        self
    }

    #[must_use]
    pub fn with_cloned_install_detector(
        mut self,
        detector: Option<Arc<ClonedInstallDetector>>,
    ) -> Self {
        self.cloned_install_detector = detector;
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Dates are rounded down to the hour.
    pub fn provide_system_profile_metrics(&self, profile: &mut SystemProfile) {
        let enabled_date = self
            .local_state
            .get_i64(prefs::METRICS_REPORTING_ENABLED_TIMESTAMP);
        if enabled_date > 0 {
            profile.uma_enabled_date = Some(round_seconds_to_hour(enabled_date));
        }
        let install_date = self.local_state.get_i64(prefs::INSTALL_DATE);
        if install_date > 0 {
            profile.install_date = Some(round_seconds_to_hour(install_date));
        }

        let client_id = self.local_state.get_string(prefs::METRICS_CLIENT_ID);
        profile.client_id_was_used_for_trial_assignment =
            Some(!client_id.is_empty() && client_id == self.initial_client_id);

        let cloned = ClonedInstallInfo::read(self.local_state.as_ref());
        if cloned.reset_count > 0 {
            let cloned_from_client_id = (self.metrics_ids_were_reset
                && !self.previous_client_id.is_empty())
            .then(|| hash_client_id(&self.previous_client_id));
            profile.cloned_install_info = Some(ClonedInstallInfoProto {
                count: cloned.reset_count,
                first_timestamp: round_seconds_to_hour(cloned.first_reset_timestamp),
                last_timestamp: round_seconds_to_hour(cloned.last_reset_timestamp),
                cloned_from_client_id,
            });
        }

        if let Some(channel) = self.channel {
            profile.channel = Some(channel);
        }
    }

    /// The previous session's log belongs to the pre-reset identity.
    pub fn provide_previous_session_data(&self, log: &mut UmaLog) {
        if self.metrics_ids_were_reset && !self.previous_client_id.is_empty() {
            log.client_id = hash_client_id(&self.previous_client_id);
        }
    }

    pub fn provide_current_session_data(&mut self, _log: &mut UmaLog) {
        if self
            .cloned_install_detector
            .as_ref()
            .is_some_and(|detector| detector.cloned_install_detected_in_current_session())
        {
            self.histograms.record_bool(names::IS_CLONED_INSTALL, true);
        }
        let sample = self.draw_calibration_sample();
        self.histograms.record(
            names::DATA_VALIDATION_LOG_NORMAL,
            sample.round().min(MAX_LOG_NORMAL_SAMPLE) as i64,
        );
    }

    /// One draw from LogNormal(mean + ln(1 + delta), std_dev).
    pub fn draw_calibration_sample(&mut self) -> f64 {
        let mu = self.calibration.log_normal_mean + self.calibration.log_normal_delta.ln_1p();
        let z = self.sample_standard_normal();
        (mu + self.calibration.log_normal_std_dev * z).exp()
    }

    /// Box-Muller transform.
    fn sample_standard_normal(&mut self) -> f64 {
        // (0, 1] so the log is finite.
        let u1 = 1.0 - self.rng.random::<f64>();
        let u2 = self.rng.random::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::local_state::InMemoryPrefStore;

    fn provider(store: &Arc<InMemoryPrefStore>, seed: u64) -> MetricsStateMetricsProvider {
        MetricsStateMetricsProvider::new(
            store.clone(),
            Arc::new(HistogramRecorder::new()),
            CalibrationConfig::default(),
            Some(seed),
        )
    }

    #[test]
    fn seeded_samples_repeat() {
        let store = Arc::new(InMemoryPrefStore::new());
        let a: Vec<f64> = {
            let mut p = provider(&store, 7);
            (0..5).map(|_| p.draw_calibration_sample()).collect()
        };
        let mut p = provider(&store, 7);
        let b: Vec<f64> = (0..5).map(|_| p.draw_calibration_sample()).collect();
        assert_eq!(a, b);
        assert!(a.iter().all(|v| *v > 0.0 && v.is_finite()));
    }

    #[test]
    fn median_tracks_configured_mean() {
        let store = Arc::new(InMemoryPrefStore::new());
        let mut p = provider(&store, 42);
        let mut samples: Vec<f64> = (0..2001).map(|_| p.draw_calibration_sample()).collect();
        samples.sort_by(f64::total_cmp);
        let median = samples[1000];
        // exp(4.605) ~= 100
        assert!((60.0..160.0).contains(&median), "median {median}");
    }

    #[test]
    fn dates_are_rounded_and_trial_flag_compares_ids() {
        let store = Arc::new(InMemoryPrefStore::new());
        store.set_i64(prefs::METRICS_REPORTING_ENABLED_TIMESTAMP, 7_300);
        store.set_i64(prefs::INSTALL_DATE, 3_601);
        store.set_string(prefs::METRICS_CLIENT_ID, "id-a");
        let p = provider(&store, 1).with_identity(false, String::new(), "id-a".to_string());
        let mut profile = SystemProfile::default();
        p.provide_system_profile_metrics(&mut profile);
        assert_eq!(profile.uma_enabled_date, Some(7_200));
        assert_eq!(profile.install_date, Some(3_600));
        assert_eq!(profile.client_id_was_used_for_trial_assignment, Some(true));
        assert_eq!(profile.cloned_install_info, None);
    }

    #[test]
    fn no_client_id_reports_trial_flag_false() {
        let store = Arc::new(InMemoryPrefStore::new());
        let mut profile = SystemProfile::default();
        provider(&store, 1).provide_system_profile_metrics(&mut profile);
        assert_eq!(profile.client_id_was_used_for_trial_assignment, Some(false));
        assert_eq!(profile.install_date, None);
    }

    #[test]
    fn id_created_after_trials_reports_trial_flag_false() {
        let store = Arc::new(InMemoryPrefStore::new());
        store.set_string(prefs::METRICS_CLIENT_ID, "late-id");
        let p = provider(&store, 1).with_identity(false, String::new(), String::new());
        let mut profile = SystemProfile::default();
        p.provide_system_profile_metrics(&mut profile);
        assert_eq!(profile.client_id_was_used_for_trial_assignment, Some(false));
    }

    #[test]
    fn cloned_info_hashes_previous_id_only_when_reset() {
        let store = Arc::new(InMemoryPrefStore::new());
        ClonedInstallInfo::record_at(store.as_ref(), 7_201);
        let reset = provider(&store, 1).with_identity(true, "old".to_string(), String::new());
        let mut profile = SystemProfile::default();
        reset.provide_system_profile_metrics(&mut profile);
        let info = profile.cloned_install_info.expect("cloned info");
        assert_eq!(info.count, 1);
        assert_eq!(info.last_timestamp, 7_200);
        assert_eq!(info.cloned_from_client_id, Some(hash_client_id("old")));

        let later = provider(&store, 1);
        let mut profile = SystemProfile::default();
        later.provide_system_profile_metrics(&mut profile);
        assert_eq!(
            profile.cloned_install_info.and_then(|i| i.cloned_from_client_id),
            None
        );
    }

    #[test]
    fn previous_session_log_gets_hashed_previous_id() {
        let store = Arc::new(InMemoryPrefStore::new());
        let p = provider(&store, 1).with_identity(true, "old".to_string(), "new".to_string());
        let mut log = UmaLog {
            client_id: 5,
            ..UmaLog::default()
        };
        p.provide_previous_session_data(&mut log);
        assert_eq!(log.client_id, hash_client_id("old"));

        let untouched = provider(&store, 1);
        let mut log = UmaLog {
            client_id: 5,
            ..UmaLog::default()
        };
        untouched.provide_previous_session_data(&mut log);
        assert_eq!(log.client_id, 5);
    }

    #[test]
    fn current_session_always_samples_calibration() {
        let store = Arc::new(InMemoryPrefStore::new());
        let histograms = Arc::new(HistogramRecorder::new());
        let mut p = MetricsStateMetricsProvider::new(
            store,
            histograms.clone(),
            CalibrationConfig::default(),
            Some(3),
        );
        p.provide_current_session_data(&mut UmaLog::default());
        assert_eq!(histograms.total_count(names::DATA_VALIDATION_LOG_NORMAL), 1);
        assert_eq!(histograms.total_count(names::IS_CLONED_INSTALL), 0);
    }
}
