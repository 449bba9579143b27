//! Metrics state manager: owns the client identity, the entropy sources and
//! the clean-exit beacon for one process.
//!
//! Construction order matters and is fixed:
//!
//! 1. Cloned-install check (when a machine-id provider is available).
//! 2. Identity reset if the check (or an earlier one) asked for it.
//! 3. First-run install-date stamping.
//! 4. Client id resolution if consent is already known, otherwise a
//!    provisional id on first run where the platform allows it.
//! 5. `initial_client_id` is fixed from the result and never changes.
//!
//! Exactly one manager exists per process; [`MetricsStateBootstrap`] hands
//! it out once.

#![allow(missing_docs)]

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::core::config::CalibrationConfig;
use crate::core::errors::{MsmError, Result};
use crate::identity::client_info::{
    ClientInfo, ClientInfoBackup, NoopClientInfoBackup, generate_client_id, is_valid_client_id,
};
use crate::identity::cloned_install::{ClonedInstallDetector, ClonedInstallInfo, MachineIdState};
use crate::identity::entropy_state::EntropyState;
use crate::identity::metrics_provider::MetricsStateMetricsProvider;
use crate::logger::histograms::{HistogramRecorder, names};
use crate::logger::jsonl::{EventLog, EventType, LogEntry, Severity, log_event};
use crate::platform::pal::{MachineIdProvider, PlatformCapabilities};
use crate::prefs::local_state::PrefStore;
use crate::prefs::names as prefs;
use crate::stability::clean_exit_beacon::{
    Channel, CleanExitBeacon, DEFAULT_BEACON_FILE_NAME, StartupVisibility,
};
use crate::variations::entropy_provider::{
    EntropyProvider, EntropyProviderType, HighEntropyProvider, NormalizedLowEntropyProvider,
};
use crate::variations::field_trial::{FieldTrialList, FieldTrialRegistry};
use crate::variations::switches::{
    CommandLine, ENABLE_BENCHMARKING, FORCE_ENABLE_METRICS_REPORTING, FORCE_FIELD_TRIAL_PARAMS,
    FORCE_FIELD_TRIALS, METRICS_RECORDING_ONLY,
};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

// ──────────────────── enabled state ────────────────────

/// Answers whether the user agreed to metrics reporting.
pub trait EnabledStateProvider: Send + Sync {
    fn is_consent_given(&self) -> bool;

    /// Whether reports are actually being sent this session.
    fn is_reporting_enabled(&self) -> bool {
        self.is_consent_given()
    }
}

/// Enabled state held in atomics, flipped by the embedder.
#[derive(Debug, Default)]
pub struct SwitchableEnabledState {
    consent: AtomicBool,
    reporting: AtomicBool,
}

impl SwitchableEnabledState {
    #[must_use]
    pub fn new(consent: bool) -> Self {
        Self {
            consent: AtomicBool::new(consent),
            reporting: AtomicBool::new(consent),
        }
    }

    /// Grant or revoke consent; reporting follows.
    pub fn set_consent_given(&self, consent: bool) {
        self.consent.store(consent, Ordering::Release);
        self.reporting.store(consent, Ordering::Release);
    }

    pub fn set_reporting_enabled(&self, enabled: bool) {
        self.reporting.store(enabled, Ordering::Release);
    }
}

impl EnabledStateProvider for SwitchableEnabledState {
    fn is_consent_given(&self) -> bool {
        self.consent.load(Ordering::Acquire)
    }

    fn is_reporting_enabled(&self) -> bool {
        self.reporting.load(Ordering::Acquire)
    }
}

// ──────────────────── sampled enums ────────────────────

/// How the current client id was obtained.
#[allow(clippy::enum_variant_names)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientIdSource {
    ClientIdMatches = 0,
    ClientIdFromLocalState = 1,
    ClientIdBackupRecovered = 2,
    ClientIdNew = 3,
    ClientIdFromProvisionalId = 4,
    ClientIdFromExternal = 5,
}

impl ClientIdSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientIdMatches => "client_id_matches",
            Self::ClientIdFromLocalState => "client_id_from_local_state",
            Self::ClientIdBackupRecovered => "client_id_backup_recovered",
            Self::ClientIdNew => "client_id_new",
            Self::ClientIdFromProvisionalId => "client_id_from_provisional_id",
            Self::ClientIdFromExternal => "client_id_from_external",
        }
    }
}

/// Entropy source handed to the field-trial registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntropySourceType {
    #[default]
    None = 0,
    Low = 1,
    High = 2,
}

impl EntropySourceType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

// ──────────────────── construction ────────────────────

/// Everything the manager needs from its embedder.
pub struct MetricsStateParams {
    pub local_state: Arc<dyn PrefStore>,
    pub enabled_state_provider: Arc<dyn EnabledStateProvider>,
    /// Name of the clean-exit beacon file inside `user_data_dir`.
    pub backup_registry_key: String,
    pub user_data_dir: Option<PathBuf>,
    pub startup_visibility: StartupVisibility,
    pub channel: Channel,
    /// `None` disables backup store and load.
    pub client_info_backup: Option<Arc<dyn ClientInfoBackup>>,
    pub external_client_id: Option<String>,
    pub command_line: CommandLine,
    pub platform: PlatformCapabilities,
    pub histograms: Arc<HistogramRecorder>,
    pub event_log: Option<EventLog>,
    /// `None` skips cloned-install detection.
    pub machine_id_provider: Option<Arc<dyn MachineIdProvider>>,
    pub calibration: CalibrationConfig,
}

impl MetricsStateParams {
    /// Params with every optional collaborator disabled.
    #[must_use]
    pub fn new(
        local_state: Arc<dyn PrefStore>,
        enabled_state_provider: Arc<dyn EnabledStateProvider>,
    ) -> Self {
        Self {
            local_state,
            enabled_state_provider,
            backup_registry_key: DEFAULT_BEACON_FILE_NAME.to_string(),
            user_data_dir: None,
            startup_visibility: StartupVisibility::Unknown,
            channel: Channel::Unknown,
            client_info_backup: None,
            external_client_id: None,
            command_line: CommandLine::new(),
            platform: PlatformCapabilities::detect(),
            histograms: Arc::new(HistogramRecorder::new()),
            event_log: None,
            machine_id_provider: None,
            calibration: CalibrationConfig::default(),
        }
    }
}

/// Ownership token for the process-wide manager.
#[derive(Debug, Default)]
pub struct MetricsStateBootstrap {
    constructed: AtomicBool,
}

impl MetricsStateBootstrap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            constructed: AtomicBool::new(false),
        }
    }

    /// The manager on the first call; `None` on every later call.
    pub fn create(&self, params: MetricsStateParams) -> Option<MetricsStateManager> {
        if self.constructed.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(MetricsStateManager::new(params))
    }

    #[must_use]
    pub fn is_constructed(&self) -> bool {
        self.constructed.load(Ordering::Acquire)
    }
}

// ──────────────────── manager ────────────────────

/// Identity and entropy owner. See the module docs for the construction
/// sequence.
pub struct MetricsStateManager {
    local_state: Arc<dyn PrefStore>,
    enabled_state_provider: Arc<dyn EnabledStateProvider>,
    command_line: CommandLine,
    platform: PlatformCapabilities,
    histograms: Arc<HistogramRecorder>,
    event_log: Option<EventLog>,
    client_info_backup: Arc<dyn ClientInfoBackup>,
    external_client_id: Option<String>,
    channel: Channel,
    calibration: CalibrationConfig,
    clean_exit_beacon: CleanExitBeacon,
    entropy_state: EntropyState,
    cloned_install_detector: Option<Arc<ClonedInstallDetector>>,
    client_id: String,
    provisional_client_id: String,
    initial_client_id: String,
    previous_client_id: String,
    metrics_ids_were_reset: bool,
    // Install date stamped by this session's first-run check; a backup's
    // date replaces it.
    install_date_is_placeholder: bool,
    entropy_source_returned: Mutex<EntropySourceType>,
}

impl fmt::Debug for MetricsStateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsStateManager")
            .field("client_id", &self.client_id)
            .field("provisional_client_id", &self.provisional_client_id)
            .field("initial_client_id", &self.initial_client_id)
            .field("metrics_ids_were_reset", &self.metrics_ids_were_reset)
            .field("entropy_source_returned", &*self.entropy_source_returned.lock())
            .finish_non_exhaustive()
    }
}

impl MetricsStateManager {
    fn new(params: MetricsStateParams) -> Self {
        let MetricsStateParams {
            local_state,
            enabled_state_provider,
            backup_registry_key,
            user_data_dir,
            startup_visibility,
            channel,
            client_info_backup,
            external_client_id,
            command_line,
            platform,
            histograms,
            event_log,
            machine_id_provider,
            calibration,
        } = params;

        Self::register_prefs(local_state.as_ref());
        let entropy_state = EntropyState::new(local_state.clone(), &command_line)
            .with_histograms(histograms.clone());
        let clean_exit_beacon = CleanExitBeacon::new(
            local_state.clone(),
            user_data_dir,
            &backup_registry_key,
            channel,
            startup_visibility,
        )
        .with_histograms(histograms.clone());
        let cloned_install_detector = machine_id_provider.map(|provider| {
            Arc::new(
                ClonedInstallDetector::new(provider)
                    .with_histograms(histograms.clone())
                    .with_event_log(event_log.clone()),
            )
        });

        let mut manager = Self {
            local_state,
            enabled_state_provider,
            command_line,
            platform,
            histograms,
            event_log,
            client_info_backup: client_info_backup
                .unwrap_or_else(|| Arc::new(NoopClientInfoBackup)),
            external_client_id: external_client_id.filter(|id| !id.is_empty()),
            channel,
            calibration,
            clean_exit_beacon,
            entropy_state,
            cloned_install_detector,
            client_id: String::new(),
            provisional_client_id: String::new(),
            initial_client_id: String::new(),
            previous_client_id: String::new(),
            metrics_ids_were_reset: false,
            install_date_is_placeholder: false,
            entropy_source_returned: Mutex::new(EntropySourceType::None),
        };

        manager.check_for_cloned_install();
        manager.reset_metrics_ids_if_necessary();

        let is_first_run = manager.local_state.get_i64(prefs::INSTALL_DATE) == 0;
        if is_first_run {
            manager
                .local_state
                .set_i64(prefs::INSTALL_DATE, Utc::now().timestamp());
            manager.install_date_is_placeholder = true;
        }

        if manager.enabled_state_provider.is_consent_given() {
            manager.force_client_id_creation();
        } else if is_first_run && manager.platform.provisional_client_id_on_first_run {
            manager.provisional_client_id = generate_client_id();
            log_event(
                manager.event_log.as_ref(),
                &LogEntry::new(EventType::ProvisionalClientIdCreated, Severity::Info),
            );
        }

        manager.initial_client_id = if manager.client_id.is_empty() {
            manager.provisional_client_id.clone()
        } else {
            manager.client_id.clone()
        };
        manager
    }

    pub fn register_prefs(local_state: &dyn PrefStore) {
        local_state.register_default(prefs::METRICS_CLIENT_ID, Value::from(""));
        local_state.register_default(prefs::INSTALL_DATE, Value::from(0));
        local_state.register_default(prefs::METRICS_REPORTING_ENABLED_TIMESTAMP, Value::from(0));
        local_state.register_default(prefs::CLONED_RESET_COUNT, Value::from(0));
        local_state.register_default(prefs::FIRST_CLONED_RESET_TIMESTAMP, Value::from(0));
        local_state.register_default(prefs::LAST_CLONED_RESET_TIMESTAMP, Value::from(0));
        EntropyState::register_prefs(local_state);
        CleanExitBeacon::register_prefs(local_state);
    }

    // ──────────────────── client id ────────────────────

    /// Resolve the durable client id, creating one if nothing can be
    /// recovered. Repeated calls with unchanged state are no-ops.
    ///
    /// # Panics
    ///
    /// Without consent and without the force-enable or recording-only
    /// switch. Creating an id without consent is a caller bug.
    pub fn force_client_id_creation(&mut self) {
        assert!(
            self.is_client_id_creation_allowed(),
            "client id creation requires metrics consent or a reporting override switch"
        );
        let now = Utc::now().timestamp();

        if let Some(external) = &self.external_client_id {
            self.client_id.clone_from(external);
            self.local_state
                .set_string(prefs::METRICS_CLIENT_ID, &self.client_id);
            self.record_client_id_source(ClientIdSource::ClientIdFromExternal);
            return;
        }

        let client_id_from_prefs = self.local_state.get_string(prefs::METRICS_CLIENT_ID);
        if !client_id_from_prefs.is_empty() && client_id_from_prefs == self.client_id {
            self.record_client_id_source(ClientIdSource::ClientIdMatches);
            return;
        }

        if !client_id_from_prefs.is_empty() {
            self.client_id = client_id_from_prefs;
            self.record_client_id_source(ClientIdSource::ClientIdFromLocalState);
            return;
        }

        if let Some(recovered) = self.load_client_info() {
            self.client_id.clone_from(&recovered.client_id);
            self.local_state
                .set_string(prefs::METRICS_CLIENT_ID, &self.client_id);
            self.restore_dates_from_backup(&recovered, now);
            self.record_client_id_source(ClientIdSource::ClientIdBackupRecovered);
            if recovered.installation_date > 0 {
                self.histograms.record(
                    names::CLIENT_ID_BACKUP_RECOVERED_WITH_AGE,
                    (now - recovered.installation_date).max(0) / SECONDS_PER_DAY,
                );
            }
            self.back_up_current_client_info();
            return;
        }

        if self.provisional_client_id.is_empty() {
            self.client_id = generate_client_id();
            self.record_client_id_source(ClientIdSource::ClientIdNew);
        } else {
            self.client_id = std::mem::take(&mut self.provisional_client_id);
            self.record_client_id_source(ClientIdSource::ClientIdFromProvisionalId);
        }
        self.local_state
            .set_string(prefs::METRICS_CLIENT_ID, &self.client_id);

        if self
            .local_state
            .get_i64(prefs::METRICS_REPORTING_ENABLED_TIMESTAMP)
            == 0
        {
            self.local_state
                .set_i64(prefs::METRICS_REPORTING_ENABLED_TIMESTAMP, now);
        }
        self.back_up_current_client_info();
    }

    fn is_client_id_creation_allowed(&self) -> bool {
        self.enabled_state_provider.is_consent_given()
            || self.command_line.has_switch(FORCE_ENABLE_METRICS_REPORTING)
            || self.command_line.has_switch(METRICS_RECORDING_ONLY)
    }

    /// Valid backup, unless this session applied a clone reset.
    fn load_client_info(&self) -> Option<ClientInfo> {
        if self.metrics_ids_were_reset {
            return None;
        }
        let info = self.client_info_backup.load()?;
        if is_valid_client_id(&info.client_id) {
            Some(info)
        } else {
            eprintln!("[MSM-STATE] ignoring backup with malformed client id");
            None
        }
    }

    fn restore_dates_from_backup(&mut self, backup: &ClientInfo, now: i64) {
        let install_date_unset = self.install_date_is_placeholder
            || self.local_state.get_i64(prefs::INSTALL_DATE) == 0;
        if install_date_unset {
            let restored = if backup.installation_date > 0 {
                backup.installation_date
            } else {
                now
            };
            self.local_state.set_i64(prefs::INSTALL_DATE, restored);
            self.install_date_is_placeholder = false;
        }

        if self
            .local_state
            .get_i64(prefs::METRICS_REPORTING_ENABLED_TIMESTAMP)
            == 0
        {
            let restored = if backup.reporting_enabled_date > 0 {
                backup.reporting_enabled_date
            } else {
                now
            };
            self.local_state
                .set_i64(prefs::METRICS_REPORTING_ENABLED_TIMESTAMP, restored);
        }
    }

    fn back_up_current_client_info(&self) {
        let info = ClientInfo {
            client_id: self.client_id.clone(),
            installation_date: self.local_state.get_i64(prefs::INSTALL_DATE),
            reporting_enabled_date: self
                .local_state
                .get_i64(prefs::METRICS_REPORTING_ENABLED_TIMESTAMP),
        };
        self.client_info_backup.store(&info);
    }

    fn record_client_id_source(&self, source: ClientIdSource) {
        self.histograms
            .record(names::CLIENT_ID_SOURCE, source as i64);
        log_event(
            self.event_log.as_ref(),
            &LogEntry::new(EventType::ClientIdResolved, Severity::Info).with_source(source.as_str()),
        );
    }

    // ──────────────────── cloned install ────────────────────

    /// Run the cloned-install detector, if one is configured.
    pub fn check_for_cloned_install(&self) -> Option<MachineIdState> {
        self.cloned_install_detector
            .as_ref()
            .map(|detector| detector.check_for_cloned_install(self.local_state.as_ref()))
    }

    pub fn should_reset_client_ids_on_cloned_install(&self) -> bool {
        self.cloned_install_detector
            .as_ref()
            .is_some_and(|detector| detector.should_reset_client_ids(self.local_state.as_ref()))
    }

    fn reset_metrics_ids_if_necessary(&mut self) {
        if !self.should_reset_client_ids_on_cloned_install() {
            return;
        }
        self.metrics_ids_were_reset = true;
        self.previous_client_id = self.local_state.get_string(prefs::METRICS_CLIENT_ID);

        self.local_state.clear(prefs::METRICS_CLIENT_ID);
        EntropyState::clear_prefs(self.local_state.as_ref());
        ClonedInstallInfo::record(self.local_state.as_ref());
        // Drop the backup too so a later resolution cannot resurrect the
        // cloned identity.
        self.client_info_backup.store(&ClientInfo::default());

        self.histograms.record_bool(names::METRICS_IDS_RESET, true);
        let reset_count = ClonedInstallInfo::read(self.local_state.as_ref()).reset_count;
        let mut entry = LogEntry::new(EventType::MetricsIdsReset, Severity::Warning);
        entry.reset_count = Some(reset_count);
        log_event(self.event_log.as_ref(), &entry);
        if self.platform.structured_device_logging {
            eprintln!("[MSM-STATE] metrics ids reset after cloned install (reset_count={reset_count})");
        }
    }

    // ──────────────────── entropy ────────────────────

    /// High entropy when an initial client id exists, low entropy otherwise.
    /// The first call of the process decides the sampled source type.
    pub fn create_default_entropy_provider(&self) -> Arc<dyn EntropyProvider> {
        if self.initial_client_id.is_empty() {
            self.update_entropy_source_returned(EntropySourceType::Low);
            return self.create_low_entropy_provider();
        }
        self.update_entropy_source_returned(EntropySourceType::High);
        Arc::new(HighEntropyProvider::new(
            self.entropy_state
                .high_entropy_source(&self.initial_client_id),
        ))
    }

    /// Low entropy provider. Does not affect the sampled source type.
    pub fn create_low_entropy_provider(&self) -> Arc<dyn EntropyProvider> {
        Arc::new(NormalizedLowEntropyProvider::new(
            self.entropy_state.low_entropy_source(),
        ))
    }

    fn update_entropy_source_returned(&self, source: EntropySourceType) {
        let mut returned = self.entropy_source_returned.lock();
        if *returned != EntropySourceType::None {
            return;
        }
        *returned = source;
        self.histograms
            .record(names::ENTROPY_SOURCE_TYPE, source as i64);
        log_event(
            self.event_log.as_ref(),
            &LogEntry::new(EventType::EntropySourceSelected, Severity::Info)
                .with_source(source.as_str()),
        );
    }

    // ──────────────────── field trials ────────────────────

    /// Create the field-trial list if `registry` is empty, then apply the
    /// benchmarking, forced-params and forced-trials switches, then
    /// initialize the clean-exit beacon.
    ///
    /// # Errors
    ///
    /// [`MsmError::InvalidSwitch`] for a malformed forced-params or
    /// forced-trials switch. Callers are expected to exit on it.
    pub fn instantiate_field_trial_list(
        &mut self,
        registry: &mut FieldTrialRegistry,
        enable_gpu_benchmarking_switch: Option<&str>,
        entropy_provider_type: EntropyProviderType,
    ) -> Result<()> {
        let list = registry.get_or_create_with(|| {
            FieldTrialList::new(match entropy_provider_type {
                EntropyProviderType::Low => self.create_low_entropy_provider(),
                EntropyProviderType::Default => self.create_default_entropy_provider(),
            })
        });

        let gpu_benchmarking = enable_gpu_benchmarking_switch
            .is_some_and(|switch| !switch.is_empty() && self.command_line.has_switch(switch));
        if self.command_line.has_switch(ENABLE_BENCHMARKING) || gpu_benchmarking {
            list.enable_benchmarking();
        }

        if let Some(value) = self.command_line.switch_value(FORCE_FIELD_TRIAL_PARAMS)
            && list.associate_params_from_string(value).is_none()
        {
            return Err(self.report_invalid_switch(FORCE_FIELD_TRIAL_PARAMS));
        }

        if let Some(value) = self.command_line.switch_value(FORCE_FIELD_TRIALS)
            && list.create_trials_from_string(value).is_none()
        {
            return Err(self.report_invalid_switch(FORCE_FIELD_TRIALS));
        }

        let trial_count = list.trial_count();
        self.clean_exit_beacon.initialize();

        let mut entry = LogEntry::new(EventType::FieldTrialsInstantiated, Severity::Info)
            .with_source(entropy_provider_type_name(entropy_provider_type));
        entry.count = Some(trial_count as u64);
        entry.ok = Some(true);
        log_event(self.event_log.as_ref(), &entry);
        Ok(())
    }

    fn report_invalid_switch(&self, switch: &str) -> MsmError {
        let error = MsmError::invalid_switch(switch);
        log_event(
            self.event_log.as_ref(),
            &LogEntry::from_error(EventType::Error, &error),
        );
        error
    }

    // ──────────────────── façade and beacon ────────────────────

    /// Telemetry façade bound to the current identity snapshot.
    #[must_use]
    pub fn get_provider(&self) -> MetricsStateMetricsProvider {
        self.build_provider(None)
    }

    /// Like [`Self::get_provider`] with a deterministic calibration RNG.
    #[must_use]
    pub fn get_provider_and_set_random_seed_for_testing(
        &self,
        seed: u64,
    ) -> MetricsStateMetricsProvider {
        self.build_provider(Some(seed))
    }

    fn build_provider(&self, seed: Option<u64>) -> MetricsStateMetricsProvider {
        MetricsStateMetricsProvider::new(
            self.local_state.clone(),
            self.histograms.clone(),
            self.calibration,
            seed,
        )
        .with_identity(
            self.metrics_ids_were_reset,
            self.previous_client_id.clone(),
            self.initial_client_id.clone(),
        )
        .with_cloned_install_detector(self.cloned_install_detector.clone())
        .with_channel(self.channel)
    }

    /// Record whether this session is shutting down cleanly. With
    /// `write_synchronously` local state is on disk before this returns.
    pub fn log_has_session_shutdown_cleanly(
        &self,
        has_session_shutdown_cleanly: bool,
        write_synchronously: bool,
    ) -> Result<()> {
        let result = self
            .clean_exit_beacon
            .write_beacon_value(has_session_shutdown_cleanly, write_synchronously);
        let entry = match &result {
            Ok(()) => {
                let mut entry = LogEntry::new(EventType::CleanExitRecorded, Severity::Info)
                    .with_details(format!(
                        "exited_cleanly={has_session_shutdown_cleanly} visibility={}",
                        self.clean_exit_beacon.startup_visibility().as_str()
                    ));
                entry.ok = Some(true);
                entry
            }
            Err(error) => LogEntry::from_error(EventType::CleanExitRecorded, error),
        };
        log_event(self.event_log.as_ref(), &entry);
        result
    }

    // ──────────────────── accessors ────────────────────

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn initial_client_id(&self) -> &str {
        &self.initial_client_id
    }

    #[must_use]
    pub fn provisional_client_id(&self) -> &str {
        &self.provisional_client_id
    }

    /// Client id in use before this session's clone reset, if any.
    #[must_use]
    pub fn previous_client_id(&self) -> &str {
        &self.previous_client_id
    }

    #[must_use]
    pub const fn metrics_ids_were_reset(&self) -> bool {
        self.metrics_ids_were_reset
    }

    #[must_use]
    pub fn is_metrics_reporting_enabled(&self) -> bool {
        self.enabled_state_provider.is_reporting_enabled()
    }

    pub fn low_entropy_source(&self) -> i64 {
        self.entropy_state.low_entropy_source()
    }

    pub fn old_low_entropy_source(&self) -> Option<i64> {
        self.entropy_state.old_low_entropy_source()
    }

    /// `None` before any client id (real or provisional) exists.
    pub fn high_entropy_source(&self) -> Option<String> {
        if self.initial_client_id.is_empty() {
            return None;
        }
        Some(
            self.entropy_state
                .high_entropy_source(&self.initial_client_id),
        )
    }

    #[must_use]
    pub fn entropy_source_returned(&self) -> EntropySourceType {
        *self.entropy_source_returned.lock()
    }

    #[must_use]
    pub const fn clean_exit_beacon(&self) -> &CleanExitBeacon {
        &self.clean_exit_beacon
    }

    #[must_use]
    pub fn cloned_install_detector(&self) -> Option<&ClonedInstallDetector> {
        self.cloned_install_detector.as_deref()
    }

    #[must_use]
    pub fn local_state(&self) -> &Arc<dyn PrefStore> {
        &self.local_state
    }

    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.channel
    }
}

const fn entropy_provider_type_name(provider_type: EntropyProviderType) -> &'static str {
    match provider_type {
        EntropyProviderType::Default => "default",
        EntropyProviderType::Low => "low",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::client_info::InMemoryClientInfoBackup;
    use crate::prefs::local_state::InMemoryPrefStore;

    fn params(store: &Arc<InMemoryPrefStore>, consent: bool) -> MetricsStateParams {
        let mut params = MetricsStateParams::new(
            store.clone(),
            Arc::new(SwitchableEnabledState::new(consent)),
        );
        params.platform = PlatformCapabilities {
            provisional_client_id_on_first_run: true,
            structured_device_logging: false,
        };
        params
    }

    fn manager(params: MetricsStateParams) -> MetricsStateManager {
        MetricsStateBootstrap::new()
            .create(params)
            .expect("first construction")
    }

    #[test]
    fn bootstrap_constructs_once() {
        let store = Arc::new(InMemoryPrefStore::new());
        let bootstrap = MetricsStateBootstrap::new();
        assert!(!bootstrap.is_constructed());
        assert!(bootstrap.create(params(&store, false)).is_some());
        assert!(bootstrap.create(params(&store, false)).is_none());
        assert!(bootstrap.is_constructed());
    }

    #[test]
    fn consent_at_startup_creates_client_id() {
        let store = Arc::new(InMemoryPrefStore::new());
        let manager = manager(params(&store, true));
        assert!(is_valid_client_id(manager.client_id()));
        assert_eq!(manager.initial_client_id(), manager.client_id());
        assert!(manager.provisional_client_id().is_empty());
        assert_eq!(store.get_string(prefs::METRICS_CLIENT_ID), manager.client_id());
        assert_ne!(store.get_i64(prefs::METRICS_REPORTING_ENABLED_TIMESTAMP), 0);
    }

    #[test]
    fn repeated_creation_is_stable() {
        let store = Arc::new(InMemoryPrefStore::new());
        let histograms = Arc::new(HistogramRecorder::new());
        let mut params = params(&store, true);
        params.histograms = histograms.clone();
        let mut manager = manager(params);
        let id = manager.client_id().to_string();
        manager.force_client_id_creation();
        manager.force_client_id_creation();
        assert_eq!(manager.client_id(), id);
        assert_eq!(
            histograms.bucket_count(names::CLIENT_ID_SOURCE, ClientIdSource::ClientIdMatches as i64),
            2
        );
    }

    #[test]
    fn external_id_wins() {
        let store = Arc::new(InMemoryPrefStore::new());
        store.set_string(prefs::METRICS_CLIENT_ID, "from-prefs");
        let backup = Arc::new(InMemoryClientInfoBackup::new());
        let mut params = params(&store, true);
        params.external_client_id = Some("external-id".to_string());
        params.client_info_backup = Some(backup.clone());
        let manager = manager(params);
        assert_eq!(manager.client_id(), "external-id");
        assert_eq!(store.get_string(prefs::METRICS_CLIENT_ID), "external-id");
        assert_eq!(backup.store_count(), 0);
    }

    #[test]
    #[should_panic(expected = "requires metrics consent")]
    fn creation_without_consent_panics() {
        let store = Arc::new(InMemoryPrefStore::new());
        let mut manager = manager(params(&store, false));
        manager.force_client_id_creation();
    }

    #[test]
    fn recording_only_switch_allows_creation() {
        let store = Arc::new(InMemoryPrefStore::new());
        let mut params = params(&store, false);
        params.command_line = CommandLine::from_args(["--metrics-recording-only"]);
        let mut manager = manager(params);
        manager.force_client_id_creation();
        assert!(is_valid_client_id(manager.client_id()));
    }

    #[test]
    fn entropy_latch_is_set_once() {
        let store = Arc::new(InMemoryPrefStore::new());
        let histograms = Arc::new(HistogramRecorder::new());
        let mut params = params(&store, true);
        params.histograms = histograms.clone();
        let manager = manager(params);
        manager.create_low_entropy_provider();
        assert_eq!(manager.entropy_source_returned(), EntropySourceType::None);
        manager.create_default_entropy_provider();
        manager.create_default_entropy_provider();
        assert_eq!(manager.entropy_source_returned(), EntropySourceType::High);
        assert_eq!(histograms.total_count(names::ENTROPY_SOURCE_TYPE), 1);
    }

    #[test]
    fn no_identity_means_low_entropy() {
        let store = Arc::new(InMemoryPrefStore::new());
        let mut params = params(&store, false);
        params.platform.provisional_client_id_on_first_run = false;
        let manager = manager(params);
        assert!(manager.initial_client_id().is_empty());
        assert_eq!(manager.high_entropy_source(), None);
        manager.create_default_entropy_provider();
        assert_eq!(manager.entropy_source_returned(), EntropySourceType::Low);
    }

    #[test]
    fn malformed_params_switch_is_an_error() {
        let store = Arc::new(InMemoryPrefStore::new());
        let mut params = params(&store, false);
        params.command_line = CommandLine::from_args(["--force-fieldtrial-params=Broken"]);
        let mut manager = manager(params);
        let mut registry = FieldTrialRegistry::new();
        let err = manager
            .instantiate_field_trial_list(&mut registry, None, EntropyProviderType::Default)
            .expect_err("malformed switch");
        assert_eq!(err.code(), "MSM-1101");
        assert!(err.to_string().contains("--force-fieldtrial-params"));
        assert!(!manager.clean_exit_beacon().is_initialized());
    }

    #[test]
    fn gpu_switch_enables_benchmarking() {
        let store = Arc::new(InMemoryPrefStore::new());
        let mut params = params(&store, false);
        params.command_line = CommandLine::from_args(["--enable-gpu-benchmarking"]);
        let mut manager = manager(params);
        let mut registry = FieldTrialRegistry::new();
        manager
            .instantiate_field_trial_list(
                &mut registry,
                Some("enable-gpu-benchmarking"),
                EntropyProviderType::Low,
            )
            .expect("instantiate");
        assert!(registry.get().is_some_and(FieldTrialList::is_benchmarking));
        assert!(manager.clean_exit_beacon().is_initialized());
    }
}
