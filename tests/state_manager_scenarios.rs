//! Multi-session identity scenarios against an in-memory local state:
//! provisional ids, consent promotion, backup recovery, cloned-install
//! resets and resolution priority.

use std::sync::Arc;

use chrono::Utc;

use metrics_state_manager::identity::client_info::{
    ClientInfo, ClientInfoBackup, InMemoryClientInfoBackup, is_valid_client_id,
};
use metrics_state_manager::identity::cloned_install::MachineIdState;
use metrics_state_manager::identity::state_manager::{
    ClientIdSource, EntropySourceType, MetricsStateBootstrap, MetricsStateManager,
    MetricsStateParams, SwitchableEnabledState,
};
use metrics_state_manager::logger::histograms::{HistogramRecorder, names};
use metrics_state_manager::platform::pal::{FixedMachineIdProvider, PlatformCapabilities};
use metrics_state_manager::prefs::local_state::{InMemoryPrefStore, PrefStore};
use metrics_state_manager::prefs::names as prefs;
use metrics_state_manager::protocol::{SystemProfile, UmaLog, hash_client_id};
use metrics_state_manager::variations::switches::CommandLine;

const BACKUP_ID: &str = "0a94430b-18e5-43c8-a657-580f7e855ce1";

struct Harness {
    store: Arc<InMemoryPrefStore>,
    backup: Arc<InMemoryClientInfoBackup>,
    histograms: Arc<HistogramRecorder>,
    machine: Arc<FixedMachineIdProvider>,
    provisional_on_first_run: bool,
}

impl Harness {
    fn new() -> Self {
        Self::with_backup(InMemoryClientInfoBackup::new())
    }

    fn with_backup(backup: InMemoryClientInfoBackup) -> Self {
        Self {
            store: Arc::new(InMemoryPrefStore::new()),
            backup: Arc::new(backup),
            histograms: Arc::new(HistogramRecorder::new()),
            machine: Arc::new(FixedMachineIdProvider::new("machine-a")),
            provisional_on_first_run: true,
        }
    }

    fn params(&self, enabled: Arc<SwitchableEnabledState>) -> MetricsStateParams {
        let mut params = MetricsStateParams::new(self.store.clone(), enabled);
        params.client_info_backup = Some(self.backup.clone());
        params.histograms = self.histograms.clone();
        params.machine_id_provider = Some(self.machine.clone());
        params.platform = PlatformCapabilities {
            provisional_client_id_on_first_run: self.provisional_on_first_run,
            structured_device_logging: false,
        };
        params
    }

    /// One process lifetime: a fresh bootstrap over the shared store.
    fn session(&self, consent: bool) -> (MetricsStateManager, Arc<SwitchableEnabledState>) {
        let enabled = Arc::new(SwitchableEnabledState::new(consent));
        let manager = MetricsStateBootstrap::new()
            .create(self.params(enabled.clone()))
            .expect("first construction");
        (manager, enabled)
    }

    fn source_count(&self, source: ClientIdSource) -> u64 {
        self.histograms
            .bucket_count(names::CLIENT_ID_SOURCE, source as i64)
    }
}

// ──────────────────── first run ────────────────────

#[test]
fn fresh_install_with_provisional_capability() {
    let harness = Harness::new();
    let (manager, _) = harness.session(false);

    assert!(manager.client_id().is_empty());
    assert!(is_valid_client_id(manager.provisional_client_id()));
    assert_eq!(manager.initial_client_id(), manager.provisional_client_id());
    assert_ne!(harness.store.get_i64(prefs::INSTALL_DATE), 0);
    assert_eq!(harness.backup.store_count(), 0);
    assert!(harness.store.get_string(prefs::METRICS_CLIENT_ID).is_empty());

    manager.create_default_entropy_provider();
    assert_eq!(manager.entropy_source_returned(), EntropySourceType::High);
}

#[test]
fn fresh_install_without_provisional_capability() {
    let mut harness = Harness::new();
    harness.provisional_on_first_run = false;
    let (manager, _) = harness.session(false);

    assert!(manager.client_id().is_empty());
    assert!(manager.provisional_client_id().is_empty());
    assert!(manager.initial_client_id().is_empty());
    assert_eq!(manager.high_entropy_source(), None);

    manager.create_default_entropy_provider();
    assert_eq!(manager.entropy_source_returned(), EntropySourceType::Low);
}

#[test]
fn consent_granted_later_promotes_provisional_id() {
    let harness = Harness::new();
    let (mut manager, enabled) = harness.session(false);
    let provisional = manager.provisional_client_id().to_string();

    enabled.set_consent_given(true);
    manager.force_client_id_creation();

    assert_eq!(manager.client_id(), provisional);
    assert!(manager.provisional_client_id().is_empty());
    assert_eq!(manager.initial_client_id(), provisional);
    assert_eq!(harness.store.get_string(prefs::METRICS_CLIENT_ID), provisional);
    assert_ne!(
        harness
            .store
            .get_i64(prefs::METRICS_REPORTING_ENABLED_TIMESTAMP),
        0
    );
    assert_eq!(harness.backup.store_count(), 1);
    assert_eq!(harness.backup.stored()[0].client_id, provisional);
    assert_eq!(harness.source_count(ClientIdSource::ClientIdFromProvisionalId), 1);

    let mut profile = SystemProfile::default();
    manager
        .get_provider()
        .provide_system_profile_metrics(&mut profile);
    assert_eq!(profile.client_id_was_used_for_trial_assignment, Some(true));
}

#[test]
fn provisional_id_is_only_offered_on_first_run() {
    let harness = Harness::new();
    drop(harness.session(false));
    let (manager, _) = harness.session(false);
    assert!(manager.provisional_client_id().is_empty());
    assert!(manager.initial_client_id().is_empty());
}

// ──────────────────── stability ────────────────────

#[test]
fn client_id_is_stable_across_sessions() {
    let harness = Harness::new();
    let (first, _) = harness.session(true);
    let id = first.client_id().to_string();
    let high = first.high_entropy_source();
    let low = first.low_entropy_source();
    drop(first);

    let (second, _) = harness.session(true);
    assert_eq!(second.client_id(), id);
    assert_eq!(second.high_entropy_source(), high);
    assert_eq!(second.low_entropy_source(), low);
    assert_eq!(harness.source_count(ClientIdSource::ClientIdNew), 1);
    assert_eq!(harness.source_count(ClientIdSource::ClientIdFromLocalState), 1);
}

#[test]
fn low_entropy_source_is_sampled_once_per_session() {
    let harness = Harness::new();
    let (manager, _) = harness.session(false);
    let value = manager.low_entropy_source();
    assert!((0..8000).contains(&value));
    assert_eq!(manager.low_entropy_source(), value);
    assert_eq!(
        harness
            .histograms
            .total_count(names::LOW_ENTROPY_SOURCE_VALUE),
        1
    );
}

// ──────────────────── backup recovery ────────────────────

#[test]
fn backup_restores_id_and_dates_after_local_state_loss() {
    let harness = Harness::with_backup(InMemoryClientInfoBackup::with_backup(ClientInfo {
        client_id: BACKUP_ID.to_string(),
        installation_date: 1_000,
        reporting_enabled_date: 2_000,
    }));
    let (manager, _) = harness.session(true);

    assert_eq!(manager.client_id(), BACKUP_ID);
    assert_eq!(harness.store.get_i64(prefs::INSTALL_DATE), 1_000);
    assert_eq!(
        harness
            .store
            .get_i64(prefs::METRICS_REPORTING_ENABLED_TIMESTAMP),
        2_000
    );
    assert_eq!(harness.source_count(ClientIdSource::ClientIdBackupRecovered), 1);
    assert_eq!(
        harness
            .histograms
            .total_count(names::CLIENT_ID_BACKUP_RECOVERED_WITH_AGE),
        1
    );
    let stored = harness.backup.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].client_id, BACKUP_ID);
    assert_eq!(stored[0].installation_date, 1_000);
}

#[test]
fn backup_without_dates_stamps_now() {
    let harness = Harness::with_backup(InMemoryClientInfoBackup::with_backup(ClientInfo {
        client_id: BACKUP_ID.to_string(),
        installation_date: 0,
        reporting_enabled_date: 0,
    }));
    let before = Utc::now().timestamp();
    let (manager, _) = harness.session(true);
    let after = Utc::now().timestamp();

    assert_eq!(manager.client_id(), BACKUP_ID);
    let install = harness.store.get_i64(prefs::INSTALL_DATE);
    let enabled = harness
        .store
        .get_i64(prefs::METRICS_REPORTING_ENABLED_TIMESTAMP);
    assert!((before..=after).contains(&install));
    assert!((before..=after).contains(&enabled));
    assert_eq!(
        harness
            .histograms
            .total_count(names::CLIENT_ID_BACKUP_RECOVERED_WITH_AGE),
        0
    );
}

#[test]
fn malformed_backup_id_is_ignored() {
    let harness = Harness::with_backup(InMemoryClientInfoBackup::with_backup(ClientInfo {
        client_id: "not-a-uuid".to_string(),
        installation_date: 1_000,
        reporting_enabled_date: 2_000,
    }));
    let (manager, _) = harness.session(true);
    assert!(is_valid_client_id(manager.client_id()));
    assert_ne!(manager.client_id(), "not-a-uuid");
    assert_eq!(harness.source_count(ClientIdSource::ClientIdNew), 1);
}

#[test]
fn existing_local_state_wins_over_backup() {
    let harness = Harness::with_backup(InMemoryClientInfoBackup::with_backup(ClientInfo {
        client_id: BACKUP_ID.to_string(),
        installation_date: 1_000,
        reporting_enabled_date: 2_000,
    }));
    let local_id = "6f3c0f9e-5f0b-4d7e-9b55-0d7f4a1b2c3d";
    harness.store.set_string(prefs::METRICS_CLIENT_ID, local_id);
    let (manager, _) = harness.session(true);
    assert_eq!(manager.client_id(), local_id);
    assert_eq!(harness.backup.store_count(), 0);
}

#[test]
fn external_id_beats_local_state_and_backup() {
    let harness = Harness::with_backup(InMemoryClientInfoBackup::with_backup(ClientInfo {
        client_id: BACKUP_ID.to_string(),
        ..ClientInfo::default()
    }));
    harness
        .store
        .set_string(prefs::METRICS_CLIENT_ID, "6f3c0f9e-5f0b-4d7e-9b55-0d7f4a1b2c3d");
    let enabled = Arc::new(SwitchableEnabledState::new(true));
    let mut params = harness.params(enabled);
    params.external_client_id = Some("embedder-id".to_string());
    let manager = MetricsStateBootstrap::new()
        .create(params)
        .expect("first construction");

    assert_eq!(manager.client_id(), "embedder-id");
    assert_eq!(harness.store.get_string(prefs::METRICS_CLIENT_ID), "embedder-id");
    assert_eq!(harness.source_count(ClientIdSource::ClientIdFromExternal), 1);
}

#[test]
fn force_enable_switch_allows_creation_without_consent() {
    let harness = Harness::new();
    let enabled = Arc::new(SwitchableEnabledState::new(false));
    let mut params = harness.params(enabled);
    params.command_line = CommandLine::from_args(["--force-enable-metrics-reporting"]);
    let mut manager = MetricsStateBootstrap::new()
        .create(params)
        .expect("first construction");
    manager.force_client_id_creation();
    assert!(is_valid_client_id(manager.client_id()));
}

// ──────────────────── cloned install ────────────────────

#[test]
fn machine_id_change_resets_identity_and_entropy() {
    let harness = Harness::new();
    let (first, _) = harness.session(true);
    let old_id = first.client_id().to_string();
    let old_high = first.high_entropy_source().expect("high entropy");
    first.low_entropy_source();
    assert_eq!(
        first
            .cloned_install_detector()
            .and_then(|d| d.last_machine_id_state()),
        Some(MachineIdState::IdNoStoredValue)
    );
    drop(first);

    harness.machine.set("machine-b");
    let (second, _) = harness.session(true);

    assert!(second.metrics_ids_were_reset());
    assert_eq!(second.previous_client_id(), old_id);
    assert!(is_valid_client_id(second.client_id()));
    assert_ne!(second.client_id(), old_id);
    assert_ne!(second.high_entropy_source().expect("high entropy"), old_high);
    assert_eq!(harness.store.get_i64(prefs::CLONED_RESET_COUNT), 1);
    assert!(!harness.store.get_bool(prefs::METRICS_RESET_IDS));
    assert_eq!(
        harness
            .histograms
            .total_count(names::METRICS_IDS_RESET),
        1
    );

    // The reset stored an empty backup before the new id was backed up.
    let stored = harness.backup.stored();
    assert!(stored.iter().any(|info| info.client_id.is_empty()));
    assert_eq!(
        stored.last().map(|info| info.client_id.as_str()),
        Some(second.client_id())
    );

    let provider = second.get_provider();
    let mut profile = SystemProfile::default();
    provider.provide_system_profile_metrics(&mut profile);
    let cloned = profile.cloned_install_info.expect("cloned install info");
    assert_eq!(cloned.count, 1);
    assert_eq!(cloned.cloned_from_client_id, Some(hash_client_id(&old_id)));

    let mut previous = UmaLog::default();
    provider.provide_previous_session_data(&mut previous);
    assert_eq!(previous.client_id, hash_client_id(&old_id));
}

#[test]
fn reset_happens_once_per_detection() {
    let harness = Harness::new();
    drop(harness.session(true));
    harness.machine.set("machine-b");
    drop(harness.session(true));
    let (third, _) = harness.session(true);
    assert!(!third.metrics_ids_were_reset());
    assert_eq!(harness.store.get_i64(prefs::CLONED_RESET_COUNT), 1);
}

#[test]
fn reset_clears_both_low_entropy_prefs() {
    let harness = Harness::new();
    harness.store.set_i64(prefs::METRICS_LOW_ENTROPY_SOURCE, 1234);
    harness.store.set_i64(prefs::METRICS_OLD_LOW_ENTROPY_SOURCE, 42);
    let (first, _) = harness.session(false);
    assert_eq!(first.low_entropy_source(), 1234);
    assert_eq!(first.old_low_entropy_source(), Some(42));
    drop(first);

    harness.machine.set("machine-b");
    let (second, _) = harness.session(false);
    assert!(second.metrics_ids_were_reset());
    assert!(!harness.store.has_user_value(prefs::METRICS_LOW_ENTROPY_SOURCE));
    assert!(!harness.store.has_user_value(prefs::METRICS_OLD_LOW_ENTROPY_SOURCE));

    let regenerated = second.low_entropy_source();
    assert!((0..8000).contains(&regenerated));
    assert_eq!(
        harness.store.get_i64(prefs::METRICS_LOW_ENTROPY_SOURCE),
        regenerated
    );
    assert_eq!(second.old_low_entropy_source(), None);
}

#[test]
fn reset_without_consent_leaves_no_client_id() {
    let harness = Harness::new();
    drop(harness.session(true));
    harness.machine.set("machine-b");
    let (manager, _) = harness.session(false);
    assert!(manager.metrics_ids_were_reset());
    assert!(manager.client_id().is_empty());
    assert!(harness.store.get_string(prefs::METRICS_CLIENT_ID).is_empty());
    assert_eq!(harness.backup.load(), None);
}

// ──────────────────── reporting façade ────────────────────

#[test]
fn id_created_after_trials_is_not_reported_as_trial_id() {
    let harness = Harness::new();
    drop(harness.session(false));

    let enabled = Arc::new(SwitchableEnabledState::new(false));
    let mut params = harness.params(enabled);
    params.command_line = CommandLine::from_args(["--metrics-recording-only"]);
    let mut manager = MetricsStateBootstrap::new()
        .create(params)
        .expect("first construction");
    assert!(manager.initial_client_id().is_empty());

    manager.force_client_id_creation();
    assert!(is_valid_client_id(manager.client_id()));

    let mut profile = SystemProfile::default();
    manager
        .get_provider()
        .provide_system_profile_metrics(&mut profile);
    assert_eq!(profile.client_id_was_used_for_trial_assignment, Some(false));
}
