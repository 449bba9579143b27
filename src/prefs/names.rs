//! Persisted local-state key names.
//!
//! Keys are stable on-disk identifiers; renaming one orphans existing installs.

/// Durable client identifier (lowercase UUID string).
pub const METRICS_CLIENT_ID: &str = "metrics.client_id2";
/// Unix seconds when metrics reporting was first enabled.
pub const METRICS_REPORTING_ENABLED_TIMESTAMP: &str = "metrics.reporting_enabled_date";
/// Unix seconds of the first run of this install.
pub const INSTALL_DATE: &str = "metrics.install_date";

/// Current low entropy source, in `[0, 8000)`.
pub const METRICS_LOW_ENTROPY_SOURCE: &str = "metrics.low_entropy_source3";
/// Legacy low entropy source kept for experiment continuity.
pub const METRICS_OLD_LOW_ENTROPY_SOURCE: &str = "metrics.low_entropy_source2";

/// 24-bit hash of the machine identity signal.
pub const METRICS_MACHINE_ID: &str = "metrics.machine_id";
/// Set when a machine-id change was seen; consumed by the same session's reset.
pub const METRICS_RESET_IDS: &str = "metrics.reset_client_id_deterministic";
/// Number of cloned-install resets applied to this install.
pub const CLONED_RESET_COUNT: &str = "metrics.cloned_install.count";
/// Unix seconds of the first cloned-install reset.
pub const FIRST_CLONED_RESET_TIMESTAMP: &str = "metrics.cloned_install.first_timestamp";
/// Unix seconds of the most recent cloned-install reset.
pub const LAST_CLONED_RESET_TIMESTAMP: &str = "metrics.cloned_install.last_timestamp";

/// Whether the previous session shut down cleanly.
pub const STABILITY_EXITED_CLEANLY: &str = "stability.exited_cleanly";
/// Consecutive sessions that did not exit cleanly.
pub const VARIATIONS_CRASH_STREAK: &str = "variations.crash_streak";
