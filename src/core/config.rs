//! Configuration system: TOML file + env var overrides + defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{MsmError, Result};
use crate::logger::jsonl::JsonlConfig;
use crate::stability::clean_exit_beacon::{Channel, DEFAULT_BEACON_FILE_NAME};

/// Full MSM configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub reporting: ReportingConfig,
    pub calibration: CalibrationConfig,
    pub logging: LoggingConfig,
    pub channel: Channel,
}

/// Filesystem locations of persisted state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub local_state_file: PathBuf,
    pub client_info_backup_file: PathBuf,
    pub user_data_dir: PathBuf,
    /// Clean-exit beacon file name inside `user_data_dir`.
    pub beacon_file_name: String,
    pub event_log: PathBuf,
}

/// Consent and identity inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportingConfig {
    pub consent_given: bool,
    /// Identifier supplied by an embedder; adopted verbatim when set.
    pub external_client_id: Option<String>,
    pub backup_enabled: bool,
}

/// Parameters of the log-normal data-validation sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalibrationConfig {
    pub log_normal_mean: f64,
    pub log_normal_delta: f64,
    pub log_normal_std_dev: f64,
}

/// Structured event log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub jsonl_enabled: bool,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[MSM-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("msm").join("config.toml");
        let data = home_dir.join(".local").join("share").join("msm");
        Self {
            config_file: cfg,
            local_state_file: data.join("Local State"),
            client_info_backup_file: data.join("client_info.json"),
            user_data_dir: data.clone(),
            beacon_file_name: DEFAULT_BEACON_FILE_NAME.to_string(),
            event_log: data.join("events.jsonl"),
        }
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            consent_given: false,
            external_client_id: None,
            backup_enabled: true,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            // ln(100)
            log_normal_mean: 4.605,
            log_normal_delta: 0.0,
            log_normal_std_dev: 1.5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            jsonl_enabled: true,
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl LoggingConfig {
    /// Writer settings for the event log at `path`.
    #[must_use]
    pub fn jsonl_config(&self, path: &Path) -> JsonlConfig {
        JsonlConfig {
            path: path.to_path_buf(),
            fallback_path: Some(env::temp_dir().join("msm-events.jsonl")),
            max_size_bytes: self.max_size_bytes,
            max_rotated_files: self.max_rotated_files,
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| MsmError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(MsmError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // paths
        set_path(&mut lookup, "MSM_PATHS_LOCAL_STATE_FILE", &mut self.paths.local_state_file);
        set_path(
            &mut lookup,
            "MSM_PATHS_CLIENT_INFO_BACKUP_FILE",
            &mut self.paths.client_info_backup_file,
        );
        set_path(&mut lookup, "MSM_PATHS_USER_DATA_DIR", &mut self.paths.user_data_dir);
        set_path(&mut lookup, "MSM_PATHS_EVENT_LOG", &mut self.paths.event_log);
        if let Some(raw) = lookup("MSM_PATHS_BEACON_FILE_NAME") {
            self.paths.beacon_file_name = raw;
        }

        // reporting
        if let Some(raw) = lookup("MSM_REPORTING_CONSENT_GIVEN") {
            self.reporting.consent_given = parse_env("MSM_REPORTING_CONSENT_GIVEN", &raw)?;
        }
        if let Some(raw) = lookup("MSM_REPORTING_EXTERNAL_CLIENT_ID") {
            self.reporting.external_client_id = Some(raw);
        }
        if let Some(raw) = lookup("MSM_REPORTING_BACKUP_ENABLED") {
            self.reporting.backup_enabled = parse_env("MSM_REPORTING_BACKUP_ENABLED", &raw)?;
        }

        // calibration
        if let Some(raw) = lookup("MSM_CALIBRATION_LOG_NORMAL_MEAN") {
            self.calibration.log_normal_mean = parse_env("MSM_CALIBRATION_LOG_NORMAL_MEAN", &raw)?;
        }
        if let Some(raw) = lookup("MSM_CALIBRATION_LOG_NORMAL_DELTA") {
            self.calibration.log_normal_delta =
                parse_env("MSM_CALIBRATION_LOG_NORMAL_DELTA", &raw)?;
        }
        if let Some(raw) = lookup("MSM_CALIBRATION_LOG_NORMAL_STD_DEV") {
            self.calibration.log_normal_std_dev =
                parse_env("MSM_CALIBRATION_LOG_NORMAL_STD_DEV", &raw)?;
        }

        // logging
        if let Some(raw) = lookup("MSM_LOGGING_JSONL_ENABLED") {
            self.logging.jsonl_enabled = parse_env("MSM_LOGGING_JSONL_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("MSM_LOGGING_MAX_SIZE_BYTES") {
            self.logging.max_size_bytes = parse_env("MSM_LOGGING_MAX_SIZE_BYTES", &raw)?;
        }
        if let Some(raw) = lookup("MSM_LOGGING_MAX_ROTATED_FILES") {
            self.logging.max_rotated_files = parse_env("MSM_LOGGING_MAX_ROTATED_FILES", &raw)?;
        }

        if let Some(raw) = lookup("MSM_CHANNEL") {
            self.channel = raw.parse()?;
        }
        Ok(())
    }

    /// Validate cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        let calibration = &self.calibration;
        if !calibration.log_normal_std_dev.is_finite() || calibration.log_normal_std_dev <= 0.0 {
            return Err(MsmError::InvalidConfig {
                details: format!(
                    "calibration.log_normal_std_dev must be finite and > 0, got {}",
                    calibration.log_normal_std_dev
                ),
            });
        }
        if !calibration.log_normal_mean.is_finite() {
            return Err(MsmError::InvalidConfig {
                details: "calibration.log_normal_mean must be finite".to_string(),
            });
        }
        if !calibration.log_normal_delta.is_finite() || calibration.log_normal_delta <= -1.0 {
            return Err(MsmError::InvalidConfig {
                details: format!(
                    "calibration.log_normal_delta must be finite and > -1, got {}",
                    calibration.log_normal_delta
                ),
            });
        }

        if self.logging.max_size_bytes == 0 {
            return Err(MsmError::InvalidConfig {
                details: "logging.max_size_bytes must be > 0".to_string(),
            });
        }

        if let Some(external) = &self.reporting.external_client_id
            && external.trim().is_empty()
        {
            return Err(MsmError::InvalidConfig {
                details: "reporting.external_client_id must not be empty when set".to_string(),
            });
        }

        if self.paths.beacon_file_name.contains(['/', '\\']) {
            return Err(MsmError::InvalidConfig {
                details: format!(
                    "paths.beacon_file_name must be a bare file name, got {:?}",
                    self.paths.beacon_file_name
                ),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_path<F>(lookup: &mut F, name: &str, slot: &mut PathBuf)
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = PathBuf::from(raw);
    }
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| MsmError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
