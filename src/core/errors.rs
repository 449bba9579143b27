//! MSM-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, MsmError>;

/// Top-level error type for the metrics state manager.
#[derive(Debug, Error)]
pub enum MsmError {
    #[error("[MSM-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[MSM-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[MSM-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    /// Malformed experiment switch on the command line. The display text is the
    /// diagnostic printed right before the process exits.
    #[error("[MSM-1101] Invalid --{switch} list specified.")]
    InvalidSwitch { switch: String },

    #[error("[MSM-2001] local state failure at {path}: {details}")]
    PrefStore { path: PathBuf, details: String },

    #[error("[MSM-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[MSM-2201] client info backup failure: {details}")]
    ClientInfoBackup { details: String },

    #[error("[MSM-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MsmError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "MSM-1001",
            Self::MissingConfig { .. } => "MSM-1002",
            Self::ConfigParse { .. } => "MSM-1003",
            Self::InvalidSwitch { .. } => "MSM-1101",
            Self::PrefStore { .. } => "MSM-2001",
            Self::Serialization { .. } => "MSM-2101",
            Self::ClientInfoBackup { .. } => "MSM-2201",
            Self::Io { .. } => "MSM-3002",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::PrefStore { .. } | Self::ClientInfoBackup { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for malformed command-line switches.
    #[must_use]
    pub fn invalid_switch(switch: &str) -> Self {
        Self::InvalidSwitch {
            switch: switch.to_string(),
        }
    }
}

impl From<serde_json::Error> for MsmError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for MsmError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
