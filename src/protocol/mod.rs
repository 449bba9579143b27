//! Outgoing telemetry payload records.
//!
//! Only the fields the identity core fills are modelled. All timestamps are
//! Unix seconds.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::stability::clean_exit_beacon::Channel;

const SECONDS_PER_HOUR: i64 = 3600;

/// Clone-reset history as reported upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClonedInstallInfoProto {
    pub count: i64,
    pub first_timestamp: i64,
    pub last_timestamp: i64,
    /// Hash of the client id the clone inherited; only set in the session
    /// that applied the reset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloned_from_client_id: Option<u64>,
}

/// Install-level facts attached to every log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uma_enabled_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id_was_used_for_trial_assignment: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloned_install_info: Option<ClonedInstallInfoProto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
}

/// One uploaded metrics log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UmaLog {
    /// Hashed client id.
    pub client_id: u64,
    #[serde(default)]
    pub system_profile: SystemProfile,
}

/// First eight bytes of SHA-256(`client_id`), little-endian.
#[must_use]
pub fn hash_client_id(client_id: &str) -> u64 {
    let digest = Sha256::digest(client_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Round a Unix timestamp down to the start of its hour.
#[must_use]
pub const fn round_seconds_to_hour(seconds: i64) -> i64 {
    seconds - seconds.rem_euclid(SECONDS_PER_HOUR)
}
