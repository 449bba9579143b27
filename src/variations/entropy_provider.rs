//! Entropy providers: map a trial name to a stable value in `[0, 1)`.

#![allow(missing_docs)]

use std::fmt::Debug;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::identity::entropy_state::MAX_LOW_ENTROPY_SIZE;

/// Which provider the field-trial registry should be created with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntropyProviderType {
    /// High entropy when a client id is available, low otherwise.
    #[default]
    Default,
    /// Always low entropy.
    Low,
}

/// Deterministic per-trial randomization.
pub trait EntropyProvider: Send + Sync + Debug {
    /// Value in `[0, 1)`, stable for a given source and `trial_name`.
    fn entropy_for_trial(&self, trial_name: &str) -> f64;
}

fn digest_prefix_u64(parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Top 53 bits as a double in `[0, 1)`.
fn unit_interval(value: u64) -> f64 {
    (value >> 11) as f64 / (1u64 << 53) as f64
}

/// Hashes the high entropy source together with the trial name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighEntropyProvider {
    entropy_source: String,
}

impl HighEntropyProvider {
    #[must_use]
    pub fn new(entropy_source: impl Into<String>) -> Self {
        Self {
            entropy_source: entropy_source.into(),
        }
    }

    #[must_use]
    pub fn entropy_source(&self) -> &str {
        &self.entropy_source
    }
}

impl EntropyProvider for HighEntropyProvider {
    fn entropy_for_trial(&self, trial_name: &str) -> f64 {
        unit_interval(digest_prefix_u64(&[
            self.entropy_source.as_bytes(),
            trial_name.as_bytes(),
        ]))
    }
}

/// Low entropy provider with a per-trial permutation of the source range.
///
/// Every value in `[0, range)` is hashed with the trial name; the result is
/// the rank of this install's value among them, divided by the range. The
/// output is therefore spread uniformly over the range for every trial
/// while trials stay uncorrelated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedLowEntropyProvider {
    low_entropy_source: i64,
    range: i64,
}

impl NormalizedLowEntropyProvider {
    #[must_use]
    pub fn new(low_entropy_source: i64) -> Self {
        Self::with_range(low_entropy_source, MAX_LOW_ENTROPY_SIZE)
    }

    /// `range` must be positive; `low_entropy_source` is reduced into it.
    #[must_use]
    pub fn with_range(low_entropy_source: i64, range: i64) -> Self {
        let range = range.max(1);
        Self {
            low_entropy_source: low_entropy_source.rem_euclid(range),
            range,
        }
    }

    #[must_use]
    pub const fn low_entropy_source(&self) -> i64 {
        self.low_entropy_source
    }

    fn slot_hash(trial_name: &str, slot: i64) -> u64 {
        digest_prefix_u64(&[trial_name.as_bytes(), &slot.to_be_bytes()])
    }
}

impl EntropyProvider for NormalizedLowEntropyProvider {
    fn entropy_for_trial(&self, trial_name: &str) -> f64 {
        let own = Self::slot_hash(trial_name, self.low_entropy_source);
        let rank = (0..self.range)
            .filter(|slot| Self::slot_hash(trial_name, *slot) < own)
            .count();
        rank as f64 / self.range as f64
    }
}
