//! Platform capabilities and machine-identity providers (Linux, fixed).
//!
//! Behavior that differs per OS is resolved once into [`PlatformCapabilities`]
//! at startup; the identity core only ever branches on those flags.

#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Behavioral switches that vary by host platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformCapabilities {
    /// Mint a provisional client id on first run, before consent is known,
    /// so first-run field trials can use high entropy.
    pub provisional_client_id_on_first_run: bool,
    /// Mirror identity resets into the structured device event log.
    pub structured_device_logging: bool,
}

impl PlatformCapabilities {
    /// Capabilities of the platform this binary was built for.
    #[must_use]
    pub const fn detect() -> Self {
        Self {
            provisional_client_id_on_first_run: !cfg!(target_os = "windows"),
            structured_device_logging: cfg!(target_os = "linux"),
        }
    }
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        Self::detect()
    }
}

/// Source of the hardware/OS identity signal used for clone detection.
///
/// Two boots of the same image on different machines must yield different
/// values; an empty string means the signal is unavailable.
pub trait MachineIdProvider: Send + Sync {
    fn machine_id(&self) -> String;
}

/// Reads the systemd/dbus machine id.
#[derive(Debug, Clone)]
pub struct LinuxMachineIdProvider {
    candidates: Vec<PathBuf>,
}

impl Default for LinuxMachineIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxMachineIdProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::with_candidates(vec![
            PathBuf::from("/etc/machine-id"),
            PathBuf::from("/var/lib/dbus/machine-id"),
        ])
    }

    /// Probe `candidates` in order; the first non-empty file wins.
    #[must_use]
    pub fn with_candidates(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }
}

impl MachineIdProvider for LinuxMachineIdProvider {
    fn machine_id(&self) -> String {
        self.candidates
            .iter()
            .filter_map(|path| fs::read_to_string(path).ok())
            .map(|raw| raw.trim().to_string())
            .find(|id| !id.is_empty())
            .unwrap_or_default()
    }
}

/// Fixed or test-controlled identity signal.
#[derive(Debug, Default)]
pub struct FixedMachineIdProvider {
    id: RwLock<String>,
}

impl FixedMachineIdProvider {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: RwLock::new(id.to_string()),
        }
    }

    /// Simulate booting the image on different hardware.
    pub fn set(&self, id: &str) {
        *self.id.write() = id.to_string();
    }
}

impl MachineIdProvider for FixedMachineIdProvider {
    fn machine_id(&self) -> String {
        self.id.read().clone()
    }
}

/// Detect the identity provider for this platform, if any.
#[must_use]
pub fn detect_machine_id_provider() -> Option<Arc<dyn MachineIdProvider>> {
    #[cfg(target_os = "linux")]
    {
        Some(Arc::new(LinuxMachineIdProvider::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_provider_skips_missing_and_blank_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blank = dir.path().join("blank");
        let real = dir.path().join("machine-id");
        fs::write(&blank, "  \n").expect("write blank");
        fs::write(&real, "0123456789abcdef\n").expect("write id");
        let provider = LinuxMachineIdProvider::with_candidates(vec![
            dir.path().join("missing"),
            blank,
            real,
        ]);
        assert_eq!(provider.machine_id(), "0123456789abcdef");
    }

    #[test]
    fn linux_provider_without_sources_is_empty() {
        let provider = LinuxMachineIdProvider::with_candidates(vec![PathBuf::from(
            "/nonexistent_msm_test_dir/machine-id",
        )]);
        assert!(provider.machine_id().is_empty());
    }

    #[test]
    fn fixed_provider_can_change_identity() {
        let provider = FixedMachineIdProvider::new("a");
        assert_eq!(provider.machine_id(), "a");
        provider.set("b");
        assert_eq!(provider.machine_id(), "b");
    }

    #[test]
    fn detected_capabilities_follow_target_os() {
        let caps = PlatformCapabilities::detect();
        assert_eq!(
            caps.provisional_client_id_on_first_run,
            !cfg!(target_os = "windows")
        );
    }
}
