//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use metrics_state_manager::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{MsmError, Result};

// Local state
pub use crate::prefs::local_state::{InMemoryPrefStore, JsonPrefStore, PrefStore};

// Platform
pub use crate::platform::pal::{
    FixedMachineIdProvider, MachineIdProvider, PlatformCapabilities, detect_machine_id_provider,
};

// Identity
pub use crate::identity::client_info::{
    ClientInfo, ClientInfoBackup, FileClientInfoBackup, InMemoryClientInfoBackup,
};
pub use crate::identity::cloned_install::{ClonedInstallInfo, MachineIdState};
pub use crate::identity::metrics_provider::MetricsStateMetricsProvider;
pub use crate::identity::state_manager::{
    EnabledStateProvider, EntropySourceType, MetricsStateBootstrap, MetricsStateManager,
    MetricsStateParams, SwitchableEnabledState,
};

// Variations
pub use crate::variations::entropy_provider::{EntropyProvider, EntropyProviderType};
pub use crate::variations::field_trial::{FieldTrialList, FieldTrialRegistry};
pub use crate::variations::switches::CommandLine;

// Stability
pub use crate::stability::clean_exit_beacon::{Channel, CleanExitBeacon, StartupVisibility};

// Telemetry payload
pub use crate::protocol::{SystemProfile, UmaLog};
