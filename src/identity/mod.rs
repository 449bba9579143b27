//! Client identity: id lifecycle and backup, entropy sources, cloned-install
//! detection, and the telemetry façade over them.

pub mod client_info;
pub mod cloned_install;
pub mod entropy_state;
pub mod metrics_provider;
pub mod state_manager;
