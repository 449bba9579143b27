#![forbid(unsafe_code)]

//! Metrics state manager (msm): durable telemetry client identity and the
//! experiment bootstrap that hangs off it.
//!
//! Four concerns share one local-state store:
//! 1. **Client id**: consent-gated, recoverable from a backup, stable across runs
//! 2. **Entropy sources**: low (0..8000) and high (id-derived) trial randomization
//! 3. **Cloned-install detection**: machine-id hashing and a one-shot identity reset
//! 4. **Field-trial bootstrap**: forced trials/params from process switches
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use metrics_state_manager::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use metrics_state_manager::core::config::Config;
//! use metrics_state_manager::identity::state_manager::{MetricsStateBootstrap, MetricsStateParams};
//! ```

pub mod prelude;

pub mod core;
pub mod identity;
pub mod logger;
pub mod platform;
pub mod prefs;
pub mod protocol;
pub mod stability;
pub mod variations;
