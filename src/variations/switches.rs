//! Command-line switch lookup and the switch names this crate consumes.

#![allow(missing_docs)]

use std::collections::BTreeMap;

/// Forces default groups for every field trial (benchmark runs).
pub const ENABLE_BENCHMARKING: &str = "enable-benchmarking";
/// `Trial.Group:key/value/key/value,...` parameters to associate.
pub const FORCE_FIELD_TRIAL_PARAMS: &str = "force-fieldtrial-params";
/// `Trial/Group/Trial/Group/` groups to force.
pub const FORCE_FIELD_TRIALS: &str = "force-fieldtrials";
/// Treat metrics reporting as enabled regardless of consent.
pub const FORCE_ENABLE_METRICS_REPORTING: &str = "force-enable-metrics-reporting";
/// Record metrics locally without uploading.
pub const METRICS_RECORDING_ONLY: &str = "metrics-recording-only";
/// Discard the persisted low entropy sources before first use.
pub const RESET_VARIATION_STATE: &str = "reset-variation-state";

/// Parsed `--name` / `--name=value` switches. Later occurrences win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    switches: BTreeMap<String, String>,
}

impl CommandLine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse switches out of `args`. Positional arguments are ignored and a
    /// bare `--` ends switch parsing.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut command_line = Self::new();
        for arg in args {
            let arg = arg.as_ref();
            if arg == "--" {
                break;
            }
            let Some(body) = arg.strip_prefix("--") else {
                continue;
            };
            match body.split_once('=') {
                Some((name, value)) => command_line.append_switch_value(name, value),
                None => command_line.append_switch(body),
            }
        }
        command_line
    }

    pub fn append_switch(&mut self, name: &str) {
        self.append_switch_value(name, "");
    }

    pub fn append_switch_value(&mut self, name: &str, value: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        self.switches
            .insert(name.to_ascii_lowercase(), value.to_string());
    }

    #[must_use]
    pub fn has_switch(&self, name: &str) -> bool {
        self.switches.contains_key(&name.to_ascii_lowercase())
    }

    /// Value of `name`; empty for valueless switches, `None` when absent.
    #[must_use]
    pub fn switch_value(&self, name: &str) -> Option<&str> {
        self.switches
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}
