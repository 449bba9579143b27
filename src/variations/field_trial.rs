//! Field-trial registry.
//!
//! A [`FieldTrialList`] owns every trial of the process and the entropy
//! provider that assigns groups. It lives inside a caller-owned
//! [`FieldTrialRegistry`] which creates it at most once.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::variations::entropy_provider::EntropyProvider;
use crate::variations::params::{
    FieldTrialParamAssociator, FieldTrialParams, parse_forced_params,
};

/// One experiment and its (possibly not yet chosen) group.
#[derive(Debug, Clone)]
pub struct FieldTrial {
    trial_name: String,
    default_group_name: String,
    total_probability: u32,
    accumulated_probability: u32,
    entropy: f64,
    groups: Vec<String>,
    group_name: Option<String>,
    forced: bool,
    activated: bool,
}

impl FieldTrial {
    fn randomized(trial_name: &str, total_probability: u32, default_group_name: &str, entropy: f64) -> Self {
        Self {
            trial_name: trial_name.to_string(),
            default_group_name: default_group_name.to_string(),
            total_probability: total_probability.max(1),
            accumulated_probability: 0,
            entropy,
            groups: Vec::new(),
            group_name: None,
            forced: false,
            activated: false,
        }
    }

    fn forced(trial_name: &str, group_name: &str) -> Self {
        Self {
            trial_name: trial_name.to_string(),
            default_group_name: group_name.to_string(),
            total_probability: 1,
            accumulated_probability: 0,
            entropy: 0.0,
            groups: Vec::new(),
            group_name: Some(group_name.to_string()),
            forced: true,
            activated: false,
        }
    }

    #[must_use]
    pub fn trial_name(&self) -> &str {
        &self.trial_name
    }

    /// Add a group owning `probability` out of the trial's total. The first
    /// group whose accumulated probability exceeds the entropy draw wins.
    /// No-op once a group has been chosen.
    pub fn append_group(&mut self, group_name: &str, probability: u32) {
        if self.group_name.is_some() {
            return;
        }
        self.groups.push(group_name.to_string());
        let remaining = self.total_probability - self.accumulated_probability;
        self.accumulated_probability += probability.min(remaining);
        let draw = (self.entropy * f64::from(self.total_probability)).floor();
        if draw < f64::from(self.accumulated_probability) {
            self.group_name = Some(group_name.to_string());
        }
    }

    /// Chosen group, finalizing to the default group if none matched.
    /// Reading the group activates the trial.
    pub fn group_name(&mut self) -> &str {
        self.activated = true;
        self.group_name
            .get_or_insert_with(|| self.default_group_name.clone())
    }

    /// Chosen group without finalizing or activating.
    #[must_use]
    pub fn group_name_without_activation(&self) -> Option<&str> {
        self.group_name.as_deref()
    }

    #[must_use]
    pub const fn is_forced(&self) -> bool {
        self.forced
    }

    #[must_use]
    pub const fn is_activated(&self) -> bool {
        self.activated
    }
}

/// Reported view of one trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialState {
    pub trial_name: String,
    pub group_name: Option<String>,
    pub forced: bool,
    pub activated: bool,
}

/// A `Trial/Group` pair from the forced-trials switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForcedTrial {
    pub trial_name: String,
    pub group_name: String,
    /// Written with a leading `*`.
    pub activate: bool,
}

/// Parse `Trial1/Group1/*Trial2/Group2/`. The trailing `/` is optional;
/// `None` for a dangling trial or an empty name.
#[must_use]
pub fn parse_field_trials_string(input: &str) -> Option<Vec<ForcedTrial>> {
    let trimmed = input.strip_suffix('/').unwrap_or(input);
    if trimmed.is_empty() {
        return Some(Vec::new());
    }
    let tokens: Vec<&str> = trimmed.split('/').collect();
    if tokens.len() % 2 != 0 {
        return None;
    }
    tokens
        .chunks(2)
        .map(|pair| {
            let (trial_name, activate) = match pair[0].strip_prefix('*') {
                Some(name) => (name, true),
                None => (pair[0], false),
            };
            if trial_name.is_empty() || pair[1].is_empty() {
                return None;
            }
            Some(ForcedTrial {
                trial_name: trial_name.to_string(),
                group_name: pair[1].to_string(),
                activate,
            })
        })
        .collect()
}

/// All trials of one process.
#[derive(Debug)]
pub struct FieldTrialList {
    entropy_provider: Arc<dyn EntropyProvider>,
    trials: BTreeMap<String, FieldTrial>,
    params: FieldTrialParamAssociator,
    benchmarking: bool,
}

impl FieldTrialList {
    #[must_use]
    pub fn new(entropy_provider: Arc<dyn EntropyProvider>) -> Self {
        Self {
            entropy_provider,
            trials: BTreeMap::new(),
            params: FieldTrialParamAssociator::new(),
            benchmarking: false,
        }
    }

    #[must_use]
    pub fn entropy_provider(&self) -> &Arc<dyn EntropyProvider> {
        &self.entropy_provider
    }

    /// Every trial created from now on resolves to its default group.
    pub fn enable_benchmarking(&mut self) {
        self.benchmarking = true;
    }

    #[must_use]
    pub const fn is_benchmarking(&self) -> bool {
        self.benchmarking
    }

    /// Existing trial named `trial_name`, or a new randomized one.
    pub fn factory_get_field_trial(
        &mut self,
        trial_name: &str,
        total_probability: u32,
        default_group_name: &str,
    ) -> &mut FieldTrial {
        let benchmarking = self.benchmarking;
        let provider = &self.entropy_provider;
        self.trials.entry(trial_name.to_string()).or_insert_with(|| {
            if benchmarking {
                FieldTrial::forced(trial_name, default_group_name)
            } else {
                let entropy = provider.entropy_for_trial(trial_name);
                FieldTrial::randomized(trial_name, total_probability, default_group_name, entropy)
            }
        })
    }

    /// Create a trial pinned to `group_name`. Fails if the trial already
    /// exists with a different group.
    pub fn create_field_trial(&mut self, trial_name: &str, group_name: &str) -> Option<&mut FieldTrial> {
        if let Some(existing) = self.trials.get(trial_name)
            && existing.group_name_without_activation() != Some(group_name)
        {
            return None;
        }
        Some(
            self.trials
                .entry(trial_name.to_string())
                .or_insert_with(|| FieldTrial::forced(trial_name, group_name)),
        )
    }

    /// Apply a forced-trials string. Trials are created but only those
    /// marked with `*` are activated. Returns the number of trials applied.
    pub fn create_trials_from_string(&mut self, input: &str) -> Option<usize> {
        let forced = parse_field_trials_string(input)?;
        for entry in &forced {
            let trial = self.create_field_trial(&entry.trial_name, &entry.group_name)?;
            if entry.activate {
                trial.group_name();
            }
        }
        Some(forced.len())
    }

    /// Apply a forced-params string. Returns the number of groups that
    /// received params.
    pub fn associate_params_from_string(&mut self, input: &str) -> Option<usize> {
        let parsed = parse_forced_params(input)?;
        for entry in &parsed {
            if !self
                .params
                .associate(&entry.trial_name, &entry.group_name, entry.params.clone())
            {
                return None;
            }
        }
        Some(parsed.len())
    }

    pub fn associate_params(
        &mut self,
        trial_name: &str,
        group_name: &str,
        params: FieldTrialParams,
    ) -> bool {
        self.params.associate(trial_name, group_name, params)
    }

    /// Params of the group `trial_name` resolved to. Activates the trial.
    pub fn params_for_trial(&mut self, trial_name: &str) -> Option<FieldTrialParams> {
        let group = self.find_full_name(trial_name)?;
        self.params.get(trial_name, &group).cloned()
    }

    /// Group of `trial_name`, activating it. `None` if no such trial.
    pub fn find_full_name(&mut self, trial_name: &str) -> Option<String> {
        self.trials
            .get_mut(trial_name)
            .map(|trial| trial.group_name().to_string())
    }

    #[must_use]
    pub fn trial_exists(&self, trial_name: &str) -> bool {
        self.trials.contains_key(trial_name)
    }

    #[must_use]
    pub fn trial(&self, trial_name: &str) -> Option<&FieldTrial> {
        self.trials.get(trial_name)
    }

    #[must_use]
    pub fn trial_count(&self) -> usize {
        self.trials.len()
    }

    #[must_use]
    pub fn param_group_count(&self) -> usize {
        self.params.len()
    }

    /// Snapshot of every trial without activating any of them.
    #[must_use]
    pub fn trial_states(&self) -> Vec<TrialState> {
        self.trials
            .values()
            .map(|trial| TrialState {
                trial_name: trial.trial_name.clone(),
                group_name: trial.group_name.clone(),
                forced: trial.forced,
                activated: trial.activated,
            })
            .collect()
    }

    /// `(trial, group)` of every activated trial.
    #[must_use]
    pub fn active_groups(&self) -> Vec<(String, String)> {
        self.trials
            .values()
            .filter(|trial| trial.activated)
            .filter_map(|trial| {
                trial
                    .group_name
                    .as_ref()
                    .map(|group| (trial.trial_name.clone(), group.clone()))
            })
            .collect()
    }
}

/// Caller-owned slot holding the process's [`FieldTrialList`].
#[derive(Debug, Default)]
pub struct FieldTrialRegistry {
    list: Option<FieldTrialList>,
}

impl FieldTrialRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.list.is_none()
    }

    /// The existing list, or one built by `create` if the slot is empty.
    pub fn get_or_create_with(
        &mut self,
        create: impl FnOnce() -> FieldTrialList,
    ) -> &mut FieldTrialList {
        self.list.get_or_insert_with(create)
    }

    #[must_use]
    pub fn get(&self) -> Option<&FieldTrialList> {
        self.list.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut FieldTrialList> {
        self.list.as_mut()
    }
}
