//! Field-trial parameters: the forced-params switch parser and the
//! per-(trial, group) associator.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use serde::Serialize;

/// Key/value parameters attached to one trial group.
pub type FieldTrialParams = BTreeMap<String, String>;

/// One `Trial.Group:k/v/...` entry of the forced-params switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForcedTrialParams {
    pub trial_name: String,
    pub group_name: String,
    pub params: FieldTrialParams,
}

/// Decode `%XX` escapes. Malformed escapes are kept verbatim.
#[must_use]
pub fn unescape_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2]))
        {
            out.push((hi << 4) | lo);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

const fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Parse `Trial.Group:k1/v1/k2/v2,Trial2.Group2:k/v`.
///
/// Names, keys and values are split first and percent-unescaped after, so
/// `%2E`, `%3A`, `%2F` and `%2C` can carry the separator characters.
/// Returns `None` for any malformed entry.
#[must_use]
pub fn parse_forced_params(input: &str) -> Option<Vec<ForcedTrialParams>> {
    let mut parsed = Vec::new();
    for entry in input.split(',') {
        let (trial_group, key_values) = entry.split_once(':')?;
        let (trial_name, group_name) = trial_group.split_once('.')?;
        if group_name.contains('.') || trial_name.is_empty() || group_name.is_empty() {
            return None;
        }

        let tokens: Vec<&str> = key_values.split('/').collect();
        if tokens.len() % 2 != 0 {
            return None;
        }
        let params = tokens
            .chunks(2)
            .map(|pair| (unescape_value(pair[0]), unescape_value(pair[1])))
            .collect();
        parsed.push(ForcedTrialParams {
            trial_name: unescape_value(trial_name),
            group_name: unescape_value(group_name),
            params,
        });
    }
    Some(parsed)
}

/// Stores parameters per (trial, group). The first association wins.
#[derive(Debug, Clone, Default)]
pub struct FieldTrialParamAssociator {
    params: BTreeMap<(String, String), FieldTrialParams>,
}

impl FieldTrialParamAssociator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if params for this (trial, group) already exist.
    pub fn associate(
        &mut self,
        trial_name: &str,
        group_name: &str,
        params: FieldTrialParams,
    ) -> bool {
        let key = (trial_name.to_string(), group_name.to_string());
        if self.params.contains_key(&key) {
            return false;
        }
        self.params.insert(key, params);
        true
    }

    #[must_use]
    pub fn get(&self, trial_name: &str, group_name: &str) -> Option<&FieldTrialParams> {
        self.params
            .get(&(trial_name.to_string(), group_name.to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}
