//! Flat string-keyed plugin configuration.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Immutable mapping of plugin data keys to string values.
///
/// Supplied once when a dispatcher is constructed. Each backend validates its
/// own required keys with [`PluginData::require`] before doing anything else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginData(BTreeMap<String, String>);

impl PluginData {
    /// Creates an empty plugin data map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with `key` set to `value`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Ensures every key in `keys` is present and non-empty.
    ///
    /// All missing keys are reported together in a single error.
    pub fn require(&self, keys: &[&str]) -> Result<(), ConfigError> {
        let mut missing: Vec<String> = keys
            .iter()
            .filter(|key| self.get(key).is_none())
            .map(|key| key.to_string())
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        missing.sort();
        missing.dedup();
        Err(ConfigError::MissingKeys { keys: missing })
    }

    /// Returns the value for `key`, treating empty strings as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Returns the value for a key previously checked with [`PluginData::require`].
    pub fn get_required(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingKeys {
            keys: vec![key.to_string()],
        })
    }

    /// Returns the value for `key` or `default` when absent.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parses `key` as a boolean, returning `false` when absent.
    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        Ok(self.get_opt_bool(key)?.unwrap_or(false))
    }

    /// Parses `key` as an optional boolean.
    pub fn get_opt_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.get(key).map(|v| parse_bool(v, key)).transpose()
    }

    /// Parses `key` as an optional value of type `T`.
    pub fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.get(key)
            .map(|v| {
                v.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("could not parse '{v}'"),
                })
            })
            .transpose()
    }

    /// Splits a comma-separated value into trimmed, non-empty entries.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key).map(split_list).unwrap_or_default()
    }

    /// Decodes a standard base64 value.
    pub fn get_base64(&self, key: &str) -> Result<Option<Vec<u8>>, ConfigError> {
        self.get(key)
            .map(|v| {
                BASE64
                    .decode(v)
                    .map_err(|source| ConfigError::InvalidBase64 {
                        key: key.to_string(),
                        source,
                    })
            })
            .transpose()
    }

    /// Inserts or replaces a value. Only used while assembling configuration,
    /// before a dispatcher is constructed.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }
}

/// Splits a comma-separated string into trimmed, non-empty entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("expected boolean value, got '{value}'"),
        }),
    }
}
