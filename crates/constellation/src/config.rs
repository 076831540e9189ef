// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol constants and the satellite-facing configuration view.

use crate::protocol::value::{Dictionary, Value};
use std::fmt;
use std::time::Duration;

/// Well-known UDP port for CHIRP discovery beacons.
pub const CHIRP_PORT: u16 = 7123;

/// Missed heartbeats tolerated before a remote is declared dead.
pub const CHP_LIVES: u8 = 3;

/// Default heartbeat interval.
pub const CHP_DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Maximum heartbeat interval a sender may advertise.
pub const CHP_MAX_INTERVAL: Duration = Duration::from_millis(5000);

/// Upper bound on watchdog sleep between liveness checks.
pub const CHP_WATCHDOG_SLEEP: Duration = Duration::from_secs(3);

/// Clock deviation between peers above which a warning is logged.
pub const CHP_CLOCK_SKEW_WARN: Duration = Duration::from_secs(3);

/// Default timeout for a CSCP request/reply roundtrip.
pub const CSCP_TIMEOUT: Duration = Duration::from_secs(3);

/// Check a satellite type or name part: `[A-Za-z0-9_-]+`.
pub fn valid_name_part(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Typed read access to a satellite configuration dictionary.
///
/// Key lookup is case-insensitive; keys are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    dict: Dictionary,
}

/// Error returned when a configuration key is missing or has the wrong type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    MissingKey(String),
    WrongType { key: String, expected: &'static str },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::MissingKey(key) => write!(f, "Key {:?} missing", key),
            ConfigurationError::WrongType { key, expected } => {
                write!(f, "Key {:?} is not of type {}", key, expected)
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

impl Configuration {
    /// Wrap a dictionary, lowercasing keys for case-insensitive lookup.
    pub fn from_dictionary(dict: Dictionary) -> Self {
        let dict = dict
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self { dict }
    }

    /// The underlying dictionary.
    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    pub fn has(&self, key: &str) -> bool {
        self.dict.contains_key(&key.to_ascii_lowercase())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.dict.get(&key.to_ascii_lowercase())
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigurationError> {
        match self.get(key) {
            Some(Value::Bool(v)) => Ok(*v),
            Some(_) => Err(ConfigurationError::WrongType {
                key: key.to_string(),
                expected: "bool",
            }),
            None => Err(ConfigurationError::MissingKey(key.to_string())),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64, ConfigurationError> {
        match self.get(key) {
            Some(Value::Int(v)) => Ok(*v),
            Some(_) => Err(ConfigurationError::WrongType {
                key: key.to_string(),
                expected: "integer",
            }),
            None => Err(ConfigurationError::MissingKey(key.to_string())),
        }
    }

    pub fn get_float(&self, key: &str) -> Result<f64, ConfigurationError> {
        match self.get(key) {
            Some(Value::Float(v)) => Ok(*v),
            Some(Value::Int(v)) => Ok(*v as f64),
            Some(_) => Err(ConfigurationError::WrongType {
                key: key.to_string(),
                expected: "float",
            }),
            None => Err(ConfigurationError::MissingKey(key.to_string())),
        }
    }

    pub fn get_text(&self, key: &str) -> Result<&str, ConfigurationError> {
        match self.get(key) {
            Some(Value::Str(v)) => Ok(v),
            Some(_) => Err(ConfigurationError::WrongType {
                key: key.to_string(),
                expected: "string",
            }),
            None => Err(ConfigurationError::MissingKey(key.to_string())),
        }
    }

    /// Overlay `other` on this configuration (used by reconfigure).
    pub fn merge(&mut self, other: &Dictionary) {
        for (key, value) in other {
            self.dict.insert(key.to_ascii_lowercase(), value.clone());
        }
    }
}
