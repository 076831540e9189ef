// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller-side configuration: TOML to per-satellite dictionaries.
//!
//! The file holds three layers which merge per satellite, most specific
//! last:
//!
//! ```toml
//! verbosity = "INFO"          # global: applied to every satellite
//!
//! [type.Cam]                  # per type
//! exposure = 20
//!
//! [satellites.Cam.top]        # per satellite
//! position = "upstream"
//! ```
//!
//! Type and name matching is case-insensitive.

use crate::protocol::value::{Dictionary, Value};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Configuration parsing errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Raw document shape: the `type` and `satellites` tables are split off,
/// every remaining top-level key is global.
#[derive(Debug, Deserialize)]
struct RawConfiguration {
    #[serde(default, rename = "type")]
    types: HashMap<String, toml::Table>,

    #[serde(default)]
    satellites: HashMap<String, HashMap<String, toml::Table>>,

    #[serde(flatten)]
    global: toml::Table,
}

/// Parsed controller configuration, ready to emit per-satellite
/// dictionaries.
#[derive(Debug, Default)]
pub struct ControllerConfiguration {
    global: Dictionary,
    /// Keyed by lowercased type name.
    types: HashMap<String, Dictionary>,
    /// Keyed by lowercased canonical name.
    satellites: HashMap<String, Dictionary>,
}

impl ControllerConfiguration {
    /// Parse a TOML document.
    pub fn from_toml(toml_text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfiguration = toml::from_str(toml_text)?;

        let mut config = Self {
            global: convert_table(raw.global),
            ..Self::default()
        };
        for (type_name, section) in raw.types {
            config
                .types
                .insert(type_name.to_ascii_lowercase(), convert_table(section));
        }
        for (type_name, names) in raw.satellites {
            for (name, section) in names {
                let canonical = format!("{}.{}", type_name, name).to_ascii_lowercase();
                config.satellites.insert(canonical, convert_table(section));
            }
        }
        Ok(config)
    }

    /// Parse a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Assemble the dictionary for one satellite: global keys, overlaid by
    /// its type section, overlaid by its own section. Returns `None` when
    /// nothing in the configuration applies to it.
    pub fn get_satellite_configuration(&self, canonical_name: &str) -> Option<Dictionary> {
        let lowered = canonical_name.to_ascii_lowercase();
        let type_name = lowered.split('.').next().unwrap_or("");

        let type_section = self.types.get(type_name);
        let satellite_section = self.satellites.get(&lowered);

        if self.global.is_empty() && type_section.is_none() && satellite_section.is_none() {
            return None;
        }

        let mut dict = self.global.clone();
        if let Some(section) = type_section {
            for (key, value) in section {
                dict.insert(key.clone(), value.clone());
            }
        }
        if let Some(section) = satellite_section {
            for (key, value) in section {
                dict.insert(key.clone(), value.clone());
            }
        }
        Some(dict)
    }

    /// Assemble dictionaries for a set of satellites. Satellites the
    /// configuration knows nothing about are absent from the result.
    pub fn get_satellite_configurations(
        &self,
        canonical_names: impl IntoIterator<Item = String>,
    ) -> std::collections::BTreeMap<String, Dictionary> {
        canonical_names
            .into_iter()
            .filter_map(|name| {
                self.get_satellite_configuration(&name)
                    .map(|dict| (name, dict))
            })
            .collect()
    }
}

/// Map a TOML table onto a configuration dictionary.
fn convert_table(table: toml::Table) -> Dictionary {
    table
        .into_iter()
        .map(|(key, value)| (key, convert_value(value)))
        .collect()
}

/// Map a TOML value onto the control-plane value model.
fn convert_value(value: toml::Value) -> Value {
    match value {
        toml::Value::String(v) => Value::Str(v),
        toml::Value::Integer(v) => Value::Int(v),
        toml::Value::Float(v) => Value::Float(v),
        toml::Value::Boolean(v) => Value::Bool(v),
        toml::Value::Datetime(v) => Value::Str(v.to_string()),
        toml::Value::Array(items) => Value::List(items.into_iter().map(convert_value).collect()),
        toml::Value::Table(table) => Value::Map(convert_table(table)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        a = 1

        [type.Cam]
        b = 2

        [satellites.Cam.top]
        c = 3
    "#;

    #[test]
    fn test_three_layer_merge() {
        let config = ControllerConfiguration::from_toml(SAMPLE).unwrap();

        let top = config.get_satellite_configuration("Cam.top").unwrap();
        assert_eq!(top.get("a"), Some(&Value::Int(1)));
        assert_eq!(top.get("b"), Some(&Value::Int(2)));
        assert_eq!(top.get("c"), Some(&Value::Int(3)));

        let bottom = config.get_satellite_configuration("Cam.bottom").unwrap();
        assert_eq!(bottom.get("a"), Some(&Value::Int(1)));
        assert_eq!(bottom.get("b"), Some(&Value::Int(2)));
        assert_eq!(bottom.get("c"), None);

        let dut = config.get_satellite_configuration("Dut.x").unwrap();
        assert_eq!(dut.get("a"), Some(&Value::Int(1)));
        assert_eq!(dut.len(), 1);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let config = ControllerConfiguration::from_toml(SAMPLE).unwrap();
        let upper = config.get_satellite_configuration("CAM.TOP").unwrap();
        let lower = config.get_satellite_configuration("cam.top").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.get("c"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_specific_overrides_type_overrides_global() {
        let toml_text = r#"
            rate = 1

            [type.Cam]
            rate = 2

            [satellites.Cam.top]
            rate = 3
        "#;
        let config = ControllerConfiguration::from_toml(toml_text).unwrap();
        assert_eq!(
            config
                .get_satellite_configuration("Cam.top")
                .unwrap()
                .get("rate"),
            Some(&Value::Int(3))
        );
        assert_eq!(
            config
                .get_satellite_configuration("Cam.bottom")
                .unwrap()
                .get("rate"),
            Some(&Value::Int(2))
        );
        assert_eq!(
            config
                .get_satellite_configuration("Dut.x")
                .unwrap()
                .get("rate"),
            Some(&Value::Int(1))
        );
    }

    #[test]
    fn test_unknown_satellite_with_empty_global_is_absent() {
        let toml_text = r#"
            [satellites.Cam.top]
            c = 3
        "#;
        let config = ControllerConfiguration::from_toml(toml_text).unwrap();
        assert!(config.get_satellite_configuration("Dut.x").is_none());

        let result = config.get_satellite_configurations(vec![
            "Cam.top".to_string(),
            "Dut.x".to_string(),
        ]);
        assert_eq!(result.len(), 1);
        assert!(result.contains_key("Cam.top"));
    }

    #[test]
    fn test_value_types_convert() {
        let toml_text = r#"
            flag = true
            count = 7
            scale = 1.5
            label = "cam"
            channels = [1, 2, 3]
        "#;
        let config = ControllerConfiguration::from_toml(toml_text).unwrap();
        let dict = config.get_satellite_configuration("Any.sat").unwrap();
        assert_eq!(dict.get("flag"), Some(&Value::Bool(true)));
        assert_eq!(dict.get("count"), Some(&Value::Int(7)));
        assert_eq!(dict.get("scale"), Some(&Value::Float(1.5)));
        assert_eq!(dict.get("label"), Some(&Value::Str("cam".to_string())));
        assert_eq!(
            dict.get("channels"),
            Some(&Value::List(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3)
            ]))
        );
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        assert!(matches!(
            ControllerConfiguration::from_toml("a = ["),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_scalar_in_section_position_is_rejected() {
        assert!(matches!(
            ControllerConfiguration::from_toml("type = 5"),
            Err(ConfigError::Toml(_))
        ));
    }
}
