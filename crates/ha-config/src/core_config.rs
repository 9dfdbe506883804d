//! Typed view of `configuration.yaml`
//!
//! ```yaml
//! device_link:
//!   connect_timeout: 15
//!   retry_setup: true
//!
//! webostv:
//!   host: !secret tv_host
//!   name: Living Room TV
//!   customize:
//!     sources: [HDMI1, Netflix]
//!
//! hue:
//!   - host: 10.0.0.2
//!     username: !secret hue_user
//! ```

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// Section holding the link settings; every other key is a domain
pub const SETTINGS_KEY: &str = "device_link";

fn default_connect_timeout() -> u64 {
    10
}

fn default_retry_setup() -> bool {
    true
}

/// `device_link:` settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkSettings {
    /// Seconds before a connection attempt counts as unreachable
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Reschedule setup of unreachable devices
    #[serde(default = "default_retry_setup")]
    pub retry_setup: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            retry_setup: default_retry_setup(),
        }
    }
}

impl LinkSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

/// Service invoked when a device is turned on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedAction {
    pub service: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customize {
    #[serde(default)]
    pub sources: Vec<String>,
}

/// A device configured in YAML, imported into a config entry on startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedDevice {
    pub host: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    /// Pre-issued credential (a Hue bridge username)
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub turn_on_action: Option<ImportedAction>,
    #[serde(default)]
    pub customize: Customize,
}

/// Parsed `configuration.yaml`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreConfig {
    pub settings: LinkSettings,
    /// Devices to import, by integration domain
    pub imports: BTreeMap<String, Vec<ImportedDevice>>,
}

impl CoreConfig {
    /// Load `configuration.yaml` from a config directory
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let yaml = load_yaml(config_dir.as_ref(), "configuration.yaml")?;
        Self::from_yaml(yaml)
    }

    pub fn from_yaml(yaml: Value) -> ConfigResult<Self> {
        let mapping = match yaml {
            Value::Mapping(mapping) => mapping,
            Value::Null => return Ok(Self::default()),
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "root".to_string(),
                    reason: "configuration must be a mapping".to_string(),
                })
            }
        };

        let mut config = Self::default();
        for (key, value) in mapping {
            let Value::String(key) = key else {
                return Err(ConfigError::InvalidValue {
                    key: format!("{:?}", key),
                    reason: "top-level keys must be strings".to_string(),
                });
            };

            if key == SETTINGS_KEY {
                config.settings = match value {
                    Value::Null => LinkSettings::default(),
                    value => serde_yaml::from_value(value).map_err(|e| {
                        ConfigError::InvalidValue {
                            key: key.clone(),
                            reason: e.to_string(),
                        }
                    })?,
                };
                continue;
            }

            let devices = parse_devices(&key, value)?;
            config.imports.insert(key, devices);
        }

        Ok(config)
    }

    pub fn devices(&self, domain: &str) -> &[ImportedDevice] {
        self.imports.get(domain).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A domain holds one device mapping or a list of them
fn parse_devices(domain: &str, value: Value) -> ConfigResult<Vec<ImportedDevice>> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        key: domain.to_string(),
        reason,
    };

    let items = match value {
        Value::Null => Vec::new(),
        Value::Sequence(items) => items,
        mapping @ Value::Mapping(_) => vec![mapping],
        _ => return Err(invalid("expected a device mapping or a list".to_string())),
    };

    items
        .into_iter()
        .map(|item| serde_yaml::from_value(item).map_err(|e| invalid(e.to_string())))
        .collect()
}
