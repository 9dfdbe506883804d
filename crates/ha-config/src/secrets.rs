//! `secrets.yaml` lookup for the `!secret` tag

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Secrets loaded from `secrets.yaml` next to the configuration file
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    secrets: HashMap<String, String>,
    path: PathBuf,
}

impl Secrets {
    /// Load `config_dir/secrets.yaml`. A missing file yields no secrets.
    pub fn load(config_dir: &Path) -> ConfigResult<Self> {
        let path = config_dir.join("secrets.yaml");

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No secrets.yaml found at {:?}, using empty secrets", path);
                return Ok(Self {
                    secrets: HashMap::new(),
                    path,
                });
            }
            Err(source) => return Err(ConfigError::ReadFile { path, source }),
        };

        let raw: HashMap<String, Value> =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseYaml {
                path: path.clone(),
                source,
            })?;

        // Credentials are often numeric (PINs, ports); keep them as text
        let secrets: HashMap<String, String> = raw
            .into_iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Null => String::new(),
                    _ => return None,
                };
                Some((key, text))
            })
            .collect();

        debug!("Loaded {} secrets from {:?}", secrets.len(), path);
        Ok(Self { secrets, path })
    }

    pub fn get(&self, key: &str) -> ConfigResult<&str> {
        self.secrets
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| ConfigError::SecretNotFound {
                key: key.to_string(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.secrets.contains_key(key)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}
