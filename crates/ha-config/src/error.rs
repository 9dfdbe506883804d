//! Error types for configuration loading

use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading `configuration.yaml`
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("secret '{key}' not found in secrets.yaml")]
    SecretNotFound { key: String },

    #[error("environment variable '{var}' not set")]
    EnvVarNotFound { var: String },

    /// A custom tag was given something other than a string
    #[error("{tag} expects a string argument")]
    InvalidTagArgument { tag: String },

    #[error("circular include detected: {path}")]
    CircularInclude { path: PathBuf },

    /// A section did not have the expected shape
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}
