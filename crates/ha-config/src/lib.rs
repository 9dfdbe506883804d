//! Configuration loading
//!
//! Reads `configuration.yaml` with its custom tags resolved:
//!
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR` - Environment variable substitution
//! - `!include path` - Include another YAML file
//!
//! and parses it into a [`CoreConfig`]: the `device_link:` settings plus the
//! devices listed under each integration domain.
//!
//! # Example
//!
//! ```ignore
//! use ha_config::CoreConfig;
//!
//! let config = CoreConfig::load("/config")?;
//! for device in config.devices("webostv") {
//!     println!("{}", device.host);
//! }
//! ```

mod core_config;
mod error;
mod loader;
mod secrets;

pub use core_config::{
    CoreConfig, Customize, ImportedAction, ImportedDevice, LinkSettings, SETTINGS_KEY,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::Secrets;

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
