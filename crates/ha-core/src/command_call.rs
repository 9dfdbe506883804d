//! Command call type for invoking registered device commands

use crate::Context;
use serde::{Deserialize, Serialize};

/// A call to a command registered by an integration
///
/// Commands are namespaced by integration domain (`webostv.button`,
/// `hue.hue_activate_scene`). The payload has already been validated
/// against the command's declared shape by the time a handler sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandCall {
    /// Integration domain (e.g., "webostv", "hue")
    pub domain: String,

    /// Command name (e.g., "button", "hue_activate_scene")
    pub command: String,

    /// Command payload
    pub payload: serde_json::Value,

    pub context: Context,
}

impl CommandCall {
    pub fn new(
        domain: impl Into<String>,
        command: impl Into<String>,
        payload: serde_json::Value,
        context: Context,
    ) -> Self {
        Self {
            domain: domain.into(),
            command: command.into(),
            payload,
            context,
        }
    }

    /// Full command identifier (domain.command)
    pub fn command_id(&self) -> String {
        format!("{}.{}", self.domain, self.command)
    }

    /// Get a value from the payload
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.payload
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Optional routing host carried in the payload
    pub fn target_host(&self) -> Option<&str> {
        self.payload.get("host").and_then(|v| v.as_str())
    }

    /// Payload without the `host` routing field
    pub fn device_payload(&self) -> serde_json::Value {
        match &self.payload {
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .filter(|(k, _)| k.as_str() != "host")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Whether a command returns a response to its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportsResponse {
    #[default]
    None,
    Optional,
    Only,
}
