//! Device addresses and host normalization

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced when building a [`DeviceAddress`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("host must not be empty")]
    EmptyHost,

    #[error("host '{0}' contains whitespace")]
    Whitespace(String),
}

/// Normalize a host string into its stable dedup key.
///
/// Trims surrounding whitespace, lower-cases, strips IPv6 brackets and
/// trailing dots so `" LGTV.local. "` and `"lgtv.local"` compare equal.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// Where a device lives and how to authenticate against it
///
/// The host is kept as the user entered it; [`DeviceAddress::key`] gives the
/// normalized form used for deduplication and per-address locking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    /// Host name or IP address
    pub host: String,

    /// Stored credential (client key, bridge username)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl DeviceAddress {
    /// Create an address without a credential
    pub fn new(host: impl Into<String>) -> Result<Self, AddressError> {
        let host = host.into();
        let trimmed = host.trim();
        if trimmed.is_empty() {
            return Err(AddressError::EmptyHost);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(AddressError::Whitespace(host));
        }
        Ok(Self {
            host: trimmed.to_string(),
            credential: None,
        })
    }

    /// Attach a credential
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Normalized host, used as the unique key for this device
    pub fn key(&self) -> String {
        normalize_host(&self.host)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host)
    }
}
