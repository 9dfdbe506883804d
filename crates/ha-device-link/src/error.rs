//! Error types for the device link
//!
//! Device clients report [`TransportError`]s. The coordinator collapses them
//! into the four [`ConnectError`] outcomes that flows and the hub match on.

use ha_config::ConfigError;
use ha_config_entries::ConfigEntriesError;
use ha_core::AddressError;
use ha_registries::StorageError;
use ha_service_registry::ServiceError;
use thiserror::Error;

use crate::pairing::PairingTransitionError;

/// Failure reported by a device client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection refused")]
    Refused,

    #[error("connection closed")]
    Closed,

    #[error("timed out")]
    Timeout,

    #[error("socket error: {0}")]
    Socket(String),

    /// The device answered but refused the credential, or pairing was not
    /// confirmed on the device
    #[error("rejected by device: {0}")]
    Rejected(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Classified outcome of a failed connection attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// Reachable but not authorized; pairing must be (re)done
    #[error("device did not authorize this client")]
    Unauthorized,

    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected device error: {0}")]
    Unknown(String),

    /// Attempt abandoned because the hub is shutting down
    #[error("connection attempt cancelled")]
    Cancelled,
}

impl ConnectError {
    /// Reason code shown in flow errors and aborts
    pub fn reason_code(&self) -> &'static str {
        match self {
            ConnectError::Unauthorized => "invalid_auth",
            ConnectError::Unreachable(_) => "cannot_connect",
            ConnectError::Unknown(_) => "unknown",
            ConnectError::Cancelled => "cancelled",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectError::Unreachable(_))
    }
}

impl From<TransportError> for ConnectError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Rejected(_) => ConnectError::Unauthorized,
            TransportError::Refused
            | TransportError::Closed
            | TransportError::Timeout
            | TransportError::Socket(_) => ConnectError::Unreachable(error.to_string()),
            TransportError::Protocol(reason) => ConnectError::Unknown(reason),
        }
    }
}

/// Errors surfaced by the hub and lifecycle manager
#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    /// Input rejected before anything reached the network
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} is already configured")]
    AlreadyConfigured(String),

    #[error("unknown integration: {0}")]
    UnknownDomain(String),

    #[error("unknown flow: {0}")]
    UnknownFlow(String),

    #[error("unknown config entry: {0}")]
    UnknownEntry(String),

    #[error("failed to forward {component}: {reason}")]
    Forward { component: String, reason: String },

    #[error(transparent)]
    Pairing(#[from] PairingTransitionError),

    #[error(transparent)]
    Entries(#[from] ConfigEntriesError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type LinkResult<T> = Result<T, LinkError>;
