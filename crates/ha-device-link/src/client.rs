//! Device client seam
//!
//! Vendor protocols live behind [`DeviceClient`]; the coordinator only sees
//! sessions and classified errors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ha_core::DeviceAddress;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Channel a client pushes device state updates into
pub type UpdateSender = mpsc::UnboundedSender<serde_json::Value>;

/// Descriptive fields reported by a device after connecting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
}

/// One connection attempt handed to a client
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Id the resulting session will carry
    pub session_id: String,
    pub address: DeviceAddress,
    /// Where the client sends push updates for this session
    pub updates: UpdateSender,
}

/// What a client returns for a successful connect
#[derive(Debug, Clone, Default)]
pub struct Connected {
    /// Credential issued by the device during pairing, if any
    pub credential: Option<String>,
    pub info: DeviceInfo,
}

/// A connection to one device, owned by the coordinator
///
/// Clones share the open flag: once any clone is disconnected, all of them
/// report `is_open() == false`.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    address: DeviceAddress,
    credential: Option<String>,
    info: DeviceInfo,
    open: Arc<AtomicBool>,
}

impl Session {
    pub(crate) fn new(id: String, address: DeviceAddress, connected: Connected) -> Self {
        Self {
            id,
            address,
            credential: connected.credential,
            info: connected.info,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Credential the device issued for this session, falling back to the
    /// one the address was dialed with
    pub fn credential(&self) -> Option<&str> {
        self.credential
            .as_deref()
            .or(self.address.credential.as_deref())
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Mark closed; returns whether this call closed it
    pub(crate) fn close(&self) -> bool {
        self.open.swap(false, Ordering::SeqCst)
    }
}

/// Vendor client for one device family
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Open a connection; registers with the device if it has no credential
    async fn connect(&self, request: ConnectRequest) -> Result<Connected, TransportError>;

    /// Whether the device accepted this client on an open connection
    async fn is_authorized(&self, session: &Session) -> bool;

    async fn disconnect(&self, session: &Session) -> Result<(), TransportError>;

    async fn send_command(
        &self,
        session: &Session,
        command: &str,
        payload: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, TransportError>;
}
