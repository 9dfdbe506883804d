//! Device Link
//!
//! Pairing, connection coordination and lifecycle management for networked
//! devices such as a webOS TV or a Hue bridge.
//!
//! # Key Types
//!
//! - [`ConnectionCoordinator`] - Owns the sessions of one integration and
//!   classifies connection failures
//! - [`PairingFlow`] - Address, connect, authorize, register
//! - [`OptionsFlow`] - Edits the on-connect action and sources of an entry
//! - [`LifecycleManager`] - Forwards components and registers commands once
//!   a device is ready
//! - [`DeviceHub`] - Owns all of the above plus the entry and command stores
//!
//! Vendor protocols stay behind the [`DeviceClient`] trait and component
//! platforms behind [`PlatformForwarder`].

pub mod client;
pub mod coordinator;
pub mod error;
pub mod flow;
pub mod hub;
pub mod integration;
pub mod lifecycle;
pub mod options;
pub mod pairing;

// Re-export main types
pub use client::{ConnectRequest, Connected, DeviceClient, DeviceInfo, Session, UpdateSender};
pub use coordinator::{ConnectionCoordinator, SubscriptionHandle, DEFAULT_CONNECT_TIMEOUT};
pub use error::{ConnectError, LinkError, LinkResult, TransportError};
pub use flow::{FlowResult, FlowResultType, FormField};
pub use hub::DeviceHub;
pub use integration::{CommandSpec, Integration, HUE, WEBOSTV};
pub use lifecycle::{LifecycleManager, LifecycleRecord, LoadedPlatforms, PlatformForwarder};
pub use options::{OptionsFlow, OptionsStep};
pub use pairing::{
    parse_sources, PairingFlow, PairingInput, PairingState, PairingStep, PairingTransitionError,
    STEP_PAIRING, STEP_USER,
};
