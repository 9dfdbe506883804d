//! Core types shared by the device link crates
//!
//! This crate provides the small vocabulary every other crate speaks:
//! device addresses, events, command calls and the context that ties
//! them together.

mod address;
mod command_call;
mod context;
mod event;

pub use address::{normalize_host, AddressError, DeviceAddress};
pub use command_call::{CommandCall, SupportsResponse};
pub use context::Context;
pub use event::{Event, EventData, EventType};

/// Standard event types fired on the bus
pub mod events {
    use super::*;

    /// Fired once when the owning process begins shutting down
    pub const HOMEASSISTANT_STOP: &str = "homeassistant_stop";

    /// Fired when a connected device pushes a state update
    pub const DEVICE_STATE_UPDATED: &str = "device_link_state_updated";

    /// Fired after an entry's options were replaced
    pub const ENTRY_OPTIONS_UPDATED: &str = "config_entry_options_updated";

    /// Data for DEVICE_STATE_UPDATED events
    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    pub struct DeviceStateUpdatedData {
        pub domain: String,
        pub host: String,
        pub update: serde_json::Value,
    }

    impl EventData for DeviceStateUpdatedData {
        fn event_type() -> &'static str {
            DEVICE_STATE_UPDATED
        }
    }

    /// Data for ENTRY_OPTIONS_UPDATED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct EntryOptionsUpdatedData {
        pub entry_id: String,
        pub domain: String,
    }

    impl EventData for EntryOptionsUpdatedData {
        fn event_type() -> &'static str {
            ENTRY_OPTIONS_UPDATED
        }
    }
}
