//! Config Entries
//!
//! Config entries are the persisted records of configured devices. This
//! crate stores them, validates their lifecycle transitions and drives
//! setup/unload through per-domain handlers.
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single configured device
//! - [`ConfigEntryState`] - Lifecycle state of an entry
//! - [`ConfigEntries`] - Manager for all config entries
//! - [`EntryHandler`] - Integration hook called on setup and unload
//!
//! # Storage
//!
//! Config entries are persisted in `.storage/core.config_entries`.

pub mod entry;
pub mod manager;
pub mod state_machine;

// Re-export main types
pub use entry::{
    to_json_map, ConfigEntry, ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate,
    DeviceEntryData, EntryOptions, OnConnectAction, CONF_CREDENTIAL, CONF_HOST, CONF_ICON,
    CONF_NAME, CONF_ON_ACTION, CONF_SOURCES,
};

pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult, EntryHandler,
    SetupOutcome, STORAGE_KEY, STORAGE_MINOR_VERSION, STORAGE_VERSION,
};

pub use state_machine::{calculate_retry_delay, InvalidTransition};
