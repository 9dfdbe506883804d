//! Config Entry types
//!
//! A ConfigEntry is the persisted record of one configured device. Its
//! `data` holds what pairing produced (host, credential, name) and is never
//! edited afterwards; its `options` hold what the user may change later
//! (the on-connect action and the source list).

use chrono::{DateTime, Utc};
use ha_core::DeviceAddress;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::state_machine::InvalidTransition;

pub const CONF_HOST: &str = "host";
pub const CONF_NAME: &str = "name";
pub const CONF_ICON: &str = "icon";
pub const CONF_CREDENTIAL: &str = "credential";
pub const CONF_ON_ACTION: &str = "turn_on_action";
pub const CONF_SOURCES: &str = "sources";

/// Config entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    /// Initial state, not yet set up
    #[default]
    NotLoaded,
    /// Currently being set up (non-recoverable)
    SetupInProgress,
    /// Successfully set up (recoverable)
    Loaded,
    /// Setup failed, e.g. the device rejected the credential (recoverable)
    SetupError,
    /// Device unreachable, waiting to retry setup (recoverable)
    SetupRetry,
    /// Currently unloading (non-recoverable)
    UnloadInProgress,
    /// A dependent component refused to unload (not recoverable)
    FailedUnload,
}

impl ConfigEntryState {
    /// Check if the entry can be unloaded/reloaded from this state
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConfigEntryState::Loaded
                | ConfigEntryState::SetupError
                | ConfigEntryState::SetupRetry
                | ConfigEntryState::NotLoaded
        )
    }
}

/// Source of the config entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntrySource {
    /// Configured by the user through a flow
    #[default]
    User,
    /// Imported from YAML config
    Import,
    /// Re-pairing an entry whose credential stopped working
    Reauth,
}

/// Action run when the device is turned on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnConnectAction {
    /// Target service, e.g. `wake_on_lan.send_magic_packet`
    pub service: String,

    /// Service payload
    #[serde(default)]
    pub data: serde_json::Value,
}

/// User-editable options of a device entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryOptions {
    #[serde(
        default,
        rename = "turn_on_action",
        skip_serializing_if = "Option::is_none"
    )]
    pub on_connect_action: Option<OnConnectAction>,

    /// Input sources shown to the user
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Data stored when a device is paired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntryData {
    pub host: String,

    /// Display name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Credential issued by the device during pairing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,

    #[serde(
        default,
        rename = "turn_on_action",
        skip_serializing_if = "Option::is_none"
    )]
    pub on_connect_action: Option<OnConnectAction>,

    #[serde(default)]
    pub sources: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
}

impl DeviceEntryData {
    pub fn address(&self) -> Result<DeviceAddress, ha_core::AddressError> {
        let address = DeviceAddress::new(self.host.clone())?;
        Ok(match &self.credential {
            Some(credential) => address.with_credential(credential.clone()),
            None => address,
        })
    }

    /// Options to seed an entry with when it has none yet
    pub fn initial_options(&self) -> EntryOptions {
        EntryOptions {
            on_connect_action: self.on_connect_action.clone(),
            sources: self.sources.clone(),
        }
    }
}

/// Serialize a struct into an entry data/options map
pub fn to_json_map<T: Serialize>(value: &T) -> HashMap<String, serde_json::Value> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
        _ => HashMap::new(),
    }
}

fn from_json_map<T: DeserializeOwned>(
    map: &HashMap<String, serde_json::Value>,
) -> Result<T, serde_json::Error> {
    let object: serde_json::Map<String, serde_json::Value> =
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    serde_json::from_value(serde_json::Value::Object(object))
}

/// A configuration entry for a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Unique identifier (ULID)
    pub entry_id: String,

    /// Integration domain (e.g., "webostv", "hue")
    pub domain: String,

    /// Human-readable display name
    pub title: String,

    /// Immutable configuration data
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    /// User-configurable options
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,

    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_version")]
    pub minor_version: u32,

    /// Normalized host, used for duplicate prevention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    #[serde(default)]
    pub source: ConfigEntrySource,

    /// Current lifecycle state (not persisted)
    #[serde(skip, default)]
    pub state: ConfigEntryState,

    /// Human-readable explanation for failed states
    #[serde(skip, default)]
    pub reason: Option<String>,

    /// Per-entry setup/unload lock (not persisted)
    /// Wrapped in Arc so ConfigEntry can still be Clone
    #[serde(skip)]
    pub setup_lock: Arc<Mutex<()>>,

    /// Number of setup retry attempts (not persisted)
    #[serde(skip, default)]
    pub tries: u32,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl ConfigEntry {
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            data: HashMap::new(),
            options: HashMap::new(),
            version: 1,
            minor_version: 1,
            unique_id: None,
            source: ConfigEntrySource::User,
            state: ConfigEntryState::NotLoaded,
            reason: None,
            setup_lock: Arc::new(Mutex::new(())),
            tries: 0,
            created_at: now,
            modified_at: now,
        }
    }

    /// Create an entry for a paired device, keyed by its normalized host
    pub fn for_device(domain: impl Into<String>, data: &DeviceEntryData) -> Self {
        Self::new(domain, data.name.clone())
            .with_unique_id(ha_core::normalize_host(&data.host))
            .with_data(to_json_map(data))
    }

    pub fn with_data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_options(mut self, options: HashMap<String, serde_json::Value>) -> Self {
        self.options = options;
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn with_source(mut self, source: ConfigEntrySource) -> Self {
        self.source = source;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ConfigEntryState::Loaded
    }

    /// Typed view of `data`
    pub fn device_data(&self) -> Result<DeviceEntryData, serde_json::Error> {
        from_json_map(&self.data)
    }

    /// Typed view of `options`
    pub fn entry_options(&self) -> Result<EntryOptions, serde_json::Error> {
        from_json_map(&self.options)
    }

    /// Attempt to transition to a new state with validation.
    ///
    /// On success, updates the state and reason fields.
    pub fn try_set_state(
        &mut self,
        new_state: ConfigEntryState,
        reason: Option<String>,
    ) -> Result<(), InvalidTransition> {
        self.state.try_transition(new_state)?;

        self.state = new_state;
        self.reason = reason;

        // Reset tries counter on non-retry states
        if !matches!(
            new_state,
            ConfigEntryState::SetupRetry | ConfigEntryState::SetupInProgress
        ) {
            self.tries = 0;
        }

        Ok(())
    }

    /// Increment the retry counter and return the new count
    pub fn increment_tries(&mut self) -> u32 {
        self.tries += 1;
        self.tries
    }
}

/// Update data for a config entry
#[derive(Debug, Default)]
pub struct ConfigEntryUpdate {
    pub title: Option<String>,
    pub data: Option<HashMap<String, serde_json::Value>>,
    pub options: Option<HashMap<String, serde_json::Value>>,
}

impl ConfigEntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn options(mut self, options: HashMap<String, serde_json::Value>) -> Self {
        self.options = Some(options);
        self
    }
}
