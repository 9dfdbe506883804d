//! Device Registry
//!
//! Tracks the physical devices behind config entries (a TV, a bridge) with
//! identifier and config-entry indexes.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageResult};

/// Storage key for device registry
pub const STORAGE_KEY: &str = "core.device_registry";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// A device identifier (domain, id) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self(domain.into(), id.into())
    }

    pub fn domain(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }

    fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

/// Descriptive fields reported by a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
}

/// A registered device entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Internal ID (ULID)
    pub id: String,

    /// Unique identifiers by domain (e.g., [["webostv", "1.2.3.4"]])
    #[serde(default)]
    pub identifiers: Vec<DeviceIdentifier>,

    /// Associated config entries
    #[serde(default)]
    pub config_entries: Vec<String>,

    #[serde(flatten)]
    pub details: DeviceDetails,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl DeviceEntry {
    fn new(identifier: DeviceIdentifier, config_entry_id: &str, details: DeviceDetails) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string(),
            identifiers: vec![identifier],
            config_entries: vec![config_entry_id.to_string()],
            details,
            created_at: now,
            modified_at: now,
        }
    }
}

/// Device registry data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRegistryData {
    pub devices: Vec<DeviceEntry>,
}

impl Storable for DeviceRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Device registry with identifier and config entry indexes
pub struct DeviceRegistry {
    storage: Arc<Storage>,

    /// Primary index: device_id -> DeviceEntry
    by_id: DashMap<String, Arc<DeviceEntry>>,

    /// Index: identifier key -> device_id
    by_identifier: DashMap<String, String>,

    /// Index: config_entry_id -> set of device_ids
    by_config_entry_id: DashMap<String, HashSet<String>>,
}

impl DeviceRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_id: DashMap::new(),
            by_identifier: DashMap::new(),
            by_config_entry_id: DashMap::new(),
        }
    }

    pub async fn load(&self) -> StorageResult<()> {
        if let Some(file) = self.storage.load_storable::<DeviceRegistryData>().await? {
            info!(
                "Loading {} devices from storage (v{}.{})",
                file.data.devices.len(),
                file.version,
                file.minor_version
            );
            for entry in file.data.devices {
                self.index_entry(Arc::new(entry));
            }
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let data = DeviceRegistryData {
            devices: self.by_id.iter().map(|r| (**r.value()).clone()).collect(),
        };
        self.storage.save_storable(&data).await?;
        debug!("Saved {} devices to storage", self.by_id.len());
        Ok(())
    }

    fn index_entry(&self, entry: Arc<DeviceEntry>) {
        let device_id = entry.id.clone();
        for identifier in &entry.identifiers {
            self.by_identifier.insert(identifier.key(), device_id.clone());
        }
        for config_entry_id in &entry.config_entries {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(device_id.clone());
        }
        self.by_id.insert(device_id, entry);
    }

    fn unindex_entry(&self, entry: &DeviceEntry) {
        for identifier in &entry.identifiers {
            self.by_identifier.remove(&identifier.key());
        }
        for config_entry_id in &entry.config_entries {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.remove(&entry.id);
            }
        }
        self.by_id.remove(&entry.id);
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_id.get(device_id).map(|r| Arc::clone(r.value()))
    }

    pub fn get_by_identifier(&self, domain: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_identifier
            .get(&DeviceIdentifier::new(domain, id).key())
            .and_then(|device_id| self.get(&device_id))
    }

    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<DeviceEntry>> {
        self.by_config_entry_id
            .get(config_entry_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get the device with this identifier or create it.
    ///
    /// An existing device is linked to the config entry and its details are
    /// refreshed with any non-empty values from `details`.
    pub fn get_or_create(
        &self,
        config_entry_id: &str,
        identifier: DeviceIdentifier,
        details: DeviceDetails,
    ) -> Arc<DeviceEntry> {
        if let Some(existing) = self.get_by_identifier(identifier.domain(), identifier.id()) {
            let mut updated = (*existing).clone();
            if !updated.config_entries.iter().any(|id| id == config_entry_id) {
                updated.config_entries.push(config_entry_id.to_string());
            }
            let DeviceDetails {
                name,
                manufacturer,
                model,
                sw_version,
            } = details;
            updated.details.name = name.or(updated.details.name);
            updated.details.manufacturer = manufacturer.or(updated.details.manufacturer);
            updated.details.model = model.or(updated.details.model);
            updated.details.sw_version = sw_version.or(updated.details.sw_version);
            updated.modified_at = Utc::now();

            self.unindex_entry(&existing);
            let updated = Arc::new(updated);
            self.index_entry(updated.clone());
            return updated;
        }

        let entry = Arc::new(DeviceEntry::new(identifier, config_entry_id, details));
        debug!(device_id = %entry.id, "Registered device");
        self.index_entry(entry.clone());
        entry
    }

    /// Detach a config entry; devices left without entries are removed.
    /// Returns the number of removed devices.
    pub fn remove_config_entry(&self, config_entry_id: &str) -> usize {
        let mut removed = 0;
        for device in self.get_by_config_entry_id(config_entry_id) {
            self.unindex_entry(&device);
            let mut updated = (*device).clone();
            updated.config_entries.retain(|id| id != config_entry_id);
            if updated.config_entries.is_empty() {
                removed += 1;
            } else {
                updated.modified_at = Utc::now();
                self.index_entry(Arc::new(updated));
            }
        }
        self.by_config_entry_id.remove(config_entry_id);
        removed
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
