//! Config Entries Manager
//!
//! Owns every persisted entry and drives entry setup/unload through the
//! handler registered for the entry's domain.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use ha_registries::{Storable, Storage, StorageResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::state_machine::{calculate_retry_delay, InvalidTransition};

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// Config entries errors
#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Device not ready ({reason}), retrying in {retry_in:?}")]
    NotReady { reason: String, retry_in: Duration },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Unload failed: {0}")]
    UnloadFailed(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Storage error: {0}")]
    Storage(#[from] ha_registries::StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Config entries data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// How an entry setup attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    Loaded,
    /// Device unreachable; setup should be retried later
    NotReady(String),
    /// Device rejected the stored credential; needs re-pairing
    AuthFailed(String),
    /// Any other failure; not retried
    Failed(String),
}

/// Integration-side setup and teardown of an entry
#[async_trait]
pub trait EntryHandler: Send + Sync {
    async fn setup_entry(&self, entry: &ConfigEntry) -> SetupOutcome;

    /// Tear down what `setup_entry` created. `Ok(false)` means a dependent
    /// component refused to unload.
    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<bool, String>;
}

/// Config Entries Manager
///
/// - Loading/saving from storage
/// - Entry creation and removal, deduplicated by `(domain, unique_id)`
/// - Validated state transitions
/// - Setup/unload through per-domain [`EntryHandler`]s, serialized per entry
pub struct ConfigEntries {
    storage: Arc<Storage>,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> set of entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Setup handlers by domain
    handlers: DashMap<String, Arc<dyn EntryHandler>>,
}

impl ConfigEntries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            handlers: DashMap::new(),
        }
    }

    /// Load entries from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(storage_file) = self.storage.load_storable::<ConfigEntriesData>().await? {
            info!(
                "Loading {} config entries from storage (v{}.{})",
                storage_file.data.entries.len(),
                storage_file.version,
                storage_file.minor_version
            );

            for entry in storage_file.data.entries {
                self.index_entry(&entry);
            }
        }
        Ok(())
    }

    /// Save entries to storage
    pub async fn save(&self) -> StorageResult<()> {
        let data = ConfigEntriesData {
            entries: self.entries.iter().map(|r| r.value().clone()).collect(),
        };
        self.storage.save_storable(&data).await?;
        debug!("Saved {} config entries to storage", self.entries.len());
        Ok(())
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        self.entries.insert(entry_id.clone(), entry.clone());

        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id);
        }
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }

        self.entries.remove(&entry.entry_id);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .and_then(|entry_id| self.get(&entry_id))
    }

    /// Add a new config entry
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);
        self.save().await?;

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );

        Ok(entry)
    }

    /// Update an existing entry
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut updated = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if let Some(title) = update.title {
            updated.title = title;
        }
        if let Some(data) = update.data {
            updated.data = data;
        }
        if let Some(options) = update.options {
            updated.options = options;
        }
        updated.modified_at = Utc::now();

        // Keep runtime fields (state, tries, setup_lock) from the live copy
        if let Some(mut live) = self.entries.get_mut(entry_id) {
            updated.state = live.state;
            updated.reason = live.reason.clone();
            updated.tries = live.tries;
            *live = updated.clone();
        }
        self.save().await?;

        debug!("Updated config entry: {}", entry_id);
        Ok(updated)
    }

    /// Remove an entry
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        self.unindex_entry(&entry);
        self.save().await?;

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );

        Ok(entry)
    }

    /// Apply a validated state transition
    fn transition(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!("Entry {} state changed to {:?}", entry_id, state);
        Ok(entry.clone())
    }

    /// Register the setup handler for a domain
    pub fn register_handler(&self, domain: &str, handler: Arc<dyn EntryHandler>) {
        self.handlers.insert(domain.to_string(), handler);
        debug!("Registered setup handler for domain: {}", domain);
    }

    fn handler(&self, domain: &str) -> Option<Arc<dyn EntryHandler>> {
        self.handlers.get(domain).map(|h| h.value().clone())
    }

    fn setup_lock(&self, entry_id: &str) -> ConfigEntriesResult<Arc<tokio::sync::Mutex<()>>> {
        self.entries
            .get(entry_id)
            .map(|e| e.setup_lock.clone())
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))
    }

    /// Set up an entry through its domain's handler
    ///
    /// Setting up an already loaded entry is a no-op.
    pub async fn setup(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let lock = self.setup_lock(entry_id)?;
        let _guard = lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        if entry.is_loaded() {
            debug!("Entry {} already loaded", entry_id);
            return Ok(());
        }

        let entry = self.transition(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let Some(handler) = self.handler(&entry.domain) else {
            self.transition(entry_id, ConfigEntryState::Loaded, None)?;
            debug!(
                "No setup handler for domain {}, marking as loaded",
                entry.domain
            );
            return Ok(());
        };

        match handler.setup_entry(&entry).await {
            SetupOutcome::Loaded => {
                self.transition(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            SetupOutcome::NotReady(reason) => {
                let tries = {
                    let mut live = self
                        .entries
                        .get_mut(entry_id)
                        .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
                    live.try_set_state(ConfigEntryState::SetupRetry, Some(reason.clone()))?;
                    live.increment_tries()
                };
                let retry_in = calculate_retry_delay(tries.saturating_sub(1));
                warn!(
                    "Entry {} not ready ({}), retry {} in {:?}",
                    entry_id, reason, tries, retry_in
                );
                Err(ConfigEntriesError::NotReady { reason, retry_in })
            }
            SetupOutcome::AuthFailed(reason) => {
                warn!("Authentication failed for entry {}: {}", entry_id, reason);
                self.transition(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::AuthFailed(reason))
            }
            SetupOutcome::Failed(reason) => {
                warn!("Setup failed for entry {}: {}", entry_id, reason);
                self.transition(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    /// Unload an entry
    ///
    /// Unloading an entry that is not loaded is a no-op.
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let lock = self.setup_lock(entry_id)?;
        let _guard = lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        match entry.state {
            ConfigEntryState::NotLoaded => return Ok(()),
            state if !state.is_recoverable() => {
                return Err(ConfigEntriesError::CannotUnload(state));
            }
            _ => {}
        }

        let entry = self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let result = match self.handler(&entry.domain) {
            Some(handler) => handler.unload_entry(&entry).await,
            None => Ok(true),
        };

        match result {
            Ok(true) => {
                self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
                info!("Unloaded entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Ok(false) => {
                let reason = "a component refused to unload".to_string();
                self.transition(entry_id, ConfigEntryState::FailedUnload, Some(reason.clone()))?;
                warn!("Unload failed for entry {}: {}", entry_id, reason);
                Err(ConfigEntriesError::UnloadFailed(reason))
            }
            Err(reason) => {
                self.transition(entry_id, ConfigEntryState::FailedUnload, Some(reason.clone()))?;
                warn!("Unload failed for entry {}: {}", entry_id, reason);
                Err(ConfigEntriesError::UnloadFailed(reason))
            }
        }
    }

    /// Reload an entry (unload + setup)
    pub async fn reload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        self.unload(entry_id).await?;
        self.setup(entry_id).await
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ConfigEntry> + '_ {
        self.entries.iter().map(|r| r.value().clone())
    }
}
