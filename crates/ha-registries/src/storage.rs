//! Storage abstraction for JSON persistence
//!
//! Implements the `.storage/` directory pattern: one JSON file per key,
//! wrapped with major/minor version numbers, written atomically.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch for {key}: expected {expected}, found {found}")]
    VersionMismatch {
        key: String,
        expected: u32,
        found: u32,
    },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage file wrapper with version tracking
///
/// JSON format:
/// ```json
/// {
///   "version": 1,
///   "minor_version": 1,
///   "key": "core.config_entries",
///   "data": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    pub version: u32,
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

impl<T> StorageFile<T> {
    pub fn new(key: impl Into<String>, data: T, version: u32, minor_version: u32) -> Self {
        Self {
            version,
            minor_version,
            key: key.into(),
            data,
        }
    }
}

/// Types persisted under a fixed storage key
pub trait Storable: Serialize + DeserializeOwned {
    const KEY: &'static str;
    const VERSION: u32;
    const MINOR_VERSION: u32;
}

/// Storage manager for the `.storage/` directory
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    /// Create a storage manager rooted at `config_dir/.storage`
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: config_dir.as_ref().join(".storage"),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    pub async fn exists(&self, key: &str) -> bool {
        fs::try_exists(self.file_path(key)).await.unwrap_or(false)
    }

    /// Load a raw storage file. Returns None if it doesn't exist.
    pub async fn load<T>(&self, key: &str) -> StorageResult<Option<StorageFile<T>>>
    where
        T: DeserializeOwned,
    {
        let path = self.file_path(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Storage file not found: {}", key);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let storage_file: StorageFile<T> = serde_json::from_str(&content)?;
        debug!(
            "Loaded storage file: {} (v{}.{})",
            key, storage_file.version, storage_file.minor_version
        );
        Ok(Some(storage_file))
    }

    /// Load a [`Storable`], checking its major version
    pub async fn load_storable<T: Storable>(&self) -> StorageResult<Option<StorageFile<T>>> {
        let Some(file) = self.load::<T>(T::KEY).await? else {
            return Ok(None);
        };

        if file.version != T::VERSION {
            return Err(StorageError::VersionMismatch {
                key: T::KEY.to_string(),
                expected: T::VERSION,
                found: file.version,
            });
        }
        if file.minor_version < T::MINOR_VERSION {
            warn!(
                "Storage {} has older minor version ({} < {}), loading as-is",
                T::KEY,
                file.minor_version,
                T::MINOR_VERSION
            );
        }
        Ok(Some(file))
    }

    /// Save data to storage
    ///
    /// Writes to a temp file first, then renames over the target.
    pub async fn save<T>(&self, storage_file: &StorageFile<T>) -> StorageResult<()>
    where
        T: Serialize,
    {
        fs::create_dir_all(&self.storage_dir).await?;

        let path = self.file_path(&storage_file.key);
        let temp_path = self.file_path(&format!("{}.tmp", storage_file.key));

        let content = serde_json::to_string_pretty(storage_file)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(
            "Saved storage file: {} (v{}.{})",
            storage_file.key, storage_file.version, storage_file.minor_version
        );
        Ok(())
    }

    /// Save a [`Storable`] under its own key and version
    pub async fn save_storable<T: Storable>(&self, data: &T) -> StorageResult<()> {
        self.save(&StorageFile::new(T::KEY, data, T::VERSION, T::MINOR_VERSION))
            .await
    }

    /// Delete a storage file. Missing files are not an error.
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.file_path(key)).await {
            Ok(()) => {
                debug!("Deleted storage file: {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
