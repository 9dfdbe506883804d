//! Persistent registries
//!
//! This crate provides the `.storage/` JSON persistence layer and the
//! device registry that records the physical devices behind config entries.

pub mod device_registry;
pub mod storage;

// Re-export main types
pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};

pub use device_registry::{
    DeviceDetails, DeviceEntry, DeviceIdentifier, DeviceRegistry, DeviceRegistryData,
};
