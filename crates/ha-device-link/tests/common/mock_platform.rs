//! Recording platform forwarder

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ha_device_link::PlatformForwarder;

/// Tracks forwarded components; can be told to fail or refuse components
#[derive(Default)]
pub struct RecordingPlatform {
    loaded: Mutex<HashSet<(String, String)>>,
    failing: Mutex<HashSet<String>>,
    refusing: Mutex<HashSet<String>>,
    forwards: AtomicUsize,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Setup of `component` fails
    pub fn fail_component(&self, component: &str) {
        self.failing.lock().unwrap().insert(component.to_string());
    }

    /// Unload of `component` reports that it did not unload
    pub fn refuse_unload(&self, component: &str) {
        self.refusing.lock().unwrap().insert(component.to_string());
    }

    pub fn is_loaded(&self, entry_id: &str, component: &str) -> bool {
        self.loaded
            .lock()
            .unwrap()
            .contains(&(entry_id.to_string(), component.to_string()))
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.lock().unwrap().len()
    }

    /// Number of successful forwards since creation
    pub fn forwards(&self) -> usize {
        self.forwards.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformForwarder for RecordingPlatform {
    async fn forward(&self, entry_id: &str, component: &str) -> Result<(), String> {
        if self.failing.lock().unwrap().contains(component) {
            return Err(format!("{} failed to set up", component));
        }
        self.loaded
            .lock()
            .unwrap()
            .insert((entry_id.to_string(), component.to_string()));
        self.forwards.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unforward(&self, entry_id: &str, component: &str) -> Result<bool, String> {
        if self.refusing.lock().unwrap().contains(component) {
            return Ok(false);
        }
        Ok(self
            .loaded
            .lock()
            .unwrap()
            .remove(&(entry_id.to_string(), component.to_string())))
    }
}
