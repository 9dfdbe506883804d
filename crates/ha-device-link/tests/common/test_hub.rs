//! Hub fixture
//!
//! A [`DeviceHub`] on a temporary config directory with webOS TV and Hue
//! registered against scripted clients and recording platforms.

use std::sync::Arc;

use ha_config::LinkSettings;
use ha_config_entries::{ConfigEntry, ConfigEntrySource};
use ha_device_link::{DeviceHub, FlowResult, Integration, HUE, WEBOSTV};
use ha_registries::Storage;
use serde_json::json;
use tempfile::TempDir;

use super::mock_client::ScriptedClient;
use super::mock_platform::RecordingPlatform;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct TestHub {
    pub hub: Arc<DeviceHub>,
    pub tv: Arc<ScriptedClient>,
    pub tv_platform: Arc<RecordingPlatform>,
    pub hue: Arc<ScriptedClient>,
    pub hue_platform: Arc<RecordingPlatform>,
    pub dir: TempDir,
}

impl TestHub {
    pub fn new() -> Self {
        Self::with_settings(LinkSettings {
            connect_timeout: 1,
            retry_setup: true,
        })
    }

    pub fn with_settings(settings: LinkSettings) -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        Self::in_dir(dir, settings)
    }

    /// A fresh hub over an existing config directory
    pub fn in_dir(dir: TempDir, settings: LinkSettings) -> Self {
        let hub = DeviceHub::new(Arc::new(Storage::new(dir.path())), settings);

        let tv = Arc::new(ScriptedClient::new());
        let tv_platform = Arc::new(RecordingPlatform::new());
        hub.register_integration(Integration::webostv(), tv.clone(), tv_platform.clone());

        let hue = Arc::new(ScriptedClient::new());
        let hue_platform = Arc::new(RecordingPlatform::new());
        hub.register_integration(Integration::hue(), hue.clone(), hue_platform.clone());

        Self {
            hub,
            tv,
            tv_platform,
            hue,
            hue_platform,
            dir,
        }
    }

    /// Run the user flow for a TV at `host` with a single submission
    pub async fn pair_tv(&self, host: &str) -> FlowResult {
        self.hub
            .start_flow(WEBOSTV, ConfigEntrySource::User, Some(json!({"host": host})))
            .await
            .unwrap()
    }

    pub async fn pair_bridge(&self, host: &str) -> FlowResult {
        self.hub
            .start_flow(HUE, ConfigEntrySource::User, Some(json!({"host": host})))
            .await
            .unwrap()
    }

    pub fn entry(&self, entry_id: &str) -> ConfigEntry {
        self.hub.entries().get(entry_id).unwrap()
    }

    pub fn entries(&self, domain: &str) -> Vec<ConfigEntry> {
        self.hub.entries().get_by_domain(domain)
    }
}
