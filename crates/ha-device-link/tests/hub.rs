//! Entry lifecycle, options and shutdown through the hub

mod common;

use std::time::Duration;

use common::*;
use ha_config::LinkSettings;
use ha_config_entries::{
    ConfigEntry, ConfigEntrySource, ConfigEntryState, DeviceEntryData, EntryOptions,
    OnConnectAction,
};
use ha_core::events::ENTRY_OPTIONS_UPDATED;
use ha_device_link::{FlowResultType, TransportError, WEBOSTV};
use serde_json::json;

async fn paired_tv(t: &TestHub, host: &str) -> String {
    let created = t.pair_tv(host).await;
    assert_eq!(created.result_type, FlowResultType::CreateEntry);
    created.entry_id.unwrap()
}

#[tokio::test]
async fn test_unreachable_setup_schedules_retry() {
    let t = TestHub::new();
    let entry_id = paired_tv(&t, "1.2.3.4").await;
    assert_eq!(t.hub.unload(&entry_id).await.unwrap(), ConfigEntryState::NotLoaded);

    t.tv.script("1.2.3.4", [Script::Fail(TransportError::Refused)]);
    let state = t.hub.setup(&entry_id).await.unwrap();

    assert_eq!(state, ConfigEntryState::SetupRetry);
    assert!(t.hub.retry_pending(&entry_id));
    assert_eq!(t.entry(&entry_id).tries, 1);

    // Setting up by hand replaces the pending retry
    let state = t.hub.setup(&entry_id).await.unwrap();
    assert_eq!(state, ConfigEntryState::Loaded);
    assert!(!t.hub.retry_pending(&entry_id));
}

#[tokio::test]
async fn test_retry_disabled() {
    let t = TestHub::with_settings(LinkSettings {
        connect_timeout: 1,
        retry_setup: false,
    });
    let entry_id = paired_tv(&t, "1.2.3.4").await;
    t.hub.unload(&entry_id).await.unwrap();

    t.tv.script("1.2.3.4", [Script::Fail(TransportError::Timeout)]);
    assert_eq!(
        t.hub.setup(&entry_id).await.unwrap(),
        ConfigEntryState::SetupRetry
    );
    assert!(!t.hub.retry_pending(&entry_id));
}

#[tokio::test]
async fn test_rejected_credential_starts_one_reauth_flow() {
    let t = TestHub::new();
    let created = t
        .hub
        .start_flow(
            WEBOSTV,
            ConfigEntrySource::Import,
            Some(json!({"host": "1.2.3.4", "credential": "stale-key"})),
        )
        .await
        .unwrap();
    let entry_id = created.entry_id.unwrap();
    t.hub.unload(&entry_id).await.unwrap();

    let rejected = Script::Fail(TransportError::Rejected("key revoked".into()));
    t.tv.script("1.2.3.4", [rejected.clone(), rejected]);
    assert_eq!(
        t.hub.setup(&entry_id).await.unwrap(),
        ConfigEntryState::SetupError
    );
    assert_eq!(
        t.hub.setup(&entry_id).await.unwrap(),
        ConfigEntryState::SetupError
    );

    let flows = t.hub.list_flows().await;
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0]["source"], "reauth");
    assert_eq!(flows[0]["context"]["entry_id"], entry_id.as_str());

    let flow_id = flows[0]["flow_id"].as_str().unwrap().to_string();
    let result = t.hub.progress_flow(&flow_id, None).await.unwrap();
    assert!(result.is_abort("reauth_successful"));

    let entry = t.entry(&entry_id);
    assert_eq!(entry.state, ConfigEntryState::Loaded);
    assert_eq!(
        entry.device_data().unwrap().credential.as_deref(),
        Some(ISSUED_KEY)
    );
    assert_eq!(t.entries(WEBOSTV).len(), 1);
    assert!(t.hub.list_flows().await.is_empty());
}

#[tokio::test]
async fn test_options_round_trip() {
    let t = TestHub::new();
    let entry_id = paired_tv(&t, "1.2.3.4").await;
    let mut events = t.hub.bus().subscribe(ENTRY_OPTIONS_UPDATED);

    let form = t.hub.start_options_flow(&entry_id).unwrap();
    let saved = t
        .hub
        .progress_options_flow(
            &form.flow_id,
            json!({
                "turn_on_service": "wake_on_lan.send_magic_packet",
                "turn_on_data": "{\"mac\": \"aa:bb:cc:dd:ee:ff\"}",
                "sources": "HDMI1, Netflix",
            }),
        )
        .await
        .unwrap();
    assert_eq!(saved.result_type, FlowResultType::CreateEntry);

    let expected = EntryOptions {
        on_connect_action: Some(OnConnectAction {
            service: "wake_on_lan.send_magic_packet".into(),
            data: json!({"mac": "aa:bb:cc:dd:ee:ff"}),
        }),
        sources: vec!["HDMI1".into(), "Netflix".into()],
    };
    let entry = t.entry(&entry_id);
    assert_eq!(entry.entry_options().unwrap(), expected);
    assert_eq!(entry.state, ConfigEntryState::Loaded);

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.data["entry_id"], entry_id.as_str());

    // The entry was reloaded with the new options
    assert_eq!(t.tv_platform.forwards(), 4);

    // Reading back through a fresh form shows the stored values
    let form = t.hub.start_options_flow(&entry_id).unwrap();
    assert_eq!(
        form.data_schema[0].suggested_value,
        Some(json!("wake_on_lan.send_magic_packet"))
    );
    assert_eq!(
        form.data_schema[1].suggested_value,
        Some(json!("{\"mac\":\"aa:bb:cc:dd:ee:ff\"}"))
    );
    assert_eq!(form.data_schema[2].suggested_value, Some(json!("HDMI1,Netflix")));
}

#[tokio::test]
async fn test_invalid_options_json_leaves_options_unchanged() {
    let t = TestHub::new();
    let entry_id = paired_tv(&t, "1.2.3.4").await;
    let before = t.entry(&entry_id).options;

    let form = t.hub.start_options_flow(&entry_id).unwrap();
    let result = t
        .hub
        .progress_options_flow(
            &form.flow_id,
            json!({
                "turn_on_service": "script.tv_on",
                "turn_on_data": "not valid json",
            }),
        )
        .await
        .unwrap();

    assert_eq!(result.result_type, FlowResultType::Form);
    assert_eq!(result.error("base"), Some("encode_json"));
    assert_eq!(t.entry(&entry_id).options, before);
    assert_eq!(t.tv_platform.forwards(), 2);

    // The same flow accepts a corrected submission
    let saved = t
        .hub
        .progress_options_flow(
            &form.flow_id,
            json!({"turn_on_service": "script.tv_on", "turn_on_data": "{}"}),
        )
        .await
        .unwrap();
    assert_eq!(saved.result_type, FlowResultType::CreateEntry);
}

#[tokio::test]
async fn test_update_options_on_unloaded_entry_does_not_set_up() {
    let t = TestHub::new();
    let entry_id = paired_tv(&t, "1.2.3.4").await;
    t.hub.unload(&entry_id).await.unwrap();

    t.hub
        .update_options(
            &entry_id,
            EntryOptions {
                on_connect_action: None,
                sources: vec!["HDMI2".into()],
            },
        )
        .await
        .unwrap();

    let entry = t.entry(&entry_id);
    assert_eq!(entry.state, ConfigEntryState::NotLoaded);
    assert_eq!(entry.entry_options().unwrap().sources, vec!["HDMI2"]);
}

#[tokio::test]
async fn test_refused_unload_is_failed_unload() {
    let t = TestHub::new();
    let entry_id = paired_tv(&t, "1.2.3.4").await;
    t.tv_platform.refuse_unload("media_player");

    assert_eq!(
        t.hub.unload(&entry_id).await.unwrap(),
        ConfigEntryState::FailedUnload
    );
    // A failed unload cannot be reloaded
    assert!(t.hub.reload(&entry_id).await.is_err());
}

#[tokio::test]
async fn test_remove_entry() {
    let t = TestHub::new();
    let entry_id = paired_tv(&t, "1.2.3.4").await;
    assert!(t
        .hub
        .devices()
        .get_by_identifier(WEBOSTV, "1.2.3.4")
        .is_some());

    t.hub.remove(&entry_id).await.unwrap();

    assert!(t.entries(WEBOSTV).is_empty());
    assert!(t.hub.devices().is_empty());
    assert_eq!(t.tv_platform.loaded_count(), 0);
    assert_eq!(t.tv.disconnects(), 1);
    assert!(!t.hub.services().has_service(WEBOSTV, "button"));

    // The host can be paired again
    let again = t.pair_tv("1.2.3.4").await;
    assert_eq!(again.result_type, FlowResultType::CreateEntry);
}

#[tokio::test]
async fn test_device_registered_on_setup() {
    let t = TestHub::new();
    let entry_id = paired_tv(&t, "1.2.3.4").await;

    let device = t
        .hub
        .devices()
        .get_by_identifier(WEBOSTV, "1.2.3.4")
        .unwrap();
    assert_eq!(device.config_entries, vec![entry_id]);
    assert_eq!(device.details.manufacturer.as_deref(), Some("LG Electronics"));
    assert_eq!(device.details.model.as_deref(), Some("OLED55C1"));
    assert_eq!(device.details.sw_version.as_deref(), Some("03.20.60"));
}

#[tokio::test]
async fn test_entries_survive_restart() {
    let t = TestHub::new();
    let entry_id = paired_tv(&t, "1.2.3.4").await;
    t.hub.shutdown().await;

    let TestHub { dir, .. } = t;
    let restarted = TestHub::in_dir(dir, LinkSettings::default());
    restarted.hub.start().await.unwrap();

    let entry = restarted.entry(&entry_id);
    assert_eq!(entry.state, ConfigEntryState::Loaded);
    assert_eq!(entry.source, ConfigEntrySource::User);
    assert_eq!(restarted.tv.connects("1.2.3.4"), 1);
    assert!(restarted.tv_platform.is_loaded(&entry_id, "media_player"));
}

#[tokio::test]
async fn test_setup_migrates_data_into_options() {
    let t = TestHub::new();
    let data = DeviceEntryData {
        host: "1.2.3.4".into(),
        name: "Bedroom TV".into(),
        icon: None,
        credential: Some("key".into()),
        on_connect_action: Some(OnConnectAction {
            service: "script.tv_on".into(),
            data: json!({}),
        }),
        sources: vec!["HDMI1".into()],
        model: None,
        sw_version: None,
    };
    let entry = t
        .hub
        .entries()
        .add(ConfigEntry::for_device(WEBOSTV, &data))
        .await
        .unwrap();
    assert!(entry.options.is_empty());

    assert_eq!(
        t.hub.setup(&entry.entry_id).await.unwrap(),
        ConfigEntryState::Loaded
    );

    let options = t.entry(&entry.entry_id).entry_options().unwrap();
    assert_eq!(options, data.initial_options());
}

#[tokio::test]
async fn test_shutdown_releases_sessions_and_cancels_work() {
    let t = TestHub::new();
    let entry_id = paired_tv(&t, "1.2.3.4").await;
    let session = t
        .hub
        .lifecycle(WEBOSTV)
        .unwrap()
        .session("1.2.3.4")
        .unwrap();

    let bridge = t.pair_bridge("192.168.1.2").await;
    let bridge_id = bridge.entry_id.unwrap();
    t.hub.unload(&bridge_id).await.unwrap();
    t.hue.script("192.168.1.2", [Script::Fail(TransportError::Refused)]);
    t.hub.setup(&bridge_id).await.unwrap();
    assert!(t.hub.retry_pending(&bridge_id));

    t.hub.shutdown().await;

    assert!(t.hub.is_shutting_down());
    assert!(!session.is_open());
    assert!(!t.hub.retry_pending(&bridge_id));
    assert!(t.hub.coordinator(WEBOSTV).unwrap().sessions().is_empty());
    assert_eq!(t.entry(&entry_id).state, ConfigEntryState::Loaded);

    // New pairing attempts are abandoned
    let result = t.pair_tv("5.6.7.8").await;
    assert!(result.is_abort("cancelled"));
}

#[tokio::test]
async fn test_aborted_reauth_flow_can_be_restarted() {
    let t = TestHub::new();
    let entry_id = paired_tv(&t, "1.2.3.4").await;
    t.hub.unload(&entry_id).await.unwrap();

    let rejected = Script::Fail(TransportError::Rejected("key revoked".into()));
    t.tv.script("1.2.3.4", [rejected.clone(), rejected]);
    t.hub.setup(&entry_id).await.unwrap();

    let flows = t.hub.list_flows().await;
    let flow_id = flows[0]["flow_id"].as_str().unwrap().to_string();
    assert!(t.hub.abort_flow(&flow_id).await.unwrap().is_abort("aborted"));
    assert!(t.hub.list_flows().await.is_empty());

    // The next rejected setup starts a fresh reauth flow
    t.hub.setup(&entry_id).await.unwrap();
    let flows = t.hub.list_flows().await;
    assert_eq!(flows.len(), 1);
    assert_ne!(flows[0]["flow_id"], flow_id.as_str());
}
