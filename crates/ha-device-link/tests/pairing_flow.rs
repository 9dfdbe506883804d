//! Pairing flows driven through the hub

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use ha_config::{CoreConfig, Customize, ImportedDevice};
use ha_config_entries::{ConfigEntrySource, ConfigEntryState};
use ha_device_link::{
    ConnectionCoordinator, FlowResultType, LinkError, PairingFlow, PairingState, PairingStep,
    TransportError, HUE, STEP_PAIRING, STEP_USER, WEBOSTV,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn rejected() -> Script {
    Script::Fail(TransportError::Rejected("pairing prompt not accepted".into()))
}

#[tokio::test]
async fn test_pairing_button_states() {
    init_tracing();
    let client = Arc::new(ScriptedClient::new());
    let coordinator = ConnectionCoordinator::new(WEBOSTV, client.clone(), CancellationToken::new());
    client.script("1.2.3.4", [rejected()]);

    let mut flow = PairingFlow::new(WEBOSTV, "LG webOS Smart TV", ConfigEntrySource::User);
    let mut states = vec![flow.state()];

    flow.submit(&json!({"host": "1.2.3.4"})).unwrap();
    let step = flow.connect(&coordinator, Duration::from_secs(2)).await.unwrap();
    assert!(matches!(step, PairingStep::Form(ref form) if form.is_form(STEP_PAIRING)));
    states.push(flow.state());

    let step = flow.connect(&coordinator, Duration::from_secs(2)).await.unwrap();
    states.push(flow.state());

    let PairingStep::Registered { data, session } = step else {
        panic!("expected the device to register");
    };
    assert_eq!(
        states,
        vec![
            PairingState::AwaitingInput,
            PairingState::AwaitingAuthorization,
            PairingState::Registered
        ]
    );
    assert_eq!(data.credential.as_deref(), Some(ISSUED_KEY));
    assert_eq!(data.name, "LG webOS TV");
    assert!(session.is_open());
    assert_eq!(client.connects("1.2.3.4"), 2);
}

#[tokio::test]
async fn test_pairing_button_path_creates_entry() {
    let t = TestHub::new();
    t.tv.script("1.2.3.4", [rejected()]);

    let form = t
        .hub
        .start_flow(WEBOSTV, ConfigEntrySource::User, None)
        .await
        .unwrap();
    assert!(form.is_form(STEP_USER));
    let flow_id = form.flow_id.clone();

    let form = t
        .hub
        .progress_flow(&flow_id, Some(json!({"host": "1.2.3.4", "name": "LG MYTV"})))
        .await
        .unwrap();
    assert!(form.is_form(STEP_PAIRING));
    assert!(form.errors.is_none());
    assert!(form.data_schema.is_empty());
    assert!(t.entries(WEBOSTV).is_empty());

    let created = t.hub.progress_flow(&flow_id, Some(json!({}))).await.unwrap();
    assert_eq!(created.result_type, FlowResultType::CreateEntry);
    assert_eq!(created.title.as_deref(), Some("LG MYTV"));

    let entry = t.entry(created.entry_id.as_deref().unwrap());
    assert_eq!(entry.state, ConfigEntryState::Loaded);
    assert_eq!(entry.unique_id.as_deref(), Some("1.2.3.4"));
    assert_eq!(
        entry.device_data().unwrap().credential.as_deref(),
        Some(ISSUED_KEY)
    );

    // The session from pairing is reused by setup: two dials, one start
    assert_eq!(t.tv.connects("1.2.3.4"), 2);
    assert_eq!(t.tv_platform.forwards(), 2);
    assert!(t.tv_platform.is_loaded(&entry.entry_id, "media_player"));
    assert!(t.hub.services().has_service(WEBOSTV, "button"));
    assert!(t.hub.list_flows().await.is_empty());
}

#[tokio::test]
async fn test_pairing_still_unauthorized_stays_on_pairing_step() {
    let t = TestHub::new();
    t.tv.script("1.2.3.4", [rejected(), rejected()]);

    let form = t.pair_tv("1.2.3.4").await;
    let flow_id = form.flow_id.clone();

    let retry = t.hub.progress_flow(&flow_id, None).await.unwrap();
    assert!(retry.is_form(STEP_PAIRING));
    assert_eq!(retry.error("base"), Some("invalid_auth"));

    let created = t.hub.progress_flow(&flow_id, None).await.unwrap();
    assert_eq!(created.result_type, FlowResultType::CreateEntry);
    assert_eq!(t.tv.connects("1.2.3.4"), 3);
}

#[tokio::test]
async fn test_unreachable_after_authorization_aborts() {
    let t = TestHub::new();
    t.tv.script(
        "1.2.3.4",
        [rejected(), Script::Fail(TransportError::Closed)],
    );

    let form = t.pair_tv("1.2.3.4").await;
    let result = t.hub.progress_flow(&form.flow_id, None).await.unwrap();

    assert!(result.is_abort("cannot_connect"));
    assert!(t.entries(WEBOSTV).is_empty());
    assert!(matches!(
        t.hub.progress_flow(&form.flow_id, None).await,
        Err(LinkError::UnknownFlow(_))
    ));
}

#[tokio::test]
async fn test_timeout_shows_retry_form_without_entry() {
    let t = TestHub::new();
    t.tv.script("10.0.0.9", [Script::Hang]);

    let form = t.pair_tv("10.0.0.9").await;

    assert!(form.is_form(STEP_USER));
    assert_eq!(form.error("base"), Some("cannot_connect"));
    assert_eq!(form.data_schema[0].suggested_value, Some(json!("10.0.0.9")));
    assert!(t.entries(WEBOSTV).is_empty());
    assert_eq!(t.tv_platform.forwards(), 0);

    // The flow stays open and the device is retried only when resubmitted
    let flows = t.hub.list_flows().await;
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0]["step_id"], STEP_USER);
    assert_eq!(t.tv.connects("10.0.0.9"), 1);

    let created = t
        .hub
        .progress_flow(&form.flow_id, Some(json!({"host": "10.0.0.9"})))
        .await
        .unwrap();
    assert_eq!(created.result_type, FlowResultType::CreateEntry);
}

#[tokio::test]
async fn test_unknown_error_aborts() {
    let t = TestHub::new();
    t.tv.script(
        "1.2.3.4",
        [Script::Fail(TransportError::Protocol("bad handshake".into()))],
    );

    let result = t.pair_tv("1.2.3.4").await;
    assert!(result.is_abort("unknown"));
    assert!(t.entries(WEBOSTV).is_empty());
}

#[tokio::test]
async fn test_already_configured_skips_connect() {
    let t = TestHub::new();
    let created = t.pair_tv("1.2.3.4").await;
    assert_eq!(created.result_type, FlowResultType::CreateEntry);
    let dials = t.tv.connects("1.2.3.4");

    let again = t.pair_tv("1.2.3.4").await;
    assert!(again.is_abort("already_configured"));

    let normalized = t.pair_tv(" 1.2.3.4. ").await;
    assert!(normalized.is_abort("already_configured"));

    assert_eq!(t.tv.connects("1.2.3.4"), dials);
    assert_eq!(t.entries(WEBOSTV).len(), 1);
}

#[tokio::test]
async fn test_same_host_other_domain_is_independent() {
    let t = TestHub::new();
    t.pair_tv("192.168.1.2").await;

    let bridge = t.pair_bridge("192.168.1.2").await;
    assert_eq!(bridge.result_type, FlowResultType::CreateEntry);
    assert_eq!(t.hue_platform.loaded_count(), 3);
}

#[tokio::test]
async fn test_second_flow_for_host_in_progress_aborts() {
    let t = TestHub::new();
    t.tv.script("5.6.7.8", [rejected()]);

    let first = t.pair_tv("5.6.7.8").await;
    assert!(first.is_form(STEP_PAIRING));

    let second = t.pair_tv("5.6.7.8").await;
    assert!(second.is_abort("already_in_progress"));
    assert_eq!(t.tv.connects("5.6.7.8"), 1);

    // The first flow still completes
    let created = t.hub.progress_flow(&first.flow_id, None).await.unwrap();
    assert_eq!(created.result_type, FlowResultType::CreateEntry);
}

#[tokio::test]
async fn test_invalid_input_never_dials() {
    let t = TestHub::new();

    let form = t
        .hub
        .start_flow(WEBOSTV, ConfigEntrySource::User, Some(json!({"host": "  "})))
        .await
        .unwrap();
    assert!(form.is_form(STEP_USER));
    assert_eq!(form.error("host"), Some("required"));

    let form = t
        .hub
        .progress_flow(&form.flow_id, Some(json!({"host": "1.2.3.4", "sources": 5})))
        .await
        .unwrap();
    assert_eq!(form.error("sources"), Some("invalid_sources"));
    assert_eq!(t.tv.connects("1.2.3.4"), 0);
}

#[tokio::test]
async fn test_unknown_domain_and_flow() {
    let t = TestHub::new();
    assert!(matches!(
        t.hub.start_flow("roku", ConfigEntrySource::User, None).await,
        Err(LinkError::UnknownDomain(_))
    ));
    assert!(matches!(
        t.hub.progress_flow("missing", None).await,
        Err(LinkError::UnknownFlow(_))
    ));
}

#[tokio::test]
async fn test_import_from_yaml() {
    let t = TestHub::new();
    let mut imports = BTreeMap::new();
    imports.insert(
        HUE.to_string(),
        vec![ImportedDevice {
            host: "192.168.1.30".into(),
            name: Some("Hallway bridge".into()),
            icon: None,
            username: Some("bridge-user".into()),
            turn_on_action: None,
            customize: Customize::default(),
        }],
    );
    imports.insert(
        "plex".to_string(),
        vec![ImportedDevice {
            host: "192.168.1.40".into(),
            name: None,
            icon: None,
            username: None,
            turn_on_action: None,
            customize: Customize::default(),
        }],
    );
    let config = CoreConfig {
        imports,
        ..Default::default()
    };

    let results = t.hub.import_yaml(&config).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].result_type, FlowResultType::CreateEntry);

    let entry = t.entry(results[0].entry_id.as_deref().unwrap());
    assert_eq!(entry.source, ConfigEntrySource::Import);
    assert_eq!(entry.title, "Hallway bridge");
    assert_eq!(
        entry.device_data().unwrap().credential.as_deref(),
        Some("bridge-user")
    );

    // Importing the same YAML again changes nothing
    let results = t.hub.import_yaml(&config).await.unwrap();
    assert!(results[0].is_abort("already_configured"));
    assert_eq!(t.entries(HUE).len(), 1);
}

#[tokio::test]
async fn test_aborted_flow_releases_host() {
    let t = TestHub::new();
    t.tv.script("1.2.3.4", [rejected()]);

    let stuck = t.pair_tv("1.2.3.4").await;
    assert!(stuck.is_form(STEP_PAIRING));
    assert!(t.pair_tv("1.2.3.4").await.is_abort("already_in_progress"));

    let aborted = t.hub.abort_flow(&stuck.flow_id).await.unwrap();
    assert!(aborted.is_abort("aborted"));
    assert!(t.hub.list_flows().await.is_empty());
    assert!(matches!(
        t.hub.progress_flow(&stuck.flow_id, None).await,
        Err(LinkError::UnknownFlow(_))
    ));
    assert!(matches!(
        t.hub.abort_flow(&stuck.flow_id).await,
        Err(LinkError::UnknownFlow(_))
    ));

    let created = t.pair_tv("1.2.3.4").await;
    assert_eq!(created.result_type, FlowResultType::CreateEntry);
    assert_eq!(t.entries(WEBOSTV).len(), 1);
}
