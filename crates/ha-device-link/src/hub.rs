//! Device hub
//!
//! The process-lifetime owner of every store the device link needs: config
//! entries, the device registry, the command registry, the event bus, one
//! coordinator and lifecycle manager per integration, and the flows in
//! progress. The platform talks to devices only through this type.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ha_config::{CoreConfig, ImportedDevice, LinkSettings};
use ha_config_entries::{
    to_json_map, ConfigEntries, ConfigEntriesError, ConfigEntry, ConfigEntrySource,
    ConfigEntryState, ConfigEntryUpdate, DeviceEntryData, EntryHandler, EntryOptions,
    SetupOutcome,
};
use ha_core::events::{EntryOptionsUpdatedData, HOMEASSISTANT_STOP};
use ha_core::{Context, DeviceAddress, Event};
use ha_event_bus::EventBus;
use ha_registries::{DeviceDetails, DeviceIdentifier, DeviceRegistry, Storage};
use ha_service_registry::ServiceRegistry;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{DeviceClient, Session};
use crate::coordinator::ConnectionCoordinator;
use crate::error::{ConnectError, LinkError, LinkResult};
use crate::flow::FlowResult;
use crate::integration::Integration;
use crate::lifecycle::{LifecycleManager, PlatformForwarder};
use crate::options::{OptionsFlow, OptionsStep};
use crate::pairing::{PairingFlow, PairingInput, PairingState, PairingStep, STEP_PAIRING, STEP_USER};

/// Everything the hub holds for one integration
struct DomainLink {
    integration: Arc<Integration>,
    coordinator: Arc<ConnectionCoordinator>,
    lifecycle: Arc<LifecycleManager>,
}

/// Entry setup and unload for one integration
struct LinkHandler {
    link: Arc<DomainLink>,
    devices: Arc<DeviceRegistry>,
    timeout: Duration,
}

impl LinkHandler {
    fn address(entry: &ConfigEntry) -> Result<(DeviceEntryData, DeviceAddress), String> {
        let data = entry
            .device_data()
            .map_err(|e| format!("invalid entry data: {}", e))?;
        let address = data.address().map_err(|e| e.to_string())?;
        Ok((data, address))
    }

    async fn register_device(&self, entry: &ConfigEntry, data: &DeviceEntryData, session: &Session) {
        let info = session.info();
        self.devices.get_or_create(
            &entry.entry_id,
            DeviceIdentifier::new(&self.link.integration.domain, session.address().key()),
            DeviceDetails {
                name: Some(data.name.clone()),
                manufacturer: info
                    .manufacturer
                    .clone()
                    .or_else(|| Some(self.link.integration.manufacturer.clone())),
                model: info.model.clone().or_else(|| data.model.clone()),
                sw_version: info.sw_version.clone().or_else(|| data.sw_version.clone()),
            },
        );
        if let Err(e) = self.devices.save().await {
            warn!(error = %e, "Failed to save device registry");
        }
    }
}

#[async_trait]
impl EntryHandler for LinkHandler {
    async fn setup_entry(&self, entry: &ConfigEntry) -> SetupOutcome {
        let (data, address) = match Self::address(entry) {
            Ok(parsed) => parsed,
            Err(reason) => return SetupOutcome::Failed(reason),
        };

        let session = match self.link.coordinator.connect(&address, self.timeout).await {
            Ok(session) => session,
            Err(err @ ConnectError::Unreachable(_)) => {
                return SetupOutcome::NotReady(err.to_string())
            }
            Err(err @ ConnectError::Unauthorized) => {
                return SetupOutcome::AuthFailed(err.to_string())
            }
            Err(err) => return SetupOutcome::Failed(err.to_string()),
        };

        self.register_device(entry, &data, &session).await;

        match self
            .link
            .lifecycle
            .start(&entry.entry_id, &address, session)
            .await
        {
            Ok(()) => SetupOutcome::Loaded,
            Err(e) => SetupOutcome::Failed(e.to_string()),
        }
    }

    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<bool, String> {
        let (_, address) = Self::address(entry)?;
        self.link
            .lifecycle
            .stop(&address)
            .await
            .map_err(|e| e.to_string())
    }
}

pub struct DeviceHub {
    settings: LinkSettings,
    bus: Arc<EventBus>,
    services: Arc<ServiceRegistry>,
    entries: Arc<ConfigEntries>,
    devices: Arc<DeviceRegistry>,

    /// Integrations by domain
    links: DashMap<String, Arc<DomainLink>>,

    /// Pairing flows by flow id
    flows: DashMap<String, Arc<Mutex<PairingFlow>>>,

    /// (domain, normalized host) -> id of the flow pairing that host
    flow_hosts: DashMap<(String, String), String>,

    options_flows: DashMap<String, OptionsFlow>,

    /// Pending setup retries by entry id
    retries: DashMap<String, JoinHandle<()>>,

    cancel: CancellationToken,
}

impl DeviceHub {
    pub fn new(storage: Arc<Storage>, settings: LinkSettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            bus: Arc::new(EventBus::new()),
            services: Arc::new(ServiceRegistry::new()),
            entries: Arc::new(ConfigEntries::new(storage.clone())),
            devices: Arc::new(DeviceRegistry::new(storage)),
            links: DashMap::new(),
            flows: DashMap::new(),
            flow_hosts: DashMap::new(),
            options_flows: DashMap::new(),
            retries: DashMap::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn entries(&self) -> &Arc<ConfigEntries> {
        &self.entries
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    /// Register an integration with its vendor client and platform
    ///
    /// Registering a domain twice replaces the previous client.
    pub fn register_integration(
        &self,
        integration: Integration,
        client: Arc<dyn DeviceClient>,
        forwarder: Arc<dyn PlatformForwarder>,
    ) {
        let domain = integration.domain.clone();
        let integration = Arc::new(integration);
        let coordinator = Arc::new(ConnectionCoordinator::new(
            domain.clone(),
            client,
            self.cancel.child_token(),
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            integration.clone(),
            coordinator.clone(),
            forwarder,
            self.services.clone(),
            self.bus.clone(),
        ));
        let link = Arc::new(DomainLink {
            integration,
            coordinator,
            lifecycle,
        });

        self.entries.register_handler(
            &domain,
            Arc::new(LinkHandler {
                link: link.clone(),
                devices: self.devices.clone(),
                timeout: self.settings.connect_timeout(),
            }),
        );
        self.links.insert(domain.clone(), link);
        info!(domain = %domain, "Registered integration");
    }

    fn link(&self, domain: &str) -> LinkResult<Arc<DomainLink>> {
        self.links
            .get(domain)
            .map(|link| link.value().clone())
            .ok_or_else(|| LinkError::UnknownDomain(domain.to_string()))
    }

    pub fn coordinator(&self, domain: &str) -> Option<Arc<ConnectionCoordinator>> {
        self.links.get(domain).map(|link| link.coordinator.clone())
    }

    pub fn lifecycle(&self, domain: &str) -> Option<Arc<LifecycleManager>> {
        self.links.get(domain).map(|link| link.lifecycle.clone())
    }

    pub fn entry_state(&self, entry_id: &str) -> Option<ConfigEntryState> {
        self.entries.get(entry_id).map(|entry| entry.state)
    }

    fn state_of(&self, entry_id: &str) -> LinkResult<ConfigEntryState> {
        self.entry_state(entry_id)
            .ok_or_else(|| LinkError::UnknownEntry(entry_id.to_string()))
    }

    /// Load persisted entries and devices
    pub async fn load(&self) -> LinkResult<()> {
        self.entries.load().await?;
        self.devices.load().await?;
        Ok(())
    }

    /// Load storage and set up every entry of a registered integration
    pub async fn start(self: &Arc<Self>) -> LinkResult<()> {
        self.load().await?;
        for entry in self.entries.iter().collect::<Vec<_>>() {
            if !self.links.contains_key(&entry.domain) {
                warn!(domain = %entry.domain, entry = %entry.entry_id, "No integration for entry");
                continue;
            }
            if let Err(e) = self.setup(&entry.entry_id).await {
                error!(entry = %entry.entry_id, error = %e, "Entry setup failed");
            }
        }
        Ok(())
    }

    // ---- Entry lifecycle ----

    /// Copy the on-connect action and sources of older entries into options
    async fn migrate_options(&self, entry: &ConfigEntry) -> LinkResult<()> {
        if !entry.options.is_empty() {
            return Ok(());
        }
        let Ok(data) = entry.device_data() else {
            return Ok(());
        };
        self.entries
            .update(
                &entry.entry_id,
                ConfigEntryUpdate::new().options(to_json_map(&data.initial_options())),
            )
            .await?;
        debug!(entry = %entry.entry_id, "Migrated entry data into options");
        Ok(())
    }

    /// Set up an entry and return the state it ended in
    ///
    /// An unreachable device is retried with backoff; a rejected credential
    /// starts a reauth flow.
    pub async fn setup(self: &Arc<Self>, entry_id: &str) -> LinkResult<ConfigEntryState> {
        let entry = self
            .entries
            .get(entry_id)
            .ok_or_else(|| LinkError::UnknownEntry(entry_id.to_string()))?;
        self.migrate_options(&entry).await?;
        self.cancel_retry(entry_id);

        match self.entries.setup(entry_id).await {
            Ok(()) => {}
            Err(ConfigEntriesError::NotReady { retry_in, .. }) => {
                self.schedule_retry(entry_id, retry_in);
            }
            Err(ConfigEntriesError::AuthFailed(_)) => {
                self.start_reauth(&entry);
            }
            Err(ConfigEntriesError::SetupFailed(reason)) => {
                error!(entry = %entry_id, %reason, "Entry setup failed");
            }
            Err(e) => return Err(e.into()),
        }
        self.state_of(entry_id)
    }

    fn schedule_retry(self: &Arc<Self>, entry_id: &str, delay: Duration) {
        if !self.settings.retry_setup || self.cancel.is_cancelled() {
            return;
        }

        let hub: Weak<Self> = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let id = entry_id.to_string();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let Some(hub) = hub.upgrade() else {
                return;
            };
            hub.retries.remove(&id);
            debug!(entry = %id, "Retrying entry setup");
            if let Err(e) = hub.setup(&id).await {
                warn!(entry = %id, error = %e, "Setup retry failed");
            }
        });

        if let Some(previous) = self.retries.insert(entry_id.to_string(), task) {
            previous.abort();
        }
        debug!(entry = %entry_id, ?delay, "Scheduled setup retry");
    }

    fn cancel_retry(&self, entry_id: &str) {
        if let Some((_, pending)) = self.retries.remove(entry_id) {
            pending.abort();
        }
    }

    /// Whether a setup retry is waiting for this entry
    pub fn retry_pending(&self, entry_id: &str) -> bool {
        self.retries.contains_key(entry_id)
    }

    /// Unload an entry and return the state it ended in
    pub async fn unload(&self, entry_id: &str) -> LinkResult<ConfigEntryState> {
        self.cancel_retry(entry_id);
        match self.entries.unload(entry_id).await {
            Ok(()) => {}
            Err(ConfigEntriesError::UnloadFailed(reason)) => {
                warn!(entry = %entry_id, %reason, "Entry did not unload cleanly");
            }
            Err(e) => return Err(e.into()),
        }
        self.state_of(entry_id)
    }

    pub async fn reload(self: &Arc<Self>, entry_id: &str) -> LinkResult<ConfigEntryState> {
        let state = self.unload(entry_id).await?;
        if state != ConfigEntryState::NotLoaded {
            return Ok(state);
        }
        self.setup(entry_id).await
    }

    /// Replace an entry's options, then reload it if it is loaded
    pub async fn update_options(
        self: &Arc<Self>,
        entry_id: &str,
        options: EntryOptions,
    ) -> LinkResult<()> {
        let entry = self
            .entries
            .update(entry_id, ConfigEntryUpdate::new().options(to_json_map(&options)))
            .await?;

        self.bus.fire_typed(
            EntryOptionsUpdatedData {
                entry_id: entry.entry_id.clone(),
                domain: entry.domain.clone(),
            },
            Context::new(),
        );
        info!(entry = %entry_id, "Entry options updated");

        if entry.is_loaded() {
            self.reload(entry_id).await?;
        }
        Ok(())
    }

    /// Unload and delete an entry along with its devices
    pub async fn remove(&self, entry_id: &str) -> LinkResult<()> {
        match self.unload(entry_id).await {
            Ok(_) => {}
            Err(LinkError::Entries(ConfigEntriesError::CannotUnload(state))) => {
                warn!(entry = %entry_id, ?state, "Removing entry that cannot be unloaded");
            }
            Err(e) => return Err(e),
        }

        self.entries.remove(entry_id).await?;
        let removed = self.devices.remove_config_entry(entry_id);
        self.devices.save().await?;
        debug!(entry = %entry_id, removed, "Removed entry devices");
        Ok(())
    }

    // ---- Pairing flows ----

    /// Start a pairing flow. With `input`, the first step runs immediately.
    pub async fn start_flow(
        self: &Arc<Self>,
        domain: &str,
        source: ConfigEntrySource,
        input: Option<Value>,
    ) -> LinkResult<FlowResult> {
        let link = self.link(domain)?;
        let flow = PairingFlow::new(domain, link.integration.default_name.as_str(), source);
        let flow_id = flow.flow_id().to_string();
        let form = flow.user_form();
        self.flows
            .insert(flow_id.clone(), Arc::new(Mutex::new(flow)));
        debug!(flow = %flow_id, domain, ?source, "Started pairing flow");

        match input {
            Some(input) => self.progress_flow(&flow_id, Some(input)).await,
            None => Ok(form),
        }
    }

    /// Feed the next step of a pairing flow
    ///
    /// In `user` this is the address form; in `pairing` any submission
    /// confirms that the device-side prompt was accepted.
    pub async fn progress_flow(
        self: &Arc<Self>,
        flow_id: &str,
        input: Option<Value>,
    ) -> LinkResult<FlowResult> {
        let flow = self
            .flows
            .get(flow_id)
            .map(|flow| flow.value().clone())
            .ok_or_else(|| LinkError::UnknownFlow(flow_id.to_string()))?;
        let mut flow = flow.lock().await;

        let result = self.step(&mut flow, input).await;
        let finished = match &result {
            Ok(result) => !result.is_form(STEP_USER) && !result.is_form(STEP_PAIRING),
            Err(_) => true,
        };
        if finished {
            self.finish_flow(flow_id);
        }
        result
    }

    async fn step(
        self: &Arc<Self>,
        flow: &mut PairingFlow,
        input: Option<Value>,
    ) -> LinkResult<FlowResult> {
        let link = self.link(flow.domain())?;

        match (flow.state(), input) {
            (PairingState::AwaitingInput, Some(input)) => {
                let host = match flow.submit(&input) {
                    Ok(host) => host,
                    Err(form) => return Ok(form),
                };
                if let Some(abort) = self.claim_host(flow, host)? {
                    return Ok(abort);
                }
            }
            // A reauth flow already knows its address
            (PairingState::AwaitingInput, None) if flow.input().is_some() => {}
            (PairingState::AwaitingInput, None) => return Ok(flow.user_form()),
            (PairingState::AwaitingAuthorization, _) => {
                debug!(flow = %flow.flow_id(), "Pairing confirmed on device");
            }
            (state, _) => {
                return Err(LinkError::Validation(format!(
                    "flow {} cannot continue from {:?}",
                    flow.flow_id(),
                    state
                )))
            }
        }

        match flow
            .connect(&link.coordinator, self.settings.connect_timeout())
            .await?
        {
            PairingStep::Form(form) | PairingStep::Aborted(form) => Ok(form),
            PairingStep::Registered { data, session } => {
                self.register(flow, &link, data, session).await
            }
        }
    }

    /// Check a submitted host against existing entries and other flows.
    /// Returns the abort result when the flow must stop.
    fn claim_host(&self, flow: &mut PairingFlow, host: String) -> LinkResult<Option<FlowResult>> {
        let domain = flow.domain().to_string();

        if flow.source() != ConfigEntrySource::Reauth
            && self.entries.get_by_unique_id(&domain, &host).is_some()
        {
            info!(domain = %domain, host = %host, "Device already configured");
            return Ok(Some(flow.abort("already_configured")?));
        }

        let flow_id = flow.flow_id().to_string();
        // A resubmitted form may name a different host
        self.flow_hosts.retain(|_, owner| owner.as_str() != flow_id);

        let in_progress = match self.flow_hosts.entry((domain, host)) {
            Entry::Occupied(_) => true,
            Entry::Vacant(slot) => {
                slot.insert(flow_id);
                false
            }
        };
        if in_progress {
            return Ok(Some(flow.abort("already_in_progress")?));
        }
        Ok(None)
    }

    /// Abandon a pairing flow and release its host
    ///
    /// Waits for a connect attempt of that flow to finish first.
    pub async fn abort_flow(&self, flow_id: &str) -> LinkResult<FlowResult> {
        let flow = self
            .flows
            .get(flow_id)
            .map(|flow| flow.value().clone())
            .ok_or_else(|| LinkError::UnknownFlow(flow_id.to_string()))?;
        let mut flow = flow.lock().await;

        // The flow may have finished while we waited for it
        if !self.flows.contains_key(flow_id) {
            return Err(LinkError::UnknownFlow(flow_id.to_string()));
        }

        let result = flow.abort("aborted");
        self.finish_flow(flow_id);
        info!(flow = %flow_id, domain = %flow.domain(), "Pairing flow aborted");
        Ok(result?)
    }

    fn finish_flow(&self, flow_id: &str) {
        self.flows.remove(flow_id);
        self.flow_hosts.retain(|_, owner| owner.as_str() != flow_id);
        debug!(flow = %flow_id, "Pairing flow finished");
    }

    /// Persist a paired device, or refresh the credential of a reauth entry
    async fn register(
        self: &Arc<Self>,
        flow: &PairingFlow,
        link: &DomainLink,
        data: DeviceEntryData,
        session: Session,
    ) -> LinkResult<FlowResult> {
        let domain = flow.domain();

        if let Some(entry_id) = flow.entry_id() {
            let entry = self
                .entries
                .get(entry_id)
                .ok_or_else(|| LinkError::UnknownEntry(entry_id.to_string()))?;
            let mut current = entry
                .device_data()
                .map_err(|e| LinkError::Validation(e.to_string()))?;
            current.credential = data.credential;
            self.entries
                .update(entry_id, ConfigEntryUpdate::new().data(to_json_map(&current)))
                .await?;
            info!(entry = %entry_id, "Credential refreshed");
            self.reload(entry_id).await?;
            return Ok(FlowResult::abort(flow.flow_id(), domain, "reauth_successful"));
        }

        let entry = ConfigEntry::for_device(domain, &data)
            .with_source(flow.source())
            .with_options(to_json_map(&data.initial_options()));
        let entry = match self.entries.add(entry).await {
            Ok(entry) => entry,
            Err(ConfigEntriesError::AlreadyExists { .. }) => {
                link.coordinator.disconnect(&session).await;
                return Ok(FlowResult::abort(flow.flow_id(), domain, "already_configured"));
            }
            Err(e) => {
                link.coordinator.disconnect(&session).await;
                return Err(e.into());
            }
        };

        let state = self.setup(&entry.entry_id).await?;
        info!(entry = %entry.entry_id, title = %entry.title, ?state, "Created entry");

        Ok(FlowResult::create_entry(
            flow.flow_id(),
            domain,
            entry.title.clone(),
            Some(entry.entry_id.clone()),
            Value::Object(to_json_map(&data).into_iter().collect()),
        ))
    }

    /// Start re-pairing an entry whose credential was rejected.
    /// Only one flow per host runs at a time.
    fn start_reauth(&self, entry: &ConfigEntry) {
        let Ok(link) = self.link(&entry.domain) else {
            return;
        };
        let Ok(data) = entry.device_data() else {
            return;
        };

        let key = (entry.domain.clone(), ha_core::normalize_host(&data.host));
        let Entry::Vacant(slot) = self.flow_hosts.entry(key) else {
            debug!(entry = %entry.entry_id, "Pairing already in progress for host");
            return;
        };

        let mut input = PairingInput::new(data.host.clone());
        input.name = Some(data.name.clone());
        input.icon = data.icon.clone();
        input.sources = data.sources.clone();
        input.on_connect_action = data.on_connect_action.clone();

        let flow = PairingFlow::for_reauth(
            entry.domain.as_str(),
            link.integration.default_name.as_str(),
            entry.entry_id.as_str(),
            input,
        );
        let flow_id = flow.flow_id().to_string();
        slot.insert(flow_id.clone());
        self.flows.insert(flow_id.clone(), Arc::new(Mutex::new(flow)));
        warn!(entry = %entry.entry_id, flow = %flow_id, "Credential rejected, started reauth flow");
    }

    /// Pairing flows in progress
    pub async fn list_flows(&self) -> Vec<Value> {
        let flows: Vec<_> = self
            .flows
            .iter()
            .map(|flow| flow.value().clone())
            .collect();

        let mut listed = Vec::with_capacity(flows.len());
        for flow in flows {
            let flow = flow.lock().await;
            let step_id = match flow.state() {
                PairingState::AwaitingAuthorization => STEP_PAIRING,
                _ => STEP_USER,
            };
            listed.push(json!({
                "flow_id": flow.flow_id(),
                "handler": flow.domain(),
                "source": flow.source(),
                "step_id": step_id,
                "context": {
                    "host": flow.input().map(|input| input.host.clone()),
                    "entry_id": flow.entry_id(),
                },
            }));
        }
        listed
    }

    // ---- Options flows ----

    pub fn start_options_flow(&self, entry_id: &str) -> LinkResult<FlowResult> {
        let entry = self
            .entries
            .get(entry_id)
            .ok_or_else(|| LinkError::UnknownEntry(entry_id.to_string()))?;
        let flow = OptionsFlow::new(&entry).map_err(|e| LinkError::Validation(e.to_string()))?;

        let OptionsStep::Form(form) = flow.step_init(None) else {
            return Err(LinkError::Validation("options form unavailable".to_string()));
        };
        self.options_flows.insert(flow.flow_id().to_string(), flow);
        Ok(form)
    }

    /// Submit the options form. Invalid input returns the form with errors
    /// and leaves the stored options untouched.
    pub async fn progress_options_flow(
        self: &Arc<Self>,
        flow_id: &str,
        input: Value,
    ) -> LinkResult<FlowResult> {
        let flow = self
            .options_flows
            .get(flow_id)
            .map(|flow| flow.value().clone())
            .ok_or_else(|| LinkError::UnknownFlow(flow_id.to_string()))?;

        match flow.step_init(Some(&input)) {
            OptionsStep::Form(form) => Ok(form),
            OptionsStep::Save(options) => {
                self.options_flows.remove(flow_id);
                self.update_options(flow.entry_id(), options.clone()).await?;
                Ok(FlowResult::create_entry(
                    flow_id,
                    flow.domain(),
                    "",
                    Some(flow.entry_id().to_string()),
                    Value::Object(to_json_map(&options).into_iter().collect()),
                ))
            }
        }
    }

    // ---- YAML import ----

    /// Start an import flow for every device listed in YAML
    pub async fn import_yaml(self: &Arc<Self>, config: &CoreConfig) -> LinkResult<Vec<FlowResult>> {
        let mut results = Vec::new();
        for (domain, devices) in &config.imports {
            if !self.links.contains_key(domain) {
                warn!(domain = %domain, "Ignoring YAML for unknown integration");
                continue;
            }
            for device in devices {
                debug!(domain = %domain, host = %device.host, "Importing device from YAML");
                let result = self
                    .start_flow(domain, ConfigEntrySource::Import, Some(import_input(device)))
                    .await?;
                results.push(result);
            }
        }
        Ok(results)
    }

    // ---- Shutdown ----

    /// Fire the stop event, cancel retries and in-flight connects, release
    /// every session
    pub async fn shutdown(&self) {
        info!("Shutting down device hub");
        self.bus
            .fire(Event::new(HOMEASSISTANT_STOP, json!({}), Context::new()));
        self.cancel.cancel();

        let pending: Vec<String> = self.retries.iter().map(|r| r.key().clone()).collect();
        for entry_id in pending {
            self.cancel_retry(&entry_id);
        }

        let links: Vec<_> = self.links.iter().map(|l| l.value().clone()).collect();
        for link in links {
            link.coordinator.shutdown().await;
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn import_input(device: &ImportedDevice) -> Value {
    json!({
        "host": device.host,
        "name": device.name,
        "icon": device.icon,
        "credential": device.username,
        "turn_on_action": device.turn_on_action.as_ref().map(|action| json!({
            "service": action.service,
            "data": action.data,
        })),
        "sources": device.customize.sources,
    })
}
