//! Lifecycle manager
//!
//! Once a device session is ready, forwards the integration's components,
//! registers its commands and wires push updates onto the event bus. `stop`
//! undoes all of it. A device either has a complete [`LifecycleRecord`] or
//! none at all.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use ha_core::events::{DeviceStateUpdatedData, HOMEASSISTANT_STOP};
use ha_core::{normalize_host, CommandCall, Context, DeviceAddress, SupportsResponse};
use ha_event_bus::{EventBus, ListenerHandle};
use ha_service_registry::{ServiceError, ServiceRegistry, ServiceResult};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::Session;
use crate::coordinator::{ConnectionCoordinator, SubscriptionHandle};
use crate::error::{LinkError, LinkResult};
use crate::integration::Integration;

/// Where device components (media player, lights, sensors) get set up
#[async_trait]
pub trait PlatformForwarder: Send + Sync {
    async fn forward(&self, entry_id: &str, component: &str) -> Result<(), String>;

    /// Returns `Ok(false)` if the component refused to unload
    async fn unforward(&self, entry_id: &str, component: &str) -> Result<bool, String>;
}

/// Forwarder that only tracks which components are loaded for which entry
#[derive(Debug, Default)]
pub struct LoadedPlatforms {
    loaded: DashMap<(String, String), ()>,
}

impl LoadedPlatforms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self, entry_id: &str, component: &str) -> bool {
        self.loaded
            .contains_key(&(entry_id.to_string(), component.to_string()))
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }
}

#[async_trait]
impl PlatformForwarder for LoadedPlatforms {
    async fn forward(&self, entry_id: &str, component: &str) -> Result<(), String> {
        self.loaded
            .insert((entry_id.to_string(), component.to_string()), ());
        Ok(())
    }

    async fn unforward(&self, entry_id: &str, component: &str) -> Result<bool, String> {
        Ok(self
            .loaded
            .remove(&(entry_id.to_string(), component.to_string()))
            .is_some())
    }
}

/// Everything started for one device
pub struct LifecycleRecord {
    pub entry_id: String,
    pub session: Session,
    pub components: Vec<String>,
    subscription: SubscriptionHandle,
    stop_listener: ListenerHandle,
}

impl LifecycleRecord {
    fn release(&self) {
        self.subscription.unsubscribe();
        self.stop_listener.remove();
    }
}

type Records = DashMap<String, LifecycleRecord>;

pub struct LifecycleManager {
    integration: Arc<Integration>,
    coordinator: Arc<ConnectionCoordinator>,
    forwarder: Arc<dyn PlatformForwarder>,
    services: Arc<ServiceRegistry>,
    bus: Arc<EventBus>,
    /// Records by normalized host
    records: Arc<Records>,
    /// Serializes starts and stops, so records and the registered commands
    /// change together
    records_lock: Mutex<()>,
}

impl LifecycleManager {
    pub fn new(
        integration: Arc<Integration>,
        coordinator: Arc<ConnectionCoordinator>,
        forwarder: Arc<dyn PlatformForwarder>,
        services: Arc<ServiceRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            integration,
            coordinator,
            forwarder,
            services,
            bus,
            records: Arc::new(DashMap::new()),
            records_lock: Mutex::new(()),
        }
    }

    pub fn domain(&self) -> &str {
        &self.integration.domain
    }

    pub fn is_started(&self, address: &DeviceAddress) -> bool {
        self.records.contains_key(&address.key())
    }

    pub fn session(&self, host: &str) -> Option<Session> {
        self.records
            .get(&normalize_host(host))
            .map(|record| record.session.clone())
    }

    pub fn active_hosts(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    /// Start a device whose session is ready
    ///
    /// Starting an already started device is a no-op. On failure every
    /// forwarded component is unforwarded and the session is disconnected.
    pub async fn start(
        &self,
        entry_id: &str,
        address: &DeviceAddress,
        session: Session,
    ) -> LinkResult<()> {
        let key = address.key();
        let _records = self.records_lock.lock().await;
        if self.records.contains_key(&key) {
            debug!(host = %address.host, "Device already started");
            return Ok(());
        }

        let components = &self.integration.components;
        let results = join_all(
            components
                .iter()
                .map(|component| self.forwarder.forward(entry_id, component)),
        )
        .await;

        let mut forwarded = Vec::new();
        let mut failure = None;
        for (component, result) in components.iter().zip(results) {
            match result {
                Ok(()) => forwarded.push(component.clone()),
                Err(reason) => {
                    failure.get_or_insert(LinkError::Forward {
                        component: component.clone(),
                        reason,
                    });
                }
            }
        }
        if let Some(err) = failure {
            warn!(host = %address.host, error = %err, "Component setup failed, rolling back");
            self.rollback(entry_id, &forwarded, &session).await;
            return Err(err);
        }

        if self.records.is_empty() {
            if let Err(err) = self.register_commands() {
                self.unregister_commands();
                self.rollback(entry_id, &forwarded, &session).await;
                return Err(err.into());
            }
        }

        let subscription = self.subscribe_updates(&session);
        let stop_listener = self.listen_for_stop(&session);

        self.records.insert(
            key,
            LifecycleRecord {
                entry_id: entry_id.to_string(),
                session,
                components: forwarded,
                subscription,
                stop_listener,
            },
        );

        info!(domain = %self.integration.domain, host = %address.host, "Device started");
        Ok(())
    }

    async fn rollback(&self, entry_id: &str, forwarded: &[String], session: &Session) {
        for component in forwarded {
            if let Err(reason) = self.forwarder.unforward(entry_id, component).await {
                warn!(component = %component, %reason, "Failed to unforward during rollback");
            }
        }
        self.coordinator.disconnect(session).await;
    }

    /// Stop a device. Returns whether every component unloaded.
    ///
    /// Stopping a device that was never started succeeds without effect.
    pub async fn stop(&self, address: &DeviceAddress) -> LinkResult<bool> {
        let key = address.key();

        let record = {
            let _records = self.records_lock.lock().await;
            let Some((_, record)) = self.records.remove(&key) else {
                debug!(host = %address.host, "Stop without start, nothing to do");
                return Ok(true);
            };
            if self.records.is_empty() {
                self.unregister_commands();
            }
            record
        };

        let results = join_all(
            record
                .components
                .iter()
                .map(|component| self.forwarder.unforward(&record.entry_id, component)),
        )
        .await;

        let mut unload_ok = true;
        for (component, result) in record.components.iter().zip(results) {
            match result {
                Ok(true) => {}
                Ok(false) => {
                    warn!(component = %component, "Component refused to unload");
                    unload_ok = false;
                }
                Err(reason) => {
                    warn!(component = %component, %reason, "Component failed to unload");
                    unload_ok = false;
                }
            }
        }

        record.release();
        self.coordinator.disconnect(&record.session).await;

        info!(domain = %self.integration.domain, host = %address.host, unload_ok, "Device stopped");
        Ok(unload_ok)
    }

    fn subscribe_updates(&self, session: &Session) -> SubscriptionHandle {
        let bus = self.bus.clone();
        let domain = self.integration.domain.clone();
        let host = session.address().host.clone();

        self.coordinator.subscribe(session, move |update| {
            bus.fire_typed(
                DeviceStateUpdatedData {
                    domain: domain.clone(),
                    host: host.clone(),
                    update,
                },
                Context::new(),
            );
        })
    }

    fn listen_for_stop(&self, session: &Session) -> ListenerHandle {
        let coordinator = self.coordinator.clone();
        let session = session.clone();

        self.bus.listen_once(HOMEASSISTANT_STOP, move |_| async move {
            debug!(host = %session.address().host, "Stop event, disconnecting");
            coordinator.disconnect(&session).await;
        })
    }

    fn register_commands(&self) -> Result<(), ServiceError> {
        for spec in &self.integration.commands {
            let coordinator = self.coordinator.clone();
            let records = self.records.clone();
            let command = spec.name.clone();

            self.services.register(
                self.integration.domain.clone(),
                spec.name.clone(),
                move |call: CommandCall| {
                    dispatch(coordinator.clone(), records.clone(), command.clone(), call)
                },
                Some(spec.schema.clone()),
                SupportsResponse::None,
            )?;
        }
        debug!(domain = %self.integration.domain, "Registered device commands");
        Ok(())
    }

    fn unregister_commands(&self) {
        for spec in &self.integration.commands {
            self.services
                .unregister(&self.integration.domain, &spec.name);
        }
        debug!(domain = %self.integration.domain, "Unregistered device commands");
    }
}

/// Send a command to the session named by `host`, or to every started device
async fn dispatch(
    coordinator: Arc<ConnectionCoordinator>,
    records: Arc<Records>,
    command: String,
    call: CommandCall,
) -> ServiceResult {
    let targets: Vec<Session> = match call.target_host() {
        Some(host) => {
            let session = records
                .get(&normalize_host(host))
                .map(|record| record.session.clone())
                .ok_or_else(|| ServiceError::CallFailed(format!("no device at {}", host)))?;
            vec![session]
        }
        None => records.iter().map(|record| record.session.clone()).collect(),
    };

    let payload = call.device_payload();
    for session in targets {
        coordinator
            .send_command(&session, &command, payload.clone())
            .await
            .map_err(|e| {
                ServiceError::CallFailed(format!("{} on {}: {}", command, session.address(), e))
            })?;
    }
    Ok(None)
}
