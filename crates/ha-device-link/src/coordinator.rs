//! Connection coordinator
//!
//! Owns every live session of one integration. Connects are serialized per
//! normalized host and a host never has more than one live session.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use ha_core::DeviceAddress;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ConnectRequest, DeviceClient, Session};
use crate::error::ConnectError;

/// Timeout applied when the caller does not configure one
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type UpdateCallback = Arc<dyn Fn(serde_json::Value) + Send + Sync>;
type Subscribers = DashMap<u64, UpdateCallback>;

struct LiveSession {
    session: Session,
    subscribers: Arc<Subscribers>,
    pump: JoinHandle<()>,
}

pub struct ConnectionCoordinator {
    domain: String,
    client: Arc<dyn DeviceClient>,
    /// Per normalized host
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Live sessions by normalized host
    sessions: DashMap<String, LiveSession>,
    next_subscriber: AtomicU64,
    cancel: CancellationToken,
}

impl ConnectionCoordinator {
    pub fn new(
        domain: impl Into<String>,
        client: Arc<dyn DeviceClient>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            domain: domain.into(),
            client,
            locks: DashMap::new(),
            sessions: DashMap::new(),
            next_subscriber: AtomicU64::new(1),
            cancel,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_string()).or_default().clone()
    }

    /// Connect to a device, or return its live session if there is one.
    ///
    /// An expired `timeout` is reported as [`ConnectError::Unreachable`].
    /// A second caller for the same host waits for the first to finish.
    pub async fn connect(
        &self,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> Result<Session, ConnectError> {
        if self.cancel.is_cancelled() {
            return Err(ConnectError::Cancelled);
        }

        let key = address.key();
        let lock = self.lock_for(&key);
        let _guard = tokio::select! {
            guard = lock.lock() => guard,
            _ = self.cancel.cancelled() => return Err(ConnectError::Cancelled),
        };

        if let Some(live) = self.sessions.get(&key) {
            if live.session.is_open() {
                debug!(host = %address.host, session = %live.session.id(), "Reusing live session");
                return Ok(live.session.clone());
            }
        }

        let session_id = ulid::Ulid::new().to_string();
        let (updates, rx) = mpsc::unbounded_channel();
        let request = ConnectRequest {
            session_id: session_id.clone(),
            address: address.clone(),
            updates,
        };

        debug!(domain = %self.domain, host = %address.host, "Connecting");
        // One budget covers both the connect and the authorization check
        let deadline = Instant::now() + timeout;
        let attempt = tokio::time::timeout_at(deadline, self.client.connect(request));
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ConnectError::Cancelled),
            outcome = attempt => outcome,
        };

        let connected = match outcome {
            Err(_) => return Err(timed_out(address, timeout)),
            Ok(Err(transport)) => {
                let err = ConnectError::from(transport);
                match &err {
                    ConnectError::Unauthorized => {
                        warn!(host = %address.host, "Device rejected the credential")
                    }
                    _ => error!(host = %address.host, error = %err, "Connection failed"),
                }
                return Err(err);
            }
            Ok(Ok(connected)) => connected,
        };

        let session = Session::new(session_id, address.clone(), connected);

        let check = tokio::time::timeout_at(deadline, self.client.is_authorized(&session));
        let authorized = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            authorized = check => Some(authorized),
        };
        match authorized {
            None => {
                self.release(&session).await;
                return Err(ConnectError::Cancelled);
            }
            Some(Err(_)) => {
                self.release(&session).await;
                return Err(timed_out(address, timeout));
            }
            Some(Ok(false)) => {
                warn!(host = %address.host, "Connected but not authorized, closing");
                self.release(&session).await;
                return Err(ConnectError::Unauthorized);
            }
            Some(Ok(true)) => {}
        }

        let subscribers: Arc<Subscribers> = Arc::new(DashMap::new());
        let pump = tokio::spawn(pump_updates(rx, subscribers.clone()));
        let stale = self.sessions.insert(
            key,
            LiveSession {
                session: session.clone(),
                subscribers,
                pump,
            },
        );
        if let Some(stale) = stale {
            stale.pump.abort();
        }

        // Checked after the insert so a concurrent shutdown either sees this
        // session in its snapshot or is seen here
        if self.cancel.is_cancelled() {
            self.disconnect(&session).await;
            return Err(ConnectError::Cancelled);
        }

        info!(domain = %self.domain, host = %address.host, session = %session.id(), "Connected");
        Ok(session)
    }

    /// Close the session and tell the client; client errors are only logged
    async fn release(&self, session: &Session) {
        if !session.close() {
            return;
        }
        if let Err(e) = self.client.disconnect(session).await {
            warn!(host = %session.address().host, error = %e, "Error while disconnecting");
        }
    }

    /// Disconnect a session. Idempotent.
    pub async fn disconnect(&self, session: &Session) {
        let key = session.address().key();
        if let Some((_, live)) = self
            .sessions
            .remove_if(&key, |_, live| live.session.id() == session.id())
        {
            live.subscribers.clear();
            live.pump.abort();
        }

        if session.is_open() {
            debug!(host = %session.address().host, session = %session.id(), "Disconnecting");
        }
        self.release(session).await;
    }

    /// Register a callback for push updates of a live session.
    ///
    /// Subscribing to a session that is no longer live returns an inactive
    /// handle.
    pub fn subscribe<F>(&self, session: &Session, on_update: F) -> SubscriptionHandle
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);

        let subscribers = self
            .sessions
            .get(&session.address().key())
            .filter(|live| live.session.id() == session.id())
            .map(|live| live.subscribers.clone());

        match subscribers {
            Some(subscribers) => {
                subscribers.insert(id, Arc::new(on_update));
                SubscriptionHandle {
                    id,
                    subscribers: Arc::downgrade(&subscribers),
                    active: AtomicBool::new(true),
                }
            }
            None => SubscriptionHandle {
                id,
                subscribers: Weak::new(),
                active: AtomicBool::new(false),
            },
        }
    }

    /// Live session for a host, if any
    pub fn session(&self, host: &str) -> Option<Session> {
        self.sessions
            .get(&ha_core::normalize_host(host))
            .map(|live| live.session.clone())
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions
            .iter()
            .map(|live| live.session.clone())
            .collect()
    }

    pub async fn send_command(
        &self,
        session: &Session,
        command: &str,
        payload: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, ConnectError> {
        if !session.is_open() {
            return Err(ConnectError::Unreachable("session closed".to_string()));
        }
        self.client
            .send_command(session, command, payload)
            .await
            .map_err(ConnectError::from)
    }

    /// Cancel in-flight connects and disconnect every live session
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let sessions = self.sessions();
        info!(domain = %self.domain, count = sessions.len(), "Shutting down connections");
        for session in sessions {
            self.disconnect(&session).await;
        }
    }
}

fn timed_out(address: &DeviceAddress, timeout: Duration) -> ConnectError {
    error!(host = %address.host, ?timeout, "Connection attempt timed out");
    ConnectError::Unreachable(format!("no answer within {}s", timeout.as_secs()))
}

async fn pump_updates(
    mut rx: mpsc::UnboundedReceiver<serde_json::Value>,
    subscribers: Arc<Subscribers>,
) {
    while let Some(update) = rx.recv().await {
        // Collect first so no shard lock is held while callbacks run
        let callbacks: Vec<UpdateCallback> =
            subscribers.iter().map(|entry| entry.value().clone()).collect();
        for callback in callbacks {
            callback(update.clone());
        }
    }
}

/// Cancellable registration of an update callback
///
/// Unsubscribing is idempotent and also happens on drop.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    subscribers: Weak<Subscribers>,
    active: AtomicBool,
}

impl SubscriptionHandle {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && self.subscribers.strong_count() > 0
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(&self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
