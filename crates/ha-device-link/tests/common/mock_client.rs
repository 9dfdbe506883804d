//! Scripted device client
//!
//! Each host gets a queue of scripted outcomes; once the queue is empty the
//! default outcome (accept with an issued key) applies.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ha_device_link::{
    ConnectRequest, Connected, DeviceClient, DeviceInfo, Session, TransportError, UpdateSender,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Key the mock device issues when pairing succeeds
pub const ISSUED_KEY: &str = "issued-client-key";

/// What the device does on the next connect
#[derive(Debug, Clone)]
pub enum Script {
    Accept,
    /// Open the socket but report `is_authorized == false`
    OpenUnauthorized,
    Fail(TransportError),
    /// Never answer
    Hang,
    /// Open the socket but never answer the authorization check
    HangAuthorization,
}

/// A command the client was asked to send
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub host: String,
    pub command: String,
    pub payload: Value,
}

#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    connects: Mutex<HashMap<String, usize>>,
    updates: Mutex<HashMap<String, UpdateSender>>,
    unauthorized: Mutex<HashSet<String>>,
    hanging_auth: Mutex<HashSet<String>>,
    cancel_on_authorize: Mutex<Option<CancellationToken>>,
    commands: Mutex<Vec<SentCommand>>,
    failing_commands: Mutex<HashSet<String>>,
    disconnects: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next connects to `host`
    pub fn script(&self, host: &str, outcomes: impl IntoIterator<Item = Script>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub fn connects(&self, host: &str) -> usize {
        self.connects.lock().unwrap().get(host).copied().unwrap_or(0)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Make every command sent to `host` fail
    pub fn fail_commands(&self, host: &str) {
        self.failing_commands.lock().unwrap().insert(host.to_string());
    }

    /// Push a state update on the session of `host`
    pub fn push_update(&self, host: &str, update: Value) -> bool {
        match self.updates.lock().unwrap().get(host) {
            Some(sender) => sender.send(update).is_ok(),
            None => false,
        }
    }

    /// Cancel `token` the next time authorization is checked, then authorize
    pub fn cancel_on_authorize(&self, token: CancellationToken) {
        *self.cancel_on_authorize.lock().unwrap() = Some(token);
    }

    fn next_script(&self, host: &str) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(host)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Script::Accept)
    }
}

#[async_trait]
impl DeviceClient for ScriptedClient {
    async fn connect(&self, request: ConnectRequest) -> Result<Connected, TransportError> {
        let host = request.address.host.clone();
        *self.connects.lock().unwrap().entry(host.clone()).or_default() += 1;

        let script = self.next_script(&host);
        match script {
            Script::Fail(error) => return Err(error),
            Script::Hang => std::future::pending::<()>().await,
            Script::OpenUnauthorized => {
                self.unauthorized
                    .lock()
                    .unwrap()
                    .insert(request.session_id.clone());
            }
            Script::HangAuthorization => {
                self.hanging_auth
                    .lock()
                    .unwrap()
                    .insert(request.session_id.clone());
            }
            Script::Accept => {}
        }

        self.updates.lock().unwrap().insert(host, request.updates);
        Ok(Connected {
            credential: Some(
                request
                    .address
                    .credential
                    .unwrap_or_else(|| ISSUED_KEY.to_string()),
            ),
            info: DeviceInfo {
                manufacturer: Some("LG Electronics".into()),
                model: Some("OLED55C1".into()),
                name: Some("LG webOS TV".into()),
                sw_version: Some("03.20.60".into()),
            },
        })
    }

    async fn is_authorized(&self, session: &Session) -> bool {
        let hang = self.hanging_auth.lock().unwrap().contains(session.id());
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(token) = self.cancel_on_authorize.lock().unwrap().take() {
            token.cancel();
        }
        !self.unauthorized.lock().unwrap().contains(session.id())
    }

    async fn disconnect(&self, session: &Session) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.updates.lock().unwrap().remove(&session.address().host);
        Ok(())
    }

    async fn send_command(
        &self,
        session: &Session,
        command: &str,
        payload: Value,
    ) -> Result<Option<Value>, TransportError> {
        let host = session.address().host.clone();
        if self.failing_commands.lock().unwrap().contains(&host) {
            return Err(TransportError::Closed);
        }
        self.commands.lock().unwrap().push(SentCommand {
            host,
            command: command.to_string(),
            payload,
        });
        Ok(None)
    }
}
