//! Pairing flow
//!
//! ```text
//! AwaitingInput → Connecting → Registered
//!       ↑             ↓ ↑
//!       └─ unreachable  AwaitingAuthorization
//!
//! any non-terminal state → Aborted
//! ```
//!
//! A flow collects an address, tries to connect and, when the device wants
//! the user to confirm on its side, waits for an explicit confirmation
//! before trying again. It never retries on its own.

use std::time::Duration;

use ha_config_entries::{ConfigEntrySource, DeviceEntryData, OnConnectAction};
use ha_core::DeviceAddress;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::Session;
use crate::coordinator::ConnectionCoordinator;
use crate::error::{ConnectError, LinkError, LinkResult};
use crate::flow::{FlowResult, FormField};

pub const STEP_USER: &str = "user";
pub const STEP_PAIRING: &str = "pairing";

/// Pairing flow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    AwaitingInput,
    Connecting,
    AwaitingAuthorization,
    Registered,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid pairing transition from {from:?} to {to:?}")]
pub struct PairingTransitionError {
    pub from: PairingState,
    pub to: PairingState,
}

impl PairingState {
    pub fn try_transition(self, to: PairingState) -> Result<PairingState, PairingTransitionError> {
        use PairingState::*;

        let valid = matches!(
            (self, to),
            (AwaitingInput, Connecting)
                | (Connecting, AwaitingInput)
                | (Connecting, AwaitingAuthorization)
                | (Connecting, Registered)
                | (AwaitingAuthorization, Connecting)
                | (AwaitingInput, Aborted)
                | (Connecting, Aborted)
                | (AwaitingAuthorization, Aborted)
        );

        if valid {
            Ok(to)
        } else {
            Err(PairingTransitionError { from: self, to })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PairingState::Registered | PairingState::Aborted)
    }
}

/// Split a comma-separated source list, dropping empty items
pub fn parse_sources(sources: &str) -> Vec<String> {
    sources
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Validated address input of a pairing flow
#[derive(Debug, Clone, PartialEq)]
pub struct PairingInput {
    pub host: String,
    pub name: Option<String>,
    pub icon: Option<String>,
    pub sources: Vec<String>,
    /// Pre-issued credential (YAML import, re-pairing keeps none)
    pub credential: Option<String>,
    pub on_connect_action: Option<OnConnectAction>,
}

impl PairingInput {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            name: None,
            icon: None,
            sources: Vec::new(),
            credential: None,
            on_connect_action: None,
        }
    }

    /// Parse submitted form data. On failure returns `(field, error_code)`.
    pub fn from_form(form: &Map<String, Value>) -> Result<Self, (&'static str, &'static str)> {
        let text = |key: &str| {
            form.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        let host = text("host").ok_or(("host", "required"))?;
        DeviceAddress::new(host.as_str()).map_err(|_| ("host", "invalid_host"))?;

        let sources = match form.get("sources") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => parse_sources(s),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            Some(_) => return Err(("sources", "invalid_sources")),
        };

        let on_connect_action = match form.get("turn_on_action") {
            None | Some(Value::Null) => None,
            Some(action) => Some(
                serde_json::from_value(action.clone())
                    .map_err(|_| ("turn_on_action", "invalid_action"))?,
            ),
        };

        Ok(Self {
            host,
            name: text("name"),
            icon: text("icon"),
            sources,
            credential: text("credential"),
            on_connect_action,
        })
    }

    pub fn address(&self) -> LinkResult<DeviceAddress> {
        let address = DeviceAddress::new(self.host.as_str())?;
        Ok(match &self.credential {
            Some(credential) => address.with_credential(credential.clone()),
            None => address,
        })
    }
}

/// What a pairing step produced
#[derive(Debug)]
pub enum PairingStep {
    /// Show a form and wait for the next submission
    Form(FlowResult),
    Aborted(FlowResult),
    /// The device accepted this client; persist `data`
    Registered {
        data: DeviceEntryData,
        session: Session,
    },
}

/// One pairing attempt for one device
#[derive(Debug)]
pub struct PairingFlow {
    flow_id: String,
    domain: String,
    default_name: String,
    source: ConfigEntrySource,
    /// Entry being re-paired
    entry_id: Option<String>,
    state: PairingState,
    input: Option<PairingInput>,
    /// Last submitted form, echoed back in retry forms
    submitted: Map<String, Value>,
}

impl PairingFlow {
    pub fn new(
        domain: impl Into<String>,
        default_name: impl Into<String>,
        source: ConfigEntrySource,
    ) -> Self {
        Self {
            flow_id: ulid::Ulid::new().to_string(),
            domain: domain.into(),
            default_name: default_name.into(),
            source,
            entry_id: None,
            state: PairingState::AwaitingInput,
            input: None,
            submitted: Map::new(),
        }
    }

    /// A flow re-pairing an existing entry with an already known address
    pub fn for_reauth(
        domain: impl Into<String>,
        default_name: impl Into<String>,
        entry_id: impl Into<String>,
        input: PairingInput,
    ) -> Self {
        let mut flow = Self::new(domain, default_name, ConfigEntrySource::Reauth);
        flow.entry_id = Some(entry_id.into());
        flow.submitted.insert("host".into(), Value::String(input.host.clone()));
        flow.input = Some(input);
        flow
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn source(&self) -> ConfigEntrySource {
        self.source
    }

    pub fn entry_id(&self) -> Option<&str> {
        self.entry_id.as_deref()
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    pub fn input(&self) -> Option<&PairingInput> {
        self.input.as_ref()
    }

    /// Normalized host of the submitted address
    pub fn host_key(&self) -> Option<String> {
        self.input
            .as_ref()
            .map(|input| ha_core::normalize_host(&input.host))
    }

    fn transition(&mut self, to: PairingState) -> Result<(), PairingTransitionError> {
        self.state = self.state.try_transition(to)?;
        debug!(flow = %self.flow_id, state = ?self.state, "Pairing state changed");
        Ok(())
    }

    fn suggested(&self, key: &str) -> Option<Value> {
        self.submitted.get(key).cloned()
    }

    /// Address form, pre-filled with the last submission
    pub fn user_form(&self) -> FlowResult {
        FlowResult::form(
            &self.flow_id,
            &self.domain,
            STEP_USER,
            vec![
                FormField::string("host")
                    .required()
                    .suggested(self.suggested("host")),
                FormField::string("name")
                    .default_value(self.default_name.as_str())
                    .suggested(self.suggested("name")),
                FormField::string("icon").suggested(self.suggested("icon")),
                FormField::string("sources").suggested(self.suggested("sources")),
            ],
        )
    }

    /// Confirmation form shown while the device waits for the user
    pub fn pairing_form(&self) -> FlowResult {
        FlowResult::form(&self.flow_id, &self.domain, STEP_PAIRING, Vec::new())
    }

    /// Validate and store submitted address input.
    ///
    /// Returns the normalized host, or the address form with field errors.
    pub fn submit(&mut self, input: &Value) -> Result<String, FlowResult> {
        let form = input.as_object().cloned().unwrap_or_default();
        self.submitted = form;

        match PairingInput::from_form(&self.submitted) {
            Ok(input) => {
                let key = ha_core::normalize_host(&input.host);
                self.input = Some(input);
                Ok(key)
            }
            Err((field, code)) => {
                debug!(flow = %self.flow_id, field, code, "Rejected pairing input");
                Err(self.user_form().with_error(field, code))
            }
        }
    }

    pub fn abort(&mut self, reason: &str) -> Result<FlowResult, PairingTransitionError> {
        self.transition(PairingState::Aborted)?;
        info!(flow = %self.flow_id, domain = %self.domain, reason, "Pairing aborted");
        Ok(FlowResult::abort(&self.flow_id, &self.domain, reason))
    }

    /// Try to connect with the stored input
    ///
    /// Called from `AwaitingInput` after [`submit`](Self::submit), or from
    /// `AwaitingAuthorization` once the user confirmed on the device.
    pub async fn connect(
        &mut self,
        coordinator: &ConnectionCoordinator,
        timeout: Duration,
    ) -> LinkResult<PairingStep> {
        let after_authorization = self.state == PairingState::AwaitingAuthorization;
        let input = self
            .input
            .clone()
            .ok_or_else(|| LinkError::Validation("no address submitted".to_string()))?;
        let address = input.address()?;

        self.transition(PairingState::Connecting)?;
        debug!(flow = %self.flow_id, host = %address.host, "Pairing with device");

        match coordinator.connect(&address, timeout).await {
            Ok(session) => {
                self.transition(PairingState::Registered)?;
                info!(flow = %self.flow_id, host = %address.host, "Device paired");
                let data = self.entry_data(&input, &session);
                Ok(PairingStep::Registered { data, session })
            }
            Err(ConnectError::Unauthorized) => {
                self.transition(PairingState::AwaitingAuthorization)?;
                warn!(host = %address.host, "Device needs to be paired");
                let form = self.pairing_form();
                Ok(PairingStep::Form(if after_authorization {
                    form.with_error("base", ConnectError::Unauthorized.reason_code())
                } else {
                    form
                }))
            }
            Err(err @ ConnectError::Unreachable(_)) if !after_authorization => {
                self.transition(PairingState::AwaitingInput)?;
                Ok(PairingStep::Form(
                    self.user_form().with_error("base", err.reason_code()),
                ))
            }
            Err(err) => Ok(PairingStep::Aborted(self.abort(err.reason_code())?)),
        }
    }

    fn entry_data(&self, input: &PairingInput, session: &Session) -> DeviceEntryData {
        let info = session.info();
        DeviceEntryData {
            host: input.host.clone(),
            name: input
                .name
                .clone()
                .or_else(|| info.name.clone())
                .unwrap_or_else(|| self.default_name.clone()),
            icon: input.icon.clone(),
            credential: session.credential().map(String::from),
            on_connect_action: input.on_connect_action.clone(),
            sources: input.sources.clone(),
            model: info.model.clone(),
            sw_version: info.sw_version.clone(),
        }
    }
}
