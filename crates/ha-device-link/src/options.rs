//! Options flow: edit the on-connect action and source list of an entry

use ha_config_entries::{ConfigEntry, EntryOptions, OnConnectAction};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::flow::{FlowResult, FormField};
use crate::pairing::parse_sources;

pub const STEP_INIT: &str = "init";

pub const TURN_ON_SERVICE: &str = "turn_on_service";
pub const TURN_ON_DATA: &str = "turn_on_data";
pub const SOURCES: &str = "sources";

/// What an options step produced
#[derive(Debug, Clone, PartialEq)]
pub enum OptionsStep {
    Form(FlowResult),
    /// Validated options, ready to be persisted
    Save(EntryOptions),
}

#[derive(Debug, Clone)]
pub struct OptionsFlow {
    flow_id: String,
    entry_id: String,
    domain: String,
    current: EntryOptions,
}

impl OptionsFlow {
    pub fn new(entry: &ConfigEntry) -> Result<Self, serde_json::Error> {
        Ok(Self {
            flow_id: ulid::Ulid::new().to_string(),
            entry_id: entry.entry_id.clone(),
            domain: entry.domain.clone(),
            current: entry.entry_options()?,
        })
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn form(&self, submitted: Option<&Map<String, Value>>) -> FlowResult {
        let action = self.current.on_connect_action.as_ref();
        let current_service = action.map(|a| Value::String(a.service.clone()));
        let current_data = action
            .and_then(|a| serde_json::to_string(&a.data).ok())
            .map(Value::String);
        let current_sources = Some(Value::String(self.current.sources.join(",")));

        // A rejected submission is echoed back instead of the stored values
        let pick = |key: &str, stored: Option<Value>| match submitted {
            Some(form) => form.get(key).cloned(),
            None => stored,
        };

        FlowResult::form(
            &self.flow_id,
            &self.domain,
            STEP_INIT,
            vec![
                FormField::string(TURN_ON_SERVICE).suggested(pick(TURN_ON_SERVICE, current_service)),
                FormField::string(TURN_ON_DATA)
                    .default_value("{}")
                    .suggested(pick(TURN_ON_DATA, current_data)),
                FormField::string(SOURCES).suggested(pick(SOURCES, current_sources)),
            ],
        )
    }

    /// Show the form, or validate a submission
    ///
    /// The JSON payload is parsed here; a parse failure returns the form
    /// with `encode_json` and leaves the stored options untouched.
    pub fn step_init(&self, input: Option<&Value>) -> OptionsStep {
        let Some(input) = input else {
            return OptionsStep::Form(self.form(None));
        };
        let form = input.as_object().cloned().unwrap_or_default();

        let service = form
            .get(TURN_ON_SERVICE)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let data = match form.get(TURN_ON_DATA) {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(Value::String(raw)) if raw.trim().is_empty() => Value::Object(Map::new()),
            Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
                Ok(data) => data,
                Err(e) => {
                    error!(entry = %self.entry_id, error = %e, "Invalid turn-on data JSON");
                    return OptionsStep::Form(
                        self.form(Some(&form)).with_error("base", "encode_json"),
                    );
                }
            },
            Some(other) => other.clone(),
        };

        let sources = match form.get(SOURCES) {
            None | Some(Value::Null) => self.current.sources.clone(),
            Some(Value::String(raw)) => parse_sources(raw),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            Some(_) => {
                return OptionsStep::Form(
                    self.form(Some(&form)).with_error(SOURCES, "invalid_sources"),
                )
            }
        };

        let options = EntryOptions {
            on_connect_action: service.map(|service| OnConnectAction {
                service: service.to_string(),
                data,
            }),
            sources,
        };
        debug!(entry = %self.entry_id, "Options validated");
        OptionsStep::Save(options)
    }
}
