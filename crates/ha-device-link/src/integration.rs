//! Integration descriptors
//!
//! What the hub needs to know about a device family: the components to
//! forward once a device is ready and the commands to register, each with
//! the JSON schema its payload must satisfy.

use serde_json::{json, Map, Value};

pub const WEBOSTV: &str = "webostv";
pub const HUE: &str = "hue";

/// A device command and its payload shape
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub name: String,
    pub schema: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Integration {
    pub domain: String,
    pub manufacturer: String,
    /// Name used when neither the user nor the device provides one
    pub default_name: String,
    pub components: Vec<String>,
    pub commands: Vec<CommandSpec>,
}

impl Integration {
    pub fn new(
        domain: impl Into<String>,
        manufacturer: impl Into<String>,
        default_name: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            manufacturer: manufacturer.into(),
            default_name: default_name.into(),
            components: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn with_components(mut self, components: &[&str]) -> Self {
        self.components = components.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Add a command. `properties` and `required` describe the device
    /// fields; the `host` and `entity_id` routing fields are always allowed.
    pub fn with_command(mut self, name: &str, properties: Value, required: &[&str]) -> Self {
        self.commands.push(CommandSpec {
            name: name.to_string(),
            schema: command_schema(properties, required),
        });
        self
    }

    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// LG webOS TV
    pub fn webostv() -> Self {
        Self::new(WEBOSTV, "LG", "LG webOS Smart TV")
            .with_components(&["media_player", "notify"])
            .with_command("button", json!({"button": {"type": "string"}}), &["button"])
            .with_command(
                "command",
                json!({
                    "command": {"type": "string"},
                    "payload": {"type": "object"}
                }),
                &["command"],
            )
            .with_command(
                "select_sound_output",
                json!({"sound_output": {"type": "string"}}),
                &["sound_output"],
            )
    }

    /// Philips Hue bridge
    pub fn hue() -> Self {
        let offset = json!({"type": "integer", "minimum": -120, "maximum": 120});
        let positive = json!({"type": "integer", "minimum": 0});

        Self::new(HUE, "Signify", "Philips Hue")
            .with_components(&["light", "binary_sensor", "sensor"])
            .with_command(
                "hue_activate_scene",
                json!({
                    "group_name": {"type": "string"},
                    "scene_name": {"type": "string"}
                }),
                &["group_name", "scene_name"],
            )
            .with_command(
                "hue_config_sensor",
                json!({
                    "on": {"type": "boolean"},
                    "sensitivity": positive,
                    "tholdoffset": positive,
                    "tholddark": positive,
                    "sunriseoffset": offset,
                    "sunsetoffset": offset,
                    "long": {"type": "number", "minimum": -180, "maximum": 180},
                    "lat": {"type": "number", "minimum": -90, "maximum": 90}
                }),
                &[],
            )
    }

    /// Every integration shipped with the crate
    pub fn builtin() -> Vec<Self> {
        vec![Self::webostv(), Self::hue()]
    }
}

fn command_schema(properties: Value, required: &[&str]) -> Value {
    let mut all: Map<String, Value> = match properties {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    all.insert("host".into(), json!({"type": "string"}));
    all.insert(
        "entity_id".into(),
        json!({
            "anyOf": [
                {"type": "string"},
                {"type": "array", "items": {"type": "string"}}
            ]
        }),
    );

    let mut schema = json!({
        "type": "object",
        "properties": all,
        "additionalProperties": false
    });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}
