//! Flow step results shared by pairing and options flows

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of step a flow returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowResultType {
    Form,
    CreateEntry,
    Abort,
}

/// Result of one flow step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowResult {
    pub flow_id: String,
    /// Integration domain
    pub handler: String,
    #[serde(rename = "type")]
    pub result_type: FlowResultType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Always present, empty if the step takes no input
    pub data_schema: Vec<FormField>,
    /// Errors from the previous submission, keyed by field or `base`
    pub errors: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Abort reason code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    /// Entry data (create_entry) or saved options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl FlowResult {
    fn base(flow_id: &str, handler: &str, result_type: FlowResultType) -> Self {
        Self {
            flow_id: flow_id.to_string(),
            handler: handler.to_string(),
            result_type,
            step_id: None,
            data_schema: Vec::new(),
            errors: None,
            title: None,
            reason: None,
            entry_id: None,
            result: None,
        }
    }

    pub fn form(flow_id: &str, handler: &str, step_id: &str, data_schema: Vec<FormField>) -> Self {
        Self {
            step_id: Some(step_id.to_string()),
            data_schema,
            ..Self::base(flow_id, handler, FlowResultType::Form)
        }
    }

    pub fn abort(flow_id: &str, handler: &str, reason: &str) -> Self {
        Self {
            reason: Some(reason.to_string()),
            ..Self::base(flow_id, handler, FlowResultType::Abort)
        }
    }

    pub fn create_entry(
        flow_id: &str,
        handler: &str,
        title: impl Into<String>,
        entry_id: Option<String>,
        result: serde_json::Value,
    ) -> Self {
        Self {
            title: Some(title.into()),
            entry_id,
            result: Some(result),
            ..Self::base(flow_id, handler, FlowResultType::CreateEntry)
        }
    }

    /// Attach a form error under `key` (`base` for form-wide errors)
    pub fn with_error(mut self, key: &str, code: &str) -> Self {
        self.errors
            .get_or_insert_with(HashMap::new)
            .insert(key.to_string(), code.to_string());
        self
    }

    /// Error code for `key`, if any
    pub fn error(&self, key: &str) -> Option<&str> {
        self.errors
            .as_ref()
            .and_then(|errors| errors.get(key))
            .map(String::as_str)
    }

    pub fn is_form(&self, step_id: &str) -> bool {
        self.result_type == FlowResultType::Form && self.step_id.as_deref() == Some(step_id)
    }

    pub fn is_abort(&self, reason: &str) -> bool {
        self.result_type == FlowResultType::Abort && self.reason.as_deref() == Some(reason)
    }
}

/// Form field schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Pre-filled value shown to the user without being a default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_value: Option<serde_json::Value>,
}

impl FormField {
    pub fn string(name: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: "string".to_string(),
            required: None,
            default: None,
            suggested_value: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = Some(true);
        self
    }

    pub fn default_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn suggested(mut self, value: Option<serde_json::Value>) -> Self {
        self.suggested_value = value;
        self
    }
}
