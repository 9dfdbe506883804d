//! Event types for the event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Context;

/// Typed event payload bound to a fixed event type
pub trait EventData: Clone + Send + Sync + 'static {
    fn event_type() -> &'static str;
}

/// Event type identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(String);

impl EventType {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event fired on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T = serde_json::Value> {
    pub event_type: EventType,
    pub data: T,
    pub time_fired: DateTime<Utc>,
    pub context: Context,
}

impl<T> Event<T> {
    pub fn new(event_type: impl Into<EventType>, data: T, context: Context) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            time_fired: Utc::now(),
            context,
        }
    }
}

impl<T: EventData + Serialize> Event<T> {
    /// Build an untyped event from typed data
    pub fn to_json(data: T, context: Context) -> Event<serde_json::Value> {
        let json = serde_json::to_value(&data).unwrap_or_default();
        Event::new(T::event_type(), json, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DeviceStateUpdatedData;
    use serde_json::json;

    #[test]
    fn test_typed_event_to_json() {
        let data = DeviceStateUpdatedData {
            domain: "webostv".into(),
            host: "1.2.3.4".into(),
            update: json!({"volume": 12}),
        };
        let event = Event::to_json(data, Context::new());
        assert_eq!(event.event_type.as_str(), "device_link_state_updated");
        assert_eq!(event.data["host"], "1.2.3.4");
        assert_eq!(event.data["update"]["volume"], 12);
    }
}
