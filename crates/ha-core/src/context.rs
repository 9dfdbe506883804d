//! Context type for tracing what caused an event or command

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Origin and causality of events and command calls
///
/// A flow, a setup attempt or a command invocation creates a context; the
/// events it fires carry a child so the chain can be followed in logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier (ULID)
    pub id: String,

    /// Parent context ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            parent_id: None,
        }
    }

    /// Create a child context with this context as parent
    pub fn child(&self) -> Self {
        Self {
            id: Ulid::new().to_string(),
            parent_id: Some(self.id.clone()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
