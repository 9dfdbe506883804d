//! Command registry with schema-validated async handlers
//!
//! Integrations register their device commands here once a device is ready
//! (`webostv.button`, `hue.hue_activate_scene`, ...). Every command declares
//! the shape of its payload as a JSON schema; a call whose payload does not
//! match is rejected before the handler runs, failing only that call.

use dashmap::DashMap;
use ha_core::{CommandCall, Context, SupportsResponse};
use jsonschema::JSONSchema;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Result type for command calls
pub type ServiceResult = Result<Option<serde_json::Value>, ServiceError>;

/// Future type for async command handlers
pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

/// Command handler function type
pub type ServiceHandler = Arc<dyn Fn(CommandCall) -> ServiceFuture + Send + Sync>;

/// Errors that can occur when registering or calling commands
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("command not found: {domain}.{command}")]
    NotFound { domain: String, command: String },

    #[error("command call failed: {0}")]
    CallFailed(String),

    #[error("invalid command data: {0}")]
    InvalidData(String),

    #[error("invalid schema for {domain}.{command}: {reason}")]
    InvalidSchema {
        domain: String,
        command: String,
        reason: String,
    },

    #[error("command does not support responses")]
    ResponseNotSupported,
}

/// Information about a registered command
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    pub domain: String,
    pub command: String,
    /// Declared payload shape
    pub schema: Option<serde_json::Value>,
    pub supports_response: SupportsResponse,
}

struct RegisteredService {
    handler: ServiceHandler,
    validator: Option<Arc<JSONSchema>>,
    description: ServiceDescription,
}

/// Registry of all device commands in the process
///
/// Owned by the hub and shared with every lifecycle manager; there is no
/// process-wide global.
pub struct ServiceRegistry {
    /// Commands indexed by "domain.command" key
    services: DashMap<String, RegisteredService>,
}

fn service_key(domain: &str, command: &str) -> String {
    format!("{}.{}", domain, command)
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Register a command
    ///
    /// # Arguments
    /// * `domain` - Integration domain (e.g., "webostv")
    /// * `command` - Command name (e.g., "button")
    /// * `handler` - Async function handling validated calls
    /// * `schema` - JSON schema every payload must satisfy
    /// * `supports_response` - Whether the command can return a response
    ///
    /// Registering an existing key replaces the previous handler.
    #[instrument(skip(self, domain, command, handler, schema))]
    pub fn register<F, Fut>(
        &self,
        domain: impl Into<String>,
        command: impl Into<String>,
        handler: F,
        schema: Option<serde_json::Value>,
        supports_response: SupportsResponse,
    ) -> Result<(), ServiceError>
    where
        F: Fn(CommandCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let domain = domain.into();
        let command = command.into();

        let validator = match &schema {
            Some(schema) => Some(Arc::new(JSONSchema::compile(schema).map_err(|e| {
                ServiceError::InvalidSchema {
                    domain: domain.clone(),
                    command: command.clone(),
                    reason: e.to_string(),
                }
            })?)),
            None => None,
        };

        debug!(domain = %domain, command = %command, "Registering command");

        let handler: ServiceHandler =
            Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);

        self.services.insert(
            service_key(&domain, &command),
            RegisteredService {
                handler,
                validator,
                description: ServiceDescription {
                    domain,
                    command,
                    schema,
                    supports_response,
                },
            },
        );
        Ok(())
    }

    /// Call a command
    ///
    /// The payload is validated against the declared shape first; a mismatch
    /// returns [`ServiceError::InvalidData`] without invoking the handler.
    #[instrument(skip(self, payload, context))]
    pub async fn call(
        &self,
        domain: &str,
        command: &str,
        payload: serde_json::Value,
        context: Context,
        return_response: bool,
    ) -> ServiceResult {
        let registered = self
            .services
            .get(&service_key(domain, command))
            .ok_or_else(|| {
                warn!(domain = %domain, command = %command, "Command not found");
                ServiceError::NotFound {
                    domain: domain.to_string(),
                    command: command.to_string(),
                }
            })?;

        if return_response && registered.description.supports_response == SupportsResponse::None
        {
            return Err(ServiceError::ResponseNotSupported);
        }

        if let Some(validator) = &registered.validator {
            if let Err(errors) = validator.validate(&payload) {
                let reason = errors
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                warn!(domain = %domain, command = %command, %reason, "Rejected command payload");
                return Err(ServiceError::InvalidData(reason));
            }
        }

        let handler = registered.handler.clone();
        drop(registered); // Release the shard lock before awaiting

        debug!(domain = %domain, command = %command, "Calling command");
        let result = handler(CommandCall::new(domain, command, payload, context)).await?;

        if return_response {
            Ok(result)
        } else {
            Ok(None)
        }
    }

    pub fn has_service(&self, domain: &str, command: &str) -> bool {
        self.services.contains_key(&service_key(domain, command))
    }

    pub fn get_service(&self, domain: &str, command: &str) -> Option<ServiceDescription> {
        self.services
            .get(&service_key(domain, command))
            .map(|s| s.description.clone())
    }

    /// All commands registered for a domain
    pub fn domain_services(&self, domain: &str) -> Vec<ServiceDescription> {
        self.services
            .iter()
            .filter(|s| s.description.domain == domain)
            .map(|s| s.description.clone())
            .collect()
    }

    /// All registered commands grouped by domain
    pub fn all_services(&self) -> HashMap<String, Vec<ServiceDescription>> {
        let mut result: HashMap<String, Vec<ServiceDescription>> = HashMap::new();
        for entry in self.services.iter() {
            result
                .entry(entry.description.domain.clone())
                .or_default()
                .push(entry.description.clone());
        }
        result
    }

    /// Unregister a command. Unregistering an unknown command is a no-op
    /// that returns `false`.
    #[instrument(skip(self))]
    pub fn unregister(&self, domain: &str, command: &str) -> bool {
        let removed = self.services.remove(&service_key(domain, command)).is_some();
        if removed {
            debug!(domain = %domain, command = %command, "Unregistered command");
        }
        removed
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for ServiceRegistry
pub type SharedServiceRegistry = Arc<ServiceRegistry>;
