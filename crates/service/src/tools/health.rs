use std::sync::Weak;

use async_trait::async_trait;
use serde_json::{json, Value};
use toolsmith_core::catalog::{HttpMethod, ToolDescriptor};

use crate::extensions::ExtensionHost;
use crate::handler::{ToolError, ToolHandler, ToolRequest};
use crate::registry::ToolRegistry;

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "health".to_string(),
        method: HttpMethod::Get,
        path: "/health".to_string(),
        summary: "Service status: registry generation, extension module state and recent registrations".to_string(),
        parameters: Vec::new(),
        response_description: "Service status".to_string(),
        response_schema: json!({
            "type": "object",
            "properties": {
                "status": { "type": "string" },
                "generation": { "type": "integer" },
                "extension": { "type": "object" },
                "recent_registrations": { "type": "array" }
            }
        }),
        errors: Vec::new(),
    }
}

/// Holds weak references: the registry owns this handler.
pub struct HealthTool {
    registry: Weak<ToolRegistry>,
    extensions: Weak<ExtensionHost>,
}

impl HealthTool {
    pub fn new(registry: Weak<ToolRegistry>, extensions: Weak<ExtensionHost>) -> Self {
        Self {
            registry,
            extensions,
        }
    }
}

#[async_trait]
impl ToolHandler for HealthTool {
    async fn invoke(&self, _request: ToolRequest) -> Result<Value, ToolError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| ToolError::Internal("registry is shutting down".to_string()))?;

        let extension = match self.extensions.upgrade() {
            Some(host) => serde_json::to_value(host.status().await)
                .map_err(|e| ToolError::Internal(e.to_string()))?,
            None => Value::Null,
        };

        Ok(json!({
            "status": "ok",
            "generation": registry.generation().await,
            "extension": extension,
            "recent_registrations": registry.recent().await,
        }))
    }
}
