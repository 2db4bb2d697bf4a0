use async_trait::async_trait;
use serde_json::{json, Value};
use toolsmith_core::catalog::{default_errors, HttpMethod, ParamLocation, Parameter, ToolDescriptor};

use crate::handler::{ToolError, ToolHandler, ToolRequest};

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "wiki_summary".to_string(),
        method: HttpMethod::Get,
        path: "/wiki-summary".to_string(),
        summary: "Fetch a short encyclopedia summary for a topic".to_string(),
        parameters: vec![Parameter {
            name: "topic".to_string(),
            location: ParamLocation::Query,
            required: true,
            kind: "string".to_string(),
            items: None,
            description: Some("Page title to summarize".to_string()),
        }],
        response_description: "The topic and its summary text".to_string(),
        response_schema: json!({
            "type": "object",
            "properties": {
                "topic": { "type": "string" },
                "summary": { "type": "string" }
            }
        }),
        errors: default_errors(),
    }
}

/// Looks up `<api_base>/page/summary/<topic>`.
pub struct WikiSummaryTool {
    client: reqwest::Client,
    api_base: String,
}

impl WikiSummaryTool {
    pub fn new(client: reqwest::Client, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ToolHandler for WikiSummaryTool {
    async fn invoke(&self, request: ToolRequest) -> Result<Value, ToolError> {
        let topic = request
            .str("topic")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ToolError::Validation("No topic provided".to_string()))?;

        let url = format!(
            "{}/page/summary/{}",
            self.api_base,
            urlencoding::encode(topic)
        );

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ToolError::Upstream(format!("Failed to reach summary service: {e}")))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ToolError::Upstream(format!(
                "Failed to fetch summary for '{topic}': upstream returned {status}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::Upstream(format!("Summary service sent invalid JSON: {e}")))?;

        let summary = body
            .get("extract")
            .and_then(Value::as_str)
            .unwrap_or_default();

        Ok(json!({ "topic": topic, "summary": summary }))
    }
}
