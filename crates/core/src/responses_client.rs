// crates/core/src/responses_client.rs

//! Model client for the Responses API (Azure AI Foundry or OpenAI).

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::ai_client::{AiClient, InputItem, Response, ResponseItem, Tool};

const MAX_ATTEMPTS: u32 = 3;

/// How the API key is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthStyle {
    /// Azure: `api-key: <key>`
    ApiKeyHeader,
    /// OpenAI: `Authorization: Bearer <key>`
    Bearer,
}

/// Responses API client.
///
/// Environment variables (Foundry takes precedence when both are set):
/// - FOUNDRY_ENDPOINT, FOUNDRY_DEPLOYMENT, FOUNDRY_API_KEY
/// - OPENAI_API_KEY, OPENAI_MODEL (default "gpt-4.1-mini")
/// - FOUNDRY_MAX_TOKENS (default 16000), FOUNDRY_DEBUG
pub struct ResponsesClient {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    auth: AuthStyle,
    max_output_tokens: u32,
}

impl ResponsesClient {
    pub fn foundry(endpoint: &str, deployment: &str, api_key: &str) -> Self {
        let url = format!(
            "{}/openai/responses?api-version=2025-03-01-preview",
            endpoint.trim_end_matches('/')
        );
        Self::build(url, api_key, deployment, AuthStyle::ApiKeyHeader)
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self::build(
            "https://api.openai.com/v1/responses".to_string(),
            api_key,
            model,
            AuthStyle::Bearer,
        )
    }

    fn build(url: String, api_key: &str, model: &str, auth: AuthStyle) -> Self {
        let max_output_tokens = std::env::var("FOUNDRY_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(16000);

        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_else(|_| Client::new()),
            url,
            api_key: api_key.to_string(),
            model: model.to_string(),
            auth,
            max_output_tokens,
        }
    }

    /// Construct from environment. `model_override` replaces the deployment/model name,
    /// which lets the orchestrator and coder run on different models.
    pub fn from_env(model_override: Option<&str>) -> Result<Self> {
        if let Ok(endpoint) = std::env::var("FOUNDRY_ENDPOINT") {
            let deployment =
                std::env::var("FOUNDRY_DEPLOYMENT").context("FOUNDRY_DEPLOYMENT not set")?;
            let api_key = std::env::var("FOUNDRY_API_KEY").context("FOUNDRY_API_KEY not set")?;
            let deployment = model_override.unwrap_or(&deployment);
            tracing::info!(deployment, "using Foundry Responses API");
            return Ok(Self::foundry(&endpoint, deployment, &api_key));
        }

        let api_key = std::env::var("OPENAI_API_KEY")
            .context("neither FOUNDRY_ENDPOINT nor OPENAI_API_KEY is set")?;
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4.1-mini".to_string());
        let model = model_override.unwrap_or(&model);
        tracing::info!(model, "using OpenAI Responses API");
        Ok(Self::openai(&api_key, model))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, body: &ResponsesRequest) -> reqwest::blocking::RequestBuilder {
        let builder = self.client.post(&self.url).json(body);
        match self.auth {
            AuthStyle::ApiKeyHeader => builder.header("api-key", &self.api_key),
            AuthStyle::Bearer => builder.bearer_auth(&self.api_key),
        }
    }
}

/// Request body for Responses API.
#[derive(Serialize)]
struct ResponsesRequest {
    model: String,
    input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    tool_choice: String,
    store: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

/// Response from Responses API.
#[derive(Deserialize, Debug)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<ResponsesOutputItem>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum ResponsesOutputItem {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        content: Vec<ResponsesContent>,
    },
    #[serde(rename = "function_call")]
    FunctionCall {
        #[serde(default)]
        call_id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        arguments: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum ResponsesContent {
    #[serde(rename = "output_text")]
    OutputText { text: String },
    #[serde(other)]
    Other,
}

fn convert_output(parsed: ResponsesResponse) -> Response {
    let mut items = Vec::new();

    for item in parsed.output {
        match item {
            ResponsesOutputItem::Message { content } => {
                let text: String = content
                    .into_iter()
                    .filter_map(|c| match c {
                        ResponsesContent::OutputText { text } => Some(text),
                        ResponsesContent::Other => None,
                    })
                    .collect();
                if !text.is_empty() {
                    items.push(ResponseItem::Message(text));
                }
            }
            ResponsesOutputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => items.push(ResponseItem::FunctionCall {
                call_id,
                name,
                arguments,
            }),
            ResponsesOutputItem::Unknown => {}
        }
    }

    Response { items }
}

impl AiClient for ResponsesClient {
    fn respond(
        &self,
        instructions: &str,
        input: Vec<InputItem>,
        tools: &[Tool],
    ) -> Result<Response> {
        let request = ResponsesRequest {
            model: self.model.clone(),
            input,
            instructions: Some(instructions.to_string()),
            tools: tools.to_vec(),
            tool_choice: "auto".to_string(),
            store: false,
            max_output_tokens: Some(self.max_output_tokens),
        };

        if std::env::var("FOUNDRY_DEBUG").is_ok() {
            if let Ok(json) = serde_json::to_string_pretty(&request) {
                tracing::debug!(url = %self.url, model = %self.model, "request: {}", &json[..json.len().min(2000)]);
            }
        }

        let mut last_error = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.request(&request).send() {
                Ok(r) => {
                    let status = r.status();
                    if !status.is_success() {
                        let body = r.text().unwrap_or_default();

                        if status.as_u16() == 429 || status.is_server_error() {
                            // 5s, 20s, 45s for rate limits
                            let delay = if status.as_u16() == 429 {
                                5 * u64::from(attempt) * u64::from(attempt)
                            } else {
                                u64::from(attempt) * 2
                            };
                            tracing::warn!(
                                attempt,
                                %status,
                                delay_secs = delay,
                                "model request failed: {}",
                                &body[..body.len().min(500)]
                            );
                            last_error = Some(anyhow::anyhow!("HTTP {} - {}", status, body));
                            std::thread::sleep(Duration::from_secs(delay));
                            continue;
                        }

                        anyhow::bail!("model request failed: HTTP {} - {}", status, body);
                    }

                    let raw_text = r.text().context("failed to read response body")?;
                    tracing::debug!("model response: {}", &raw_text[..raw_text.len().min(500)]);

                    let parsed: ResponsesResponse = serde_json::from_str(&raw_text)
                        .context("failed to parse Responses API payload")?;
                    return Ok(convert_output(parsed));
                }
                Err(e) => {
                    tracing::warn!(attempt, "model request network error: {e}");
                    last_error = Some(anyhow::anyhow!("network error: {}", e));
                    std::thread::sleep(Duration::from_secs(u64::from(attempt)));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("request failed after retries")))
    }
}
