// crates/core/src/embedding.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Abstract embedding provider.
///
/// The article search tool embeds the query and every article without a cached vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Where embedding requests go and how they authenticate.
#[derive(Debug, Clone)]
enum EmbeddingTarget {
    /// POST {endpoint}/openai/deployments/{deployment}/embeddings?api-version={version}
    Foundry {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
    /// POST https://api.openai.com/v1/embeddings
    OpenAi { model: String },
}

/// Embedding client for Microsoft AI Foundry (Azure OpenAI) or OpenAI.
///
/// Environment variables:
///
/// - FOUNDRY_ENDPOINT, FOUNDRY_EMBED_DEPLOYMENT, FOUNDRY_API_KEY
///     e.g. "https://myresource.openai.azure.com", "text-embedding-3-small"
/// - FOUNDRY_API_VERSION (optional, default "2024-02-15-preview")
/// - OPENAI_API_KEY, OPENAI_EMBED_MODEL (default "text-embedding-3-small")
///     used when FOUNDRY_ENDPOINT is absent
pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    target: EmbeddingTarget,
    api_key: String,
}

impl HttpEmbedder {
    pub fn from_env() -> Result<Self> {
        if let Ok(endpoint) = std::env::var("FOUNDRY_ENDPOINT") {
            let deployment = std::env::var("FOUNDRY_EMBED_DEPLOYMENT")
                .context("FOUNDRY_EMBED_DEPLOYMENT not set")?;
            let api_key = std::env::var("FOUNDRY_API_KEY").context("FOUNDRY_API_KEY not set")?;
            let api_version = std::env::var("FOUNDRY_API_VERSION")
                .unwrap_or_else(|_| "2024-02-15-preview".to_string());

            return Ok(Self::new(
                EmbeddingTarget::Foundry {
                    endpoint,
                    deployment,
                    api_version,
                },
                api_key,
            ));
        }

        let api_key = std::env::var("OPENAI_API_KEY")
            .context("neither FOUNDRY_ENDPOINT nor OPENAI_API_KEY is set")?;
        let model = std::env::var("OPENAI_EMBED_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());

        Ok(Self::new(EmbeddingTarget::OpenAi { model }, api_key))
    }

    fn new(target: EmbeddingTarget, api_key: String) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            target,
            api_key,
        }
    }

    fn url(&self) -> String {
        match &self.target {
            EmbeddingTarget::Foundry {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{}/embeddings?api-version={}",
                endpoint.trim_end_matches('/'),
                deployment,
                api_version,
            ),
            EmbeddingTarget::OpenAi { .. } => "https://api.openai.com/v1/embeddings".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let (body, request) = match &self.target {
            EmbeddingTarget::Foundry { .. } => (
                EmbeddingRequest {
                    input: text,
                    model: None,
                },
                self.client
                    .post(self.url())
                    .header("api-key", &self.api_key),
            ),
            EmbeddingTarget::OpenAi { model } => (
                EmbeddingRequest {
                    input: text,
                    model: Some(model),
                },
                self.client.post(self.url()).bearer_auth(&self.api_key),
            ),
        };

        let resp = request
            .json(&body)
            .send()
            .context("failed to send embedding request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text_body = resp
                .text()
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            anyhow::bail!("embeddings request failed: HTTP {} - {}", status, text_body);
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .context("failed to parse embeddings response JSON")?;

        let first = parsed
            .data
            .into_iter()
            .next()
            .context("embeddings response contained no data")?;

        Ok(first.embedding)
    }
}
