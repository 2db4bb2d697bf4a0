use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use toolsmith_core::catalog::{default_errors, HttpMethod, ParamLocation, Parameter, ToolDescriptor};
use toolsmith_core::embedding::Embedder;
use toolsmith_core::vector_index::{self, Hit, InMemoryStore, VectorIndex, VectorStore};

use crate::handler::{ToolError, ToolHandler, ToolRequest};

pub const COLLECTION: &str = "articles";
pub const TOP_K: usize = 10;

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "relevant_articles".to_string(),
        method: HttpMethod::Post,
        path: "/relevant-articles".to_string(),
        summary: "Find the articles most relevant to a query".to_string(),
        parameters: vec![Parameter {
            name: "query".to_string(),
            location: ParamLocation::Body,
            required: true,
            kind: "string".to_string(),
            items: None,
            description: Some("Free-text search query".to_string()),
        }],
        response_description: "Up to 10 articles, most relevant first".to_string(),
        response_schema: json!({
            "type": "object",
            "properties": {
                "articles": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "content": { "type": "string" }
                        }
                    }
                }
            }
        }),
        errors: default_errors(),
    }
}

/// Embeds the query and searches the article collection.
pub struct ArticlesTool {
    embedder: Option<Arc<dyn Embedder>>,
    store: Arc<dyn VectorStore>,
}

impl ArticlesTool {
    /// `embedder` is `None` when no embedding service is configured; queries then fail
    /// with a server error.
    pub fn new(embedder: Option<Arc<dyn Embedder>>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }
}

#[async_trait]
impl ToolHandler for ArticlesTool {
    async fn invoke(&self, request: ToolRequest) -> Result<Value, ToolError> {
        let query = request
            .str("query")
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::Validation("No query provided".to_string()))?
            .to_string();

        let embedder = self
            .embedder
            .clone()
            .ok_or_else(|| ToolError::Internal("No embedding service is configured".to_string()))?;
        let store = self.store.clone();

        let hits: Vec<Hit> = tokio::task::spawn_blocking(move || -> Result<Vec<Hit>> {
            let vector = embedder.embed(&query).context("failed to embed query")?;
            store.query(COLLECTION, &vector, TOP_K)
        })
        .await
        .map_err(|e| ToolError::Internal(format!("search task failed: {e}")))??;

        Ok(json!({ "articles": hits }))
    }
}

/// Article store loaded from a JSON file on first query.
///
/// Documents without a cached embedding are embedded while loading and the file is
/// rewritten with the vectors. A failed load is retried on the next query.
pub struct LazyArticleStore {
    path: PathBuf,
    embedder: Option<Arc<dyn Embedder>>,
    loaded: Mutex<Option<Arc<InMemoryStore>>>,
}

impl LazyArticleStore {
    pub fn new(path: PathBuf, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            path,
            embedder,
            loaded: Mutex::new(None),
        }
    }

    fn get_or_load(&self) -> Result<Arc<InMemoryStore>> {
        let mut slot = self
            .loaded
            .lock()
            .map_err(|_| anyhow::anyhow!("article store lock poisoned"))?;
        if let Some(store) = slot.as_ref() {
            return Ok(store.clone());
        }

        let embedder = self
            .embedder
            .as_deref()
            .context("no embedding service is configured")?;

        let mut documents = vector_index::load_documents(&self.path)?;
        let missing = documents.iter().filter(|d| d.embedding.is_none()).count();
        let index = VectorIndex::build(&mut documents, embedder)?;

        if missing > 0 {
            let json = serde_json::to_string_pretty(&documents)?;
            if let Err(e) = std::fs::write(&self.path, json) {
                tracing::warn!(path = %self.path.display(), "failed to cache embeddings: {e}");
            }
        }
        tracing::info!(documents = index.len(), embedded = missing, "article index loaded");

        let mut store = InMemoryStore::new();
        store.insert(COLLECTION, index);
        let store = Arc::new(store);
        *slot = Some(store.clone());
        Ok(store)
    }
}

impl VectorStore for LazyArticleStore {
    fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<Hit>> {
        self.get_or_load()?.query(collection, vector, k)
    }
}
