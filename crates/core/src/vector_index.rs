// crates/core/src/vector_index.rs
use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::embedding::Embedder;

/// A searchable document. `embedding` is cached on disk when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub title: String,
    pub content: String,
    #[serde(skip)]
    pub score: f32,
}

/// Nearest-neighbour lookup over named collections.
pub trait VectorStore: Send + Sync {
    fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<Hit>>;
}

/// Read a JSON array of documents.
pub fn load_documents(path: &Path) -> Result<Vec<Document>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read documents from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse documents in {}", path.display()))
}

/// In-memory index over one collection.
///
/// Linear scan + cosine similarity.
#[derive(Debug)]
pub struct VectorIndex {
    dim: usize,
    entries: Vec<(Document, Vec<f32>)>,
}

impl VectorIndex {
    /// Build an index from documents, embedding any that have no vector yet.
    pub fn build(documents: &mut [Document], embedder: &dyn Embedder) -> Result<Self> {
        let mut entries = Vec::with_capacity(documents.len());
        let mut dim: Option<usize> = None;
        let total = documents.len();

        for (i, doc) in documents.iter_mut().enumerate() {
            let emb = match &doc.embedding {
                Some(emb) => emb.clone(),
                None => {
                    tracing::info!("[index] ({}/{}) embedding: {}", i + 1, total, doc.title);
                    let emb = embedder
                        .embed(&format!("{}\n{}", doc.title, doc.content))
                        .with_context(|| format!("failed to embed document {}", doc.title))?;
                    doc.embedding = Some(emb.clone());
                    emb
                }
            };

            match dim {
                Some(d) if d != emb.len() => anyhow::bail!(
                    "inconsistent embedding dimensions: {} vs {} for document {}",
                    d,
                    emb.len(),
                    doc.title
                ),
                Some(_) => {}
                None => dim = Some(emb.len()),
            }

            let stored = Document {
                title: doc.title.clone(),
                content: doc.content.clone(),
                embedding: None,
            };
            entries.push((stored, emb));
        }

        Ok(Self {
            dim: dim.unwrap_or(0),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-k documents for a precomputed query vector, best first.
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        if self.dim != query.len() {
            anyhow::bail!(
                "query embedding dimension {} does not match index dimension {}",
                query.len(),
                self.dim
            );
        }

        let mut scored: Vec<Hit> = self
            .entries
            .iter()
            .map(|(doc, emb)| Hit {
                title: doc.title.clone(),
                content: doc.content.clone(),
                score: cosine_similarity(query, emb),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }
}

/// Named collections of in-memory indexes.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: HashMap<String, VectorIndex>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: impl Into<String>, index: VectorIndex) {
        self.collections.insert(collection.into(), index);
    }
}

impl VectorStore for InMemoryStore {
    fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<Hit>> {
        let index = self
            .collections
            .get(collection)
            .with_context(|| format!("unknown collection '{collection}'"))?;
        index.nearest(vector, k)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }

    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }

    dot / (na.sqrt() * nb.sqrt())
}
