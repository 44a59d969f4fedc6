//! Embeddings and the In-Memory Vector Index
//!
//! Tool descriptions are embedded for semantic discovery. The embedder is
//! a closed enum: an Ollama-compatible HTTP backend for real deployments,
//! and a deterministic feature-hashing fallback that needs no network and
//! keeps the discovery path testable offline.
//!
//! Embeddings are cached by text. The index itself is a flat in-memory
//! map with brute-force cosine search; registry sizes make anything
//! fancier unnecessary for now.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use moka::future::Cache;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::DiscoveryConfig;

/// Embedding backend.
pub enum Embedder {
    /// Ollama-compatible /api/embeddings endpoint
    Ollama {
        client: reqwest::Client,
        url: String,
        model: String,
    },
    /// Deterministic feature hashing over word tokens. No network.
    Hashed { dimension: usize },
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl Embedder {
    pub fn ollama(config: &DiscoveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build embedding http client")?;
        Ok(Self::Ollama {
            client,
            url: config.embedding_url.clone(),
            model: config.embedding_model.clone(),
        })
    }

    pub fn hashed(dimension: usize) -> Self {
        Self::Hashed { dimension }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self {
            Self::Ollama { client, url, model } => {
                let response = client
                    .post(format!("{url}/api/embeddings"))
                    .json(&json!({ "model": model, "prompt": text }))
                    .send()
                    .await
                    .context("embedding request failed")?;
                if !response.status().is_success() {
                    return Err(anyhow!(
                        "embedding endpoint returned {}",
                        response.status()
                    ));
                }
                let body: OllamaEmbeddingResponse = response
                    .json()
                    .await
                    .context("malformed embedding response")?;
                if body.embedding.is_empty() {
                    return Err(anyhow!("embedding endpoint returned empty vector"));
                }
                Ok(body.embedding)
            }
            Self::Hashed { dimension } => Ok(hashed_embedding(text, *dimension)),
        }
    }
}

/// L2-normalized bag-of-words vector via feature hashing. Deterministic
/// for identical input text.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vec = vec![0.0f32; dimension.max(1)];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let bucket = (hasher.finish() as usize) % vec.len();
        vec[bucket] += 1.0;
    }
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Embedder plus a text-keyed cache.
pub struct EmbeddingService {
    embedder: Embedder,
    cache: Cache<String, Arc<Vec<f32>>>,
}

impl EmbeddingService {
    pub fn new(embedder: Embedder) -> Self {
        Self {
            embedder,
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(24 * 3600))
                .build(),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Arc<Vec<f32>>> {
        if let Some(hit) = self.cache.get(text).await {
            return Ok(hit);
        }
        let vec = Arc::new(self.embedder.embed(text).await?);
        self.cache.insert(text.to_string(), vec.clone()).await;
        debug!(len = vec.len(), "embedded text");
        Ok(vec)
    }
}

/// Flat in-memory vector index keyed by tool id.
#[derive(Default)]
pub struct VectorIndex {
    vectors: RwLock<HashMap<String, Arc<Vec<f32>>>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, tool_id: &str, embedding: Arc<Vec<f32>>) {
        if let Ok(mut vectors) = self.vectors.write() {
            vectors.insert(tool_id.to_string(), embedding);
        }
    }

    pub fn remove(&self, tool_id: &str) {
        if let Ok(mut vectors) = self.vectors.write() {
            if vectors.remove(tool_id).is_none() {
                warn!(tool_id, "removed missing tool from vector index");
            }
        }
    }

    pub fn contains(&self, tool_id: &str) -> bool {
        self.vectors
            .read()
            .map(|v| v.contains_key(tool_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.vectors.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Brute-force cosine search. Hits below `min_similarity` are dropped;
    /// the rest come back best first, at most `limit`.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f64,
    ) -> Vec<(String, f64)> {
        let vectors = match self.vectors.read() {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };
        let mut hits: Vec<(String, f64)> = vectors
            .iter()
            .map(|(id, vec)| (id.clone(), cosine_similarity(query, vec) as f64))
            .filter(|(_, sim)| *sim >= min_similarity)
            .collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        hits
    }
}
