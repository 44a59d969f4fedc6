//! Semantic Discovery
//!
//! Natural-language tool search. Raw hits come from the vector index with
//! a 2x over-fetch, get re-checked against live store state (status and
//! trust can change between indexing and query time), then re-ranked by a
//! composite of similarity, fitness, and trust.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::DiscoveryConfig;
use crate::embeddings::{EmbeddingService, VectorIndex};
use crate::models::{DiscoveryResult, ToolStatus, ToolSummary, TrustLevel};
use crate::store::ToolStore;

pub struct Discovery {
    store: Arc<Mutex<ToolStore>>,
    embeddings: Arc<EmbeddingService>,
    index: Arc<VectorIndex>,
    config: DiscoveryConfig,
}

impl Discovery {
    pub fn new(
        store: Arc<Mutex<ToolStore>>,
        embeddings: Arc<EmbeddingService>,
        index: Arc<VectorIndex>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            index,
            config,
        }
    }

    /// Search for tools by intent. Only active tools at or above
    /// `min_trust` come back, best composite score first. `min_similarity`
    /// overrides the configured floor when given.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        min_trust: TrustLevel,
        min_similarity: Option<f64>,
    ) -> Result<Vec<DiscoveryResult>> {
        let max_results = if max_results == 0 {
            self.config.max_results
        } else {
            max_results
        };
        let min_similarity = min_similarity.unwrap_or(self.config.min_similarity);

        let embedding = self.embeddings.embed(query).await?;
        // Over-fetch: some raw hits will be dropped by the status/trust
        // re-check below.
        let hits = self
            .index
            .search(&embedding, max_results * 2, min_similarity);
        debug!(query, raw_hits = hits.len(), "discovery search");

        let mut results = Vec::new();
        {
            let store = self.store.lock().await;
            for (tool_id, similarity) in hits {
                let Some(tool) = store.get_tool(&tool_id)? else {
                    continue;
                };
                if tool.status != ToolStatus::Active || tool.trust_level < min_trust {
                    continue;
                }
                let summary = ToolSummary::from_tool(&tool);
                let reason = format!(
                    "similarity {:.2}, fitness {:.2}, trust {}",
                    similarity,
                    summary.fitness_score,
                    summary.trust_level.as_i64()
                );
                results.push(DiscoveryResult {
                    tool: summary,
                    similarity_score: similarity,
                    reason,
                });
            }
        }

        results.sort_by(|a, b| {
            composite_score(b)
                .partial_cmp(&composite_score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(max_results);
        Ok(results)
    }

    /// Active tools ordered by fitness.
    pub async fn list_tools(&self, limit: usize, offset: usize) -> Result<Vec<ToolSummary>> {
        let tools = self
            .store
            .lock()
            .await
            .list_tools(Some(ToolStatus::Active), limit, offset)?;
        Ok(tools.iter().map(ToolSummary::from_tool).collect())
    }
}

/// Ranking balances relevance against observed quality. The trust term is
/// scaled so even Community tier only nudges, never dominates.
fn composite_score(result: &DiscoveryResult) -> f64 {
    let trust_bonus = result.tool.trust_level.as_i64() as f64 * 0.05;
    0.50 * result.similarity_score + 0.35 * result.tool.fitness_score + 0.15 * trust_bonus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::Embedder;
    use crate::forge::index_text;
    use crate::models::Tool;

    struct Fixture {
        discovery: Discovery,
        store: Arc<Mutex<ToolStore>>,
        embeddings: Arc<EmbeddingService>,
        index: Arc<VectorIndex>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Mutex::new(ToolStore::open_in_memory().unwrap()));
        let embeddings = Arc::new(EmbeddingService::new(Embedder::hashed(512)));
        let index = Arc::new(VectorIndex::new());
        let config = DiscoveryConfig {
            min_similarity: 0.0,
            ..Default::default()
        };
        Fixture {
            discovery: Discovery::new(store.clone(), embeddings.clone(), index.clone(), config),
            store,
            embeddings,
            index,
        }
    }

    async fn add_tool(f: &Fixture, name: &str, description: &str, status: ToolStatus) -> Tool {
        let mut tool = Tool::new(
            name.into(),
            format!("def {name}(): pass"),
            description.into(),
            format!("{name}()"),
        );
        tool.status = status;
        f.store.lock().await.save_tool(&tool).unwrap();
        let embedding = f.embeddings.embed(&index_text(&tool)).await.unwrap();
        f.index.add(&tool.id, embedding);
        tool
    }

    #[tokio::test]
    async fn search_returns_relevant_active_tools() {
        let f = fixture();
        let target = add_tool(
            &f,
            "word_count",
            "count words in a text string",
            ToolStatus::Active,
        )
        .await;
        add_tool(&f, "resize_image", "resize jpeg images", ToolStatus::Active).await;

        let results = f
            .discovery
            .search("count the words in text", 5, TrustLevel::Submitted, None)
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].tool.id, target.id);
        assert!(results[0].reason.contains("similarity"));
    }

    #[tokio::test]
    async fn non_active_tools_are_filtered_even_if_indexed() {
        let f = fixture();
        // Delisted after indexing: still in the index, must not surface
        let delisted = add_tool(
            &f,
            "word_count",
            "count words in a text string",
            ToolStatus::Delisted,
        )
        .await;

        let results = f
            .discovery
            .search("count words", 5, TrustLevel::Submitted, None)
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.tool.id != delisted.id));
    }

    #[tokio::test]
    async fn trust_floor_filters_results() {
        let f = fixture();
        add_tool(&f, "word_count", "count words in text", ToolStatus::Active).await;

        let results = f
            .discovery
            .search("count words", 5, TrustLevel::Verified, None)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn ranking_prefers_fitter_tool_at_equal_similarity() {
        let f = fixture();
        let mut weak = add_tool(&f, "sum_list", "sum numbers in a list", ToolStatus::Active).await;
        let mut strong = weak.clone();
        strong.id = uuid::Uuid::new_v4().to_string();
        strong.fitness_score = 0.95;
        weak.fitness_score = 0.2;
        {
            let store = f.store.lock().await;
            store.save_tool(&weak).unwrap();
            store.save_tool(&strong).unwrap();
        }
        let embedding = f.embeddings.embed(&index_text(&strong)).await.unwrap();
        f.index.add(&strong.id, embedding);

        let results = f
            .discovery
            .search("sum numbers in a list", 5, TrustLevel::Submitted, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool.id, strong.id);
    }

    #[tokio::test]
    async fn per_call_similarity_floor_overrides_config() {
        let f = fixture();
        add_tool(&f, "word_count", "count words in text", ToolStatus::Active).await;

        let relaxed = f
            .discovery
            .search("count words", 5, TrustLevel::Submitted, None)
            .await
            .unwrap();
        assert!(!relaxed.is_empty());

        // An unreachable floor on the same query filters everything out.
        let strict = f
            .discovery
            .search("count words", 5, TrustLevel::Submitted, Some(0.999))
            .await
            .unwrap();
        assert!(strict.is_empty());
    }

    #[tokio::test]
    async fn max_results_is_honored() {
        let f = fixture();
        for i in 0..6 {
            add_tool(
                &f,
                &format!("sorter_{i}"),
                "sort a list of numbers",
                ToolStatus::Active,
            )
            .await;
        }
        let results = f
            .discovery
            .search("sort numbers", 3, TrustLevel::Submitted, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn list_tools_orders_by_fitness() {
        let f = fixture();
        let mut a = add_tool(&f, "a", "tool a", ToolStatus::Active).await;
        let mut b = add_tool(&f, "b", "tool b", ToolStatus::Active).await;
        a.fitness_score = 0.3;
        b.fitness_score = 0.9;
        {
            let store = f.store.lock().await;
            store.save_tool(&a).unwrap();
            store.save_tool(&b).unwrap();
        }
        let listed = f.discovery.list_tools(10, 0).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.id);
    }
}
