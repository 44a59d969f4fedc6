//! Registry Orchestrator
//!
//! Wires the subsystems together and implements the seven public
//! operations. Handlers return JSON values; the transport layer just
//! serializes them. The submission pipeline is:
//!
//!   Forge intake -> Gauntlet (scan + sandbox) -> provenance record ->
//!   activation (trust: Verified) or delisting
//!
//! Rejections come back as structured "rejected" responses with a closed
//! reason set rather than errors; only infrastructure failures propagate
//! as Err.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::RegistryConfig;
use crate::discovery::Discovery;
use crate::embeddings::{Embedder, EmbeddingService, VectorIndex};
use crate::fitness::FitnessScorer;
use crate::forge::{self, Forge, ForgeError};
use crate::gauntlet::Gauntlet;
use crate::models::{
    ForkRequest, Tool, ToolStatus, ToolSubmission, TrustLevel, UsageReport,
};
use crate::provenance::ProvenanceChain;
use crate::recipes::RecipeBook;
use crate::store::ToolStore;
use crate::trust::TrustEngine;

pub struct Registry {
    store: Arc<Mutex<ToolStore>>,
    embeddings: Arc<EmbeddingService>,
    index: Arc<VectorIndex>,
    forge: Forge,
    gauntlet: Gauntlet,
    discovery: Discovery,
    recipes: RecipeBook,
    fitness: FitnessScorer,
    provenance: ProvenanceChain,
    trust: TrustEngine,
}

impl Registry {
    /// Build the full registry from configuration. Opens (or creates) the
    /// database and picks the embedding backend.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let store = Arc::new(Mutex::new(ToolStore::open(&config.db_path)?));
        let embedder = match config.discovery.embedding_backend.as_str() {
            "hashed" => Embedder::hashed(config.discovery.embedding_dimension),
            _ => Embedder::ollama(&config.discovery)?,
        };
        Ok(Self::with_parts(config, store, embedder))
    }

    /// In-memory registry with the offline embedder.
    pub fn in_memory(config: RegistryConfig) -> Result<Self> {
        let store = Arc::new(Mutex::new(ToolStore::open_in_memory()?));
        let embedder = Embedder::hashed(config.discovery.embedding_dimension);
        Ok(Self::with_parts(config, store, embedder))
    }

    fn with_parts(
        config: RegistryConfig,
        store: Arc<Mutex<ToolStore>>,
        embedder: Embedder,
    ) -> Self {
        let embeddings = Arc::new(EmbeddingService::new(embedder));
        let index = Arc::new(VectorIndex::new());
        Self {
            forge: Forge::new(
                store.clone(),
                embeddings.clone(),
                index.clone(),
                config.forge.clone(),
            ),
            gauntlet: Gauntlet::new(config.gauntlet.clone()),
            discovery: Discovery::new(
                store.clone(),
                embeddings.clone(),
                index.clone(),
                config.discovery.clone(),
            ),
            recipes: RecipeBook::new(store.clone()),
            fitness: FitnessScorer::new(config.fitness.clone()),
            provenance: ProvenanceChain::new(store.clone()),
            trust: TrustEngine::new(store.clone()),
            store,
            embeddings,
            index,
        }
    }

    /// Rebuild the in-memory vector index from active tools. Run once at
    /// startup; the index does not survive restarts.
    pub async fn rebuild_index(&self) -> Result<usize> {
        let tools = self
            .store
            .lock()
            .await
            .list_tools(Some(ToolStatus::Active), 1_000_000, 0)?;
        let mut indexed = 0;
        for tool in &tools {
            match self.embeddings.embed(&forge::index_text(tool)).await {
                Ok(embedding) => {
                    self.index.add(&tool.id, embedding);
                    indexed += 1;
                }
                Err(e) => warn!(tool_id = %tool.id, error = %e, "failed to index tool at startup"),
            }
        }
        info!(indexed, total = tools.len(), "vector index rebuilt");
        Ok(indexed)
    }

    // ─── Operations ───

    /// submit_tool: intake, verify, and activate or reject.
    pub async fn submit_tool(&self, submission: ToolSubmission) -> Result<Value> {
        let tool = match self.forge.submit_tool(&submission).await {
            Ok(tool) => tool,
            Err(e) => return forge_rejection(e),
        };
        self.verify_and_activate(tool, None).await
    }

    /// fork_tool: same pipeline, with lineage back to the parent.
    pub async fn fork_tool(&self, request: ForkRequest) -> Result<Value> {
        let parent_hash = match self.store.lock().await.get_tool(&request.parent_tool_id)? {
            Some(parent) => Some(parent.content_hash),
            None => None,
        };
        let tool = match self.forge.fork_tool(&request).await {
            Ok(tool) => tool,
            Err(e) => return forge_rejection(e),
        };
        self.verify_and_activate(tool, parent_hash).await
    }

    /// Shared verification tail for submissions and forks.
    async fn verify_and_activate(
        &self,
        mut tool: Tool,
        parent_hash: Option<String>,
    ) -> Result<Value> {
        self.store
            .lock()
            .await
            .update_tool_status(&tool.id, ToolStatus::Verifying)?;

        let report = self.gauntlet.run(&tool.code, &tool.test_case).await?;

        if let Some(rejection) = &report.rejection {
            // Rejected tools are delisted, never deleted; the record and
            // its id stay queryable.
            self.forge.delist_tool(&tool.id).await?;
            let mut body = json!({
                "status": "rejected",
                "reason": rejection.reason.as_str(),
                "details": rejection.details,
                "tool_id": tool.id,
            });
            if let Some(run) = &report.run {
                body["execution_time_ms"] = json!(run.performance.execution_time_ms);
            }
            info!(tool_id = %tool.id, reason = rejection.reason.as_str(), "submission rejected");
            return Ok(body);
        }

        let record = self
            .provenance
            .create_record(
                &tool,
                &report.run_id,
                report.security,
                report.performance.clone(),
                parent_hash,
            )
            .await?;

        tool.trust_level = TrustLevel::Verified;
        tool.avg_execution_time_ms = report.performance.execution_time_ms;
        self.forge.activate_tool(&mut tool).await?;
        {
            let store = self.store.lock().await;
            store.save_tool(&tool)?;
            store.update_tool_trust(&tool.id, TrustLevel::Verified)?;
        }

        info!(tool_id = %tool.id, name = %tool.name, "tool active");
        Ok(json!({
            "status": "active",
            "tool_id": tool.id,
            "name": tool.name,
            "version": tool.version,
            "parent_tool_id": tool.parent_tool_id,
            "fitness_score": tool.fitness_score,
            "trust_level": "verified",
            "content_hash": tool.content_hash,
            "signature": record.signature,
            "execution_time_ms": report.performance.execution_time_ms,
        }))
    }

    /// discover_tool: semantic search over active tools.
    pub async fn discover_tool(&self, query: &str, max_results: usize) -> Result<Value> {
        let results = self
            .discovery
            .search(query, max_results, TrustLevel::Submitted, None)
            .await?;

        if results.is_empty() {
            return Ok(json!({
                "results": [],
                "total": 0,
                "message": "No matching tools found. You could build one and submit it!",
            }));
        }

        Ok(json!({
            "results": results
                .iter()
                .map(|r| json!({
                    "tool_id": r.tool.id,
                    "name": r.tool.name,
                    "description": r.tool.description,
                    "fitness_score": r.tool.fitness_score,
                    "trust_level": r.tool.trust_level,
                    "similarity": r.similarity_score,
                    "total_uses": r.tool.total_uses,
                    "reason": r.reason,
                }))
                .collect::<Vec<_>>(),
            "total": results.len(),
        }))
    }

    /// get_tool: full details plus the tool's own provenance chain.
    pub async fn get_tool(&self, tool_id: &str) -> Result<Value> {
        let Some(tool) = self.store.lock().await.get_tool(tool_id)? else {
            return Ok(not_found(tool_id));
        };
        let chain = self.provenance.get_chain(tool_id).await?;

        Ok(json!({
            "id": tool.id,
            "name": tool.name,
            "description": tool.description,
            "code": tool.code,
            "test_case": tool.test_case,
            "input_schema": tool.input_schema,
            "output_type": tool.output_type,
            "dependencies": tool.dependencies,
            "status": tool.status,
            "trust_level": tool.trust_level,
            "fitness_score": tool.fitness_score,
            "total_uses": tool.total_uses,
            "successful_uses": tool.successful_uses,
            "unique_agents": tool.unique_agents,
            "avg_execution_time_ms": tool.avg_execution_time_ms,
            "tags": tool.tags,
            "version": tool.version,
            "parent_tool_id": tool.parent_tool_id,
            "content_hash": tool.content_hash,
            "created_at": tool.created_at.to_rfc3339(),
            "provenance": chain
                .iter()
                .map(|r| json!({
                    "version": r.version,
                    "content_hash": r.content_hash,
                    "parent_hash": r.parent_hash,
                    "gauntlet_run_id": r.gauntlet_run_id,
                    "security_scan": r.security_scan,
                    "signature": r.signature,
                    "created_at": r.created_at.to_rfc3339(),
                }))
                .collect::<Vec<_>>(),
        }))
    }

    /// list_available_tools: active tools by fitness.
    pub async fn list_available_tools(&self, limit: usize) -> Result<Value> {
        let limit = if limit == 0 { 20 } else { limit };
        let summaries = self.discovery.list_tools(limit, 0).await?;
        Ok(json!({
            "tools": summaries
                .iter()
                .map(|s| json!({
                    "id": s.id,
                    "name": s.name,
                    "description": truncate_chars(&s.description, 100),
                    "fitness_score": s.fitness_score,
                    "trust_level": s.trust_level,
                    "total_uses": s.total_uses,
                    "tags": s.tags,
                }))
                .collect::<Vec<_>>(),
            "total": summaries.len(),
        }))
    }

    /// report_usage: fold an outcome into the counters, rescore, and apply
    /// trust promotion or fitness delisting.
    pub async fn report_usage(&self, report: UsageReport) -> Result<Value> {
        {
            let mut store = self.store.lock().await;
            if store.get_tool(&report.tool_id)?.is_none() {
                return Ok(not_found(&report.tool_id));
            }
            store.record_usage(&report)?;
        }

        let Some(tool) = self.store.lock().await.get_tool(&report.tool_id)? else {
            return Ok(not_found(&report.tool_id));
        };

        let new_fitness = self.fitness.calculate(&tool);
        self.store
            .lock()
            .await
            .update_tool_fitness(&tool.id, new_fitness)?;

        let trust_level = self.trust.evaluate(&tool).await?;

        let mut delisted = false;
        if tool.status == ToolStatus::Active && self.fitness.should_delist(&tool) {
            self.forge.delist_tool(&tool.id).await?;
            delisted = true;
            warn!(tool_id = %tool.id, fitness = new_fitness, "tool delisted for low fitness");
        }

        Ok(json!({
            "recorded": true,
            "tool_id": tool.id,
            "new_fitness_score": new_fitness,
            "trust_level": trust_level,
            "total_uses": tool.total_uses,
            "unique_agents": tool.unique_agents,
            "delisted": delisted,
        }))
    }

    /// get_recipe: list verified tool chains, best first.
    pub async fn get_recipe(&self, limit: usize) -> Result<Value> {
        let limit = if limit == 0 { 10 } else { limit };
        let recipes = self.recipes.list_recipes(limit).await?;
        Ok(json!({
            "recipes": recipes
                .iter()
                .map(|r| json!({
                    "id": r.id,
                    "name": r.name,
                    "description": r.description,
                    "steps": r.steps
                        .iter()
                        .map(|s| json!({
                            "tool_id": s.tool_id,
                            "tool_name": s.tool_name,
                            "order": s.order,
                        }))
                        .collect::<Vec<_>>(),
                    "total_fitness": r.total_fitness,
                    "total_uses": r.total_uses,
                }))
                .collect::<Vec<_>>(),
            "total": recipes.len(),
        }))
    }

    pub fn recipes(&self) -> &RecipeBook {
        &self.recipes
    }

    pub fn provenance(&self) -> &ProvenanceChain {
        &self.provenance
    }
}

/// Forge-level rejections become structured responses; anything without a
/// closed reason is an infrastructure error and propagates.
fn forge_rejection(e: ForgeError) -> Result<Value> {
    match e.rejection_reason() {
        Some(reason) => {
            info!(reason = reason.as_str(), "intake rejected: {e}");
            Ok(json!({
                "status": "rejected",
                "reason": reason.as_str(),
                "details": e.to_string(),
            }))
        }
        None => {
            error!("intake failed: {e}");
            Err(e.into())
        }
    }
}

fn not_found(tool_id: &str) -> Value {
    json!({ "error": "Tool not found", "tool_id": tool_id })
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
