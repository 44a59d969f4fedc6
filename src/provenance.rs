//! Provenance Chain
//!
//! Append-only version history for tools. Every verification event writes
//! one record binding the tool's content hash to the Gauntlet run that
//! verified it, signed so the pair can be checked later. Fork records also
//! carry the parent's content hash, which makes lineage walkable like a
//! version tree.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::hashing;
use crate::models::{PerformanceProfile, ProvenanceRecord, SecurityVerdict, Tool};
use crate::store::ToolStore;

pub struct ProvenanceChain {
    store: Arc<Mutex<ToolStore>>,
}

impl ProvenanceChain {
    pub fn new(store: Arc<Mutex<ToolStore>>) -> Self {
        Self { store }
    }

    /// Append a record for a verification event. `parent_hash` is the
    /// parent tool's content hash when this version is a fork.
    pub async fn create_record(
        &self,
        tool: &Tool,
        gauntlet_run_id: &str,
        security_scan: SecurityVerdict,
        performance: PerformanceProfile,
        parent_hash: Option<String>,
    ) -> Result<ProvenanceRecord> {
        let signature = hashing::sign(&tool.content_hash, gauntlet_run_id);

        let record = ProvenanceRecord {
            tool_id: tool.id.clone(),
            version: tool.version,
            content_hash: tool.content_hash.clone(),
            parent_hash,
            parent_tool_id: tool.parent_tool_id.clone(),
            author_agent_id: tool.author_agent_id.clone(),
            gauntlet_run_id: gauntlet_run_id.to_string(),
            security_scan,
            performance,
            signature,
            created_at: Utc::now(),
        };

        self.store.lock().await.save_provenance(&record)?;
        debug!(tool_id = %record.tool_id, version = record.version, "provenance record appended");
        Ok(record)
    }

    /// All records for one tool id, oldest first.
    pub async fn get_chain(&self, tool_id: &str) -> Result<Vec<ProvenanceRecord>> {
        self.store.lock().await.get_provenance_chain(tool_id)
    }

    /// Full ancestry across forks, oldest ancestor first. Walks
    /// parent_tool_id links until the root.
    pub async fn get_lineage(&self, tool_id: &str) -> Result<Vec<ProvenanceRecord>> {
        let mut chains: Vec<Vec<ProvenanceRecord>> = Vec::new();
        let mut current = Some(tool_id.to_string());

        while let Some(id) = current {
            let store = self.store.lock().await;
            chains.push(store.get_provenance_chain(&id)?);
            current = store.get_tool(&id)?.and_then(|t| t.parent_tool_id);
        }

        // Ancestors first; records within each tool stay oldest first.
        Ok(chains.into_iter().rev().flatten().collect())
    }

    /// Check a record's signature against its (hash, run id) pair.
    pub fn verify_record(record: &ProvenanceRecord) -> bool {
        hashing::verify(
            &record.content_hash,
            &record.gauntlet_run_id,
            &record.signature,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tool;

    fn chain() -> ProvenanceChain {
        let store = Arc::new(Mutex::new(ToolStore::open_in_memory().unwrap()));
        ProvenanceChain::new(store)
    }

    async fn saved_tool(chain: &ProvenanceChain, name: &str) -> Tool {
        let mut tool = Tool::new(
            name.into(),
            format!("def {name}(): pass"),
            "d".into(),
            format!("{name}()"),
        );
        tool.content_hash = hashing::hash_tool(&tool.code, &tool.description, &tool.test_case);
        chain.store.lock().await.save_tool(&tool).unwrap();
        tool
    }

    #[tokio::test]
    async fn record_is_signed_and_verifiable() {
        let chain = chain();
        let tool = saved_tool(&chain, "f").await;
        let record = chain
            .create_record(
                &tool,
                "run-1",
                SecurityVerdict::Pass,
                PerformanceProfile::default(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(record.content_hash, tool.content_hash);
        assert!(record.parent_hash.is_none());
        assert!(ProvenanceChain::verify_record(&record));

        let mut tampered = record.clone();
        tampered.gauntlet_run_id = "run-2".to_string();
        assert!(!ProvenanceChain::verify_record(&tampered));
    }

    #[tokio::test]
    async fn chain_returns_oldest_first() {
        let chain = chain();
        let mut tool = saved_tool(&chain, "f").await;
        for version in 1..=3 {
            tool.version = version;
            chain
                .create_record(
                    &tool,
                    &format!("run-{version}"),
                    SecurityVerdict::Pass,
                    PerformanceProfile::default(),
                    None,
                )
                .await
                .unwrap();
        }
        let records = chain.get_chain(&tool.id).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.version).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn lineage_walks_forks_oldest_ancestor_first() {
        let chain = chain();
        let parent = saved_tool(&chain, "parent").await;
        chain
            .create_record(
                &parent,
                "run-p",
                SecurityVerdict::Pass,
                PerformanceProfile::default(),
                None,
            )
            .await
            .unwrap();

        let mut fork = Tool::new(
            "child".into(),
            "def child(): pass".into(),
            "d".into(),
            "child()".into(),
        );
        fork.content_hash = hashing::hash_tool(&fork.code, &fork.description, &fork.test_case);
        fork.parent_tool_id = Some(parent.id.clone());
        fork.version = 2;
        chain.store.lock().await.save_tool(&fork).unwrap();
        chain
            .create_record(
                &fork,
                "run-c",
                SecurityVerdict::Pass,
                PerformanceProfile::default(),
                Some(parent.content_hash.clone()),
            )
            .await
            .unwrap();

        let lineage = chain.get_lineage(&fork.id).await.unwrap();
        assert_eq!(lineage.len(), 2);
        assert_eq!(lineage[0].tool_id, parent.id);
        assert_eq!(lineage[1].tool_id, fork.id);
        assert_eq!(
            lineage[1].parent_hash.as_deref(),
            Some(parent.content_hash.as_str())
        );
    }
}
