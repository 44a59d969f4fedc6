//! Trust Tiers
//!
//! Tools earn trust through verified usage. Promotion is strictly
//! monotonic: status and fitness handle quality control, trust never goes
//! back down. Promotion to Verified is the Gauntlet's job; this module
//! only handles the usage-driven tiers, one step per evaluation.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::{Tool, TrustLevel};
use crate::store::ToolStore;

/// Thresholds: (unique agents, successful uses).
const BATTLE_TESTED_AT: (i64, i64) = (10, 20);
const COMMUNITY_AT: (i64, i64) = (50, 100);

pub struct TrustEngine {
    store: Arc<Mutex<ToolStore>>,
}

impl TrustEngine {
    pub fn new(store: Arc<Mutex<ToolStore>>) -> Self {
        Self { store }
    }

    /// Evaluate a tool against the promotion thresholds and persist any
    /// promotion. Returns the (possibly new) trust level.
    pub async fn evaluate(&self, tool: &Tool) -> Result<TrustLevel> {
        let Some(next) = next_level(tool) else {
            return Ok(tool.trust_level);
        };

        self.store.lock().await.update_tool_trust(&tool.id, next)?;
        info!(
            tool_id = %tool.id,
            from = tool.trust_level.as_i64(),
            to = next.as_i64(),
            "trust promotion"
        );
        Ok(next)
    }
}

/// Next tier the tool qualifies for, if any. One step at a time.
fn next_level(tool: &Tool) -> Option<TrustLevel> {
    match tool.trust_level {
        // Unverified tools cannot be promoted by usage
        TrustLevel::Submitted => None,
        TrustLevel::Verified if meets(tool, BATTLE_TESTED_AT) => Some(TrustLevel::BattleTested),
        TrustLevel::BattleTested if meets(tool, COMMUNITY_AT) => Some(TrustLevel::Community),
        _ => None,
    }
}

fn meets(tool: &Tool, (agents, successes): (i64, i64)) -> bool {
    tool.unique_agents >= agents && tool.successful_uses >= successes
}
