//! Artifact Store
//!
//! SQLite persistence for tools, usage events, provenance entries, and
//! recipes. All counter updates are atomic SQL increments; the unique-agent
//! count is always recomputed from the per-(tool, agent) usage table rather
//! than incremented independently, so concurrent reports from the same agent
//! never double count.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

use crate::models::{
    PerformanceProfile, ProvenanceRecord, Recipe, RecipeStep, SecurityVerdict, Tool, ToolStatus,
    TrustLevel, UsageReport,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tools (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    code TEXT NOT NULL,
    description TEXT NOT NULL,
    test_case TEXT NOT NULL,
    dependencies TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    input_schema TEXT NOT NULL DEFAULT '{}',
    output_type TEXT NOT NULL DEFAULT 'any',
    status TEXT NOT NULL DEFAULT 'pending',
    trust_level INTEGER NOT NULL DEFAULT 0,
    fitness_score REAL NOT NULL DEFAULT 0.5,
    total_uses INTEGER NOT NULL DEFAULT 0,
    successful_uses INTEGER NOT NULL DEFAULT 0,
    unique_agents INTEGER NOT NULL DEFAULT 0,
    content_hash TEXT NOT NULL DEFAULT '',
    parent_tool_id TEXT,
    version INTEGER NOT NULL DEFAULT 1,
    author_agent_id TEXT NOT NULL DEFAULT 'anonymous',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_used_at TEXT,
    avg_execution_time_ms REAL NOT NULL DEFAULT 0.0,
    avg_memory_mb REAL NOT NULL DEFAULT 0.0
);

CREATE TABLE IF NOT EXISTS usage_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tool_id TEXT NOT NULL,
    agent_id TEXT NOT NULL DEFAULT 'anonymous',
    success INTEGER NOT NULL,
    execution_time_ms REAL NOT NULL DEFAULT 0.0,
    error_message TEXT NOT NULL DEFAULT '',
    feedback TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    FOREIGN KEY (tool_id) REFERENCES tools(id)
);

CREATE TABLE IF NOT EXISTS provenance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tool_id TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    content_hash TEXT NOT NULL,
    parent_hash TEXT,
    parent_tool_id TEXT,
    author_agent_id TEXT NOT NULL DEFAULT 'anonymous',
    gauntlet_run_id TEXT NOT NULL DEFAULT '',
    security_scan TEXT NOT NULL DEFAULT 'pass',
    performance_json TEXT NOT NULL DEFAULT '{}',
    signature TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    FOREIGN KEY (tool_id) REFERENCES tools(id)
);

CREATE TABLE IF NOT EXISTS recipes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    steps_json TEXT NOT NULL DEFAULT '[]',
    total_fitness REAL NOT NULL DEFAULT 0.0,
    total_uses INTEGER NOT NULL DEFAULT 0,
    successful_uses INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    author_agent_id TEXT NOT NULL DEFAULT 'anonymous'
);

CREATE TABLE IF NOT EXISTS agent_usage (
    tool_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    use_count INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (tool_id, agent_id),
    FOREIGN KEY (tool_id) REFERENCES tools(id)
);

CREATE INDEX IF NOT EXISTS idx_tools_status ON tools(status);
CREATE INDEX IF NOT EXISTS idx_tools_fitness ON tools(fitness_score DESC);
CREATE INDEX IF NOT EXISTS idx_usage_tool ON usage_reports(tool_id);
CREATE INDEX IF NOT EXISTS idx_provenance_tool ON provenance(tool_id);
"#;

/// Counter state after a usage report has been folded in.
#[derive(Debug, Clone, Copy)]
pub struct UsageTotals {
    pub total_uses: i64,
    pub successful_uses: i64,
    pub unique_agents: i64,
}

/// SQLite-backed store owning the connection.
pub struct ToolStore {
    conn: Connection,
}

impl ToolStore {
    /// Open or create the registry database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;

        info!("Tool store opened: {}", path.display());
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ─── Tools ───

    /// Insert or replace a tool. Per-tool-id upserts are serialized by
    /// SQLite, which gives submission/activation the required atomicity.
    pub fn save_tool(&self, tool: &Tool) -> Result<()> {
        let now = Utc::now();
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO tools
            (id, name, code, description, test_case, dependencies, tags,
             input_schema, output_type, status, trust_level, fitness_score,
             total_uses, successful_uses, unique_agents, content_hash,
             parent_tool_id, version, author_agent_id, created_at, updated_at,
             last_used_at, avg_execution_time_ms, avg_memory_mb)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                    ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)
            "#,
            params![
                tool.id,
                tool.name,
                tool.code,
                tool.description,
                tool.test_case,
                serde_json::to_string(&tool.dependencies)?,
                serde_json::to_string(&tool.tags)?,
                serde_json::to_string(&tool.input_schema)?,
                tool.output_type,
                tool.status.as_str(),
                tool.trust_level.as_i64(),
                tool.fitness_score,
                tool.total_uses,
                tool.successful_uses,
                tool.unique_agents,
                tool.content_hash,
                tool.parent_tool_id,
                tool.version,
                tool.author_agent_id,
                tool.created_at.to_rfc3339(),
                now.to_rfc3339(),
                tool.last_used_at.map(|t| t.to_rfc3339()),
                tool.avg_execution_time_ms,
                tool.avg_memory_mb,
            ],
        )?;

        debug!("Saved tool {} ({})", tool.name, &tool.id[..8.min(tool.id.len())]);
        Ok(())
    }

    pub fn get_tool(&self, tool_id: &str) -> Result<Option<Tool>> {
        let mut stmt = self.conn.prepare("SELECT * FROM tools WHERE id = ?1")?;
        let tool = stmt
            .query_row(params![tool_id], |row| row_to_tool(row))
            .optional()?;
        Ok(tool)
    }

    /// List tools ordered by fitness descending. Delisted tools are excluded
    /// unless explicitly requested by status.
    pub fn list_tools(
        &self,
        status: Option<ToolStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Tool>> {
        let (query, status_param) = match status {
            Some(s) => (
                "SELECT * FROM tools WHERE status = ?1
                 ORDER BY fitness_score DESC LIMIT ?2 OFFSET ?3",
                Some(s.as_str()),
            ),
            None => (
                "SELECT * FROM tools WHERE status != ?1
                 ORDER BY fitness_score DESC LIMIT ?2 OFFSET ?3",
                Some(ToolStatus::Delisted.as_str()),
            ),
        };

        let mut stmt = self.conn.prepare(query)?;
        let tools = stmt
            .query_map(
                params![status_param, limit as i64, offset as i64],
                |row| row_to_tool(row),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tools)
    }

    pub fn update_tool_status(&self, tool_id: &str, status: ToolStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE tools SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), tool_id],
        )?;
        Ok(())
    }

    pub fn update_tool_fitness(&self, tool_id: &str, fitness_score: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE tools SET fitness_score = ?1, updated_at = ?2 WHERE id = ?3",
            params![fitness_score, Utc::now().to_rfc3339(), tool_id],
        )?;
        Ok(())
    }

    /// Trust only ever moves up; the MAX guard keeps a stale writer from
    /// regressing a concurrent promotion.
    pub fn update_tool_trust(&self, tool_id: &str, trust_level: TrustLevel) -> Result<()> {
        self.conn.execute(
            "UPDATE tools SET trust_level = MAX(trust_level, ?1), updated_at = ?2 WHERE id = ?3",
            params![trust_level.as_i64(), Utc::now().to_rfc3339(), tool_id],
        )?;
        Ok(())
    }

    // ─── Usage ───

    /// Append a usage event and fold it into the tool's counters within one
    /// transaction. Returns the updated totals.
    pub fn record_usage(&mut self, report: &UsageReport) -> Result<UsageTotals> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO usage_reports
            (tool_id, agent_id, success, execution_time_ms, error_message, feedback, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                report.tool_id,
                report.agent_id,
                report.success as i64,
                report.execution_time_ms,
                report.error_message,
                report.feedback,
                now,
            ],
        )?;

        // Atomic increments; the rolling latency mean folds this report's
        // timing in against the post-increment use count.
        tx.execute(
            r#"
            UPDATE tools SET
                total_uses = total_uses + 1,
                successful_uses = successful_uses + ?1,
                last_used_at = ?2,
                updated_at = ?2,
                avg_execution_time_ms = avg_execution_time_ms
                    + ((?3 - avg_execution_time_ms) / (total_uses + 1))
            WHERE id = ?4
            "#,
            params![
                report.success as i64,
                now,
                report.execution_time_ms,
                report.tool_id,
            ],
        )?;

        tx.execute(
            r#"
            INSERT INTO agent_usage (tool_id, agent_id, use_count)
            VALUES (?1, ?2, 1)
            ON CONFLICT(tool_id, agent_id) DO UPDATE SET use_count = use_count + 1
            "#,
            params![report.tool_id, report.agent_id],
        )?;

        // Recompute from the authoritative per-agent set.
        let unique_agents: i64 = tx.query_row(
            "SELECT COUNT(DISTINCT agent_id) FROM agent_usage WHERE tool_id = ?1",
            params![report.tool_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "UPDATE tools SET unique_agents = ?1 WHERE id = ?2",
            params![unique_agents, report.tool_id],
        )?;

        let (total_uses, successful_uses) = tx.query_row(
            "SELECT total_uses, successful_uses FROM tools WHERE id = ?1",
            params![report.tool_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        tx.commit()?;

        Ok(UsageTotals {
            total_uses,
            successful_uses,
            unique_agents,
        })
    }

    // ─── Provenance ───

    /// Append-only: provenance entries are never updated or deleted.
    pub fn save_provenance(&self, record: &ProvenanceRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO provenance
            (tool_id, version, content_hash, parent_hash, parent_tool_id,
             author_agent_id, gauntlet_run_id, security_scan, performance_json,
             signature, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                record.tool_id,
                record.version,
                record.content_hash,
                record.parent_hash,
                record.parent_tool_id,
                record.author_agent_id,
                record.gauntlet_run_id,
                record.security_scan.as_str(),
                serde_json::to_string(&record.performance)?,
                record.signature,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Full chain for one tool identity, ordered by version ascending.
    pub fn get_provenance_chain(&self, tool_id: &str) -> Result<Vec<ProvenanceRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT tool_id, version, content_hash, parent_hash, parent_tool_id,
                    author_agent_id, gauntlet_run_id, security_scan, performance_json,
                    signature, created_at
             FROM provenance WHERE tool_id = ?1 ORDER BY version ASC",
        )?;

        let records = stmt
            .query_map(params![tool_id], |row| {
                let performance_json: String = row.get(8)?;
                let created_at: String = row.get(10)?;
                let security_scan: String = row.get(7)?;
                Ok(ProvenanceRecord {
                    tool_id: row.get(0)?,
                    version: row.get(1)?,
                    content_hash: row.get(2)?,
                    parent_hash: row.get(3)?,
                    parent_tool_id: row.get(4)?,
                    author_agent_id: row.get(5)?,
                    gauntlet_run_id: row.get(6)?,
                    security_scan: SecurityVerdict::parse(&security_scan),
                    performance: serde_json::from_str(&performance_json)
                        .unwrap_or_else(|_| PerformanceProfile::default()),
                    signature: row.get(9)?,
                    created_at: parse_timestamp(&created_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // ─── Recipes ───

    pub fn save_recipe(&self, recipe: &Recipe) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO recipes
            (id, name, description, steps_json, total_fitness,
             total_uses, successful_uses, created_at, author_agent_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                recipe.id,
                recipe.name,
                recipe.description,
                serde_json::to_string(&recipe.steps)?,
                recipe.total_fitness,
                recipe.total_uses,
                recipe.successful_uses,
                recipe.created_at.to_rfc3339(),
                recipe.author_agent_id,
            ],
        )?;
        Ok(())
    }

    pub fn list_recipes(&self, limit: usize) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, steps_json, total_fitness,
                    total_uses, successful_uses, created_at, author_agent_id
             FROM recipes ORDER BY total_fitness DESC LIMIT ?1",
        )?;

        let recipes = stmt
            .query_map(params![limit as i64], |row| {
                let steps_json: String = row.get(3)?;
                let created_at: String = row.get(7)?;
                let steps: Vec<RecipeStep> =
                    serde_json::from_str(&steps_json).unwrap_or_default();
                Ok(Recipe {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    steps,
                    total_fitness: row.get(4)?,
                    total_uses: row.get(5)?,
                    successful_uses: row.get(6)?,
                    created_at: parse_timestamp(&created_at),
                    author_agent_id: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(recipes)
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_tool(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tool> {
    let dependencies: String = row.get("dependencies")?;
    let tags: String = row.get("tags")?;
    let input_schema: String = row.get("input_schema")?;
    let status: String = row.get("status")?;
    let trust_level: i64 = row.get("trust_level")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let last_used_at: Option<String> = row.get("last_used_at")?;

    Ok(Tool {
        id: row.get("id")?,
        name: row.get("name")?,
        code: row.get("code")?,
        description: row.get("description")?,
        test_case: row.get("test_case")?,
        dependencies: serde_json::from_str(&dependencies).unwrap_or_default(),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        input_schema: serde_json::from_str(&input_schema)
            .unwrap_or(serde_json::Value::Null),
        output_type: row.get("output_type")?,
        status: ToolStatus::parse(&status),
        trust_level: TrustLevel::from_i64(trust_level),
        fitness_score: row.get("fitness_score")?,
        total_uses: row.get("total_uses")?,
        successful_uses: row.get("successful_uses")?,
        unique_agents: row.get("unique_agents")?,
        content_hash: row.get("content_hash")?,
        parent_tool_id: row.get("parent_tool_id")?,
        version: row.get("version")?,
        author_agent_id: row.get("author_agent_id")?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        last_used_at: last_used_at.as_deref().map(parse_timestamp),
        avg_execution_time_ms: row.get("avg_execution_time_ms")?,
        avg_memory_mb: row.get("avg_memory_mb")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tool;

    fn store() -> ToolStore {
        ToolStore::open_in_memory().unwrap()
    }

    fn sample_tool(name: &str) -> Tool {
        Tool::new(
            name.into(),
            format!("def {name}(x): return x"),
            format!("{name} does things"),
            format!("assert {name}(1) == 1"),
        )
    }

    #[test]
    fn save_and_get_roundtrip() {
        let store = store();
        let mut tool = sample_tool("echo");
        tool.dependencies = vec!["requests".into()];
        tool.tags = vec!["net".into()];
        tool.content_hash = "abc123".into();
        store.save_tool(&tool).unwrap();

        let loaded = store.get_tool(&tool.id).unwrap().unwrap();
        assert_eq!(loaded.name, "echo");
        assert_eq!(loaded.dependencies, vec!["requests".to_string()]);
        assert_eq!(loaded.content_hash, "abc123");
        assert_eq!(loaded.status, ToolStatus::Pending);

        assert!(store.get_tool("missing").unwrap().is_none());
    }

    #[test]
    fn list_filters_and_orders_by_fitness() {
        let store = store();
        for (name, fitness, status) in [
            ("low", 0.2, ToolStatus::Active),
            ("high", 0.9, ToolStatus::Active),
            ("gone", 0.99, ToolStatus::Delisted),
        ] {
            let mut tool = sample_tool(name);
            tool.fitness_score = fitness;
            tool.status = status;
            store.save_tool(&tool).unwrap();
        }

        let active = store.list_tools(Some(ToolStatus::Active), 10, 0).unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].name, "high");

        // Default listing excludes delisted
        let all = store.list_tools(None, 10, 0).unwrap();
        assert!(all.iter().all(|t| t.name != "gone"));
    }

    #[test]
    fn usage_counters_stay_consistent() {
        let mut store = store();
        let tool = sample_tool("counted");
        store.save_tool(&tool).unwrap();

        let report = |agent: &str, success: bool| UsageReport {
            tool_id: tool.id.clone(),
            agent_id: agent.into(),
            success,
            execution_time_ms: 100.0,
            error_message: String::new(),
            feedback: String::new(),
        };

        store.record_usage(&report("a1", true)).unwrap();
        store.record_usage(&report("a1", false)).unwrap();
        let totals = store.record_usage(&report("a2", true)).unwrap();

        assert_eq!(totals.total_uses, 3);
        assert_eq!(totals.successful_uses, 2);
        // Same agent twice counts once
        assert_eq!(totals.unique_agents, 2);
        assert!(totals.successful_uses <= totals.total_uses);

        let loaded = store.get_tool(&tool.id).unwrap().unwrap();
        assert!(loaded.last_used_at.is_some());
        assert!((loaded.avg_execution_time_ms - 100.0).abs() < 1e-6);
    }

    #[test]
    fn rolling_latency_mean() {
        let mut store = store();
        let tool = sample_tool("timed");
        store.save_tool(&tool).unwrap();

        for ms in [100.0, 200.0, 300.0] {
            store
                .record_usage(&UsageReport {
                    tool_id: tool.id.clone(),
                    agent_id: "a".into(),
                    success: true,
                    execution_time_ms: ms,
                    error_message: String::new(),
                    feedback: String::new(),
                })
                .unwrap();
        }

        let loaded = store.get_tool(&tool.id).unwrap().unwrap();
        assert!((loaded.avg_execution_time_ms - 200.0).abs() < 1e-6);
    }

    #[test]
    fn trust_update_never_regresses() {
        let store = store();
        let tool = sample_tool("trusty");
        store.save_tool(&tool).unwrap();

        store
            .update_tool_trust(&tool.id, TrustLevel::BattleTested)
            .unwrap();
        store.update_tool_trust(&tool.id, TrustLevel::Verified).unwrap();

        let loaded = store.get_tool(&tool.id).unwrap().unwrap();
        assert_eq!(loaded.trust_level, TrustLevel::BattleTested);
    }

    #[test]
    fn provenance_chain_ordered_by_version() {
        let store = store();
        let tool = sample_tool("versioned");
        store.save_tool(&tool).unwrap();

        for version in [2i64, 1i64] {
            store
                .save_provenance(&ProvenanceRecord {
                    tool_id: tool.id.clone(),
                    version,
                    content_hash: format!("hash-v{version}"),
                    parent_hash: None,
                    parent_tool_id: None,
                    author_agent_id: "anonymous".into(),
                    gauntlet_run_id: format!("run-{version}"),
                    security_scan: SecurityVerdict::Pass,
                    performance: PerformanceProfile::default(),
                    signature: "sig".into(),
                    created_at: Utc::now(),
                })
                .unwrap();
        }

        let chain = store.get_provenance_chain(&tool.id).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].version, 1);
        assert_eq!(chain[1].version, 2);
    }

    #[test]
    fn recipes_roundtrip_ordered_by_fitness() {
        let store = store();
        for (name, fitness) in [("slow", 0.3), ("good", 0.8)] {
            store
                .save_recipe(&Recipe {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: name.into(),
                    description: "pipeline".into(),
                    steps: vec![RecipeStep {
                        tool_id: "t1".into(),
                        tool_name: "step".into(),
                        description: "d".into(),
                        order: 0,
                    }],
                    total_fitness: fitness,
                    total_uses: 0,
                    successful_uses: 0,
                    created_at: Utc::now(),
                    author_agent_id: "anonymous".into(),
                })
                .unwrap();
        }

        let recipes = store.list_recipes(10).unwrap();
        assert_eq!(recipes[0].name, "good");
        assert_eq!(recipes[0].steps.len(), 1);
    }
}
