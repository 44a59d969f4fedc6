//! Recipes
//!
//! Ordered compositions of verified tools for multi-step tasks. A recipe's
//! fitness is the mean of its step fitness at creation time; the snapshot
//! is deliberate, recipes are immutable once saved.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::models::{Recipe, RecipeStep, ToolStatus, ToolSummary};
use crate::store::ToolStore;

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("recipe needs at least one step")]
    Empty,

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool is not active: {0}")]
    ToolNotActive(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct RecipeBook {
    store: Arc<Mutex<ToolStore>>,
}

impl RecipeBook {
    pub fn new(store: Arc<Mutex<ToolStore>>) -> Self {
        Self { store }
    }

    /// Compose a recipe from an ordered list of tool ids. Every tool must
    /// exist and be active.
    pub async fn create_recipe(
        &self,
        name: &str,
        description: &str,
        tool_ids: &[String],
        author_agent_id: &str,
    ) -> Result<Recipe, RecipeError> {
        if tool_ids.is_empty() {
            return Err(RecipeError::Empty);
        }

        let store = self.store.lock().await;
        let mut steps = Vec::with_capacity(tool_ids.len());
        let mut fitness_sum = 0.0;

        for (order, tool_id) in tool_ids.iter().enumerate() {
            let tool = store
                .get_tool(tool_id)?
                .ok_or_else(|| RecipeError::ToolNotFound(tool_id.clone()))?;
            if tool.status != ToolStatus::Active {
                return Err(RecipeError::ToolNotActive(tool_id.clone()));
            }
            fitness_sum += tool.fitness_score;
            steps.push(RecipeStep {
                tool_id: tool.id,
                tool_name: tool.name,
                description: tool.description,
                order,
            });
        }

        let recipe = Recipe {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            total_fitness: round4(fitness_sum / steps.len() as f64),
            steps,
            total_uses: 0,
            successful_uses: 0,
            created_at: Utc::now(),
            author_agent_id: author_agent_id.to_string(),
        };

        store.save_recipe(&recipe)?;
        info!(recipe_id = %recipe.id, name = %recipe.name, steps = recipe.steps.len(), "recipe created");
        Ok(recipe)
    }

    /// Recipes ordered by fitness snapshot, best first.
    pub async fn list_recipes(&self, limit: usize) -> Result<Vec<Recipe>, RecipeError> {
        Ok(self.store.lock().await.list_recipes(limit)?)
    }

    /// Current tool summaries for a recipe's steps, in step order. Steps
    /// whose tool has since disappeared are skipped.
    pub async fn get_recipe_tools(&self, recipe: &Recipe) -> Result<Vec<ToolSummary>, RecipeError> {
        let store = self.store.lock().await;
        let mut steps: Vec<&RecipeStep> = recipe.steps.iter().collect();
        steps.sort_by_key(|s| s.order);

        let mut summaries = Vec::with_capacity(steps.len());
        for step in steps {
            if let Some(tool) = store.get_tool(&step.tool_id)? {
                summaries.push(ToolSummary::from_tool(&tool));
            }
        }
        Ok(summaries)
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tool;

    fn book() -> RecipeBook {
        RecipeBook::new(Arc::new(Mutex::new(ToolStore::open_in_memory().unwrap())))
    }

    async fn active_tool(book: &RecipeBook, name: &str, fitness: f64) -> Tool {
        let mut tool = Tool::new(
            name.into(),
            format!("def {name}(): pass"),
            format!("{name} tool"),
            format!("{name}()"),
        );
        tool.status = ToolStatus::Active;
        tool.fitness_score = fitness;
        book.store.lock().await.save_tool(&tool).unwrap();
        tool
    }

    #[tokio::test]
    async fn recipe_snapshots_mean_step_fitness() {
        let book = book();
        let a = active_tool(&book, "fetch", 0.8).await;
        let b = active_tool(&book, "parse", 0.6).await;

        let recipe = book
            .create_recipe(
                "fetch_and_parse",
                "fetch then parse",
                &[a.id.clone(), b.id.clone()],
                "agent-1",
            )
            .await
            .unwrap();

        assert_eq!(recipe.steps.len(), 2);
        assert_eq!(recipe.steps[0].order, 0);
        assert_eq!(recipe.steps[0].tool_id, a.id);
        assert!((recipe.total_fitness - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fitness_snapshot_does_not_follow_later_changes() {
        let book = book();
        let mut a = active_tool(&book, "fetch", 0.8).await;
        let recipe = book
            .create_recipe("r", "d", &[a.id.clone()], "agent-1")
            .await
            .unwrap();

        a.fitness_score = 0.1;
        book.store.lock().await.save_tool(&a).unwrap();

        let listed = book.list_recipes(10).await.unwrap();
        assert_eq!(listed[0].id, recipe.id);
        assert!((listed[0].total_fitness - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_recipe_is_rejected() {
        let book = book();
        assert!(matches!(
            book.create_recipe("r", "d", &[], "agent-1").await,
            Err(RecipeError::Empty)
        ));
    }

    #[tokio::test]
    async fn missing_or_inactive_tools_are_rejected() {
        let book = book();
        assert!(matches!(
            book.create_recipe("r", "d", &["nope".to_string()], "agent-1")
                .await,
            Err(RecipeError::ToolNotFound(_))
        ));

        let mut pending = Tool::new("p".into(), "def p(): pass".into(), "d".into(), "p()".into());
        pending.status = ToolStatus::Pending;
        book.store.lock().await.save_tool(&pending).unwrap();
        assert!(matches!(
            book.create_recipe("r", "d", &[pending.id.clone()], "agent-1")
                .await,
            Err(RecipeError::ToolNotActive(_))
        ));
    }

    #[tokio::test]
    async fn list_orders_by_fitness_snapshot() {
        let book = book();
        let a = active_tool(&book, "a", 0.9).await;
        let b = active_tool(&book, "b", 0.2).await;
        book.create_recipe("good", "d", &[a.id.clone()], "x")
            .await
            .unwrap();
        book.create_recipe("poor", "d", &[b.id.clone()], "x")
            .await
            .unwrap();

        let listed = book.list_recipes(10).await.unwrap();
        assert_eq!(listed[0].name, "good");
        assert_eq!(listed[1].name, "poor");
    }

    #[tokio::test]
    async fn recipe_tools_come_back_in_step_order() {
        let book = book();
        let a = active_tool(&book, "first", 0.5).await;
        let b = active_tool(&book, "second", 0.5).await;
        let recipe = book
            .create_recipe("r", "d", &[a.id.clone(), b.id.clone()], "x")
            .await
            .unwrap();

        let tools = book.get_recipe_tools(&recipe).await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "first");
        assert_eq!(tools[1].name, "second");
    }
}
