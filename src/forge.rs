//! The Forge
//!
//! Intake side of the registry: submissions and forks. The Forge validates
//! and normalizes incoming code, derives the tool's name and input schema,
//! assigns the content hash, and persists the record in pending state. The
//! Gauntlet decides what happens next; activation and delisting flow back
//! through here because they also touch the vector index.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ForgeConfig;
use crate::embeddings::{EmbeddingService, VectorIndex};
use crate::gauntlet::analyzer;
use crate::hashing;
use crate::models::{ForkRequest, RejectionReason, Tool, ToolStatus, ToolSubmission};
use crate::schema;
use crate::store::ToolStore;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("code size ({size} bytes) exceeds maximum ({max} bytes)")]
    CodeTooLarge { size: usize, max: usize },

    #[error("description too long ({len} chars, max {max})")]
    DescriptionTooLong { len: usize, max: usize },

    #[error("invalid code: {0}")]
    InvalidCode(String),

    #[error("parent tool not found: {0}")]
    ParentNotFound(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ForgeError {
    /// Map onto the closed rejection set where one applies.
    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        match self {
            Self::CodeTooLarge { .. } | Self::DescriptionTooLong { .. } => {
                Some(RejectionReason::SizeExceeded)
            }
            Self::InvalidCode(_) => Some(RejectionReason::ParseError),
            Self::ParentNotFound(_) => Some(RejectionReason::ParentNotFound),
            Self::Storage(_) => None,
        }
    }
}

pub struct Forge {
    store: Arc<Mutex<ToolStore>>,
    embeddings: Arc<EmbeddingService>,
    index: Arc<VectorIndex>,
    config: ForgeConfig,
}

impl Forge {
    pub fn new(
        store: Arc<Mutex<ToolStore>>,
        embeddings: Arc<EmbeddingService>,
        index: Arc<VectorIndex>,
        config: ForgeConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            index,
            config,
        }
    }

    /// Accept a new submission: validate, normalize, derive metadata, and
    /// persist in pending state.
    pub async fn submit_tool(&self, submission: &ToolSubmission) -> Result<Tool, ForgeError> {
        self.validate_sizes(&submission.code, &submission.description)?;

        let code = schema::normalize_code(&submission.code);
        let test_case = schema::normalize_code(&submission.test_case);
        validate_parseable(&code)?;

        let info = schema::extract_function_info(&code);
        let name = if info.name.is_empty() {
            schema::extract_tool_name(&code)
        } else {
            info.name.clone()
        };

        let mut tool = Tool::new(name, code, submission.description.clone(), test_case);
        tool.dependencies = submission.dependencies.clone();
        tool.tags = submission.tags.clone();
        tool.input_schema = schema::generate_input_schema(&tool.code);
        tool.output_type = info.return_type;
        tool.content_hash = hashing::hash_tool(&tool.code, &tool.description, &tool.test_case);
        tool.author_agent_id = submission.author_agent_id.clone();

        self.store.lock().await.save_tool(&tool)?;
        info!(tool_id = %tool.id, name = %tool.name, "tool submitted");
        Ok(tool)
    }

    /// Fork an existing tool. The fork starts a fresh verification life but
    /// carries lineage: version is parent + 1, and dependencies/tags are
    /// inherited unless the request overrides them.
    pub async fn fork_tool(&self, request: &ForkRequest) -> Result<Tool, ForgeError> {
        let parent = self
            .store
            .lock()
            .await
            .get_tool(&request.parent_tool_id)?
            .ok_or_else(|| ForgeError::ParentNotFound(request.parent_tool_id.clone()))?;

        self.validate_sizes(&request.code, &request.description)?;

        let code = schema::normalize_code(&request.code);
        let test_case = schema::normalize_code(&request.test_case);
        validate_parseable(&code)?;

        let info = schema::extract_function_info(&code);
        let name = if info.name.is_empty() {
            parent.name.clone()
        } else {
            info.name.clone()
        };

        let mut tool = Tool::new(name, code, request.description.clone(), test_case);
        tool.dependencies = request
            .dependencies
            .clone()
            .unwrap_or_else(|| parent.dependencies.clone());
        tool.tags = request.tags.clone().unwrap_or_else(|| parent.tags.clone());
        tool.input_schema = schema::generate_input_schema(&tool.code);
        tool.output_type = info.return_type;
        tool.content_hash = hashing::hash_tool(&tool.code, &tool.description, &tool.test_case);
        tool.parent_tool_id = Some(parent.id.clone());
        tool.version = parent.version + 1;
        tool.author_agent_id = request.author_agent_id.clone();

        self.store.lock().await.save_tool(&tool)?;
        info!(
            tool_id = %tool.id,
            parent_id = %parent.id,
            version = tool.version,
            "tool forked"
        );
        Ok(tool)
    }

    /// Activate a verified tool and make it discoverable. An embedding
    /// failure leaves the tool active but unindexed; it is logged, not
    /// rolled back.
    pub async fn activate_tool(&self, tool: &mut Tool) -> Result<(), ForgeError> {
        tool.status = ToolStatus::Active;
        self.store.lock().await.save_tool(tool)?;

        let text = index_text(tool);
        match self.embeddings.embed(&text).await {
            Ok(embedding) => self.index.add(&tool.id, embedding),
            Err(e) => {
                warn!(tool_id = %tool.id, error = %e, "failed to index activated tool")
            }
        }
        info!(tool_id = %tool.id, name = %tool.name, "tool activated");
        Ok(())
    }

    /// Remove a tool from the active registry and the vector index.
    pub async fn delist_tool(&self, tool_id: &str) -> Result<(), ForgeError> {
        self.store
            .lock()
            .await
            .update_tool_status(tool_id, ToolStatus::Delisted)?;
        self.index.remove(tool_id);
        info!(tool_id, "tool delisted");
        Ok(())
    }

    fn validate_sizes(&self, code: &str, description: &str) -> Result<(), ForgeError> {
        let size = code.len();
        if size > self.config.max_code_size_bytes {
            return Err(ForgeError::CodeTooLarge {
                size,
                max: self.config.max_code_size_bytes,
            });
        }
        let len = description.chars().count();
        if len > self.config.max_description_length {
            return Err(ForgeError::DescriptionTooLong {
                len,
                max: self.config.max_description_length,
            });
        }
        Ok(())
    }
}

/// Text a tool is embedded under for discovery.
pub fn index_text(tool: &Tool) -> String {
    format!("{}: {}", tool.name, tool.description)
}

fn validate_parseable(code: &str) -> Result<(), ForgeError> {
    analyzer::scan_source(code)
        .map(|_| ())
        .map_err(|e| ForgeError::InvalidCode(format!("{} (line {})", e.message, e.line)))
}
