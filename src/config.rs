//! Configuration management
//!
//! Explicit per-component config structs; no ambient globals. Each component
//! takes its config at construction time.

use std::path::PathBuf;
use std::time::Duration;

/// Forge (tool intake) limits.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    /// Max code size in bytes
    pub max_code_size_bytes: usize,
    /// Max description length in chars
    pub max_description_length: usize,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            max_code_size_bytes: 50_000,
            max_description_length: 2_000,
        }
    }
}

/// Gauntlet (verification gate) limits and policy.
#[derive(Debug, Clone)]
pub struct GauntletConfig {
    /// Hard wall-clock limit for sandbox execution
    pub execution_timeout: Duration,
    /// Captured output ceiling in bytes
    pub max_output_bytes: usize,
    /// Guest interpreter for candidate code
    pub interpreter: String,
    /// Extra module names blocked on top of the built-in denylist
    pub blocked_imports: Vec<String>,
    /// Treat warning-level scan verdicts as rejections
    pub block_on_warning: bool,
}

impl Default for GauntletConfig {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(30),
            max_output_bytes: 10_000,
            interpreter: "python3".to_string(),
            blocked_imports: Vec::new(),
            block_on_warning: false,
        }
    }
}

/// Discovery (semantic search) tuning.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// "ollama" for the HTTP backend, "hashed" for the offline fallback
    pub embedding_backend: String,
    /// Ollama-compatible embedding endpoint
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub max_results: usize,
    /// Minimum cosine similarity for a raw index hit
    pub min_similarity: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            embedding_backend: "ollama".to_string(),
            embedding_url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dimension: 768,
            max_results: 10,
            min_similarity: 0.3,
        }
    }
}

/// Fitness scoring weights and thresholds. Weights should sum to 1.0.
#[derive(Debug, Clone)]
pub struct FitnessConfig {
    pub weight_success_rate: f64,
    pub weight_token_efficiency: f64,
    pub weight_latency: f64,
    pub weight_adoption: f64,
    pub weight_freshness: f64,
    /// Days of inactivity before staleness decay begins
    pub decay_days: f64,
    /// Score below which tools get delisted
    pub delist_threshold: f64,
    /// Minimum total uses before a low score can delist
    pub delist_min_uses: i64,
}

impl Default for FitnessConfig {
    fn default() -> Self {
        Self {
            weight_success_rate: 0.35,
            weight_token_efficiency: 0.25,
            weight_latency: 0.20,
            weight_adoption: 0.10,
            weight_freshness: 0.10,
            decay_days: 30.0,
            delist_threshold: 0.2,
            delist_min_uses: 5,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// SQLite database path
    pub db_path: PathBuf,
    pub forge: ForgeConfig,
    pub gauntlet: GauntletConfig,
    pub discovery: DiscoveryConfig,
    pub fitness: FitnessConfig,
}

impl RegistryConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.db_path = std::env::var("AGENTFORGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/agentforge.db"));

        if let Some(v) = env_parse::<u64>("AGENTFORGE_EXECUTION_TIMEOUT_SECS") {
            config.gauntlet.execution_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<usize>("AGENTFORGE_MAX_OUTPUT_BYTES") {
            config.gauntlet.max_output_bytes = v;
        }
        if let Ok(v) = std::env::var("AGENTFORGE_INTERPRETER") {
            config.gauntlet.interpreter = v;
        }
        if let Ok(v) = std::env::var("AGENTFORGE_BLOCK_ON_WARNING") {
            config.gauntlet.block_on_warning = v == "true" || v == "1";
        }

        if let Some(v) = env_parse::<usize>("AGENTFORGE_MAX_CODE_SIZE") {
            config.forge.max_code_size_bytes = v;
        }
        if let Some(v) = env_parse::<usize>("AGENTFORGE_MAX_DESCRIPTION_LENGTH") {
            config.forge.max_description_length = v;
        }

        if let Ok(v) = std::env::var("AGENTFORGE_EMBEDDER") {
            config.discovery.embedding_backend = v;
        }
        if let Ok(v) = std::env::var("OLLAMA_URL") {
            config.discovery.embedding_url = v;
        }
        if let Ok(v) = std::env::var("EMBEDDING_MODEL") {
            config.discovery.embedding_model = v;
        }
        if let Some(v) = env_parse::<f64>("AGENTFORGE_MIN_SIMILARITY") {
            config.discovery.min_similarity = v;
        }

        if let Some(v) = env_parse::<f64>("AGENTFORGE_DELIST_THRESHOLD") {
            config.fitness.delist_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("AGENTFORGE_DECAY_DAYS") {
            config.fitness.decay_days = v;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
