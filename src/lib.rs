//! agentforge — a self-evolving tool registry for agents.
//!
//! Agents submit small tools (code + description + test case); every
//! submission is statically scanned and sandbox-verified before it becomes
//! discoverable. Verified tools carry a signed provenance chain, compete
//! on usage-driven fitness, earn trust tiers, and can be composed into
//! recipes.

pub mod config;
pub mod discovery;
pub mod embeddings;
pub mod fitness;
pub mod forge;
pub mod gauntlet;
pub mod hashing;
pub mod models;
pub mod provenance;
pub mod recipes;
pub mod registry;
pub mod rpc;
pub mod schema;
pub mod store;
pub mod trust;

pub use config::RegistryConfig;
pub use registry::Registry;
