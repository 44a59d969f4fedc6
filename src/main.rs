//! agentforge MCP Server - Entry Point
//!
//! Runs the tool registry as an MCP server over stdio. Logs go to stderr
//! as JSON so stdout stays clean for the protocol.

use std::sync::Arc;

use agentforge::{Registry, RegistryConfig};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("agentforge v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: agentforge");
        println!();
        println!("Runs the tool registry as an MCP server (stdio).");
        println!();
        println!("Environment variables:");
        println!("  AGENTFORGE_DB_PATH                 SQLite database path");
        println!("  AGENTFORGE_INTERPRETER             Sandbox interpreter (default: python3)");
        println!("  AGENTFORGE_EXECUTION_TIMEOUT_SECS  Sandbox timeout (default: 30)");
        println!("  AGENTFORGE_BLOCK_ON_WARNING        Reject warning-level scans (default: false)");
        println!("  AGENTFORGE_EMBEDDER                'ollama' or 'hashed' (default: ollama)");
        println!("  OLLAMA_URL                         Embedding endpoint");
        println!("  EMBEDDING_MODEL                    Embedding model name");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    // stdout carries the protocol; everything else goes to stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("agentforge v{}", env!("CARGO_PKG_VERSION"));

    let config = RegistryConfig::from_env();
    let registry = Arc::new(Registry::new(config)?);
    registry.rebuild_index().await?;

    let server = agentforge::rpc::RpcServer::new(registry);
    server.run().await?;

    Ok(())
}
