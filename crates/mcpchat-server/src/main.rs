//! mcpchat: serve the MCP tool-server registry and streaming chat API.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mcpchat::{AppState, router};
use mcpchat_api::BackendFactory;
use mcpchat_config::{AppConfig, CliOverrides};
use mcpchat_core::{ChatOptions, ChatOrchestrator, MemoryServerStore, ServerStore};
use mcpchat_mcp::McpConnector;

#[derive(Parser)]
#[command(name = "mcpchat", version, about = "MCP tool-server registry with streaming LLM chat")]
struct Cli {
    /// Path to a config file (defaults to ~/.mcpchat/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:8000
    #[arg(long)]
    bind: Option<String>,

    /// Maximum tokens per model response
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = AppConfig::load(CliOverrides {
        config_path: cli.config,
        bind: cli.bind,
        max_tokens: cli.max_tokens,
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let mut factory = BackendFactory::new().context("Failed to create HTTP client")?;
    for (provider, key) in &config.provider_keys {
        factory = factory.with_key(*provider, key.clone());
    }

    let store = Arc::new(MemoryServerStore::new());
    seed_store(store.as_ref(), &config).await?;

    let orchestrator = ChatOrchestrator::new(
        store.clone(),
        Arc::new(McpConnector::new()),
        Arc::new(factory),
        ChatOptions {
            max_tokens: config.max_tokens,
            max_concurrent_connects: config.max_concurrent_connects,
            system_prompt: config.system_prompt.clone(),
        },
    );
    let app = router(AppState::new(store, orchestrator));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!(addr = %config.bind, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

/// Register the `[[servers]]` entries from the config file.
async fn seed_store(store: &dyn ServerStore, config: &AppConfig) -> Result<()> {
    for record in &config.servers {
        let created = store
            .create(record.clone())
            .await
            .with_context(|| format!("Invalid server '{}' in config", record.name))?;
        tracing::info!(
            id = created.id,
            name = %created.name(),
            transport = %created.server_type(),
            "Seeded tool server"
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
