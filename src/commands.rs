//! Component wiring for the serve command

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use lattice_core::EngineConfig;
use lattice_parser::TreeSitterParser;
use lattice_server::ServerState;
use lattice_sink::{build_graph_sink, EmbeddingSink, MemoryEmbeddingStore};
use lattice_sync::SyncEngine;

use crate::Cli;

pub async fn serve(cli: Cli) -> anyhow::Result<()> {
    let root = cli
        .root
        .canonicalize()
        .map_err(|_| anyhow!("root path does not exist: {}", cli.root.display()))?;

    let graph = build_graph_sink(&cli.sink)
        .map_err(|e| anyhow!(e))
        .context("failed to construct graph sink")?;
    graph
        .create_indexes()
        .await
        .map_err(|e| anyhow!(e))
        .context("failed to prepare graph sink schema")?;

    let embeddings = cli
        .embeddings
        .then(|| Arc::new(MemoryEmbeddingStore::new()) as Arc<dyn EmbeddingSink>);

    let mut config = EngineConfig::new(&root);
    config.enable_batching = cli.enable_batch;
    config.batch_size = cli.batch_size;
    config.batch_flush_interval = Duration::from_secs(cli.batch_interval);
    config.enable_diff = cli.enable_diff;
    config.enable_scm = cli.enable_git;

    let engine = Arc::new(SyncEngine::new(
        config,
        Arc::new(TreeSitterParser::new()),
        graph,
        embeddings,
    ));
    engine.start().await.context("failed to start sync engine")?;

    tracing::info!("monitoring {}", root.display());
    if cli.enable_batch {
        tracing::info!(
            "batch processing enabled (size: {}, interval: {}s)",
            cli.batch_size,
            cli.batch_interval
        );
    }
    if cli.enable_diff {
        tracing::info!("delta analysis enabled");
    }
    if cli.enable_git {
        tracing::info!("git scanning enabled");
    }

    if cli.api_port > 0 {
        let state = ServerState::new(engine.clone());
        let addr: SocketAddr = format!("{}:{}", cli.host, cli.api_port)
            .parse()
            .context("invalid API address")?;
        tokio::spawn(async move {
            if let Err(e) = lattice_server::serve(state, addr).await {
                tracing::error!("control API failed: {e:#}");
            }
        });
        tracing::info!("status: http://{}:{}/api/v1/status", cli.host, cli.api_port);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    engine.stop().await
}
