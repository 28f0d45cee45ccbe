// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tagstore_node::config::NodeConfig;
use tagstore_node::telemetry::{get_metrics, init_telemetry};
use tagstore_node::Node;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry()?;

    let cfg = match std::env::args().nth(1) {
        Some(path) => NodeConfig::from_file(&path).with_context(|| format!("loading config {path}"))?,
        None => NodeConfig::default(),
    }
    .from_env()?;
    tracing::info!("Initializing tagstore node with config: {:?}", cfg);

    let node = Arc::new(Node::open(&cfg).await?);
    let dir = node.query_directory().await?;
    for slot in dir.slots.iter() {
        tracing::info!(version = %slot.version, state = ?slot.state, start = slot.start_sector, "image slot");
    }
    if let Some(off) = node.last_sync().await? {
        tracing::info!(offset = off, "last sync record on medium");
    }

    let watcher = node.clone();
    let stats_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let stats = watcher.writer().stats().await;
            tracing::debug!(?stats, "writer stats");
            tracing::trace!("{}", get_metrics());
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    stats_task.abort();
    let _ = stats_task.await;

    let node = Arc::try_unwrap(node).map_err(|_| anyhow::anyhow!("node still shared at shutdown"))?;
    node.shutdown().await?;
    Ok(())
}
