// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::sync::OnceLock;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub const SECTORS_WRITTEN: &str = "tagstore_sectors_written_total";
pub const WRITE_RETRIES: &str = "tagstore_write_retries_total";
pub const RECORDS_APPENDED: &str = "tagstore_records_appended_total";
pub const SYNC_RECORDS: &str = "tagstore_sync_records_total";
pub const MAX_FULL_BUFFERS: &str = "tagstore_max_full_buffers";

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tagstore=debug,tagstore_node=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let handle = PrometheusBuilder::new().install_recorder()?;
    if PROM_HANDLE.set(handle).is_err() {
        tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
    }

    metrics::describe_counter!(SECTORS_WRITTEN, "Sectors written to the Data area");
    metrics::describe_counter!(WRITE_RETRIES, "Sector writes that failed and were retried");
    metrics::describe_counter!(RECORDS_APPENDED, "Typed records accepted by the collector");
    metrics::describe_counter!(SYNC_RECORDS, "Sync records emitted by the scheduler");
    metrics::describe_gauge!(MAX_FULL_BUFFERS, "High water mark of Full stream buffers");

    metrics::gauge!("tagstore_node_up", 1.0);
    Ok(())
}

/// Render the Prometheus exposition text.
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}
