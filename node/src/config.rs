// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tagstore::config::{DEFAULT_WRITE_RETRIES, READER_QUEUE_DEPTH, SYNC_MAX_SECTORS, SYNC_PERIOD};

use crate::errors::{NodeError, NodeResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// SD card image backing the node.
    pub image_path: PathBuf,
    /// Size used when the image has to be created.
    pub image_blocks: u32,
    pub write_retries: u8,
    pub dma_timeout_ms: u64,
    pub dma_queue_depth: usize,
    pub reader_queue_depth: usize,
    pub sync_period_secs: u64,
    pub sync_max_sectors: u32,
    pub boot_count: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            image_path: PathBuf::from("tagstore.img"),
            image_blocks: 16 * 1024,
            write_retries: DEFAULT_WRITE_RETRIES,
            dma_timeout_ms: 1000,
            dma_queue_depth: 32,
            reader_queue_depth: READER_QUEUE_DEPTH,
            sync_period_secs: (SYNC_PERIOD / 1024) as u64,
            sync_max_sectors: SYNC_MAX_SECTORS,
            boot_count: 0,
        }
    }
}

impl NodeConfig {
    /// Load a JSON config. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> NodeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Apply `TAGSTORE_*` environment overrides.
    pub fn from_env(self) -> NodeResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> NodeResult<Self> {
        fn parse<T: std::str::FromStr>(key: &str, val: String) -> NodeResult<T> {
            val.trim()
                .parse()
                .map_err(|_| NodeError::Config(format!("{key}: cannot parse {val:?}")))
        }

        if let Some(v) = var("TAGSTORE_IMAGE") {
            self.image_path = PathBuf::from(v);
        }
        if let Some(v) = var("TAGSTORE_WRITE_RETRIES") {
            self.write_retries = parse("TAGSTORE_WRITE_RETRIES", v)?;
        }
        if let Some(v) = var("TAGSTORE_DMA_TIMEOUT_MS") {
            self.dma_timeout_ms = parse("TAGSTORE_DMA_TIMEOUT_MS", v)?;
        }
        if let Some(v) = var("TAGSTORE_SYNC_PERIOD_SECS") {
            self.sync_period_secs = parse("TAGSTORE_SYNC_PERIOD_SECS", v)?;
        }
        Ok(self)
    }

    pub fn dma_timeout(&self) -> Duration {
        Duration::from_millis(self.dma_timeout_ms)
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period_secs)
    }
}
