// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod config;
pub mod dma;
pub mod engine;
pub mod errors;
pub mod reader;
pub mod sync;
pub mod telemetry;
pub mod writer;

pub use config::NodeConfig;
pub use engine::Node;
pub use errors::{NodeError, NodeResult};
