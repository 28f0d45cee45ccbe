// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use tagstore::error::{ReadError, StorageError};
use tagstore_persistence::PersistenceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Read error: {0}")]
    Read(#[from] ReadError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Config(String),
    #[error("DMA engine is gone")]
    ChannelClosed,
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type NodeResult<T> = Result<T, NodeError>;
