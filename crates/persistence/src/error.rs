use tagstore::error::StorageError;
use thiserror::Error;
use std::io;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Image file size {0} is not a whole number of sectors")]
    UnalignedImage(u64),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
