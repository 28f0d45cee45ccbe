//! Host side of tagstore: SD card images kept in ordinary files.

pub mod disk;
pub mod error;
pub mod fixtures;
pub mod log;

pub use disk::{create_image, FileDisk};
pub use error::{PersistenceError, Result};
pub use log::{scan_log, LogScan, LoggedRecord};
