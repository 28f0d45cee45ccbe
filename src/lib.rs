// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
#![cfg_attr(not(test), no_std)]

//! tagstore: persistent storage engine for field tags.
//!
//! A fixed-partition medium (boot sector locator, panic log, image
//! directory, append-only typed record log) driven through a
//! [`blockio::BlockDevice`]. [`device::StorageDevice`] ties the pieces
//! together for one open medium.
//!
//! The crate is `no_std` and only needs `alloc`.

extern crate alloc;

pub mod blockio;
pub mod checksum;
pub mod config;
pub mod dblk;
pub mod device;
pub mod error;
pub mod format;
pub mod image;
pub mod locator;
pub mod panic;
pub mod reader;
pub mod record;
pub mod resync;
pub mod storage;

pub use blockio::{BlockDevice, RamDisk, Sector};
pub use device::{Mount, StorageDevice};
pub use error::{Result, StorageError};
pub use locator::{load_locator, Area, AreaKind, Locator};

#[cfg(test)]
pub mod tests;
