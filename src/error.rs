// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

/// Failure to validate a signature/checksum protected structure
/// (Locator, Panic0, Dblk directory, Image directory).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("not found")]
    NotFound,
    #[error("checksum error")]
    ChecksumError,
    #[error("bad value")]
    BadValue,
}

/// Block I/O failures reported by the device collaborator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    #[error("read failed")]
    ReadFail,
    #[error("read too short")]
    ReadTooShort,
    #[error("write failed")]
    WriteFail,
    #[error("write too short")]
    WriteTooShort,
    #[error("device is read only")]
    ReadOnly,
}

/// Producer misuse. These are programming errors, not runtime faults.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorError {
    #[error("record of {len} bytes does not fit in a sector")]
    RecordTooLarge { len: usize },
    #[error("buffer {got} submitted, expected {expected}")]
    OutOfOrderSubmit { expected: usize, got: usize },
    #[error("record header does not describe the record")]
    BadRecordHeader,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    #[error("read failed: {0}")]
    Io(#[from] IoError),
    #[error("range outside of area")]
    OutOfRange,
    #[error("read queue full")]
    QueueFull,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    #[error("no free or reclaimable image slot")]
    NoSlot,
    #[error("image {0} not found")]
    NotFound(crate::image::ImageVersion),
    #[error("image {0} already present")]
    Duplicate(crate::image::ImageVersion),
    #[error("slot is {0:?}, operation not allowed")]
    InvalidState(crate::image::SlotState),
    #[error("an install is already in progress")]
    InstallInProgress,
    #[error("image larger than a slot")]
    SlotOverflow,
    #[error("image info missing or inconsistent")]
    BadImageInfo,
    #[error("image checksum mismatch: expected {expected:#010x}, found {found:#010x}")]
    ImageChecksum { expected: u32, found: u32 },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("integrity: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("io: {0}")]
    Io(#[from] IoError),
    #[error("collector: {0}")]
    Collector(#[from] CollectorError),
    #[error("read: {0}")]
    Read(#[from] ReadError),
    #[error("image: {0}")]
    Image(#[from] ImageError),
    #[error("no free stream buffer")]
    PoolExhausted,
    #[error("data area full")]
    AreaFull,
    #[error("storage device crashed, reopen required")]
    Crashed,
}

pub type Result<T> = core::result::Result<T, StorageError>;
