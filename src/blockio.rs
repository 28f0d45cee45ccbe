// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Block I/O seam.
//!
//! The engine never touches hardware. Every sector moves through a
//! [`BlockDevice`], which the SD driver, a host image file, or the
//! [`RamDisk`] below implement. Access is synchronous and exclusive for the
//! duration of one block operation.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::config::SECTOR_SIZE;
use crate::error::IoError;

pub type Sector = [u8; SECTOR_SIZE];

pub trait BlockDevice {
    fn read_block(&mut self, blk: u32, buf: &mut Sector) -> Result<(), IoError>;
    fn write_block(&mut self, blk: u32, buf: &Sector) -> Result<(), IoError>;
    /// Number of addressable sectors.
    fn num_blocks(&self) -> u32;
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    fn read_block(&mut self, blk: u32, buf: &mut Sector) -> Result<(), IoError> {
        (**self).read_block(blk, buf)
    }

    fn write_block(&mut self, blk: u32, buf: &Sector) -> Result<(), IoError> {
        (**self).write_block(blk, buf)
    }

    fn num_blocks(&self) -> u32 {
        (**self).num_blocks()
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for Box<T> {
    fn read_block(&mut self, blk: u32, buf: &mut Sector) -> Result<(), IoError> {
        (**self).read_block(blk, buf)
    }

    fn write_block(&mut self, blk: u32, buf: &Sector) -> Result<(), IoError> {
        (**self).write_block(blk, buf)
    }

    fn num_blocks(&self) -> u32 {
        (**self).num_blocks()
    }
}

/// Read a sector into a fresh buffer.
pub fn read_sector<D: BlockDevice + ?Sized>(dev: &mut D, blk: u32) -> Result<Sector, IoError> {
    let mut buf = [0u8; SECTOR_SIZE];
    dev.read_block(blk, &mut buf)?;
    Ok(buf)
}

/// RAM backed device. Used to simulate the SD card on the host.
///
/// Faults can be injected per block or for the next N writes so the retry
/// and crash paths can be exercised.
pub struct RamDisk {
    data: Vec<u8>,
    read_only: bool,
    fail_next_writes: u32,
    bad_block: Option<u32>,
    writes: u64,
}

impl RamDisk {
    pub fn new(num_blocks: u32) -> Self {
        Self {
            data: alloc::vec![0u8; num_blocks as usize * SECTOR_SIZE],
            read_only: false,
            fail_next_writes: 0,
            bad_block: None,
            writes: 0,
        }
    }

    pub fn set_read_only(&mut self, ro: bool) {
        self.read_only = ro;
    }

    /// Fail the next `n` writes with `WriteFail`.
    pub fn fail_next_writes(&mut self, n: u32) {
        self.fail_next_writes = n;
    }

    /// Every access to `blk` fails until cleared.
    pub fn set_bad_block(&mut self, blk: Option<u32>) {
        self.bad_block = blk;
    }

    /// Successful writes so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Raw view of the whole medium.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn range(&self, blk: u32) -> Option<core::ops::Range<usize>> {
        let start = blk as usize * SECTOR_SIZE;
        let end = start + SECTOR_SIZE;
        (end <= self.data.len()).then_some(start..end)
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&mut self, blk: u32, buf: &mut Sector) -> Result<(), IoError> {
        if self.bad_block == Some(blk) {
            return Err(IoError::ReadFail);
        }
        let range = self.range(blk).ok_or(IoError::ReadTooShort)?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_block(&mut self, blk: u32, buf: &Sector) -> Result<(), IoError> {
        if self.read_only {
            return Err(IoError::ReadOnly);
        }
        if self.fail_next_writes > 0 {
            self.fail_next_writes -= 1;
            return Err(IoError::WriteFail);
        }
        if self.bad_block == Some(blk) {
            return Err(IoError::WriteFail);
        }
        let range = self.range(blk).ok_or(IoError::WriteTooShort)?;
        self.data[range].copy_from_slice(buf);
        self.writes += 1;
        Ok(())
    }

    fn num_blocks(&self) -> u32 {
        (self.data.len() / SECTOR_SIZE) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramdisk_round_trip_and_faults() {
        let mut disk = RamDisk::new(4);
        let mut sec = [0u8; SECTOR_SIZE];
        sec[0] = 0xa5;
        disk.write_block(3, &sec).unwrap();
        assert_eq!(read_sector(&mut disk, 3).unwrap()[0], 0xa5);

        assert_eq!(disk.write_block(4, &sec), Err(IoError::WriteTooShort));
        assert_eq!(read_sector(&mut disk, 9), Err(IoError::ReadTooShort));

        disk.fail_next_writes(1);
        assert_eq!(disk.write_block(1, &sec), Err(IoError::WriteFail));
        assert!(disk.write_block(1, &sec).is_ok());

        disk.set_read_only(true);
        assert_eq!(disk.write_block(1, &sec), Err(IoError::ReadOnly));
    }
}
