// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Stream reader.
//!
//! A bounded FIFO of raw block reads, independent of the write path.
//! Requests complete strictly in submission order. Read failures go back
//! to the caller; they never touch writer state.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use tracing::debug;

use crate::blockio::{BlockDevice, Sector};
use crate::config::{READER_QUEUE_DEPTH, SECTOR_SIZE};
use crate::error::ReadError;
use crate::locator::Area;

pub type ClientId = u16;

#[derive(Debug)]
pub struct ReadRequest {
    pub client: ClientId,
    pub blk: u32,
    pub dest: Box<Sector>,
}

#[derive(Debug)]
pub struct ReadCompletion {
    pub client: ClientId,
    pub blk: u32,
    /// Destination buffer handed back to the client, filled on success.
    pub dest: Box<Sector>,
    pub result: Result<(), ReadError>,
}

pub struct StreamReader {
    queue: VecDeque<ReadRequest>,
    depth: usize,
}

impl Default for StreamReader {
    fn default() -> Self {
        Self::new(READER_QUEUE_DEPTH)
    }
}

impl StreamReader {
    pub fn new(depth: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(depth),
            depth,
        }
    }

    pub fn submit(&mut self, req: ReadRequest) -> Result<(), ReadError> {
        if self.queue.len() >= self.depth {
            return Err(ReadError::QueueFull);
        }
        self.queue.push_back(req);
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Service the oldest request.
    pub fn service_one<D: BlockDevice + ?Sized>(&mut self, dev: &mut D) -> Option<ReadCompletion> {
        let mut req = self.queue.pop_front()?;
        let result = dev.read_block(req.blk, &mut req.dest).map_err(ReadError::from);
        if let Err(e) = &result {
            debug!(client = req.client, blk = req.blk, "read failed: {}", e);
        }
        Some(ReadCompletion {
            client: req.client,
            blk: req.blk,
            dest: req.dest,
            result,
        })
    }

    pub fn service_all<D: BlockDevice + ?Sized>(&mut self, dev: &mut D) -> Vec<ReadCompletion> {
        core::iter::from_fn(|| self.service_one(dev)).collect()
    }
}

/// Sectors touched by `len` bytes at `byte_offset` inside `area`, plus
/// the offset into the first one. `OutOfRange` when any byte falls outside.
pub fn span(area: Area, byte_offset: u64, len: usize) -> Result<(core::ops::Range<u32>, usize), ReadError> {
    let area_bytes = area.blocks() as u64 * SECTOR_SIZE as u64;
    let end = byte_offset
        .checked_add(len as u64)
        .ok_or(ReadError::OutOfRange)?;
    if end > area_bytes {
        return Err(ReadError::OutOfRange);
    }
    let first = (byte_offset / SECTOR_SIZE as u64) as u32;
    let last = end.div_ceil(SECTOR_SIZE as u64) as u32;
    Ok((
        area.start + first..area.start + last,
        (byte_offset % SECTOR_SIZE as u64) as usize,
    ))
}

/// Byte range access on top of block reads.
pub fn read_range<D: BlockDevice + ?Sized>(
    dev: &mut D,
    area: Area,
    byte_offset: u64,
    len: usize,
) -> Result<Vec<u8>, ReadError> {
    let (blocks, mut skip) = span(area, byte_offset, len)?;
    let mut out = Vec::with_capacity(len);
    let mut sec = [0u8; SECTOR_SIZE];
    for blk in blocks {
        dev.read_block(blk, &mut sec)?;
        let take = (len - out.len()).min(SECTOR_SIZE - skip);
        out.extend_from_slice(&sec[skip..skip + take]);
        skip = 0;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockio::RamDisk;
    use crate::error::IoError;

    #[test]
    fn test_fifo_order_and_failures() {
        let mut disk = RamDisk::new(8);
        for blk in 0..8u32 {
            disk.write_block(blk, &[blk as u8; SECTOR_SIZE]).unwrap();
        }
        disk.set_bad_block(Some(5));

        let mut reader = StreamReader::new(3);
        for (client, blk) in [(1, 2), (2, 5), (1, 7)] {
            reader
                .submit(ReadRequest { client, blk, dest: Box::new([0u8; SECTOR_SIZE]) })
                .unwrap();
        }
        let overflow = ReadRequest { client: 9, blk: 0, dest: Box::new([0u8; SECTOR_SIZE]) };
        assert_eq!(reader.submit(overflow), Err(ReadError::QueueFull));

        let done = reader.service_all(&mut disk);
        assert_eq!(done.iter().map(|c| c.blk).collect::<Vec<_>>(), vec![2, 5, 7]);
        assert_eq!(done[0].dest[0], 2);
        assert_eq!(done[1].result, Err(ReadError::Io(IoError::ReadFail)));
        assert!(done[2].result.is_ok());
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn test_read_range_crosses_sectors() {
        let mut disk = RamDisk::new(8);
        for blk in 0..8u32 {
            disk.write_block(blk, &[blk as u8; SECTOR_SIZE]).unwrap();
        }
        let area = Area::new(2, 5);
        let bytes = read_range(&mut disk, area, 510, 4).unwrap();
        assert_eq!(bytes, vec![2, 2, 3, 3]);
        assert_eq!(read_range(&mut disk, area, 4 * 512 - 1, 2), Err(ReadError::OutOfRange));
        assert_eq!(read_range(&mut disk, area, 0, 0).unwrap(), Vec::<u8>::new());
    }
}
