// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Data area bookkeeping.
//!
//! The first sector of the Data area holds the directory:
//! ```text
//! ["DBLK":4][sig:4][low:4][high:4][incept:8][file_idx:2][pad:2][sig_a:4][chksum:4]
//! ```
//! guarded by Checksum32 (32-bit word sum of the structure is zero).
//! Records start in the sector after it. The write position is not
//! stored anywhere; it is recovered on open by looking for the first
//! erased sector.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use tracing::debug;

use crate::blockio::{BlockDevice, Sector};
use crate::checksum::sum32;
use crate::config::{DBLK_DIR_SIG, DBLK_ID, DC_BLK_SIZE, SECTOR_SIZE, SYNC_MAX_SECTORS};
use crate::error::{IntegrityError, IoError};
use crate::locator::Area;
use crate::resync::sync_points;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DblkDir {
    pub low: u32,
    pub high: u32,
    pub incept: u64,
    pub file_idx: u16,
}

impl DblkDir {
    pub const SIZE: usize = 36;

    /// Directory describing a freshly formatted Data area.
    pub fn new(area: Area, incept: u64) -> Self {
        Self {
            low: area.start,
            high: area.end,
            incept,
            file_idx: 0,
        }
    }

    /// First block that carries records.
    pub fn first_data_block(&self) -> u32 {
        self.low + 1
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&DBLK_ID);
        LittleEndian::write_u32(&mut buf[4..8], DBLK_DIR_SIG);
        LittleEndian::write_u32(&mut buf[8..12], self.low);
        LittleEndian::write_u32(&mut buf[12..16], self.high);
        LittleEndian::write_u64(&mut buf[16..24], self.incept);
        LittleEndian::write_u16(&mut buf[24..26], self.file_idx);
        LittleEndian::write_u32(&mut buf[28..32], DBLK_DIR_SIG);
        let chk = 0u32.wrapping_sub(sum32(&buf));
        LittleEndian::write_u32(&mut buf[32..36], chk);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, IntegrityError> {
        if buf.len() < Self::SIZE {
            return Err(IntegrityError::NotFound);
        }
        let buf = &buf[..Self::SIZE];
        if buf[0..4] != DBLK_ID
            || LittleEndian::read_u32(&buf[4..8]) != DBLK_DIR_SIG
            || LittleEndian::read_u32(&buf[28..32]) != DBLK_DIR_SIG
        {
            return Err(IntegrityError::NotFound);
        }
        let dir = Self {
            low: LittleEndian::read_u32(&buf[8..12]),
            high: LittleEndian::read_u32(&buf[12..16]),
            incept: LittleEndian::read_u64(&buf[16..24]),
            file_idx: LittleEndian::read_u16(&buf[24..26]),
        };
        if dir.low == 0 || dir.high == 0 || dir.low >= dir.high {
            return Err(IntegrityError::BadValue);
        }
        if sum32(buf) != 0 {
            return Err(IntegrityError::ChecksumError);
        }
        Ok(dir)
    }

    pub fn to_sector(&self) -> Sector {
        let mut sec = [0u8; SECTOR_SIZE];
        sec[..Self::SIZE].copy_from_slice(&self.encode());
        sec
    }
}

fn is_erased<D: BlockDevice + ?Sized>(dev: &mut D, blk: u32, sec: &mut Sector) -> Result<bool, IoError> {
    dev.read_block(blk, sec)?;
    Ok(sec.iter().all(|b| *b == 0))
}

/// First erased block after the directory, or `area.end + 1` when the
/// area is full. Sectors are written strictly in order, so a binary
/// search over "written / erased" finds the boundary.
pub fn find_dblk_nxt<D: BlockDevice + ?Sized>(dev: &mut D, area: Area) -> Result<u32, IoError> {
    let mut sec = [0u8; SECTOR_SIZE];
    let mut lo = area.start + 1;
    let mut hi = area.end + 1;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if is_erased(dev, mid, &mut sec)? {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    debug!(nxt = lo, start = area.start, end = area.end, "data area resume point");
    Ok(lo)
}

/// Byte offset, relative to the start of the Data area, of the newest
/// sync or reboot record in the last [`SYNC_MAX_SECTORS`] written sectors.
pub fn find_last_sync<D: BlockDevice + ?Sized>(
    dev: &mut D,
    area: Area,
    nxt: u32,
) -> Result<Option<u64>, IoError> {
    let floor = (area.start + 1).max(nxt.saturating_sub(SYNC_MAX_SECTORS));
    let mut sec = [0u8; SECTOR_SIZE];
    let mut blk = nxt;
    while blk > floor {
        blk -= 1;
        dev.read_block(blk, &mut sec)?;
        if let Some(p) = sync_points(&sec[..DC_BLK_SIZE]).last() {
            let base = (blk - area.start) as u64 * SECTOR_SIZE as u64;
            return Ok(Some(base + p.offset as u64));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockio::RamDisk;
    use crate::record::Record;

    #[test]
    fn test_dblk_dir_validation() {
        let dir = DblkDir::new(Area::new(100, 400), 0xfeed);
        let enc = dir.encode();
        assert_eq!(DblkDir::decode(&enc), Ok(dir));

        let mut bad = enc;
        bad[0] = b'X';
        assert_eq!(DblkDir::decode(&bad), Err(IntegrityError::NotFound));

        let mut bad = enc;
        bad[12..16].copy_from_slice(&50u32.to_le_bytes());
        assert_eq!(DblkDir::decode(&bad), Err(IntegrityError::BadValue));

        let mut bad = enc;
        bad[17] ^= 0xff;
        assert_eq!(DblkDir::decode(&bad), Err(IntegrityError::ChecksumError));
    }

    #[test]
    fn test_find_nxt_and_last_sync() {
        let area = Area::new(10, 40);
        let mut disk = RamDisk::new(64);
        assert_eq!(find_dblk_nxt(&mut disk, area).unwrap(), 11);

        for blk in 11..20 {
            let mut sec = [0xeeu8; SECTOR_SIZE];
            if blk == 14 {
                sec[64..76].copy_from_slice(Record::sync(3).as_bytes());
            }
            disk.write_block(blk, &sec).unwrap();
        }
        assert_eq!(find_dblk_nxt(&mut disk, area).unwrap(), 20);
        // 14 is within the last eight sectors
        assert_eq!(find_last_sync(&mut disk, area, 20).unwrap(), Some(4 * 512 + 64));
        assert_eq!(find_last_sync(&mut disk, area, 11).unwrap(), None);

        for blk in 20..=40 {
            disk.write_block(blk, &[1u8; SECTOR_SIZE]).unwrap();
        }
        assert_eq!(find_dblk_nxt(&mut disk, area).unwrap(), 41);
    }
}
