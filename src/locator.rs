// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Partition locator.
//!
//! The locator is buried at [`FS_LOC_OFFSET`] inside the boot sector, in a
//! region the host's FAT driver ignores. It names the contiguous areas
//! (Panic, Config, Image, Dblk) every other component works inside.
//!
//! On-disk layout, little endian:
//! ```text
//! [loc_sig:4][(start:4, end:4) x 8][loc_sig_a:4][chksum:2][pad:2]
//! ```
//! The 16-bit word sum over all 76 bytes is zero.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::blockio::Sector;
use crate::checksum::sum16;
use crate::config::{FS_LOC_MAX, FS_LOC_OFFSET, FS_LOC_SIG, MAX_FS_LOCATORS};
use crate::error::IntegrityError;

/// Inclusive range of absolute block ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Area {
    pub start: u32,
    pub end: u32,
}

impl Area {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn blocks(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn contains(&self, blk: u32) -> bool {
        blk >= self.start && blk <= self.end
    }

    fn is_sane(&self) -> bool {
        self.start != 0 && self.end != 0 && self.start <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AreaKind {
    Panic = 0,
    Config = 1,
    Image = 2,
    Dblk = 3,
}

impl AreaKind {
    pub const ALL: [AreaKind; FS_LOC_MAX] =
        [AreaKind::Panic, AreaKind::Config, AreaKind::Image, AreaKind::Dblk];
}

/// Validated locator. There is no way to hold one that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Locator {
    areas: [Area; MAX_FS_LOCATORS],
}

impl Locator {
    pub const SIZE: usize = 4 + MAX_FS_LOCATORS * 8 + 4 + 2 + 2;
    const SIG_A_OFF: usize = 4 + MAX_FS_LOCATORS * 8;
    const CHKSUM_OFF: usize = Self::SIG_A_OFF + 4;

    /// Build a locator for formatting. Unused slots stay zero.
    pub fn new(panic: Area, config: Area, image: Area, dblk: Area) -> Result<Self, IntegrityError> {
        let mut areas = [Area::default(); MAX_FS_LOCATORS];
        areas[AreaKind::Panic as usize] = panic;
        areas[AreaKind::Config as usize] = config;
        areas[AreaKind::Image as usize] = image;
        areas[AreaKind::Dblk as usize] = dblk;
        let loc = Self { areas };
        if !loc.bounds_ok() {
            return Err(IntegrityError::BadValue);
        }
        Ok(loc)
    }

    pub fn area(&self, kind: AreaKind) -> Area {
        self.areas[kind as usize]
    }

    fn bounds_ok(&self) -> bool {
        self.areas[..FS_LOC_MAX].iter().all(Area::is_sane)
    }

    /// Extract and validate the locator from the boot sector.
    pub fn load(sector0: &Sector) -> Result<Self, IntegrityError> {
        Self::decode(&sector0[FS_LOC_OFFSET..FS_LOC_OFFSET + Self::SIZE])
    }

    /// Validation order: signatures, then bounds, then checksum.
    pub fn decode(buf: &[u8]) -> Result<Self, IntegrityError> {
        if buf.len() < Self::SIZE {
            return Err(IntegrityError::NotFound);
        }
        let buf = &buf[..Self::SIZE];
        let sig = LittleEndian::read_u32(&buf[0..4]);
        let sig_a = LittleEndian::read_u32(&buf[Self::SIG_A_OFF..Self::SIG_A_OFF + 4]);
        if sig != FS_LOC_SIG || sig_a != FS_LOC_SIG {
            return Err(IntegrityError::NotFound);
        }

        let mut areas = [Area::default(); MAX_FS_LOCATORS];
        for (i, area) in areas.iter_mut().enumerate() {
            let off = 4 + i * 8;
            area.start = LittleEndian::read_u32(&buf[off..off + 4]);
            area.end = LittleEndian::read_u32(&buf[off + 4..off + 8]);
        }
        let loc = Self { areas };
        if !loc.bounds_ok() {
            return Err(IntegrityError::BadValue);
        }

        if sum16(buf) != 0 {
            return Err(IntegrityError::ChecksumError);
        }
        Ok(loc)
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], FS_LOC_SIG);
        for (i, area) in self.areas.iter().enumerate() {
            let off = 4 + i * 8;
            LittleEndian::write_u32(&mut buf[off..off + 4], area.start);
            LittleEndian::write_u32(&mut buf[off + 4..off + 8], area.end);
        }
        LittleEndian::write_u32(&mut buf[Self::SIG_A_OFF..Self::SIG_A_OFF + 4], FS_LOC_SIG);
        let chk = 0u16.wrapping_sub(sum16(&buf));
        LittleEndian::write_u16(&mut buf[Self::CHKSUM_OFF..Self::CHKSUM_OFF + 2], chk);
        buf
    }

    /// Place the locator into a boot sector image, leaving the rest alone.
    pub fn install(&self, sector0: &mut Sector) {
        sector0[FS_LOC_OFFSET..FS_LOC_OFFSET + Self::SIZE].copy_from_slice(&self.encode());
    }
}

/// Read-side entry point used at device open.
pub fn load_locator(sector0: &Sector) -> Result<Locator, IntegrityError> {
    Locator::load(sector0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SECTOR_SIZE;

    fn sample() -> Locator {
        Locator::new(
            Area::new(64, 191),
            Area::new(192, 199),
            Area::new(200, 1224),
            Area::new(1225, 4095),
        )
        .unwrap()
    }

    #[test]
    fn test_locator_load_valid() {
        let loc = sample();
        let mut sector = [0u8; SECTOR_SIZE];
        loc.install(&mut sector);
        assert_eq!(sum16(&sector[FS_LOC_OFFSET..FS_LOC_OFFSET + Locator::SIZE]), 0);
        let loaded = load_locator(&sector).unwrap();
        assert_eq!(loaded, loc);
        assert_eq!(loaded.area(AreaKind::Image), Area::new(200, 1224));
        // idempotent
        assert_eq!(load_locator(&sector).unwrap(), loaded);
    }

    #[test]
    fn test_locator_missing_signature() {
        let sector = [0u8; SECTOR_SIZE];
        assert_eq!(load_locator(&sector), Err(IntegrityError::NotFound));
    }

    #[test]
    fn test_locator_bad_bounds() {
        assert_eq!(
            Locator::new(Area::new(10, 5), Area::new(1, 1), Area::new(2, 2), Area::new(3, 3)),
            Err(IntegrityError::BadValue)
        );

        let mut sector = [0u8; SECTOR_SIZE];
        sample().install(&mut sector);
        // bounds are checked ahead of the checksum
        let off = FS_LOC_OFFSET + 4 + 3 * 8 + 4;
        sector[off..off + 4].copy_from_slice(&0u32.to_le_bytes());
        assert_eq!(load_locator(&sector), Err(IntegrityError::BadValue));
    }

    #[test]
    fn test_locator_single_byte_mutations() {
        let mut pristine = [0u8; SECTOR_SIZE];
        sample().install(&mut pristine);
        let sig_a = 4 + MAX_FS_LOCATORS * 8;
        for i in 0..Locator::SIZE {
            if i < 4 || (sig_a..sig_a + 4).contains(&i) {
                continue;
            }
            let mut sector = pristine;
            sector[FS_LOC_OFFSET + i] ^= 0x5a;
            let res = load_locator(&sector);
            assert!(
                matches!(res, Err(IntegrityError::ChecksumError) | Err(IntegrityError::BadValue)),
                "byte {i}: {res:?}"
            );
        }
    }

    #[test]
    fn test_locator_signature_mutation_is_not_found() {
        let mut sector = [0u8; SECTOR_SIZE];
        sample().install(&mut sector);
        sector[FS_LOC_OFFSET + 4 + MAX_FS_LOCATORS * 8] ^= 1;
        assert_eq!(load_locator(&sector), Err(IntegrityError::NotFound));
    }
}
