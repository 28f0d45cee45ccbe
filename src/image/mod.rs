// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Firmware image directory.
//!
//! The first sector of the Image area holds the directory:
//! ```text
//! [dir_sig:4][(start_sector:4, ver_id:4, state:4) x 4][dir_sig_a:4][chksum:4]
//! ```
//! `ver_id` is `[build:2 LE][minor:1][major:1]`. The structure is guarded
//! by Checksum32. Slot `i` always starts at
//! `image.start + 1 + i * IMAGE_SIZE_SECTORS`.

pub mod info;
pub mod manager;

use alloc::vec::Vec;
use core::fmt;

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::checksum::sum32;
use crate::config::{IMAGE_AREA_BLOCKS, IMAGE_DIR_SIG, IMAGE_DIR_SLOTS, IMAGE_SIZE_SECTORS, SECTOR_SIZE};
use crate::blockio::Sector;
use crate::error::IntegrityError;
use crate::locator::Area;

pub use info::ImageInfo;
pub use manager::{ImageManager, SlotHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct ImageVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
}

impl ImageVersion {
    pub const fn new(major: u8, minor: u8, build: u16) -> Self {
        Self { major, minor, build }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let mut b = [0u8; 4];
        LittleEndian::write_u16(&mut b[0..2], self.build);
        b[2] = self.minor;
        b[3] = self.major;
        b
    }

    pub fn read_from(b: &[u8]) -> Self {
        Self {
            build: LittleEndian::read_u16(&b[0..2]),
            minor: b[2],
            major: b[3],
        }
    }
}

impl fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[repr(u32)]
pub enum SlotState {
    #[default]
    Empty = 0,
    Filling = 1,
    Valid = 2,
    Backup = 3,
    Active = 4,
    Ejected = 5,
}

impl TryFrom<u32> for SlotState {
    type Error = IntegrityError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        Ok(match v {
            0 => SlotState::Empty,
            1 => SlotState::Filling,
            2 => SlotState::Valid,
            3 => SlotState::Backup,
            4 => SlotState::Active,
            5 => SlotState::Ejected,
            _ => return Err(IntegrityError::BadValue),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DirSlot {
    pub start_sector: u32,
    pub version: ImageVersion,
    pub state: SlotState,
}

/// Where slot `i` lives inside the Image area.
pub fn slot_start(area: Area, i: usize) -> u32 {
    area.start + 1 + i as u32 * IMAGE_SIZE_SECTORS
}

/// The directory sector and every full slot lie inside `area`.
pub fn area_fits(area: Area) -> bool {
    area.start <= area.end && area.blocks() >= IMAGE_AREA_BLOCKS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageDirectory {
    pub slots: [DirSlot; IMAGE_DIR_SLOTS],
}

impl ImageDirectory {
    pub const SIZE: usize = 4 + IMAGE_DIR_SLOTS * 12 + 4 + 4;
    const SIG_A_OFF: usize = 4 + IMAGE_DIR_SLOTS * 12;

    /// All slots empty, laid out over `area`.
    pub fn empty(area: Area) -> Self {
        let mut slots = [DirSlot {
            start_sector: 0,
            version: ImageVersion::default(),
            state: SlotState::Empty,
        }; IMAGE_DIR_SLOTS];
        for (i, s) in slots.iter_mut().enumerate() {
            s.start_sector = slot_start(area, i);
        }
        Self { slots }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], IMAGE_DIR_SIG);
        for (i, s) in self.slots.iter().enumerate() {
            let off = 4 + i * 12;
            LittleEndian::write_u32(&mut buf[off..off + 4], s.start_sector);
            buf[off + 4..off + 8].copy_from_slice(&s.version.to_bytes());
            LittleEndian::write_u32(&mut buf[off + 8..off + 12], s.state as u32);
        }
        LittleEndian::write_u32(&mut buf[Self::SIG_A_OFF..Self::SIG_A_OFF + 4], IMAGE_DIR_SIG);
        let chk = 0u32.wrapping_sub(sum32(&buf));
        LittleEndian::write_u32(&mut buf[Self::SIG_A_OFF + 4..Self::SIZE], chk);
        buf
    }

    /// Signatures, then slot contents and placement, then checksum.
    pub fn decode(buf: &[u8], area: Area) -> Result<Self, IntegrityError> {
        if buf.len() < Self::SIZE {
            return Err(IntegrityError::NotFound);
        }
        let buf = &buf[..Self::SIZE];
        if LittleEndian::read_u32(&buf[0..4]) != IMAGE_DIR_SIG
            || LittleEndian::read_u32(&buf[Self::SIG_A_OFF..Self::SIG_A_OFF + 4]) != IMAGE_DIR_SIG
        {
            return Err(IntegrityError::NotFound);
        }
        if !area_fits(area) {
            return Err(IntegrityError::BadValue);
        }
        let mut dir = Self::empty(area);
        for (i, s) in dir.slots.iter_mut().enumerate() {
            let off = 4 + i * 12;
            let start = LittleEndian::read_u32(&buf[off..off + 4]);
            if start != s.start_sector {
                return Err(IntegrityError::BadValue);
            }
            s.version = ImageVersion::read_from(&buf[off + 4..off + 8]);
            s.state = SlotState::try_from(LittleEndian::read_u32(&buf[off + 8..off + 12]))?;
        }
        dir.check_states()?;
        if sum32(buf) != 0 {
            return Err(IntegrityError::ChecksumError);
        }
        Ok(dir)
    }

    /// At most one Active, at most one Backup, versions unique among
    /// occupied slots.
    pub fn check_states(&self) -> Result<(), IntegrityError> {
        let count = |st| self.slots.iter().filter(|s| s.state == st).count();
        if count(SlotState::Active) > 1 || count(SlotState::Backup) > 1 {
            return Err(IntegrityError::BadValue);
        }
        let occupied: Vec<_> = self
            .slots
            .iter()
            .filter(|s| s.state != SlotState::Empty)
            .map(|s| s.version)
            .collect();
        for (i, v) in occupied.iter().enumerate() {
            if occupied[i + 1..].contains(v) {
                return Err(IntegrityError::BadValue);
            }
        }
        Ok(())
    }

    pub fn to_sector(&self) -> Sector {
        let mut sec = [0u8; SECTOR_SIZE];
        sec[..Self::SIZE].copy_from_slice(&self.encode());
        sec
    }

    /// Index of the occupied slot holding `version`.
    pub fn find(&self, version: ImageVersion) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.state != SlotState::Empty && s.version == version)
    }

    pub fn find_state(&self, state: SlotState) -> Option<usize> {
        self.slots.iter().position(|s| s.state == state)
    }
}
