// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Panic log.
//!
//! Sector [`PANIC0_SECTOR`] holds the Panic0 header which tracks where the
//! next panic block goes inside the Panic area:
//! ```text
//! [sig_a:4][panic_start:4][panic_nxt:4][panic_end:4][fubar:4][sig_b:4][chksum:2][pad:2]
//! ```
//! Each fatal condition writes one checksummed [`PanicInfo`] block at
//! `panic_nxt` and then rewrites Panic0.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use tracing::{error, warn};

use crate::blockio::{read_sector, BlockDevice, Sector};
use crate::checksum::sum16;
use crate::config::{
    FUBAR_REALLY_REALLY_FUBARD, PANIC0_MAJIK, PANIC0_SECTOR, PANIC_INFO_SIG, SECTOR_SIZE,
};
use crate::error::{IntegrityError, IoError};
use crate::locator::Area;

/// Subsystem codes carried in `PanicInfo::pcode`.
pub mod pcode {
    pub const MS: u8 = 0x12;
    pub const SS: u8 = 0x13;
    pub const SS_RECOV: u8 = 0x14;
    /// Set on non-fatal panics that are only logged.
    pub const WARN_FLAG: u8 = 0x80;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Panic0 {
    pub panic_start: u32,
    pub panic_nxt: u32,
    pub panic_end: u32,
    pub fubar: u32,
}

impl Panic0 {
    pub const SIZE: usize = 28;

    /// Fresh header for an empty Panic area.
    pub fn new(area: Area) -> Self {
        Self {
            panic_start: area.start,
            panic_nxt: area.start,
            panic_end: area.end,
            fubar: 0,
        }
    }

    /// The area overflowed at least once and old panics were lost.
    pub fn is_fubar(&self) -> bool {
        self.fubar == FUBAR_REALLY_REALLY_FUBARD
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], PANIC0_MAJIK);
        LittleEndian::write_u32(&mut buf[4..8], self.panic_start);
        LittleEndian::write_u32(&mut buf[8..12], self.panic_nxt);
        LittleEndian::write_u32(&mut buf[12..16], self.panic_end);
        LittleEndian::write_u32(&mut buf[16..20], self.fubar);
        LittleEndian::write_u32(&mut buf[20..24], PANIC0_MAJIK);
        let chk = 0u16.wrapping_sub(sum16(&buf));
        LittleEndian::write_u16(&mut buf[24..26], chk);
        buf
    }

    /// Same three stages as the locator: tombstones, bounds, checksum.
    pub fn decode(buf: &[u8]) -> Result<Self, IntegrityError> {
        if buf.len() < Self::SIZE {
            return Err(IntegrityError::NotFound);
        }
        let buf = &buf[..Self::SIZE];
        if LittleEndian::read_u32(&buf[0..4]) != PANIC0_MAJIK
            || LittleEndian::read_u32(&buf[20..24]) != PANIC0_MAJIK
        {
            return Err(IntegrityError::NotFound);
        }
        let p0 = Self {
            panic_start: LittleEndian::read_u32(&buf[4..8]),
            panic_nxt: LittleEndian::read_u32(&buf[8..12]),
            panic_end: LittleEndian::read_u32(&buf[12..16]),
            fubar: LittleEndian::read_u32(&buf[16..20]),
        };
        if p0.panic_start == 0
            || p0.panic_end == 0
            || p0.panic_start > p0.panic_nxt
            || p0.panic_nxt > p0.panic_end
        {
            return Err(IntegrityError::BadValue);
        }
        if sum16(buf) != 0 {
            return Err(IntegrityError::ChecksumError);
        }
        Ok(p0)
    }

    pub fn to_sector(&self) -> Sector {
        let mut sec = [0u8; SECTOR_SIZE];
        sec[..Self::SIZE].copy_from_slice(&self.encode());
        sec
    }
}

/// Read and validate Panic0 from its well-known sector.
pub fn load_panic0<D: BlockDevice + ?Sized>(dev: &mut D) -> crate::error::Result<Panic0> {
    let sec = read_sector(dev, PANIC0_SECTOR)?;
    Ok(Panic0::decode(&sec)?)
}

/// Snapshot of one fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PanicInfo {
    pub pcode: u8,
    pub where_: u8,
    pub args: [u32; 4],
    pub stamp: u32,
}

impl PanicInfo {
    const SIZE: usize = 32;

    pub fn new(pcode: u8, where_: u8, args: [u32; 4], stamp: u32) -> Self {
        Self { pcode, where_, args, stamp }
    }

    pub fn to_sector(&self) -> Sector {
        let mut sec = [0u8; SECTOR_SIZE];
        LittleEndian::write_u32(&mut sec[0..4], PANIC_INFO_SIG);
        sec[4] = self.pcode;
        sec[5] = self.where_;
        for (i, a) in self.args.iter().enumerate() {
            LittleEndian::write_u32(&mut sec[8 + i * 4..12 + i * 4], *a);
        }
        LittleEndian::write_u32(&mut sec[24..28], self.stamp);
        let chk = 0u16.wrapping_sub(sum16(&sec[..Self::SIZE]));
        LittleEndian::write_u16(&mut sec[28..30], chk);
        sec
    }

    pub fn from_sector(sec: &Sector) -> Result<Self, IntegrityError> {
        if LittleEndian::read_u32(&sec[0..4]) != PANIC_INFO_SIG {
            return Err(IntegrityError::NotFound);
        }
        if sum16(&sec[..Self::SIZE]) != 0 {
            return Err(IntegrityError::ChecksumError);
        }
        let mut args = [0u32; 4];
        for (i, a) in args.iter_mut().enumerate() {
            *a = LittleEndian::read_u32(&sec[8 + i * 4..12 + i * 4]);
        }
        Ok(Self {
            pcode: sec[4],
            where_: sec[5],
            args,
            stamp: LittleEndian::read_u32(&sec[24..28]),
        })
    }
}

/// Owner of the Panic area for an open device.
#[derive(Debug, Clone)]
pub struct PanicLog {
    area: Area,
    hdr: Panic0,
}

impl PanicLog {
    /// Adopt Panic0 from disk. A missing or damaged header is replaced
    /// with a fresh one so a panic can still be recorded.
    pub fn open<D: BlockDevice + ?Sized>(dev: &mut D, area: Area) -> Self {
        let hdr = match load_panic0(dev) {
            Ok(p0) if area.contains(p0.panic_start) && area.contains(p0.panic_end) => p0,
            Ok(_) => {
                warn!("panic0 does not match the panic area, starting fresh");
                Panic0::new(area)
            }
            Err(e) => {
                warn!("panic0 unusable ({}), starting fresh", e);
                Panic0::new(area)
            }
        };
        Self { area, hdr }
    }

    pub fn header(&self) -> Panic0 {
        self.hdr
    }

    pub fn area(&self) -> Area {
        self.area
    }

    /// Write one panic block and rewrite Panic0. Returns the block used.
    /// Once the area is exhausted the last block is reused and Panic0 is
    /// marked fubar.
    pub fn record_panic<D: BlockDevice + ?Sized>(
        &mut self,
        dev: &mut D,
        info: &PanicInfo,
    ) -> Result<u32, IoError> {
        let blk = self.hdr.panic_nxt;
        let overwrites = blk == self.hdr.panic_end && holds_panic(dev, blk);
        error!(
            pcode = info.pcode,
            where_ = info.where_,
            blk,
            "recording panic {:#x?}",
            info.args
        );
        dev.write_block(blk, &info.to_sector())?;

        let mut next = self.hdr;
        if blk < next.panic_end {
            next.panic_nxt = blk + 1;
        } else if overwrites {
            warn!(blk, "panic area exhausted, overwrote the last panic");
            next.fubar = FUBAR_REALLY_REALLY_FUBARD;
        }
        dev.write_block(PANIC0_SECTOR, &next.to_sector())?;
        self.hdr = next;
        Ok(blk)
    }

    /// Panic blocks written so far, oldest first.
    pub fn recorded<D: BlockDevice + ?Sized>(&self, dev: &mut D) -> core::ops::Range<u32> {
        let nxt = self.hdr.panic_nxt;
        let end = if nxt == self.hdr.panic_end && holds_panic(dev, nxt) {
            nxt + 1
        } else {
            nxt
        };
        self.hdr.panic_start..end
    }
}

fn holds_panic<D: BlockDevice + ?Sized>(dev: &mut D, blk: u32) -> bool {
    read_sector(dev, blk).is_ok_and(|sec| PanicInfo::from_sector(&sec).is_ok())
}

pub fn load_panic_block<D: BlockDevice + ?Sized>(
    dev: &mut D,
    blk: u32,
) -> crate::error::Result<PanicInfo> {
    let sec = read_sector(dev, blk)?;
    Ok(PanicInfo::from_sector(&sec)?)
}
