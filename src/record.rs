// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Typed data records.
//!
//! Every record starts with a 4 byte header:
//! ```text
//! [len:2 LE][dtype:1][reserved:1]
//! ```
//! `len` covers header and payload but not the 0-3 zero pad bytes that
//! keep the next header quad aligned inside the sector.

use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::blockio::Sector;
use crate::checksum::sum16;
use crate::config::{DC_BLK_SIZE, DC_SEQ_LOC, DT_HDR_SIZE, SYNC_MAJIK};
use crate::error::{CollectorError, IntegrityError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum DType {
    /// "This Is Not The Record You Are Looking For": skip to next sector.
    Tintryalf = 0,
    Reboot = 1,
    Version = 2,
    Sync = 3,
    Event = 4,
    Debug = 5,
    SyncFlush = 6,
    GpsVersion = 16,
    GpsTime = 17,
    GpsGeo = 18,
    GpsXyz = 19,
    SensorData = 20,
    SensorSet = 21,
    Test = 22,
    Note = 23,
    Config = 24,
    GpsProtoStats = 25,
    GpsRaw = 32,
    Tagnet = 33,
}

impl TryFrom<u8> for DType {
    type Error = IntegrityError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        use DType::*;
        Ok(match v {
            0 => Tintryalf,
            1 => Reboot,
            2 => Version,
            3 => Sync,
            4 => Event,
            5 => Debug,
            6 => SyncFlush,
            16 => GpsVersion,
            17 => GpsTime,
            18 => GpsGeo,
            19 => GpsXyz,
            20 => SensorData,
            21 => SensorSet,
            22 => Test,
            23 => Note,
            24 => Config,
            25 => GpsProtoStats,
            32 => GpsRaw,
            33 => Tagnet,
            _ => return Err(IntegrityError::BadValue),
        })
    }
}

pub const SYNC_LEN: usize = 12;
pub const REBOOT_LEN: usize = 16;
pub const SKIP_MARKER: [u8; 4] = [4, 0, DType::Tintryalf as u8, 0];
/// Event code of a non-fatal panic logged into the stream.
pub const EVENT_PANIC_WARN: u16 = 1;
pub const EVENT_LEN: usize = DT_HDR_SIZE + 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub len: u16,
    pub dtype: u8,
}

impl RecordHeader {
    pub fn read(buf: &[u8]) -> Option<Self> {
        if buf.len() < DT_HDR_SIZE {
            return None;
        }
        Some(Self {
            len: LittleEndian::read_u16(&buf[0..2]),
            dtype: buf[2],
        })
    }

    pub fn write(&self, buf: &mut [u8]) {
        LittleEndian::write_u16(&mut buf[0..2], self.len);
        buf[2] = self.dtype;
        buf[3] = 0;
    }
}

/// Round a record length up to the next quad boundary.
pub fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

/// An encoded record, ready for the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    bytes: Vec<u8>,
}

impl Record {
    /// Header plus an opaque payload.
    pub fn new(dtype: DType, payload: &[u8]) -> Result<Self, CollectorError> {
        let len = DT_HDR_SIZE + payload.len();
        if dtype == DType::Tintryalf {
            return Err(CollectorError::BadRecordHeader);
        }
        if len > DC_BLK_SIZE {
            return Err(CollectorError::RecordTooLarge { len });
        }
        let mut bytes = alloc::vec![0u8; len];
        RecordHeader { len: len as u16, dtype: dtype as u8 }.write(&mut bytes);
        bytes[DT_HDR_SIZE..].copy_from_slice(payload);
        Ok(Self { bytes })
    }

    /// Periodic sync record.
    pub fn sync(stamp: u32) -> Self {
        let mut bytes = alloc::vec![0u8; SYNC_LEN];
        RecordHeader { len: SYNC_LEN as u16, dtype: DType::Sync as u8 }.write(&mut bytes);
        LittleEndian::write_u32(&mut bytes[4..8], stamp);
        LittleEndian::write_u32(&mut bytes[8..12], SYNC_MAJIK);
        Self { bytes }
    }

    /// Reboot record, written first on every open. Same majik position as
    /// a sync so one scan finds both.
    pub fn reboot(stamp: u32, boot_count: u16) -> Self {
        let mut bytes = alloc::vec![0u8; REBOOT_LEN];
        RecordHeader { len: REBOOT_LEN as u16, dtype: DType::Reboot as u8 }.write(&mut bytes);
        LittleEndian::write_u32(&mut bytes[4..8], stamp);
        LittleEndian::write_u32(&mut bytes[8..12], SYNC_MAJIK);
        LittleEndian::write_u16(&mut bytes[12..14], boot_count);
        Self { bytes }
    }

    /// Event record, e.g. a panic warning.
    pub fn event(stamp: u32, event: u16, pcode: u8, w: u8, args: [u32; 4]) -> Self {
        let mut payload = [0u8; 24];
        LittleEndian::write_u32(&mut payload[0..4], stamp);
        LittleEndian::write_u16(&mut payload[4..6], event);
        payload[6] = pcode;
        payload[7] = w;
        for (i, a) in args.iter().enumerate() {
            LittleEndian::write_u32(&mut payload[8 + i * 4..12 + i * 4], *a);
        }
        Self::from_raw_unchecked(DType::Event, &payload)
    }

    /// Warning raised by a subsystem that recovered on its own.
    pub fn panic_warning(stamp: u32, pcode: u8, w: u8, args: [u32; 4]) -> Self {
        Self::event(stamp, EVENT_PANIC_WARN, pcode | crate::panic::pcode::WARN_FLAG, w, args)
    }

    /// Free form note from the base station. Text that does not fit one
    /// sector is refused, never cut.
    pub fn note(stamp: u32, text: &str) -> Result<Self, CollectorError> {
        let mut payload = Vec::with_capacity(4 + text.len());
        payload.extend_from_slice(&stamp.to_le_bytes());
        payload.extend_from_slice(text.as_bytes());
        Self::new(DType::Note, &payload)
    }

    fn from_raw_unchecked(dtype: DType, payload: &[u8]) -> Self {
        let len = DT_HDR_SIZE + payload.len();
        let mut bytes = alloc::vec![0u8; len];
        RecordHeader { len: len as u16, dtype: dtype as u8 }.write(&mut bytes);
        bytes[DT_HDR_SIZE..].copy_from_slice(payload);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn dtype(&self) -> u8 {
        self.bytes[2]
    }
}

/// Check that raw bytes handed to the collector describe themselves.
pub fn check_raw_record(bytes: &[u8]) -> Result<(), CollectorError> {
    if bytes.len() > DC_BLK_SIZE {
        return Err(CollectorError::RecordTooLarge { len: bytes.len() });
    }
    let hdr = RecordHeader::read(bytes).ok_or(CollectorError::BadRecordHeader)?;
    if hdr.len as usize != bytes.len() || hdr.dtype == DType::Tintryalf as u8 {
        return Err(CollectorError::BadRecordHeader);
    }
    Ok(())
}

/// Sequence number and checksum check of a written data sector.
pub fn verify_sector(sector: &Sector) -> Result<u16, IntegrityError> {
    if sum16(sector) != 0 {
        return Err(IntegrityError::ChecksumError);
    }
    Ok(LittleEndian::read_u16(&sector[DC_SEQ_LOC..DC_SEQ_LOC + 2]))
}

/// Iterate the whole records held by one data sector.
///
/// Stops at a skip marker, an empty header, or the end of the data region.
/// A header that claims more bytes than the sector holds ends the walk
/// with an error.
pub struct SectorRecords<'a> {
    data: &'a [u8],
    off: usize,
    done: bool,
}

impl<'a> SectorRecords<'a> {
    pub fn new(sector: &'a Sector) -> Self {
        Self {
            data: &sector[..DC_BLK_SIZE],
            off: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for SectorRecords<'a> {
    type Item = Result<&'a [u8], IntegrityError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let hdr = match RecordHeader::read(&self.data[self.off..]) {
            Some(h) => h,
            None => {
                self.done = true;
                return None;
            }
        };
        if hdr.len == 0 || hdr.dtype == DType::Tintryalf as u8 {
            self.done = true;
            return None;
        }
        let len = hdr.len as usize;
        if len < DT_HDR_SIZE || self.off + len > self.data.len() {
            self.done = true;
            return Some(Err(IntegrityError::BadValue));
        }
        let rec = &self.data[self.off..self.off + len];
        self.off += padded_len(len);
        Some(Ok(rec))
    }
}
