// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Stream resynchronisation.
//!
//! Sync and reboot records both carry [`SYNC_MAJIK`] eight bytes into the
//! record. After corruption a reader scans forward for the majik and
//! checks that the header in front of it really describes a sync or
//! reboot record; that record boundary is the recovered alignment.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::config::{SYNC_MAJIK, SYNC_MAJIK_OFFSET};
use crate::record::{DType, RecordHeader, REBOOT_LEN, SYNC_LEN};

/// A recovered record boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncPoint {
    /// Offset of the sync/reboot record header in the scanned bytes.
    pub offset: usize,
    pub dtype: DType,
    pub stamp: u32,
}

/// Offset of the first well-formed sync/reboot record, if any.
pub fn scan_for_sync(bytes: &[u8]) -> Option<usize> {
    scan_from(bytes, 0).map(|p| p.offset)
}

/// Scan for the first sync point whose record starts at or after `start`.
pub fn scan_from(bytes: &[u8], start: usize) -> Option<SyncPoint> {
    let majik = SYNC_MAJIK.to_le_bytes();
    let first = start.checked_add(SYNC_MAJIK_OFFSET)?;
    if bytes.len() < first + majik.len() {
        return None;
    }
    (first..=bytes.len() - majik.len())
        .filter(|&p| bytes[p..p + majik.len()] == majik)
        .find_map(|p| sync_at(bytes, p - SYNC_MAJIK_OFFSET))
}

/// Validate a sync or reboot record starting exactly at `offset`.
pub fn sync_at(bytes: &[u8], offset: usize) -> Option<SyncPoint> {
    let rec = bytes.get(offset..)?;
    let hdr = RecordHeader::read(rec)?;
    let dtype = match (hdr.len as usize, DType::try_from(hdr.dtype).ok()?) {
        (SYNC_LEN, DType::Sync) => DType::Sync,
        (REBOOT_LEN, DType::Reboot) => DType::Reboot,
        _ => return None,
    };
    let tail = rec.get(4..SYNC_MAJIK_OFFSET + 4)?;
    if LittleEndian::read_u32(&tail[4..8]) != SYNC_MAJIK {
        return None;
    }
    Some(SyncPoint {
        offset,
        dtype,
        stamp: LittleEndian::read_u32(&tail[0..4]),
    })
}

/// Every sync point in `bytes`, in order.
pub fn sync_points(bytes: &[u8]) -> impl Iterator<Item = SyncPoint> + '_ {
    let mut next = 0usize;
    core::iter::from_fn(move || {
        let p = scan_from(bytes, next)?;
        next = p.offset + 1;
        Some(p)
    })
}
