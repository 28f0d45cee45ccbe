//! Record collector.
//!
//! Packs typed records into the 508 byte data region of pool buffers.
//! A record never straddles two sectors: when it does not fit, the tail
//! gets a skip marker and the sector is closed. Closing a sector writes
//! the trailer
//! ```text
//! [seq:2 LE][chksum:2 LE]
//! ```
//! where `chksum` makes the 16-bit word sum of the whole sector zero.

use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

use crate::checksum::WordSum;
use crate::config::{DC_BLK_SIZE, DC_CHKSUM_LOC, DC_SEQ_LOC, DT_HDR_SIZE};
use crate::error::Result;
use crate::record::{check_raw_record, padded_len, SKIP_MARKER};
use crate::storage::pool::{BufHandle, BufferPool};

#[derive(Debug, Default)]
pub struct Collector {
    cur: Option<BufHandle>,
    cursor: usize,
    sum: WordSum,
    seq: u16,
    records: u64,
}

impl Collector {
    /// Fresh collector; the sequence restarts at zero on every open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next closed sector will carry.
    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Bytes left in the current sector, or a full data region if none
    /// is open.
    pub fn remaining(&self) -> usize {
        match self.cur {
            Some(_) => DC_BLK_SIZE - self.cursor,
            None => DC_BLK_SIZE,
        }
    }

    /// Offset the next record would land at inside its sector.
    pub fn cursor(&self) -> usize {
        if self.cur.is_some() {
            self.cursor
        } else {
            0
        }
    }

    /// Append one encoded record.
    ///
    /// `PoolExhausted` leaves the collector consistent: the caller waits
    /// for the writer and retries the same record.
    pub fn append<const N: usize>(&mut self, pool: &mut BufferPool<N>, rec: &[u8]) -> Result<()> {
        check_raw_record(rec)?;

        if self.cur.is_some() && rec.len() > DC_BLK_SIZE - self.cursor {
            self.close_sector(pool)?;
        }

        let handle = match self.cur.take() {
            Some(h) => h,
            None => {
                let h = pool.allocate()?;
                self.cursor = 0;
                self.sum = WordSum::new();
                h
            }
        };

        let off = self.cursor;
        pool.buffer_mut(&handle)[off..off + rec.len()].copy_from_slice(rec);
        self.sum.add_at(off, rec);
        // pad bytes are already zero
        self.cursor = (off + padded_len(rec.len())).min(DC_BLK_SIZE);
        self.records += 1;
        self.cur = Some(handle);

        if self.cursor == DC_BLK_SIZE {
            self.close_sector(pool)?;
        }
        Ok(())
    }

    /// Close the current sector, if any, and hand it to the writer.
    pub fn flush<const N: usize>(&mut self, pool: &mut BufferPool<N>) -> Result<()> {
        if self.cur.is_some() {
            self.close_sector(pool)?;
        }
        Ok(())
    }

    fn close_sector<const N: usize>(&mut self, pool: &mut BufferPool<N>) -> Result<()> {
        let handle = match self.cur.take() {
            Some(h) => h,
            None => return Ok(()),
        };
        let seq = self.seq;
        {
            let buf = pool.buffer_mut(&handle);
            let remaining = DC_BLK_SIZE - self.cursor;
            if remaining >= DT_HDR_SIZE {
                buf[self.cursor..self.cursor + DT_HDR_SIZE].copy_from_slice(&SKIP_MARKER);
                self.sum.add_at(self.cursor, &SKIP_MARKER);
            }
            LittleEndian::write_u16(&mut buf[DC_SEQ_LOC..DC_SEQ_LOC + 2], seq);
            self.sum.add_at(DC_SEQ_LOC, &buf[DC_SEQ_LOC..DC_SEQ_LOC + 2]);
            LittleEndian::write_u16(
                &mut buf[DC_CHKSUM_LOC..DC_CHKSUM_LOC + 2],
                self.sum.complement(),
            );
        }
        trace!(seq, buf = handle.index(), used = self.cursor, "sector closed");
        self.seq = seq.wrapping_add(1);
        self.cursor = 0;
        self.sum = WordSum::new();
        pool.submit_full(handle)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::sum16;
    use crate::error::{CollectorError, StorageError};
    use crate::record::{verify_sector, DType, Record, SectorRecords};

    fn drain<const N: usize>(pool: &mut BufferPool<N>) -> Vec<[u8; 512]> {
        let mut out = Vec::new();
        while let Some(t) = pool.begin_write() {
            out.push(*pool.sector(&t));
            pool.complete_write(t);
            pool.recycle();
        }
        out
    }

    #[test]
    fn test_skip_marker_when_record_does_not_fit() {
        let mut pool: BufferPool<4> = BufferPool::new();
        let mut col = Collector::new();

        let sync = Record::sync(7);
        let sensor = Record::new(DType::SensorData, &[0xab; 36]).unwrap();
        let big = Record::new(DType::GpsRaw, &[0x5c; 476]).unwrap();
        assert_eq!(sensor.len(), 40);
        assert_eq!(big.len(), 480);

        col.append(&mut pool, sync.as_bytes()).unwrap();
        col.append(&mut pool, sensor.as_bytes()).unwrap();
        assert_eq!(col.remaining(), 456);
        col.append(&mut pool, big.as_bytes()).unwrap();
        col.flush(&mut pool).unwrap();

        let sectors = drain(&mut pool);
        assert_eq!(sectors.len(), 2);

        let first = &sectors[0];
        assert_eq!(&first[52..56], &SKIP_MARKER);
        assert_eq!(sum16(first), 0);
        assert_eq!(verify_sector(first), Ok(0));
        let recs: Vec<_> = SectorRecords::new(first).map(|r| r.unwrap().to_vec()).collect();
        assert_eq!(recs, vec![sync.as_bytes().to_vec(), sensor.as_bytes().to_vec()]);

        let second = &sectors[1];
        assert_eq!(&second[..480], big.as_bytes());
        assert_eq!(verify_sector(second), Ok(1));
    }

    #[test]
    fn test_exact_fill_closes_without_marker() {
        let mut pool: BufferPool<4> = BufferPool::new();
        let mut col = Collector::new();
        let rec = Record::new(DType::Test, &[1u8; DC_BLK_SIZE - DT_HDR_SIZE]).unwrap();
        col.append(&mut pool, rec.as_bytes()).unwrap();
        assert!(pool.has_full());
        let sectors = drain(&mut pool);
        assert_eq!(&sectors[0][..DC_BLK_SIZE], rec.as_bytes());
        assert_eq!(verify_sector(&sectors[0]), Ok(0));
    }

    #[test]
    fn test_sequence_wraps_after_u16_max() {
        let mut pool: BufferPool<2> = BufferPool::new();
        let mut col = Collector::new();
        let rec = Record::new(DType::Test, &[3u8; DC_BLK_SIZE - DT_HDR_SIZE]).unwrap();
        let mut seqs = Vec::new();
        for _ in 0..=u16::MAX as u32 + 1 {
            col.append(&mut pool, rec.as_bytes()).unwrap();
            for sector in drain(&mut pool) {
                seqs.push(verify_sector(&sector).unwrap());
            }
        }
        assert_eq!(seqs.len(), 65537);
        assert_eq!(seqs[65534..], [u16::MAX - 1, u16::MAX, 0]);
        assert_eq!(col.seq(), 1);
    }

    #[test]
    fn test_pool_exhausted_then_retry() {
        let mut pool: BufferPool<2> = BufferPool::new();
        let mut col = Collector::new();
        let rec = Record::new(DType::Test, &[9u8; 300]).unwrap();
        col.append(&mut pool, rec.as_bytes()).unwrap();
        col.append(&mut pool, rec.as_bytes()).unwrap();
        // third record needs a third buffer
        assert_eq!(col.append(&mut pool, rec.as_bytes()), Err(StorageError::PoolExhausted));
        let t = pool.begin_write().unwrap();
        pool.complete_write(t);
        pool.recycle();
        col.append(&mut pool, rec.as_bytes()).unwrap();
        col.flush(&mut pool).unwrap();
        let seqs: Vec<_> = drain(&mut pool).iter().map(|s| verify_sector(s).unwrap()).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(pool.check_invariant());
    }

    #[test]
    fn test_rejects_malformed_records() {
        let mut pool: BufferPool<2> = BufferPool::new();
        let mut col = Collector::new();
        assert_eq!(
            col.append(&mut pool, &[0u8; 600]),
            Err(StorageError::Collector(CollectorError::RecordTooLarge { len: 600 }))
        );
        assert_eq!(
            col.append(&mut pool, &[8, 0, 4, 0]),
            Err(StorageError::Collector(CollectorError::BadRecordHeader))
        );
        assert!(pool.is_idle());
    }
}
