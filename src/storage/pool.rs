//! Static stream buffer pool.
//!
//! A fixed arena of sector buffers cycled strictly as
//! `Free -> Alloc -> Full -> Writing -> Done -> Free`. Three circular
//! indices walk the arena:
//!
//! * `alloc` - next buffer handed to the collector
//! * `in_`   - next buffer the collector must hand back full
//! * `out`   - next buffer the writer takes to the device
//!
//! Buffers in `[out, in_)` are Full (the one at `out` may be Writing),
//! buffers in `[in_, alloc)` are Alloc, everything else is Free.

use serde::Serialize;

use crate::blockio::Sector;
use crate::config::{SECTOR_SIZE, SSW_GROUP, SSW_NUM_BUFS};
use crate::error::{CollectorError, Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BufferState {
    Free,
    Alloc,
    Full,
    Writing,
    Done,
}

/// Exclusive ownership of one Alloc buffer. Not `Clone`: giving it back
/// through [`BufferPool::submit_full`] is the ownership transfer.
#[derive(Debug, PartialEq, Eq)]
pub struct BufHandle {
    idx: usize,
}

impl BufHandle {
    pub fn index(&self) -> usize {
        self.idx
    }
}

/// Exclusive ownership of the one buffer being written to the device.
#[derive(Debug, PartialEq, Eq)]
pub struct WriteToken {
    idx: usize,
}

impl WriteToken {
    pub fn index(&self) -> usize {
        self.idx
    }
}

#[derive(Debug, Clone, Copy)]
struct StreamBuf {
    state: BufferState,
    data: Sector,
}

impl StreamBuf {
    const EMPTY: Self = Self {
        state: BufferState::Free,
        data: [0u8; SECTOR_SIZE],
    };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Buffers waiting for, or in, a device write.
    pub num_full: usize,
    /// High water mark of `num_full`.
    pub max_full: usize,
    /// Buffers held by the collector.
    pub num_alloc: usize,
    pub sectors_written: u64,
}

pub struct BufferPool<const N: usize = SSW_NUM_BUFS> {
    bufs: [StreamBuf; N],
    alloc: usize,
    in_: usize,
    out: usize,
    num_alloc: usize,
    num_full: usize,
    max_full: usize,
    sectors_written: u64,
}

impl<const N: usize> Default for BufferPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> BufferPool<N> {
    pub fn new() -> Self {
        Self {
            bufs: [StreamBuf::EMPTY; N],
            alloc: 0,
            in_: 0,
            out: 0,
            num_alloc: 0,
            num_full: 0,
            max_full: 0,
            sectors_written: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Hand out the buffer at `alloc`, zeroed. Fails with `PoolExhausted`
    /// when every buffer is outstanding; the producer has to wait for the
    /// writer to recycle one.
    pub fn allocate(&mut self) -> Result<BufHandle> {
        if self.num_alloc + self.num_full >= N {
            return Err(StorageError::PoolExhausted);
        }
        let idx = self.alloc;
        let buf = &mut self.bufs[idx];
        debug_assert_eq!(buf.state, BufferState::Free);
        buf.state = BufferState::Alloc;
        buf.data = [0u8; SECTOR_SIZE];
        self.alloc = (idx + 1) % N;
        self.num_alloc += 1;
        Ok(BufHandle { idx })
    }

    pub fn buffer(&self, h: &BufHandle) -> &Sector {
        &self.bufs[h.idx].data
    }

    pub fn buffer_mut(&mut self, h: &BufHandle) -> &mut Sector {
        &mut self.bufs[h.idx].data
    }

    /// Return a filled buffer. Buffers come back in allocation order or
    /// not at all.
    pub fn submit_full(&mut self, h: BufHandle) -> core::result::Result<(), CollectorError> {
        if self.num_alloc == 0 || h.idx != self.in_ {
            return Err(CollectorError::OutOfOrderSubmit {
                expected: self.in_,
                got: h.idx,
            });
        }
        self.bufs[h.idx].state = BufferState::Full;
        self.in_ = (self.in_ + 1) % N;
        self.num_alloc -= 1;
        self.num_full += 1;
        self.max_full = self.max_full.max(self.num_full);
        Ok(())
    }

    /// Enough full buffers are queued to make a write burst worthwhile.
    pub fn should_kick(&self) -> bool {
        self.num_full >= SSW_GROUP.min(N)
    }

    pub fn has_full(&self) -> bool {
        self.num_full > 0
    }

    /// Take the buffer at `out` for writing. Only one buffer is ever in
    /// flight; `None` when nothing is Full or a write is already underway.
    pub fn begin_write(&mut self) -> Option<WriteToken> {
        if self.num_full == 0 {
            return None;
        }
        let buf = &mut self.bufs[self.out];
        if buf.state != BufferState::Full {
            return None;
        }
        buf.state = BufferState::Writing;
        Some(WriteToken { idx: self.out })
    }

    pub fn sector(&self, t: &WriteToken) -> &Sector {
        &self.bufs[t.idx].data
    }

    /// The device accepted the sector: Writing -> Done. The buffer stays
    /// out of circulation until [`recycle`](Self::recycle).
    pub fn complete_write(&mut self, t: WriteToken) {
        self.bufs[t.idx].state = BufferState::Done;
        self.sectors_written += 1;
    }

    /// Done -> Free for the buffer at `out`. Returns false when there is
    /// nothing to recycle.
    pub fn recycle(&mut self) -> bool {
        let buf = &mut self.bufs[self.out];
        if self.num_full == 0 || buf.state != BufferState::Done {
            return false;
        }
        buf.state = BufferState::Free;
        self.out = (self.out + 1) % N;
        self.num_full -= 1;
        true
    }

    /// Put an in-flight buffer back to Full so the write can be retried.
    pub fn abort_write(&mut self, t: WriteToken) {
        self.bufs[t.idx].state = BufferState::Full;
    }

    pub fn state(&self, idx: usize) -> BufferState {
        self.bufs[idx].state
    }

    pub fn indices(&self) -> (usize, usize, usize) {
        (self.out, self.in_, self.alloc)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            num_full: self.num_full,
            max_full: self.max_full,
            num_alloc: self.num_alloc,
            sectors_written: self.sectors_written,
        }
    }

    /// Nothing allocated, nothing waiting for the device.
    pub fn is_idle(&self) -> bool {
        self.num_alloc == 0 && self.num_full == 0
    }

    /// `out <= in_ <= alloc` circularly, with every buffer in the state
    /// its position implies.
    pub fn check_invariant(&self) -> bool {
        if self.num_full + self.num_alloc > N {
            return false;
        }
        if (self.out + self.num_full) % N != self.in_
            || (self.in_ + self.num_alloc) % N != self.alloc
        {
            return false;
        }
        (0..N).all(|k| {
            let idx = (self.out + k) % N;
            let st = self.bufs[idx].state;
            if k < self.num_full {
                st == BufferState::Full
                    || (k == 0 && matches!(st, BufferState::Writing | BufferState::Done))
            } else if k < self.num_full + self.num_alloc {
                st == BufferState::Alloc
            } else {
                st == BufferState::Free
            }
        })
    }
}
