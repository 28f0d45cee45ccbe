// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Async stream writer.
//!
//! Producers fill sectors through the shared collector; a drain task moves
//! Full buffers to the Data area through the DMA engine. A producer that
//! finds the pool exhausted parks on `space` until the drain frees a
//! buffer or the writer faults.

use std::sync::Arc;
use std::time::Instant;

use tagstore::blockio::Sector;
use tagstore::device::panic_where;
use tagstore::error::IoError;
use tagstore::panic::{pcode, PanicInfo};
use tagstore::record::{DType, Record};
use tagstore::storage::{BufferPool, Collector, PoolStats};
use tagstore::{Area, StorageError};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::dma::DmaHandle;
use crate::errors::NodeResult;
use crate::telemetry::{MAX_FULL_BUFFERS, RECORDS_APPENDED, SECTORS_WRITTEN, SYNC_RECORDS, WRITE_RETRIES};

struct WriterState {
    pool: BufferPool,
    collector: Collector,
    dblk: Area,
    dblk_nxt: u32,
    sectors_since_sync: u32,
    /// Latched on the first fatal write error.
    fault: Option<StorageError>,
}

struct Shared {
    state: Mutex<WriterState>,
    /// A buffer went back to Free, or the writer faulted.
    space: Notify,
    /// Full buffers are waiting.
    kick: Notify,
    /// The drain ran out of work.
    idle: Notify,
    sync_due: Notify,
    started: Instant,
}

impl Shared {
    /// Binary milliseconds since the writer started.
    fn stamp(&self) -> u32 {
        (self.started.elapsed().as_millis() * 1024 / 1000) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterStats {
    pub pool: PoolStats,
    pub dblk_nxt: u32,
    pub seq: u16,
    pub records: u64,
    pub sectors_since_sync: u32,
    pub fault: Option<StorageError>,
}

#[derive(Clone)]
pub struct StreamWriter {
    shared: Arc<Shared>,
}

impl StreamWriter {
    /// Spawn the drain task for the Data area `dblk`, resuming at `dblk_nxt`.
    pub fn start(
        dma: DmaHandle,
        dblk: Area,
        dblk_nxt: u32,
        write_retries: u8,
        sync_max_sectors: u32,
    ) -> (Self, JoinHandle<()>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(WriterState {
                pool: BufferPool::new(),
                collector: Collector::new(),
                dblk,
                dblk_nxt,
                sectors_since_sync: 0,
                fault: None,
            }),
            space: Notify::new(),
            kick: Notify::new(),
            idle: Notify::new(),
            sync_due: Notify::new(),
            started: Instant::now(),
        });
        let drain = tokio::spawn(drain(shared.clone(), dma, write_retries, sync_max_sectors));
        (Self { shared }, drain)
    }

    pub fn stamp(&self) -> u32 {
        self.shared.stamp()
    }

    pub async fn append_record(&self, dtype: DType, payload: &[u8]) -> NodeResult<()> {
        let rec = Record::new(dtype, payload).map_err(StorageError::from)?;
        self.append_raw(rec.as_bytes()).await
    }

    /// Append an encoded record, waiting for a free buffer if needed.
    pub async fn append_raw(&self, rec: &[u8]) -> NodeResult<()> {
        self.append_locked(rec, false).await
    }

    /// `restart_sync` zeroes the sectors-since-sync count under the same
    /// lock that accepted the record.
    async fn append_locked(&self, rec: &[u8], restart_sync: bool) -> NodeResult<()> {
        loop {
            let space = self.shared.space.notified();
            {
                let mut guard = self.shared.state.lock().await;
                let st = &mut *guard;
                if let Some(e) = st.fault {
                    return Err(e.into());
                }
                match st.collector.append(&mut st.pool, rec) {
                    Ok(()) => {
                        if restart_sync {
                            st.sectors_since_sync = 0;
                        }
                        metrics::counter!(RECORDS_APPENDED, 1);
                        if st.pool.should_kick() {
                            self.shared.kick.notify_one();
                        }
                        return Ok(());
                    }
                    Err(StorageError::PoolExhausted) => {
                        debug!("stream buffers exhausted, producer waiting");
                        self.shared.kick.notify_one();
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            space.await;
        }
    }

    pub async fn write_sync(&self, stamp: u32) -> NodeResult<()> {
        self.append_locked(Record::sync(stamp).as_bytes(), true).await?;
        metrics::counter!(SYNC_RECORDS, 1);
        Ok(())
    }

    /// Resolves when enough sectors went out since the last sync.
    pub async fn sync_due(&self) {
        self.shared.sync_due.notified().await
    }

    /// Close the partial sector and wait until nothing is Full.
    pub async fn flush(&self) -> NodeResult<()> {
        {
            let mut guard = self.shared.state.lock().await;
            let st = &mut *guard;
            if let Some(e) = st.fault {
                return Err(e.into());
            }
            st.collector.flush(&mut st.pool)?;
        }
        loop {
            let idle = self.shared.idle.notified();
            {
                let st = self.shared.state.lock().await;
                if let Some(e) = st.fault {
                    return Err(e.into());
                }
                if !st.pool.has_full() {
                    return Ok(());
                }
            }
            self.shared.kick.notify_one();
            idle.await;
        }
    }

    pub async fn stats(&self) -> WriterStats {
        let st = self.shared.state.lock().await;
        WriterStats {
            pool: st.pool.stats(),
            dblk_nxt: st.dblk_nxt,
            seq: st.collector.seq(),
            records: st.collector.records(),
            sectors_since_sync: st.sectors_since_sync,
            fault: st.fault,
        }
    }

    pub async fn is_crashed(&self) -> bool {
        self.shared.state.lock().await.fault.is_some()
    }
}

async fn drain(shared: Arc<Shared>, dma: DmaHandle, write_retries: u8, sync_max_sectors: u32) {
    loop {
        shared.kick.notified().await;
        loop {
            let (token, blk, sector) = {
                let mut st = shared.state.lock().await;
                if st.fault.is_some() {
                    break;
                }
                let blk = st.dblk_nxt;
                if blk > st.dblk.end && st.pool.has_full() {
                    st.fault = Some(StorageError::AreaFull);
                    let end = st.dblk.end;
                    drop(st);
                    crash(&shared, &dma, panic_where::AREA_FULL, [blk, end, 0, 0]).await;
                    break;
                }
                let Some(token) = st.pool.begin_write() else { break };
                let sector: Box<Sector> = Box::new(*st.pool.sector(&token));
                (token, blk, sector)
            };

            let result = write_with_retries(&dma, blk, sector, write_retries).await;

            let mut st = shared.state.lock().await;
            match result {
                Ok(failed) => {
                    st.pool.complete_write(token);
                    st.pool.recycle();
                    st.dblk_nxt += 1;
                    st.sectors_since_sync += 1;
                    metrics::counter!(SECTORS_WRITTEN, 1);
                    metrics::gauge!(MAX_FULL_BUFFERS, st.pool.stats().max_full as f64);
                    if st.sectors_since_sync >= sync_max_sectors {
                        shared.sync_due.notify_one();
                    }
                    if failed > 0 {
                        let args = [blk, IoError::WriteFail as u32, failed, 0];
                        let warning = Record::panic_warning(shared.stamp(), pcode::SS, panic_where::WRITE_RETRIES, args);
                        let inner = &mut *st;
                        if let Err(e) = inner.collector.append(&mut inner.pool, warning.as_bytes()) {
                            warn!("retry warning not logged: {}", e);
                        }
                    }
                    drop(st);
                    shared.space.notify_waiters();
                }
                Err(e) => {
                    st.pool.abort_write(token);
                    st.fault = Some(StorageError::Crashed);
                    drop(st);
                    let attempts = 1 + write_retries as u32;
                    crash(&shared, &dma, panic_where::WRITE_RETRIES, [blk, e as u32, attempts, 0]).await;
                    break;
                }
            }
        }
        shared.idle.notify_waiters();
    }
}

/// Returns how many attempts failed before the write went through.
async fn write_with_retries(dma: &DmaHandle, blk: u32, sector: Box<Sector>, write_retries: u8) -> Result<u32, IoError> {
    let mut last = IoError::WriteFail;
    for attempt in 0..=write_retries as u32 {
        match dma.write_block(blk, sector.clone()).await {
            Ok(()) => return Ok(attempt),
            Err(e) => {
                warn!(blk, attempt, "sector write failed: {}", e);
                metrics::counter!(WRITE_RETRIES, 1);
                last = e;
            }
        }
    }
    Err(last)
}

async fn crash(shared: &Shared, dma: &DmaHandle, where_: u8, args: [u32; 4]) {
    error!(where_, ?args, "stream storage crashed");
    let info = PanicInfo::new(pcode::SS, where_, args, shared.stamp());
    if let Err(e) = dma.record_panic(info).await {
        error!("could not record panic: {}", e);
    }
    shared.space.notify_waiters();
    shared.idle.notify_waiters();
}
