// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Open storage device.
//!
//! [`StorageDevice`] is the whole engine for one medium: the validated
//! locator, the buffer pool and collector feeding the Data area, the
//! stream reader, the panic log and the image manager. It is built by
//! [`StorageDevice::open`] and torn down by [`StorageDevice::close`];
//! nothing lives in globals.

use alloc::string::ToString;
use alloc::vec::Vec;

use tracing::{debug, error, info, warn};

use crate::blockio::{read_sector, BlockDevice};
use crate::config::{DeviceConfig, FS_LOC_SECTOR, SYNC_MAX_SECTORS};
use crate::dblk::{find_dblk_nxt, find_last_sync, DblkDir};
use crate::error::{IntegrityError, IoError, ReadError, Result, StorageError};
use crate::image::{ImageDirectory, ImageInfo, ImageManager, ImageVersion, SlotHandle};
use crate::locator::{Area, AreaKind, Locator};
use crate::panic::{pcode, PanicInfo, PanicLog};
use crate::reader::{self, ReadCompletion, ReadRequest, StreamReader};
use crate::record::{DType, Record};
use crate::storage::{BufferPool, Collector, PoolStats, WriteToken};

/// Where a stream storage panic was raised.
pub mod panic_where {
    pub const WRITE_RETRIES: u8 = 1;
    pub const AREA_FULL: u8 = 2;
}

/// Everything found on a medium before any write happens.
pub struct Mount {
    pub locator: Locator,
    pub panic: PanicLog,
    pub dblk_dir: DblkDir,
    pub dblk_nxt: u32,
    pub images: ImageManager,
}

impl Mount {
    /// Read-only discovery: locator, panic log, data area resume point and
    /// image directory. Corrupt structures are reported, never repaired.
    pub fn probe<D: BlockDevice + ?Sized>(dev: &mut D) -> Result<Self> {
        let sector0 = read_sector(dev, FS_LOC_SECTOR)?;
        let locator = Locator::load(&sector0)?;

        let dblk_area = locator.area(AreaKind::Dblk);
        let dblk_dir = DblkDir::decode(&read_sector(dev, dblk_area.start)?)?;
        if dblk_dir.low != dblk_area.start || dblk_dir.high != dblk_area.end {
            return Err(IntegrityError::BadValue.into());
        }
        let dblk_nxt = find_dblk_nxt(dev, dblk_area)?;
        let panic = PanicLog::open(dev, locator.area(AreaKind::Panic));
        let images = ImageManager::load(dev, locator.area(AreaKind::Image))?;

        Ok(Self {
            locator,
            panic,
            dblk_dir,
            dblk_nxt,
            images,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStats {
    pub pool: PoolStats,
    pub dblk_nxt: u32,
    pub seq: u16,
    pub records: u64,
    pub write_retries: u64,
    pub sectors_since_sync: u32,
}

pub struct StorageDevice<D: BlockDevice> {
    dev: D,
    cfg: DeviceConfig,
    locator: Locator,
    dblk: Area,
    dblk_nxt: u32,
    pool: BufferPool,
    collector: Collector,
    reader: StreamReader,
    panic: PanicLog,
    images: ImageManager,
    crashed: bool,
    sectors_since_sync: u32,
    write_retries: u64,
    /// A write that only went through after retries, not yet logged.
    pending_warning: Option<[u32; 4]>,
}

impl<D: BlockDevice> StorageDevice<D> {
    /// Mount `dev` and start a new stream session. The sequence counter
    /// restarts at zero and a reboot record goes in first.
    pub fn open(mut dev: D, cfg: DeviceConfig) -> Result<Self> {
        let mount = Mount::probe(&mut dev)?;
        let dblk = mount.locator.area(AreaKind::Dblk);
        info!(
            dblk_start = dblk.start,
            dblk_end = dblk.end,
            dblk_nxt = mount.dblk_nxt,
            active = ?mount.images.active().map(|v| v.to_string()),
            "storage device opened"
        );
        if mount.dblk_nxt > dblk.end {
            warn!("data area is full, writes will fail");
        }

        let mut sd = Self {
            dev,
            cfg,
            locator: mount.locator,
            dblk,
            dblk_nxt: mount.dblk_nxt,
            pool: BufferPool::new(),
            collector: Collector::new(),
            reader: StreamReader::default(),
            panic: mount.panic,
            images: mount.images,
            crashed: false,
            sectors_since_sync: 0,
            write_retries: 0,
            pending_warning: None,
        };
        let reboot = Record::reboot(cfg.boot_stamp, cfg.boot_count);
        sd.append_raw(reboot.as_bytes())?;
        Ok(sd)
    }

    /// The underlying block device, e.g. for fault injection.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            pool: self.pool.stats(),
            dblk_nxt: self.dblk_nxt,
            seq: self.collector.seq(),
            records: self.collector.records(),
            write_retries: self.write_retries,
            sectors_since_sync: self.sectors_since_sync,
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.crashed {
            return Err(StorageError::Crashed);
        }
        Ok(())
    }

    /// Producer entry point.
    pub fn append_record(&mut self, dtype: DType, payload: &[u8]) -> Result<()> {
        let rec = Record::new(dtype, payload)?;
        self.append_raw(rec.as_bytes())
    }

    /// Append an already encoded record. When the pool is exhausted the
    /// pending writes are pushed out first, then the append is retried.
    pub fn append_raw(&mut self, rec: &[u8]) -> Result<()> {
        self.ensure_running()?;
        self.log_pending_warning()?;
        match self.collector.append(&mut self.pool, rec) {
            Err(StorageError::PoolExhausted) => {
                debug!("stream buffers exhausted, draining");
                self.service_writes()?;
                self.collector.append(&mut self.pool, rec)?;
            }
            other => other?,
        }
        if self.pool.should_kick() {
            self.service_writes()?;
        }
        Ok(())
    }

    /// Write a sync record. Resets the sectors-since-sync count.
    pub fn write_sync(&mut self, stamp: u32) -> Result<()> {
        self.append_raw(Record::sync(stamp).as_bytes())?;
        self.sectors_since_sync = 0;
        Ok(())
    }

    pub fn sectors_since_sync(&self) -> u32 {
        self.sectors_since_sync
    }

    /// Sector count part of the sync policy.
    pub fn sync_due(&self) -> bool {
        self.sectors_since_sync >= SYNC_MAX_SECTORS
    }

    /// Move every Full buffer to the medium, oldest first. Returns the
    /// number of sectors written.
    pub fn service_writes(&mut self) -> Result<usize> {
        self.ensure_running()?;
        let mut written = 0;
        while let Some(token) = self.pool.begin_write() {
            self.write_one(token)?;
            written += 1;
        }
        Ok(written)
    }

    fn write_one(&mut self, token: WriteToken) -> Result<()> {
        let blk = self.dblk_nxt;
        if blk > self.dblk.end {
            self.pool.abort_write(token);
            self.crash(panic_where::AREA_FULL, [blk, self.dblk.end, 0, 0]);
            return Err(StorageError::AreaFull);
        }

        let attempts = 1 + self.cfg.write_retries as u32;
        let mut last = IoError::WriteFail;
        for attempt in 0..attempts {
            match self.dev.write_block(blk, self.pool.sector(&token)) {
                Ok(()) => {
                    self.pool.complete_write(token);
                    self.pool.recycle();
                    self.dblk_nxt += 1;
                    self.sectors_since_sync += 1;
                    if attempt > 0 {
                        self.pending_warning = Some([blk, last as u32, attempt, 0]);
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(blk, attempt, "sector write failed: {}", e);
                    self.write_retries += 1;
                    last = e;
                }
            }
        }
        self.pool.abort_write(token);
        self.crash(panic_where::WRITE_RETRIES, [blk, last as u32, attempts, 0]);
        Err(StorageError::Crashed)
    }

    /// Record the fatal condition and stop accepting writes.
    fn crash(&mut self, where_: u8, args: [u32; 4]) {
        error!(where_, ?args, "stream storage crashed");
        let info = PanicInfo::new(pcode::SS, where_, args, self.cfg.boot_stamp);
        if let Err(e) = self.panic.record_panic(&mut self.dev, &info) {
            error!("could not record panic: {}", e);
        }
        self.crashed = true;
    }

    /// Queue an Event record for a write that needed retries. Called
    /// after `service_writes` has drained the pool, so a buffer is free.
    fn log_pending_warning(&mut self) -> Result<()> {
        if let Some(args) = self.pending_warning.take() {
            let rec = Record::panic_warning(self.cfg.boot_stamp, pcode::SS, panic_where::WRITE_RETRIES, args);
            self.collector.append(&mut self.pool, rec.as_bytes())?;
        }
        Ok(())
    }

    /// Close the partial sector and push everything out, including any
    /// retry warning raised while doing so.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_running()?;
        loop {
            self.log_pending_warning()?;
            self.collector.flush(&mut self.pool)?;
            self.service_writes()?;
            if self.pending_warning.is_none() {
                return Ok(());
            }
        }
    }

    /// Flush and hand the block device back.
    pub fn close(mut self) -> Result<D> {
        if !self.crashed {
            self.flush()?;
        }
        info!(dblk_nxt = self.dblk_nxt, "storage device closed");
        Ok(self.dev)
    }

    /// Byte offset in the Data area of the newest sync/reboot record on disk.
    pub fn last_sync(&mut self) -> Result<Option<u64>> {
        Ok(find_last_sync(&mut self.dev, self.dblk, self.dblk_nxt)?)
    }

    pub fn dblk_nxt(&self) -> u32 {
        self.dblk_nxt
    }

    // ---- reads ----

    pub fn read_range(&mut self, kind: AreaKind, byte_offset: u64, len: usize) -> core::result::Result<Vec<u8>, ReadError> {
        reader::read_range(&mut self.dev, self.locator.area(kind), byte_offset, len)
    }

    pub fn submit_read(&mut self, req: ReadRequest) -> core::result::Result<(), ReadError> {
        self.reader.submit(req)
    }

    pub fn service_reads(&mut self) -> Vec<ReadCompletion> {
        self.reader.service_all(&mut self.dev)
    }

    // ---- panic log ----

    pub fn panic_log(&self) -> &PanicLog {
        &self.panic
    }

    /// Record a panic raised elsewhere in the firmware.
    pub fn record_panic(&mut self, info: &PanicInfo) -> Result<u32> {
        Ok(self.panic.record_panic(&mut self.dev, info)?)
    }

    // ---- images ----

    pub fn query_directory(&self) -> ImageDirectory {
        self.images.query_directory()
    }

    pub fn begin_install(&mut self, version: ImageVersion) -> Result<SlotHandle> {
        self.images.begin_install(&mut self.dev, version)
    }

    pub fn write_image(&mut self, handle: &mut SlotHandle, bytes: &[u8]) -> Result<()> {
        self.images.write_image(&mut self.dev, handle, bytes)
    }

    pub fn finish_install(&mut self, handle: SlotHandle) -> Result<ImageInfo> {
        self.images.finish_install(&mut self.dev, handle)
    }

    pub fn abort_install(&mut self, handle: SlotHandle) -> Result<()> {
        self.images.abort_install(&mut self.dev, handle)
    }

    pub fn activate(&mut self, version: ImageVersion) -> Result<()> {
        self.images.activate(&mut self.dev, version)
    }

    pub fn eject(&mut self, version: ImageVersion) -> Result<()> {
        self.images.eject(&mut self.dev, version)
    }

    pub fn images(&self) -> &ImageManager {
        &self.images
    }
}
