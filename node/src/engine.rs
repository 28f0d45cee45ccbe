// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! A running node: one medium, its DMA engine and the tasks around it.

use tagstore::dblk::find_last_sync;
use tagstore::format::FormatPlan;
use tagstore::image::{ImageDirectory, ImageInfo, ImageVersion};
use tagstore::panic::{Panic0, PanicInfo};
use tagstore::record::{DType, Record};
use tagstore::{Area, AreaKind, Locator, Mount, StorageError};
use tagstore_persistence::{create_image, FileDisk};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::NodeConfig;
use crate::dma::{Device, DmaEngine, DmaHandle, Hardware};
use crate::errors::NodeResult;
use crate::reader::ReadService;
use crate::sync::SyncScheduler;
use crate::writer::StreamWriter;

pub struct Node {
    locator: Locator,
    dblk: Area,
    writer: StreamWriter,
    reader: ReadService,
    dma: DmaHandle,
    tasks: Vec<JoinHandle<()>>,
    engine: JoinHandle<Hardware>,
}

impl Node {
    /// Open the image named by the config, creating and formatting it
    /// first when it does not exist.
    pub async fn open(cfg: &NodeConfig) -> NodeResult<Self> {
        if !cfg.image_path.exists() {
            info!(path = ?cfg.image_path, blocks = cfg.image_blocks, "creating image");
            create_image(&cfg.image_path, cfg.image_blocks, &FormatPlan::default())?;
        }
        let disk = FileDisk::open(&cfg.image_path)?;
        if disk.is_read_only() {
            warn!(path = ?cfg.image_path, "image is read only, the first flush will crash the writer");
        }
        Self::start(cfg, Box::new(disk)).await
    }

    /// Mount `dev` and start the engine, drain, sync and read tasks. The
    /// reboot record is the first thing appended.
    pub async fn start(cfg: &NodeConfig, mut dev: Device) -> NodeResult<Self> {
        let mount = Mount::probe(&mut dev)?;
        let dblk = mount.locator.area(AreaKind::Dblk);
        info!(
            dblk_start = dblk.start,
            dblk_end = dblk.end,
            dblk_nxt = mount.dblk_nxt,
            active = ?mount.images.active().map(|v| v.to_string()),
            "node mounted medium"
        );

        let locator = mount.locator;
        let hw = Hardware {
            dev,
            panic: mount.panic,
            images: mount.images,
        };
        let (dma, engine) = DmaEngine::spawn(hw, cfg.dma_queue_depth, cfg.dma_timeout());
        let (writer, drain) = StreamWriter::start(
            dma.clone(),
            dblk,
            mount.dblk_nxt,
            cfg.write_retries,
            cfg.sync_max_sectors,
        );
        let (reader, reads) = ReadService::spawn(dma.clone(), locator, cfg.reader_queue_depth);
        let mut node = Self {
            locator,
            dblk,
            writer,
            reader,
            dma,
            tasks: vec![drain, reads],
            engine,
        };

        let reboot = Record::reboot(node.writer.stamp(), cfg.boot_count);
        node.writer.append_raw(reboot.as_bytes()).await?;
        let sync = SyncScheduler::spawn(node.writer.clone(), cfg.sync_period(), cfg.sync_max_sectors);
        node.tasks.push(sync);
        Ok(node)
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn writer(&self) -> &StreamWriter {
        &self.writer
    }

    pub fn reader(&self) -> &ReadService {
        &self.reader
    }

    pub async fn append_record(&self, dtype: DType, payload: &[u8]) -> NodeResult<()> {
        self.writer.append_record(dtype, payload).await
    }

    pub async fn flush(&self) -> NodeResult<()> {
        self.writer.flush().await
    }

    /// Byte offset in the Data area of the newest sync or reboot record
    /// already on the medium.
    pub async fn last_sync(&self) -> NodeResult<Option<u64>> {
        let dblk = self.dblk;
        let nxt = self.writer.stats().await.dblk_nxt;
        let found = self
            .dma
            .run(move |hw| find_last_sync(&mut hw.dev, dblk, nxt))
            .await?
            .map_err(StorageError::from)?;
        Ok(found)
    }

    pub async fn panic_header(&self) -> NodeResult<Panic0> {
        self.dma.run(|hw| hw.panic.header()).await
    }

    /// Record a panic raised outside the storage path.
    pub async fn record_panic(&self, info: PanicInfo) -> NodeResult<u32> {
        self.dma.record_panic(info).await
    }

    pub async fn query_directory(&self) -> NodeResult<ImageDirectory> {
        self.dma.run(|hw| hw.images.query_directory()).await
    }

    /// Install a complete image. A failed write releases the slot again.
    pub async fn install_image(&self, version: ImageVersion, bytes: Vec<u8>) -> NodeResult<ImageInfo> {
        let info = self
            .dma
            .run(move |hw| {
                let mut handle = hw.images.begin_install(&mut hw.dev, version)?;
                if let Err(e) = hw.images.write_image(&mut hw.dev, &mut handle, &bytes) {
                    hw.images.abort_install(&mut hw.dev, handle)?;
                    return Err(e);
                }
                hw.images.finish_install(&mut hw.dev, handle)
            })
            .await??;
        Ok(info)
    }

    pub async fn activate(&self, version: ImageVersion) -> NodeResult<()> {
        self.dma.run(move |hw| hw.images.activate(&mut hw.dev, version)).await??;
        Ok(())
    }

    pub async fn eject(&self, version: ImageVersion) -> NodeResult<()> {
        self.dma.run(move |hw| hw.images.eject(&mut hw.dev, version)).await??;
        Ok(())
    }

    pub async fn delete_image(&self, version: ImageVersion) -> NodeResult<()> {
        self.dma.run(move |hw| hw.images.delete(&mut hw.dev, version)).await??;
        Ok(())
    }

    pub async fn read_image(&self, version: ImageVersion) -> NodeResult<Vec<u8>> {
        let bytes = self
            .dma
            .run(move |hw| hw.images.read_image(&mut hw.dev, version))
            .await??;
        Ok(bytes)
    }

    /// Flush, stop every task and hand the device back.
    pub async fn shutdown(self) -> NodeResult<Device> {
        let Node {
            writer,
            reader,
            dma,
            tasks,
            engine,
            ..
        } = self;

        if writer.is_crashed().await {
            warn!("writer crashed, closing without flush");
        } else if let Err(e) = writer.flush().await {
            error!("flush on shutdown failed: {}", e);
        }
        let stats = writer.stats().await;

        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            // cancelled tasks report a JoinError
            let _ = task.await;
        }
        drop(reader);
        drop(dma);

        let hw = engine.await?;
        info!(dblk_nxt = stats.dblk_nxt, records = stats.records, "node shut down");
        Ok(hw.dev)
    }
}
