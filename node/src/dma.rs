// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! DMA engine task.
//!
//! One blocking task owns the block device, the panic log and the image
//! manager, and serves requests strictly one at a time. Block transfers
//! complete through a oneshot reply that the requester awaits under
//! `dma_timeout`; an elapsed timeout surfaces as the matching I/O error.

use std::time::Duration;

use tagstore::blockio::{BlockDevice, Sector};
use tagstore::config::SECTOR_SIZE;
use tagstore::error::IoError;
use tagstore::image::ImageManager;
use tagstore::panic::{PanicInfo, PanicLog};
use tagstore::StorageError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::{NodeError, NodeResult};

pub type Device = Box<dyn BlockDevice + Send>;

/// State that only the engine task touches.
pub struct Hardware {
    pub dev: Device,
    pub panic: PanicLog,
    pub images: ImageManager,
}

type Job = Box<dyn FnOnce(&mut Hardware) + Send>;

enum DmaRequest {
    Write {
        blk: u32,
        sector: Box<Sector>,
        reply: oneshot::Sender<Result<(), IoError>>,
    },
    Read {
        blk: u32,
        reply: oneshot::Sender<Result<Box<Sector>, IoError>>,
    },
    Run(Job),
}

pub struct DmaEngine;

impl DmaEngine {
    /// Start the engine. The join handle yields the hardware back once
    /// every [`DmaHandle`] has been dropped.
    pub fn spawn(hw: Hardware, depth: usize, dma_timeout: Duration) -> (DmaHandle, JoinHandle<Hardware>) {
        let (tx, mut rx) = mpsc::channel(depth.max(1));
        let engine = tokio::task::spawn_blocking(move || {
            let mut hw = hw;
            while let Some(req) = rx.blocking_recv() {
                serve(&mut hw, req);
            }
            debug!("dma engine stopped");
            hw
        });
        (DmaHandle { tx, dma_timeout }, engine)
    }
}

fn serve(hw: &mut Hardware, req: DmaRequest) {
    // a send error means the requester timed out and went away
    match req {
        DmaRequest::Write { blk, sector, reply } => {
            let _ = reply.send(hw.dev.write_block(blk, &sector));
        }
        DmaRequest::Read { blk, reply } => {
            let mut buf = Box::new([0u8; SECTOR_SIZE]);
            let result = hw.dev.read_block(blk, &mut buf).map(|_| buf);
            let _ = reply.send(result);
        }
        DmaRequest::Run(job) => job(hw),
    }
}

#[derive(Clone)]
pub struct DmaHandle {
    tx: mpsc::Sender<DmaRequest>,
    dma_timeout: Duration,
}

impl DmaHandle {
    pub async fn write_block(&self, blk: u32, sector: Box<Sector>) -> Result<(), IoError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DmaRequest::Write { blk, sector, reply })
            .await
            .map_err(|_| IoError::WriteFail)?;
        match timeout(self.dma_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(IoError::WriteFail),
            Err(_) => {
                warn!(blk, "dma write timed out");
                Err(IoError::WriteFail)
            }
        }
    }

    pub async fn read_block(&self, blk: u32) -> Result<Box<Sector>, IoError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DmaRequest::Read { blk, reply })
            .await
            .map_err(|_| IoError::ReadFail)?;
        match timeout(self.dma_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(IoError::ReadFail),
            Err(_) => {
                warn!(blk, "dma read timed out");
                Err(IoError::ReadFail)
            }
        }
    }

    /// Run `f` on the engine task with exclusive access to the hardware.
    /// Not subject to the DMA timeout.
    pub async fn run<R, F>(&self, f: F) -> NodeResult<R>
    where
        F: FnOnce(&mut Hardware) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Job = Box::new(move |hw| {
            let _ = reply.send(f(hw));
        });
        self.tx
            .send(DmaRequest::Run(job))
            .await
            .map_err(|_| NodeError::ChannelClosed)?;
        rx.await.map_err(|_| NodeError::ChannelClosed)
    }

    pub async fn record_panic(&self, info: PanicInfo) -> NodeResult<u32> {
        let blk = self
            .run(move |hw| hw.panic.record_panic(&mut hw.dev, &info))
            .await?
            .map_err(StorageError::from)?;
        Ok(blk)
    }
}
