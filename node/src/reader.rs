// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use tagstore::blockio::Sector;
use tagstore::config::SECTOR_SIZE;
use tagstore::error::ReadError;
use tagstore::reader::{span, ClientId};
use tagstore::{AreaKind, Locator};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::dma::DmaHandle;
use crate::errors::{NodeError, NodeResult};

type ReadReply = oneshot::Receiver<Result<Box<Sector>, ReadError>>;

struct ReadJob {
    client: ClientId,
    blk: u32,
    reply: oneshot::Sender<Result<Box<Sector>, ReadError>>,
}

/// Bounded FIFO of block reads, serviced one at a time in submission
/// order. Read failures go back to the client only.
#[derive(Clone)]
pub struct ReadService {
    tx: mpsc::Sender<ReadJob>,
    locator: Locator,
}

impl ReadService {
    pub fn spawn(dma: DmaHandle, locator: Locator, depth: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ReadJob>(depth.max(1));
        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = dma.read_block(job.blk).await.map_err(ReadError::from);
                if let Err(e) = &result {
                    debug!(client = job.client, blk = job.blk, "read failed: {}", e);
                }
                let _ = job.reply.send(result);
            }
        });
        (Self { tx, locator }, task)
    }

    /// Queue a read without waiting. `QueueFull` when the FIFO is at depth.
    pub fn submit(&self, client: ClientId, blk: u32) -> NodeResult<ReadReply> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(ReadJob { client, blk, reply })
            .map_err(|e| match e {
                TrySendError::Full(_) => NodeError::Read(ReadError::QueueFull),
                TrySendError::Closed(_) => NodeError::ChannelClosed,
            })?;
        Ok(rx)
    }

    pub async fn read_block(&self, client: ClientId, blk: u32) -> NodeResult<Box<Sector>> {
        let rx = self.submit(client, blk)?;
        let sector = rx.await.map_err(|_| NodeError::ChannelClosed)??;
        Ok(sector)
    }

    /// `len` bytes at `byte_offset` inside the area `kind`.
    pub async fn read_range(&self, client: ClientId, kind: AreaKind, byte_offset: u64, len: usize) -> NodeResult<Vec<u8>> {
        let (blocks, mut skip) = span(self.locator.area(kind), byte_offset, len)?;
        let mut out = Vec::with_capacity(len);
        for blk in blocks {
            let sec = self.read_block(client, blk).await?;
            let take = (len - out.len()).min(SECTOR_SIZE - skip);
            out.extend_from_slice(&sec[skip..skip + take]);
            skip = 0;
        }
        Ok(out)
    }
}
