// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::writer::StreamWriter;

/// Emits a sync record every `period`, or sooner once `max_sectors`
/// sectors have gone out since the previous one.
pub struct SyncScheduler;

impl SyncScheduler {
    pub fn spawn(writer: StreamWriter, period: Duration, max_sectors: u32) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick is immediate
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => debug!("sync period elapsed"),
                    _ = writer.sync_due() => {
                        // stale wakeup from before the last sync
                        if writer.stats().await.sectors_since_sync < max_sectors {
                            continue;
                        }
                        debug!(max_sectors, "sector budget reached");
                    }
                }
                if let Err(e) = writer.write_sync(writer.stamp()).await {
                    warn!("sync record not written: {}", e);
                    break;
                }
                ticker.reset();
            }
        })
    }
}
