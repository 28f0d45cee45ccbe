#![allow(dead_code)]
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tagstore::blockio::{BlockDevice, RamDisk, Sector};
use tagstore::error::IoError;
use tagstore::format::{format_device, FormatPlan};
use tagstore::Locator;
use tagstore_node::NodeConfig;

/// RAM medium shared between the node under test and the test body, with
/// an optional per-access delay standing in for a slow card.
#[derive(Clone)]
pub struct SharedDisk {
    disk: Arc<Mutex<RamDisk>>,
    delay: Arc<Mutex<Duration>>,
}

impl SharedDisk {
    pub fn formatted(dblk_blocks: u32) -> (Self, Locator) {
        let plan = FormatPlan::default();
        let mut disk = RamDisk::new(plan.min_blocks() - 2 + dblk_blocks);
        let loc = format_device(&mut disk, &plan).unwrap();
        let shared = Self {
            disk: Arc::new(Mutex::new(disk)),
            delay: Arc::new(Mutex::new(Duration::ZERO)),
        };
        (shared, loc)
    }

    pub fn lock(&self) -> MutexGuard<'_, RamDisk> {
        self.disk.lock().unwrap()
    }

    pub fn set_delay(&self, d: Duration) {
        *self.delay.lock().unwrap() = d;
    }

    pub fn boxed(&self) -> Box<dyn BlockDevice + Send> {
        Box::new(self.clone())
    }

    fn pause(&self) {
        let d = *self.delay.lock().unwrap();
        if !d.is_zero() {
            std::thread::sleep(d);
        }
    }
}

impl BlockDevice for SharedDisk {
    fn read_block(&mut self, blk: u32, buf: &mut Sector) -> Result<(), IoError> {
        self.pause();
        self.lock().read_block(blk, buf)
    }

    fn write_block(&mut self, blk: u32, buf: &Sector) -> Result<(), IoError> {
        self.pause();
        self.lock().write_block(blk, buf)
    }

    fn num_blocks(&self) -> u32 {
        self.lock().num_blocks()
    }
}

/// Config with the period trigger out of the way.
pub fn test_config() -> NodeConfig {
    NodeConfig {
        write_retries: 2,
        dma_timeout_ms: 500,
        sync_period_secs: 3600,
        ..NodeConfig::default()
    }
}
