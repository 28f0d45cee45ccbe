// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Laying down a fresh medium.
//!
//! ```text
//! 0          boot sector: locator at 0x140, 0x55aa at 510
//! 2          Panic0
//! 8..        Panic | Config | Image (dir + 4 slots) | Dblk (dir + records)
//! ```

use tracing::info;

use crate::blockio::BlockDevice;
use crate::config::{
    BOOT_SIG, BOOT_SIG_OFFSET, FS_LOC_SECTOR, IMAGE_AREA_BLOCKS, PANIC0_SECTOR, SECTOR_SIZE,
};
use crate::dblk::DblkDir;
use crate::error::{IntegrityError, Result};
use crate::image::ImageDirectory;
use crate::locator::{Area, AreaKind, Locator};
use crate::panic::Panic0;

/// Blocks at the front of the medium kept out of every area.
pub const RESERVED_BLOCKS: u32 = 8;

#[derive(Debug, Clone, Copy)]
pub struct FormatPlan {
    pub panic_blocks: u32,
    pub config_blocks: u32,
    /// Stamp stored in the Data area directory.
    pub incept: u64,
    /// Zero every record sector so the resume point search starts clean.
    pub erase_data: bool,
}

impl Default for FormatPlan {
    fn default() -> Self {
        Self {
            panic_blocks: 32,
            config_blocks: 8,
            incept: 0,
            erase_data: true,
        }
    }
}

impl FormatPlan {
    /// Area layout on a medium of `num_blocks`. The Data area takes what
    /// is left after the fixed areas and needs room for at least one
    /// record sector.
    pub fn layout(&self, num_blocks: u32) -> core::result::Result<Locator, IntegrityError> {
        if self.panic_blocks == 0 || self.config_blocks == 0 {
            return Err(IntegrityError::BadValue);
        }
        let panic = Area::new(RESERVED_BLOCKS, RESERVED_BLOCKS + self.panic_blocks - 1);
        let config = Area::new(panic.end + 1, panic.end + self.config_blocks);
        let image = Area::new(config.end + 1, config.end + IMAGE_AREA_BLOCKS);
        let dblk_start = image.end + 1;
        if num_blocks < dblk_start + 2 {
            return Err(IntegrityError::BadValue);
        }
        Locator::new(panic, config, image, Area::new(dblk_start, num_blocks - 1))
    }

    /// Smallest medium this plan fits on.
    pub fn min_blocks(&self) -> u32 {
        RESERVED_BLOCKS + self.panic_blocks + self.config_blocks + IMAGE_AREA_BLOCKS + 2
    }
}

/// Write boot sector, Panic0 and empty directories.
pub fn format_device<D: BlockDevice + ?Sized>(dev: &mut D, plan: &FormatPlan) -> Result<Locator> {
    let loc = plan.layout(dev.num_blocks())?;

    let mut boot = [0u8; SECTOR_SIZE];
    loc.install(&mut boot);
    boot[BOOT_SIG_OFFSET..BOOT_SIG_OFFSET + 2].copy_from_slice(&BOOT_SIG.to_le_bytes());
    dev.write_block(FS_LOC_SECTOR, &boot)?;

    dev.write_block(PANIC0_SECTOR, &Panic0::new(loc.area(AreaKind::Panic)).to_sector())?;

    let image = loc.area(AreaKind::Image);
    dev.write_block(image.start, &ImageDirectory::empty(image).to_sector())?;

    let dblk = loc.area(AreaKind::Dblk);
    dev.write_block(dblk.start, &DblkDir::new(dblk, plan.incept).to_sector())?;
    if plan.erase_data {
        let zero = [0u8; SECTOR_SIZE];
        for blk in dblk.start + 1..=dblk.end {
            dev.write_block(blk, &zero)?;
        }
    }

    info!(
        panic = ?loc.area(AreaKind::Panic),
        image = ?image,
        dblk = ?dblk,
        "medium formatted"
    );
    Ok(loc)
}
