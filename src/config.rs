// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Layout constants and runtime knobs.
//!
//! Everything that ends up on the media is fixed here. The tag and the host
//! tools both depend on these values, so changing one is a format change.

/// Physical sector size of the SD/flash device.
pub const SECTOR_SIZE: usize = 512;

/// Boot sector holding the locator.
pub const FS_LOC_SECTOR: u32 = 0;
/// Byte offset of the locator inside the boot sector.
pub const FS_LOC_OFFSET: usize = 0x0140;
pub const FS_LOC_SIG: u32 = 0xdeed_beaf;
/// Number of locator slots carried on disk.
pub const MAX_FS_LOCATORS: usize = 8;
/// Number of locator slots actually in use (Panic, Config, Image, Dblk).
pub const FS_LOC_MAX: usize = 4;

/// Classic boot sector signature at offset 510.
pub const BOOT_SIG: u16 = 0xaa55;
pub const BOOT_SIG_OFFSET: usize = 510;

/// Well-known sector carrying the Panic0 header.
pub const PANIC0_SECTOR: u32 = 2;
pub const PANIC0_MAJIK: u32 = 0x2362_6223;
pub const PANIC_INFO_SIG: u32 = 0x4450_4f43;
pub const FUBAR_REALLY_REALLY_FUBARD: u32 = 0x0831_3108;

/// Stream storage buffers.
pub const SSW_NUM_BUFS: usize = 10;
/// Full buffers gathered before the writer is kicked.
pub const SSW_GROUP: usize = 4;

/// Data bytes in a collector sector; the last four bytes are the trailer.
pub const DC_BLK_SIZE: usize = 508;
pub const DC_SEQ_LOC: usize = 508;
pub const DC_CHKSUM_LOC: usize = 510;

/// Size of every typed record header (len, dtype, reserved).
pub const DT_HDR_SIZE: usize = 4;
pub const SYNC_MAJIK: u32 = 0xdedf_00ef;
/// Offset of the sync majik from the start of a sync/reboot record.
pub const SYNC_MAJIK_OFFSET: usize = 8;

/// Sync record every N sectors ...
pub const SYNC_MAX_SECTORS: u32 = 8;
/// ... or after this many binary milliseconds (5 minutes), whichever first.
pub const SYNC_PERIOD: u32 = 5 * 60 * 1024;

pub const DBLK_DIR_SIG: u32 = 0x1896_1492;
pub const DBLK_ID: [u8; 4] = *b"DBLK";

pub const IMAGE_DIR_SLOTS: usize = 4;
pub const IMAGE_DIR_SIG: u32 = 0x1725_4172;
/// Maximum image size held by one slot.
pub const IMAGE_SIZE: usize = 128 * 1024;
pub const IMAGE_SIZE_SECTORS: u32 = (IMAGE_SIZE / SECTOR_SIZE) as u32;
/// Image area: directory sector plus every slot.
pub const IMAGE_AREA_BLOCKS: u32 = 1 + IMAGE_DIR_SLOTS as u32 * IMAGE_SIZE_SECTORS;

pub const IMAGE_INFO_SIG: u32 = 0x3327_5401;
/// Offset of image_info inside a firmware image (just past the vectors).
pub const IMAGE_META_OFFSET: usize = 0x140;

/// Bounded retries before a failing write is fatal.
pub const DEFAULT_WRITE_RETRIES: u8 = 3;
/// Depth of the stream reader request queue.
pub const READER_QUEUE_DEPTH: usize = 8;

/// Runtime knobs for an open device.
#[derive(Debug, Clone, Copy)]
pub struct DeviceConfig {
    /// Attempts per sector after the first one fails.
    pub write_retries: u8,
    /// Stamp placed in the reboot record written on open.
    pub boot_stamp: u32,
    /// Boot counter carried by the reboot record.
    pub boot_count: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            write_retries: DEFAULT_WRITE_RETRIES,
            boot_stamp: 0,
            boot_count: 0,
        }
    }
}
