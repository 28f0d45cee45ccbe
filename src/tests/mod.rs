pub mod image_tests;

use crate::blockio::RamDisk;
use crate::format::{format_device, FormatPlan};
use crate::locator::Locator;

/// Formatted RAM medium with `dblk_blocks` sectors in the Data area.
pub(crate) fn formatted_disk(dblk_blocks: u32) -> (RamDisk, Locator) {
    let plan = FormatPlan::default();
    let mut disk = RamDisk::new(plan.min_blocks() - 2 + dblk_blocks);
    let loc = format_device(&mut disk, &plan).unwrap();
    (disk, loc)
}
