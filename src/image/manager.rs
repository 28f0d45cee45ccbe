//! Image manager: slot lifecycle on top of the image directory.
//!
//! ```text
//! Empty -> Filling -> Valid -> {Active | Backup} -> Ejected
//! ```
//! Every mutation builds the next directory, checks it would load back
//! cleanly, writes the whole directory sector and only then adopts it in
//! memory. A failed write leaves both disk and memory at the old state.

use alloc::vec::Vec;

use tracing::{info, warn};

use super::{area_fits, ImageDirectory, ImageInfo, ImageVersion, SlotState};
use crate::blockio::{read_sector, BlockDevice};
use crate::config::{IMAGE_DIR_SLOTS, IMAGE_SIZE, IMAGE_SIZE_SECTORS, SECTOR_SIZE};
use crate::error::{ImageError, IntegrityError, Result};
use crate::locator::Area;

/// An install in progress. Owned by the installer; consumed by
/// [`ImageManager::finish_install`] or [`ImageManager::abort_install`].
#[derive(Debug)]
pub struct SlotHandle {
    slot: usize,
    version: ImageVersion,
    start_sector: u32,
    written: usize,
    pending: Vec<u8>,
}

impl SlotHandle {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn version(&self) -> ImageVersion {
        self.version
    }

    pub fn start_sector(&self) -> u32 {
        self.start_sector
    }

    /// Image bytes accepted so far.
    pub fn bytes_written(&self) -> usize {
        self.written + self.pending.len()
    }
}

pub struct ImageManager {
    area: Area,
    dir: ImageDirectory,
    installing: Option<usize>,
}

impl ImageManager {
    /// Load and validate the directory from the first sector of `area`.
    /// An area too small to hold every slot is rejected before any read.
    pub fn load<D: BlockDevice + ?Sized>(dev: &mut D, area: Area) -> Result<Self> {
        if !area_fits(area) {
            warn!(start = area.start, end = area.end, "image area cannot hold every slot");
            return Err(IntegrityError::BadValue.into());
        }
        let sec = read_sector(dev, area.start)?;
        let dir = ImageDirectory::decode(&sec, area)?;
        if dir.find_state(SlotState::Filling).is_some() {
            warn!("image directory has an interrupted install");
        }
        Ok(Self {
            area,
            dir,
            installing: None,
        })
    }

    pub fn area(&self) -> Area {
        self.area
    }

    pub fn query_directory(&self) -> ImageDirectory {
        self.dir
    }

    pub fn find(&self, version: ImageVersion) -> Option<usize> {
        self.dir.find(version).filter(|&i| !self.is_stale(i))
    }

    pub fn active(&self) -> Option<ImageVersion> {
        self.dir
            .find_state(SlotState::Active)
            .map(|i| self.dir.slots[i].version)
    }

    pub fn backup(&self) -> Option<ImageVersion> {
        self.dir
            .find_state(SlotState::Backup)
            .map(|i| self.dir.slots[i].version)
    }

    /// A Filling slot left behind by an install that died with a reboot.
    fn is_stale(&self, i: usize) -> bool {
        self.dir.slots[i].state == SlotState::Filling && self.installing != Some(i)
    }

    fn commit<D: BlockDevice + ?Sized>(&mut self, dev: &mut D, next: ImageDirectory) -> Result<()> {
        let sec = next.to_sector();
        ImageDirectory::decode(&sec, self.area)?;
        dev.write_block(self.area.start, &sec)?;
        self.dir = next;
        Ok(())
    }

    fn lookup(&self, version: ImageVersion) -> core::result::Result<usize, ImageError> {
        self.find(version).ok_or(ImageError::NotFound(version))
    }

    /// Claim a slot for `version`. Preference: lowest Empty (stale
    /// Filling counts as Empty), then lowest Ejected, then lowest Valid.
    /// Active and Backup are never reclaimed.
    pub fn begin_install<D: BlockDevice + ?Sized>(
        &mut self,
        dev: &mut D,
        version: ImageVersion,
    ) -> Result<SlotHandle> {
        if self.installing.is_some() {
            return Err(ImageError::InstallInProgress.into());
        }
        if self.find(version).is_some() {
            return Err(ImageError::Duplicate(version).into());
        }
        let pick = |want: &dyn Fn(usize) -> bool| (0..IMAGE_DIR_SLOTS).find(|&i| want(i));
        let slot = pick(&|i| self.is_stale(i) && self.dir.slots[i].version == version)
            .or_else(|| pick(&|i| self.dir.slots[i].state == SlotState::Empty || self.is_stale(i)))
            .or_else(|| pick(&|i| self.dir.slots[i].state == SlotState::Ejected))
            .or_else(|| pick(&|i| self.dir.slots[i].state == SlotState::Valid))
            .ok_or(ImageError::NoSlot)?;

        let mut next = self.dir;
        let prev = next.slots[slot];
        next.slots[slot].version = version;
        next.slots[slot].state = SlotState::Filling;
        self.commit(dev, next)?;
        self.installing = Some(slot);
        info!(slot, %version, was = ?prev.state, "image install started");
        Ok(SlotHandle {
            slot,
            version,
            start_sector: next.slots[slot].start_sector,
            written: 0,
            pending: Vec::with_capacity(SECTOR_SIZE),
        })
    }

    /// Stream image bytes into the slot. Whole sectors go to the device as
    /// soon as they are complete.
    pub fn write_image<D: BlockDevice + ?Sized>(
        &mut self,
        dev: &mut D,
        handle: &mut SlotHandle,
        mut bytes: &[u8],
    ) -> Result<()> {
        if handle.bytes_written() + bytes.len() > IMAGE_SIZE {
            return Err(ImageError::SlotOverflow.into());
        }
        while !bytes.is_empty() {
            let take = (SECTOR_SIZE - handle.pending.len()).min(bytes.len());
            handle.pending.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if handle.pending.len() == SECTOR_SIZE {
                self.write_pending(dev, handle)?;
            }
        }
        Ok(())
    }

    fn write_pending<D: BlockDevice + ?Sized>(&self, dev: &mut D, handle: &mut SlotHandle) -> Result<()> {
        let mut sec = [0u8; SECTOR_SIZE];
        sec[..handle.pending.len()].copy_from_slice(&handle.pending);
        let blk = handle.start_sector + (handle.written / SECTOR_SIZE) as u32;
        if !self.area.contains(blk) {
            return Err(ImageError::SlotOverflow.into());
        }
        dev.write_block(blk, &sec)?;
        handle.written += SECTOR_SIZE;
        handle.pending.clear();
        Ok(())
    }

    /// Validate the written image against its info block. Valid on
    /// success; the slot goes back to Empty on any validation failure.
    pub fn finish_install<D: BlockDevice + ?Sized>(
        &mut self,
        dev: &mut D,
        mut handle: SlotHandle,
    ) -> Result<ImageInfo> {
        if self.installing != Some(handle.slot) {
            return Err(ImageError::InvalidState(self.dir.slots[handle.slot].state).into());
        }
        if !handle.pending.is_empty() {
            self.write_pending(dev, &mut handle)?;
        }
        let checked = self
            .read_slot(dev, handle.slot, handle.written)
            .and_then(|image| {
                let info = ImageInfo::verify(&image)?;
                if info.version != handle.version {
                    return Err(ImageError::BadImageInfo.into());
                }
                Ok(info)
            });

        let mut next = self.dir;
        let outcome = match checked {
            Ok(info) => {
                next.slots[handle.slot].state = SlotState::Valid;
                Ok(info)
            }
            Err(e) => {
                warn!(slot = handle.slot, version = %handle.version, "image rejected: {}", e);
                next.slots[handle.slot].state = SlotState::Empty;
                next.slots[handle.slot].version = ImageVersion::default();
                Err(e)
            }
        };
        self.installing = None;
        self.commit(dev, next)?;
        if outcome.is_ok() {
            info!(slot = handle.slot, version = %handle.version, "image installed");
        }
        outcome
    }

    /// Give up on an install; the slot goes back to Empty.
    pub fn abort_install<D: BlockDevice + ?Sized>(&mut self, dev: &mut D, handle: SlotHandle) -> Result<()> {
        if self.installing != Some(handle.slot) {
            return Err(ImageError::InvalidState(self.dir.slots[handle.slot].state).into());
        }
        let mut next = self.dir;
        next.slots[handle.slot].state = SlotState::Empty;
        next.slots[handle.slot].version = ImageVersion::default();
        self.installing = None;
        self.commit(dev, next)
    }

    /// Make `version` the running image. The previous Active becomes the
    /// Backup; any other Backup drops back to Valid.
    pub fn activate<D: BlockDevice + ?Sized>(&mut self, dev: &mut D, version: ImageVersion) -> Result<()> {
        let target = self.lookup(version)?;
        match self.dir.slots[target].state {
            SlotState::Active => return Ok(()),
            SlotState::Valid | SlotState::Backup => {}
            other => return Err(ImageError::InvalidState(other).into()),
        }
        let mut next = self.dir;
        for (i, s) in next.slots.iter_mut().enumerate() {
            if i == target {
                s.state = SlotState::Active;
            } else if s.state == SlotState::Active {
                s.state = SlotState::Backup;
            } else if s.state == SlotState::Backup {
                s.state = SlotState::Valid;
            }
        }
        self.commit(dev, next)?;
        info!(slot = target, %version, "image activated");
        Ok(())
    }

    /// Exclude a failing image from future activation. Ejecting the
    /// Active image promotes the Backup, if there is one.
    pub fn eject<D: BlockDevice + ?Sized>(&mut self, dev: &mut D, version: ImageVersion) -> Result<()> {
        let target = self.lookup(version)?;
        let was = self.dir.slots[target].state;
        match was {
            SlotState::Ejected => return Ok(()),
            SlotState::Empty | SlotState::Filling => {
                return Err(ImageError::InvalidState(was).into())
            }
            _ => {}
        }
        let mut next = self.dir;
        next.slots[target].state = SlotState::Ejected;
        if was == SlotState::Active {
            if let Some(b) = next.find_state(SlotState::Backup) {
                next.slots[b].state = SlotState::Active;
            }
        }
        self.commit(dev, next)?;
        match self.active() {
            Some(v) => info!(%version, active = %v, "image ejected"),
            None => warn!(%version, "image ejected, no active image left"),
        }
        Ok(())
    }

    /// Release the slot holding `version`. The running image cannot be
    /// deleted.
    pub fn delete<D: BlockDevice + ?Sized>(&mut self, dev: &mut D, version: ImageVersion) -> Result<()> {
        let target = self.lookup(version)?;
        match self.dir.slots[target].state {
            SlotState::Active => return Err(ImageError::InvalidState(SlotState::Active).into()),
            SlotState::Filling => return Err(ImageError::InstallInProgress.into()),
            _ => {}
        }
        let mut next = self.dir;
        next.slots[target].state = SlotState::Empty;
        next.slots[target].version = ImageVersion::default();
        self.commit(dev, next)
    }

    /// Read back the first `len` bytes of slot `slot`.
    fn read_slot<D: BlockDevice + ?Sized>(&self, dev: &mut D, slot: usize, len: usize) -> Result<Vec<u8>> {
        let start = self.dir.slots[slot].start_sector;
        let sectors = len.div_ceil(SECTOR_SIZE).min(IMAGE_SIZE_SECTORS as usize);
        let mut image = Vec::with_capacity(sectors * SECTOR_SIZE);
        for k in 0..sectors as u32 {
            if !self.area.contains(start + k) {
                return Err(IntegrityError::BadValue.into());
            }
            image.extend_from_slice(&read_sector(dev, start + k)?);
        }
        image.truncate(len);
        Ok(image)
    }

    /// Image bytes of an installed version, trimmed to its `image_length`.
    pub fn read_image<D: BlockDevice + ?Sized>(&self, dev: &mut D, version: ImageVersion) -> Result<Vec<u8>> {
        let slot = self.lookup(version)?;
        let mut image = self.read_slot(dev, slot, IMAGE_SIZE)?;
        let info = ImageInfo::read_from(&image)?;
        image.truncate(info.image_length as usize);
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockio::RamDisk;
    use crate::error::StorageError;

    const DIR_BLK: u32 = 1;

    fn setup() -> (RamDisk, ImageManager) {
        let area = Area::new(DIR_BLK, DIR_BLK + 4 * IMAGE_SIZE_SECTORS);
        let mut disk = RamDisk::new(area.end + 2);
        disk.write_block(DIR_BLK, &ImageDirectory::empty(area).to_sector())
            .unwrap();
        let mgr = ImageManager::load(&mut disk, area).unwrap();
        (disk, mgr)
    }

    fn image(v: ImageVersion, len: usize) -> Vec<u8> {
        let mut img: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        ImageInfo::stamp(&mut img, v, 0).unwrap();
        img
    }

    fn install(disk: &mut RamDisk, mgr: &mut ImageManager, v: ImageVersion) -> usize {
        let mut h = mgr.begin_install(disk, v).unwrap();
        let slot = h.slot();
        let img = image(v, 1500);
        for chunk in img.chunks(100) {
            mgr.write_image(disk, &mut h, chunk).unwrap();
        }
        mgr.finish_install(disk, h).unwrap();
        slot
    }

    #[test]
    fn test_install_and_read_back() {
        let (mut disk, mut mgr) = setup();
        let v = ImageVersion::new(1, 0, 1);
        let slot = install(&mut disk, &mut mgr, v);
        assert_eq!(slot, 0);
        assert_eq!(mgr.query_directory().slots[0].state, SlotState::Valid);
        assert_eq!(mgr.read_image(&mut disk, v).unwrap(), image(v, 1500));

        // survives a reload
        let reloaded = ImageManager::load(&mut disk, mgr.area()).unwrap();
        assert_eq!(reloaded.query_directory(), mgr.query_directory());
    }

    #[test]
    fn test_corrupt_image_reverts_slot() {
        let (mut disk, mut mgr) = setup();
        let v = ImageVersion::new(1, 0, 2);
        let mut h = mgr.begin_install(&mut disk, v).unwrap();
        let mut img = image(v, 900);
        img[700] ^= 0xff;
        mgr.write_image(&mut disk, &mut h, &img).unwrap();
        assert!(matches!(
            mgr.finish_install(&mut disk, h),
            Err(StorageError::Image(ImageError::ImageChecksum { .. }))
        ));
        assert_eq!(mgr.query_directory().slots[0].state, SlotState::Empty);
        assert!(mgr.find(v).is_none());
    }

    #[test]
    fn test_one_install_at_a_time_and_duplicates() {
        let (mut disk, mut mgr) = setup();
        let v = ImageVersion::new(1, 1, 0);
        install(&mut disk, &mut mgr, v);
        assert_eq!(
            mgr.begin_install(&mut disk, v).unwrap_err(),
            StorageError::Image(ImageError::Duplicate(v))
        );
        let h = mgr.begin_install(&mut disk, ImageVersion::new(1, 1, 1)).unwrap();
        assert_eq!(
            mgr.begin_install(&mut disk, ImageVersion::new(1, 1, 2)).unwrap_err(),
            StorageError::Image(ImageError::InstallInProgress)
        );
        mgr.abort_install(&mut disk, h).unwrap();
        assert_eq!(mgr.query_directory().slots[1].state, SlotState::Empty);
    }

    #[test]
    fn test_activate_rotates_backup() {
        let (mut disk, mut mgr) = setup();
        let v: Vec<_> = (0..3).map(|b| ImageVersion::new(1, 0, b)).collect();
        for ver in &v {
            install(&mut disk, &mut mgr, *ver);
        }
        mgr.activate(&mut disk, v[0]).unwrap();
        mgr.activate(&mut disk, v[1]).unwrap();
        assert_eq!(mgr.active(), Some(v[1]));
        assert_eq!(mgr.backup(), Some(v[0]));
        mgr.activate(&mut disk, v[2]).unwrap();
        assert_eq!(mgr.active(), Some(v[2]));
        assert_eq!(mgr.backup(), Some(v[1]));
        assert_eq!(mgr.query_directory().slots[0].state, SlotState::Valid);
        // already active
        mgr.activate(&mut disk, v[2]).unwrap();
        assert_eq!(mgr.backup(), Some(v[1]));
    }

    #[test]
    fn test_eject_active_promotes_backup() {
        let (mut disk, mut mgr) = setup();
        let a = ImageVersion::new(2, 0, 0);
        let b = ImageVersion::new(2, 0, 1);
        install(&mut disk, &mut mgr, a);
        install(&mut disk, &mut mgr, b);
        mgr.activate(&mut disk, a).unwrap();
        mgr.activate(&mut disk, b).unwrap();

        mgr.eject(&mut disk, b).unwrap();
        assert_eq!(mgr.active(), Some(a));
        assert_eq!(mgr.backup(), None);
        assert_eq!(
            mgr.activate(&mut disk, b).unwrap_err(),
            StorageError::Image(ImageError::InvalidState(SlotState::Ejected))
        );

        mgr.eject(&mut disk, a).unwrap();
        assert_eq!(mgr.active(), None);
    }

    #[test]
    fn test_reclaim_prefers_ejected_over_valid() {
        let (mut disk, mut mgr) = setup();
        let v: Vec<_> = (0..5).map(|b| ImageVersion::new(3, 0, b)).collect();
        for ver in &v[..4] {
            install(&mut disk, &mut mgr, *ver);
        }
        mgr.activate(&mut disk, v[0]).unwrap();
        mgr.eject(&mut disk, v[2]).unwrap();
        assert_eq!(install(&mut disk, &mut mgr, v[4]), 2);

        // slot 1 and 3 are Valid, lowest one goes next
        assert_eq!(install(&mut disk, &mut mgr, ImageVersion::new(4, 0, 0)), 1);
    }

    #[test]
    fn test_delete_rules() {
        let (mut disk, mut mgr) = setup();
        let v: Vec<_> = (0..4).map(|b| ImageVersion::new(5, 0, b)).collect();
        for ver in &v {
            install(&mut disk, &mut mgr, *ver);
        }
        mgr.activate(&mut disk, v[0]).unwrap();
        mgr.activate(&mut disk, v[1]).unwrap();
        mgr.delete(&mut disk, v[2]).unwrap();
        mgr.delete(&mut disk, v[3]).unwrap();
        assert_eq!(
            mgr.delete(&mut disk, v[1]).map(|_| mgr.backup()),
            Ok(None)
        );
        assert_eq!(
            mgr.delete(&mut disk, v[0]).unwrap_err(),
            StorageError::Image(ImageError::InvalidState(SlotState::Active))
        );
    }

    #[test]
    fn test_undersized_area_rejected() {
        // slots 1..3 would start past the end of this area
        let area = Area::new(10, 300);
        let mut disk = RamDisk::new(2000);
        disk.write_block(area.start, &ImageDirectory::empty(area).to_sector())
            .unwrap();
        assert_eq!(
            ImageManager::load(&mut disk, area).err(),
            Some(StorageError::Integrity(IntegrityError::BadValue))
        );

        // one block short of the full layout
        let short = Area::new(DIR_BLK, DIR_BLK + 4 * IMAGE_SIZE_SECTORS - 1);
        assert!(ImageManager::load(&mut disk, short).is_err());
    }

    #[test]
    fn test_last_slot_stays_inside_area() {
        let (mut disk, mut mgr) = setup();
        let v: Vec<_> = (0..4).map(|b| ImageVersion::new(7, 0, b)).collect();
        let mut slots = Vec::new();
        for ver in &v {
            slots.push(install(&mut disk, &mut mgr, *ver));
        }
        assert_eq!(slots, vec![0, 1, 2, 3]);
        let last = mgr.query_directory().slots[3].start_sector;
        assert!(mgr.area().contains(last + IMAGE_SIZE_SECTORS - 1));
        assert_eq!(mgr.read_image(&mut disk, v[3]).unwrap(), image(v[3], 1500));
        // nothing spilled past the area
        assert!(read_sector(&mut disk, mgr.area().end + 1).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_failed_directory_write_keeps_old_state() {
        let (mut disk, mut mgr) = setup();
        let a = ImageVersion::new(6, 0, 0);
        install(&mut disk, &mut mgr, a);
        disk.fail_next_writes(1);
        assert!(mgr.activate(&mut disk, a).is_err());
        assert_eq!(mgr.active(), None);
        let on_disk = ImageManager::load(&mut disk, mgr.area()).unwrap();
        assert_eq!(on_disk.active(), None);
    }
}
