// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::config::DeviceConfig;
use crate::image::{ImageInfo, ImageVersion, SlotState};
use crate::tests::formatted_disk;
use crate::StorageDevice;

fn firmware(v: ImageVersion) -> Vec<u8> {
    let mut img: Vec<u8> = (0..4096u32).map(|i| (i ^ (i >> 3)) as u8).collect();
    ImageInfo::stamp(&mut img, v, 0x0002_0000).unwrap();
    img
}

#[test]
fn test_activate_keeps_single_active_and_backup() {
    let (mut disk, _) = formatted_disk(8);
    let mut sd = StorageDevice::open(&mut disk, DeviceConfig::default()).unwrap();
    let versions: Vec<_> = (0..4).map(|b| ImageVersion::new(0, 9, b)).collect();
    for v in &versions {
        let mut h = sd.begin_install(*v).unwrap();
        sd.write_image(&mut h, &firmware(*v)).unwrap();
        sd.finish_install(h).unwrap();
    }

    let mut x: u32 = 0x9e37_79b9;
    for _ in 0..200 {
        x = x.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let target = versions[(x >> 16) as usize % versions.len()];
        let before = sd.images().active();
        sd.activate(target).unwrap();

        let dir = sd.query_directory();
        let count = |st| dir.slots.iter().filter(|s| s.state == st).count();
        assert_eq!(count(SlotState::Active), 1);
        assert!(count(SlotState::Backup) <= 1);
        assert_eq!(sd.images().active(), Some(target));
        if let Some(prev) = before.filter(|p| *p != target) {
            assert_eq!(sd.images().backup(), Some(prev));
        }
    }
}

#[test]
fn test_directory_survives_reopen() {
    let (mut disk, _) = formatted_disk(8);
    let a = ImageVersion::new(1, 0, 0);
    let b = ImageVersion::new(1, 1, 0);
    {
        let mut sd = StorageDevice::open(&mut disk, DeviceConfig::default()).unwrap();
        for v in [a, b] {
            let mut h = sd.begin_install(v).unwrap();
            sd.write_image(&mut h, &firmware(v)).unwrap();
            sd.finish_install(h).unwrap();
        }
        sd.activate(a).unwrap();
        sd.activate(b).unwrap();
        sd.close().unwrap();
    }
    let mut sd = StorageDevice::open(&mut disk, DeviceConfig::default()).unwrap();
    assert_eq!(sd.images().active(), Some(b));
    assert_eq!(sd.images().backup(), Some(a));
    sd.eject(b).unwrap();
    assert_eq!(sd.images().active(), Some(a));
}

#[test]
fn test_interrupted_install_is_reclaimed() {
    let (mut disk, _) = formatted_disk(8);
    let v = ImageVersion::new(2, 0, 0);
    {
        let mut sd = StorageDevice::open(&mut disk, DeviceConfig::default()).unwrap();
        let mut h = sd.begin_install(v).unwrap();
        sd.write_image(&mut h, &firmware(v)[..1000]).unwrap();
        // power lost: handle dropped with the slot still Filling
        sd.close().unwrap();
    }
    let mut sd = StorageDevice::open(&mut disk, DeviceConfig::default()).unwrap();
    assert_eq!(sd.query_directory().slots[0].state, SlotState::Filling);
    let mut h = sd.begin_install(v).unwrap();
    assert_eq!(h.slot(), 0);
    sd.write_image(&mut h, &firmware(v)).unwrap();
    assert_eq!(sd.finish_install(h).unwrap().version, v);
}
