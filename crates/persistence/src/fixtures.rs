use crate::disk::{create_image, FileDisk};
use crate::error::Result;

use std::fs;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use tagstore::config::DeviceConfig;
use tagstore::format::FormatPlan;
use tagstore::image::{ImageInfo, ImageVersion};
use tagstore::record::DType;
use tagstore::StorageDevice;

pub const FIXTURE_DBLK_BLOCKS: u32 = 64;
pub const FIXTURE_VERSION: ImageVersion = ImageVersion::new(1, 2, 3);

pub struct TestMedium {
    pub image: PathBuf,
    /// Sensor payloads appended, in order.
    pub payloads: Vec<Vec<u8>>,
}

/// A sensor sample payload: [STAMP(4), SENSOR(1), PAD(1), COUNT(2), VALUES(count*2)]
pub fn sensor_payload(stamp: u32, sensor: u8, values: &[i16]) -> Vec<u8> {
    let mut buf = vec![0u8; 8 + values.len() * 2];
    LittleEndian::write_u32(&mut buf[0..4], stamp);
    buf[4] = sensor;
    LittleEndian::write_u16(&mut buf[6..8], values.len() as u16);
    for (i, v) in values.iter().enumerate() {
        LittleEndian::write_i16(&mut buf[8 + i * 2..10 + i * 2], *v);
    }
    buf
}

/// A linked firmware image with a valid info block.
pub fn firmware_image(version: ImageVersion, len: usize) -> Result<Vec<u8>> {
    let mut img: Vec<u8> = (0..len).map(|i| (i * 13 % 256) as u8).collect();
    ImageInfo::stamp(&mut img, version, 0x0002_0000).map_err(tagstore::StorageError::from)?;
    Ok(img)
}

/// Formatted image with a short sensor log, one sync, and an active
/// firmware image.
pub fn generate_test_medium(dir: &Path) -> Result<TestMedium> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    let image = dir.join("sd.img");
    let plan = FormatPlan::default();
    let num_blocks = plan.min_blocks() - 2 + FIXTURE_DBLK_BLOCKS;
    create_image(&image, num_blocks, &plan)?;

    let disk = FileDisk::open(&image)?;
    let mut sd = StorageDevice::open(disk, DeviceConfig::default())?;

    let mut payloads = Vec::new();
    for i in 0..20u32 {
        let p = sensor_payload(i * 1024, (i % 3) as u8, &[i as i16, -(i as i16), 7]);
        sd.append_record(DType::SensorData, &p)?;
        payloads.push(p);
        if i == 9 {
            sd.write_sync(i * 1024)?;
        }
    }

    let fw = firmware_image(FIXTURE_VERSION, 3000)?;
    let mut h = sd.begin_install(FIXTURE_VERSION)?;
    sd.write_image(&mut h, &fw)?;
    sd.finish_install(h)?;
    sd.activate(FIXTURE_VERSION)?;

    let disk = sd.close()?;
    disk.sync()?;
    Ok(TestMedium { image, payloads })
}
