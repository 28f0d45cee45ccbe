//! Offline walk of the record log on an image, with resync over damage.

use crate::error::Result;

use tagstore::blockio::{read_sector, BlockDevice};
use tagstore::config::{DC_BLK_SIZE, DT_HDR_SIZE};
use tagstore::device::Mount;
use tagstore::locator::AreaKind;
use tagstore::record::{padded_len, verify_sector, DType, RecordHeader, SectorRecords};
use tagstore::resync::scan_from;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LoggedRecord {
    pub blk: u32,
    /// Offset inside the sector.
    pub offset: usize,
    /// `None` when the sector failed its checksum and the record was
    /// recovered by resync.
    pub seq: Option<u16>,
    pub bytes: Vec<u8>,
}

impl LoggedRecord {
    pub fn dtype(&self) -> Option<DType> {
        DType::try_from(self.bytes[2]).ok()
    }
}

#[derive(Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LogScan {
    pub records: Vec<LoggedRecord>,
    /// Sectors whose checksum did not hold.
    pub bad_sectors: Vec<u32>,
    /// First erased block.
    pub dblk_nxt: u32,
}

/// Read every written sector of the Data area. Good sectors yield all of
/// their records; a damaged sector yields only what follows the first
/// sync or reboot record found in it.
pub fn scan_log<D: BlockDevice + ?Sized>(dev: &mut D) -> Result<LogScan> {
    let mount = Mount::probe(dev)?;
    let dblk = mount.locator.area(AreaKind::Dblk);
    let mut scan = LogScan {
        dblk_nxt: mount.dblk_nxt,
        ..LogScan::default()
    };

    for blk in mount.dblk_dir.first_data_block()..mount.dblk_nxt.min(dblk.end + 1) {
        let sec = read_sector(dev, blk).map_err(tagstore::StorageError::from)?;
        match verify_sector(&sec) {
            Ok(seq) => {
                let mut offset = 0;
                for rec in SectorRecords::new(&sec) {
                    let Ok(bytes) = rec else { break };
                    scan.records.push(LoggedRecord {
                        blk,
                        offset,
                        seq: Some(seq),
                        bytes: bytes.to_vec(),
                    });
                    offset += padded_len(bytes.len());
                }
            }
            Err(_) => {
                scan.bad_sectors.push(blk);
                let data = &sec[..DC_BLK_SIZE];
                let Some(start) = scan_from(data, 0) else { continue };
                let mut offset = start.offset;
                while let Some(hdr) = data.get(offset..).and_then(RecordHeader::read) {
                    let len = hdr.len as usize;
                    if len < DT_HDR_SIZE || hdr.dtype == DType::Tintryalf as u8 || offset + len > data.len() {
                        break;
                    }
                    scan.records.push(LoggedRecord {
                        blk,
                        offset,
                        seq: None,
                        bytes: data[offset..offset + len].to_vec(),
                    });
                    offset += padded_len(len);
                }
            }
        }
    }
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagstore::blockio::RamDisk;
    use tagstore::config::DeviceConfig;
    use tagstore::format::{format_device, FormatPlan};
    use tagstore::StorageDevice;

    #[test]
    fn test_scan_recovers_after_damaged_prefix() {
        let plan = FormatPlan::default();
        let mut disk = RamDisk::new(plan.min_blocks() + 10);
        let loc = format_device(&mut disk, &plan).unwrap();

        let mut sd = StorageDevice::open(&mut disk, DeviceConfig::default()).unwrap();
        sd.append_record(DType::Note, &[0x33; 100]).unwrap();
        sd.write_sync(9).unwrap();
        sd.append_record(DType::Note, &[0x44; 20]).unwrap();
        sd.close().unwrap();

        assert_eq!(scan_log(&mut disk).unwrap().records.len(), 4);

        // smash the reboot record and the first note
        let first = loc.area(AreaKind::Dblk).start + 1;
        let base = first as usize * 512;
        disk.as_bytes_mut()[base..base + 100].fill(0xff);

        let scan = scan_log(&mut disk).unwrap();
        assert_eq!(scan.bad_sectors, vec![first]);
        let kinds: Vec<_> = scan.records.iter().map(|r| r.dtype()).collect();
        assert_eq!(kinds, vec![Some(DType::Sync), Some(DType::Note)]);
        assert!(scan.records.iter().all(|r| r.seq.is_none()));
    }
}
