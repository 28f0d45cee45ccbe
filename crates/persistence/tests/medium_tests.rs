use tagstore::config::DeviceConfig;
use tagstore::image::SlotState;
use tagstore::record::DType;
use tagstore::StorageDevice;
use tagstore_persistence::fixtures::{generate_test_medium, FIXTURE_VERSION};
use tagstore_persistence::{scan_log, FileDisk};

#[test]
fn test_fixture_medium_reads_back() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let medium = generate_test_medium(dir.path())?;

    let mut disk = FileDisk::open(&medium.image)?;
    let scan = scan_log(&mut disk)?;
    assert!(scan.bad_sectors.is_empty());

    let kinds: Vec<_> = scan.records.iter().filter_map(|r| r.dtype()).collect();
    assert_eq!(kinds[0], DType::Reboot);
    assert_eq!(kinds.iter().filter(|k| **k == DType::Sync).count(), 1);

    let sensors: Vec<Vec<u8>> = scan
        .records
        .iter()
        .filter(|r| r.dtype() == Some(DType::SensorData))
        .map(|r| r.bytes[4..].to_vec())
        .collect();
    assert_eq!(sensors, medium.payloads);

    // sequence restarts with each session, one session here
    let seqs: Vec<u16> = scan.records.iter().filter_map(|r| r.seq).collect();
    assert!(seqs.windows(2).all(|w| w[1] == w[0] || w[1] == w[0] + 1));
    Ok(())
}

#[test]
fn test_fixture_medium_reopens_with_active_image() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let medium = generate_test_medium(dir.path())?;

    let disk = FileDisk::open(&medium.image)?;
    let mut sd = StorageDevice::open(disk, DeviceConfig::default())?;
    assert_eq!(sd.images().active(), Some(FIXTURE_VERSION));
    let dir_state = sd.query_directory();
    assert_eq!(dir_state.slots[0].state, SlotState::Active);

    let before = sd.dblk_nxt();
    sd.append_record(DType::Note, b"second session")?;
    let disk = sd.close()?;
    drop(disk);

    let mut disk = FileDisk::open(&medium.image)?;
    let scan = scan_log(&mut disk)?;
    assert_eq!(scan.dblk_nxt, before + 1);
    let last = scan.records.last().map(|r| r.bytes.clone()).unwrap_or_default();
    assert_eq!(&last[4..], b"second session");
    Ok(())
}

#[test]
fn test_read_only_medium_refuses_writes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let medium = generate_test_medium(dir.path())?;

    let disk = FileDisk::open_read_only(&medium.image)?;
    let mut sd = StorageDevice::open(disk, DeviceConfig::default())?;
    assert!(sd.flush().is_err());
    assert!(sd.is_crashed());
    Ok(())
}
