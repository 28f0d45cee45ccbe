mod common;

use common::{test_config, SharedDisk};
use tagstore::blockio::read_sector;
use tagstore::error::{IoError, ReadError};
use tagstore::record::DType;
use tagstore::AreaKind;
use tagstore_node::{Node, NodeConfig, NodeError};

#[tokio::test]
async fn test_reads_complete_in_submission_order() {
    let (disk, loc) = SharedDisk::formatted(16);
    let cfg = NodeConfig {
        reader_queue_depth: 2,
        ..test_config()
    };
    let node = Node::start(&cfg, disk.boxed()).await.unwrap();
    let panic0 = tagstore::config::PANIC0_SECTOR;
    let dir = loc.area(AreaKind::Image).start;

    let first = node.reader().submit(1, 0).unwrap();
    let second = node.reader().submit(2, panic0).unwrap();
    let third = node.reader().submit(3, dir);
    assert!(matches!(third, Err(NodeError::Read(ReadError::QueueFull))));

    let boot = first.await.unwrap().unwrap();
    let p0 = second.await.unwrap().unwrap();
    assert_eq!(*boot, read_sector(&mut *disk.lock(), 0).unwrap());
    assert_eq!(*p0, read_sector(&mut *disk.lock(), panic0).unwrap());

    // room again once the queue drained
    let dir_sec = node.reader().read_block(3, dir).await.unwrap();
    assert_eq!(*dir_sec, read_sector(&mut *disk.lock(), dir).unwrap());
    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_read_failure_leaves_writer_alone() {
    let (disk, loc) = SharedDisk::formatted(16);
    let node = Node::start(&test_config(), disk.boxed()).await.unwrap();
    let bad = loc.area(AreaKind::Image).start + 3;
    disk.lock().set_bad_block(Some(bad));

    let err = node.reader().read_block(7, bad).await.unwrap_err();
    assert!(matches!(err, NodeError::Read(ReadError::Io(IoError::ReadFail))));

    node.append_record(DType::Note, b"still writing").await.unwrap();
    node.flush().await.unwrap();
    assert!(!node.writer().is_crashed().await);
    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_read_range_over_the_log() {
    let (disk, loc) = SharedDisk::formatted(16);
    let node = Node::start(&test_config(), disk.boxed()).await.unwrap();
    for i in 0..6u8 {
        node.append_record(DType::Test, &[i; 300]).await.unwrap();
    }
    node.flush().await.unwrap();

    let dblk = loc.area(AreaKind::Dblk);
    // skip the directory sector and straddle two data sectors
    let got = node.reader().read_range(9, AreaKind::Dblk, 512 + 400, 700).await.unwrap();
    let raw = disk.lock().as_bytes().to_vec();
    let base = dblk.start as usize * 512 + 512 + 400;
    assert_eq!(got, raw[base..base + 700]);

    let past_end = dblk.blocks() as u64 * 512 - 10;
    let err = node.reader().read_range(9, AreaKind::Dblk, past_end, 20).await.unwrap_err();
    assert!(matches!(err, NodeError::Read(ReadError::OutOfRange)));
    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_last_sync_points_at_reboot_record() {
    let (disk, _) = SharedDisk::formatted(16);
    let node = Node::start(&test_config(), disk.boxed()).await.unwrap();
    assert_eq!(node.last_sync().await.unwrap(), None);

    node.flush().await.unwrap();
    // reboot record opens the first data sector
    assert_eq!(node.last_sync().await.unwrap(), Some(512));
    node.shutdown().await.unwrap();
}
