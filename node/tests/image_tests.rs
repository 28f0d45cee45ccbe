mod common;

use common::{test_config, SharedDisk};
use tagstore::error::ImageError;
use tagstore::image::{ImageVersion, SlotState};
use tagstore::StorageError;
use tagstore_node::{Node, NodeError};
use tagstore_persistence::fixtures::firmware_image;

#[tokio::test]
async fn test_install_activate_and_reopen() {
    let (disk, _) = SharedDisk::formatted(16);
    let cfg = test_config();
    let a = ImageVersion::new(3, 1, 0);
    let b = ImageVersion::new(3, 2, 0);
    let fw_a = firmware_image(a, 5000).unwrap();
    let fw_b = firmware_image(b, 7000).unwrap();

    let node = Node::start(&cfg, disk.boxed()).await.unwrap();
    assert_eq!(node.install_image(a, fw_a.clone()).await.unwrap().version, a);
    node.install_image(b, fw_b.clone()).await.unwrap();
    node.activate(a).await.unwrap();
    node.activate(b).await.unwrap();
    node.shutdown().await.unwrap();

    let node = Node::start(&cfg, disk.boxed()).await.unwrap();
    let dir = node.query_directory().await.unwrap();
    let state_of = |v| dir.slots.iter().find(|s| s.version == v).map(|s| s.state);
    assert_eq!(state_of(b), Some(SlotState::Active));
    assert_eq!(state_of(a), Some(SlotState::Backup));

    let back = node.read_image(b).await.unwrap();
    assert_eq!(&back[..fw_b.len()], &fw_b[..]);

    let err = node.delete_image(b).await.unwrap_err();
    assert!(matches!(err, NodeError::Storage(StorageError::Image(ImageError::InvalidState(SlotState::Active)))));
    node.eject(b).await.unwrap();
    let dir = node.query_directory().await.unwrap();
    assert!(dir.slots.iter().any(|s| s.version == a && s.state == SlotState::Active));
    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_image_releases_slot() {
    let (disk, _) = SharedDisk::formatted(16);
    let node = Node::start(&test_config(), disk.boxed()).await.unwrap();
    let v = ImageVersion::new(0, 0, 9);
    let mut fw = firmware_image(v, 2048).unwrap();
    fw[1500] ^= 0x40;

    let err = node.install_image(v, fw).await.unwrap_err();
    assert!(matches!(
        err,
        NodeError::Storage(StorageError::Image(ImageError::ImageChecksum { .. }))
    ));
    let dir = node.query_directory().await.unwrap();
    assert!(dir.slots.iter().all(|s| s.state == SlotState::Empty));

    let err = node.activate(v).await.unwrap_err();
    assert!(matches!(err, NodeError::Storage(StorageError::Image(ImageError::NotFound(_)))));
    node.shutdown().await.unwrap();
}
