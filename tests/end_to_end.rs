//! The six literal end-to-end scenarios, exercised against the fake
//! backend only (no real hardware is available in this harness).

use tempfile::NamedTempFile;
use zbd::device::open_flags;
use zbd::handle::DeviceHandle;
use zbd::zone::{ZoneCondition, ZoneOp, ZoneType};

const CONV_SIZE: u64 = 262_144; // 128 MiB in 512-byte sectors
const ZONE_SIZE: u64 = 131_072; // 64 MiB in 512-byte sectors
const SEQ_ZONE_COUNT: u64 = 15;
const CAPACITY: u64 = CONV_SIZE + SEQ_ZONE_COUNT * ZONE_SIZE;

fn open_emulator(capacity_sectors: u64) -> DeviceHandle {
    let tmp = NamedTempFile::new().unwrap();
    zbd::backend::fake::create(tmp.path(), capacity_sectors).unwrap();
    let path = tmp.path().to_path_buf();
    std::mem::forget(tmp);
    DeviceHandle::open_with_flags(&path, open_flags::O_DRV_FAKE | open_flags::RDWR).unwrap()
}

#[test]
fn scenario_1_fresh_layout() {
    let mut handle = open_emulator(CAPACITY);
    handle.set_zones(CONV_SIZE, ZONE_SIZE).unwrap();

    let zones = handle.list_zones(0, 0).unwrap();
    assert_eq!(zones.len(), 16);

    assert_eq!(zones[0].zone_type, ZoneType::Conventional);
    assert_eq!(zones[0].start, 0);
    assert_eq!(zones[0].length, CONV_SIZE);

    for (i, z) in zones[1..].iter().enumerate() {
        assert_eq!(z.zone_type, ZoneType::SequentialReq);
        assert_eq!(z.condition, ZoneCondition::Empty);
        assert_eq!(z.length, ZONE_SIZE);
        assert_eq!(z.start, CONV_SIZE + i as u64 * ZONE_SIZE);
        assert_eq!(z.write_pointer, z.start);
    }
}

#[test]
fn scenario_2_aligned_write_opens_zone() {
    let mut handle = open_emulator(CAPACITY);
    handle.set_zones(CONV_SIZE, ZONE_SIZE).unwrap();

    let buf = vec![0x5Au8; 4096 * 512];
    let transferred = handle.pwritev(&[&buf], CONV_SIZE).unwrap();
    assert_eq!(transferred, 4096);

    let zone = &handle.report_zones(CONV_SIZE, 0, 1).unwrap()[0];
    assert_eq!(zone.condition, ZoneCondition::ImpOpen);
    assert_eq!(zone.write_pointer, CONV_SIZE + 4096);
}

#[test]
fn scenario_3_misaligned_write_is_rejected_and_state_unchanged() {
    let mut handle = open_emulator(CAPACITY);
    handle.set_zones(CONV_SIZE, ZONE_SIZE).unwrap();

    let before = handle.report_zones(CONV_SIZE, 0, 1).unwrap()[0];

    let buf = vec![0u8; 512];
    let err = handle.pwritev(&[&buf], CONV_SIZE + 1).unwrap_err();
    assert!(matches!(err, zbd::ZbdError::Device { .. } | zbd::ZbdError::InvalidArgument(_)));

    let after = handle.report_zones(CONV_SIZE, 0, 1).unwrap()[0];
    assert_eq!(before, after);
}

#[test]
fn scenario_4_read_clamped_at_end_of_device() {
    let mut handle = open_emulator(CAPACITY);
    handle.set_zones(CONV_SIZE, ZONE_SIZE).unwrap();
    handle.set_test_mode(true); // the backing file isn't a real block device, alignment is irrelevant here

    let mut buf = vec![0u8; 8 * 512];
    let transferred = handle.preadv(&mut [&mut buf], CAPACITY - 4).unwrap();
    assert_eq!(transferred, 4);
}

#[test]
fn scenario_5_reset_single_and_all_zones() {
    let mut handle = open_emulator(CAPACITY);
    handle.set_zones(CONV_SIZE, ZONE_SIZE).unwrap();

    let buf = vec![0xAAu8; 4096 * 512];
    handle.pwritev(&[&buf], CONV_SIZE).unwrap();
    handle.pwritev(&[&buf], CONV_SIZE + ZONE_SIZE).unwrap();

    handle.zone_op(CONV_SIZE, ZoneOp::Reset, 0).unwrap();
    let zone1 = &handle.report_zones(CONV_SIZE, 0, 1).unwrap()[0];
    assert_eq!(zone1.condition, ZoneCondition::Empty);
    assert_eq!(zone1.write_pointer, CONV_SIZE);

    handle.zone_op(0, ZoneOp::Reset, zbd::zone::zone_op_flags::ALL_ZONES).unwrap();
    let all = handle.list_zones(0, 0).unwrap();
    assert_eq!(all[0].zone_type, ZoneType::Conventional);
    for z in &all[1..] {
        assert_eq!(z.condition, ZoneCondition::Empty);
        assert_eq!(z.write_pointer, z.start);
    }
}

#[test]
fn scenario_7_explicit_open_and_close_through_the_handle() {
    let mut handle = open_emulator(CAPACITY);
    handle.set_zones(CONV_SIZE, ZONE_SIZE).unwrap();

    handle.zone_op(CONV_SIZE, ZoneOp::Open, 0).unwrap();
    let zone = &handle.report_zones(CONV_SIZE, 0, 1).unwrap()[0];
    assert_eq!(zone.condition, ZoneCondition::ExpOpen);
    assert_eq!(zone.write_pointer, CONV_SIZE);

    handle.zone_op(CONV_SIZE, ZoneOp::Close, 0).unwrap();
    let zone = &handle.report_zones(CONV_SIZE, 0, 1).unwrap()[0];
    assert_eq!(zone.condition, ZoneCondition::Closed);

    // a write into a closed zone implicitly re-opens it at the same pointer
    let buf = vec![0x11u8; 512];
    handle.pwritev(&[&buf], CONV_SIZE).unwrap();
    let zone = &handle.report_zones(CONV_SIZE, 0, 1).unwrap()[0];
    assert_eq!(zone.condition, ZoneCondition::ImpOpen);
    assert_eq!(zone.write_pointer, CONV_SIZE + 1);
}

#[test]
fn scenario_6_fresh_device_has_no_full_zones() {
    let mut handle = open_emulator(CAPACITY);
    handle.set_zones(CONV_SIZE, ZONE_SIZE).unwrap();

    const FULL: u8 = 0x5;
    let full_zones = handle.report_zones(0, FULL, 64).unwrap();
    assert!(full_zones.is_empty());
}
