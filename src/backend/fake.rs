//! File-backed emulator backend. Every zone is held in memory and mirrored
//! onto a plain regular file; the file's on-disk byout is an implementation
//! detail (out of scope) -- only the zone *semantics* are specified here.
//!
//! Unlike the transport backends, this one enforces write-pointer
//! discipline itself rather than delegating to a device, since there is no
//! device: it behaves like a strict host-managed drive.

use std::fs::{File, OpenOptions};
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::AsFd;
use std::path::Path;

use nix::sys::uio::{pread, pwrite};

use crate::backend::{Backend, BackendKind};
use crate::device::{capability, open_flags, DeviceInfo, DeviceType, ZoneModel};
use crate::error::{Result, ZbdError};
use crate::iovec::SECTOR_SIZE;
use crate::sense::{AscAscq, SenseKey};
use crate::zone::{self, ReportOption, ZoneCondition, ZoneDescriptor, ZoneOp, ZoneType};

/// Default per-command transfer cap, generous enough that it never
/// interferes with the zone-boundary clamping the backend does itself.
const DEFAULT_MAX_RW_SECTORS: u32 = 1 << 20;

pub struct FakeBackend {
    file: File,
    info: DeviceInfo,
    zones: Vec<ZoneDescriptor>,
}

/// Create (or truncate) a regular file sized to back an emulated device of
/// `capacity_sectors` 512-byte sectors. Convenience for tests and for
/// [`crate::config::save_fake_geometry`] fixtures.
pub fn create(path: &Path, capacity_sectors: u64) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
    file.set_len(capacity_sectors * SECTOR_SIZE)
}

pub fn open(path: &Path, flags: u32) -> Result<Box<dyn Backend>> {
    if flags & open_flags::O_DRV_FAKE == 0 {
        return Err(ZbdError::NotMyDevice);
    }
    if !path.is_file() {
        return Err(ZbdError::NotMyDevice);
    }

    let file = OpenOptions::new()
        .read(true)
        .write(open_flags::is_write(flags))
        .open(path)?;
    let len = file.metadata()?.len();
    let capacity_sectors = len / SECTOR_SIZE;

    let info = DeviceInfo {
        vendor: "FAKE".to_string(),
        device_type: DeviceType::Fake,
        zone_model: ZoneModel::HostManaged,
        capacity_sectors,
        capacity_lblocks: capacity_sectors,
        capacity_pblocks: capacity_sectors,
        logical_block_size: 512,
        physical_block_size: 512,
        capabilities: capability::UNRESTRICTED_READ,
        max_rw_sectors: DEFAULT_MAX_RW_SECTORS,
        ..DeviceInfo::default()
    };

    // A freshly opened backing file starts out as one big conventional
    // zone until `set_zones` carves it up; this keeps `open` itself
    // infallible with respect to zone layout.
    let zones = if capacity_sectors > 0 {
        vec![ZoneDescriptor {
            zone_type: ZoneType::Conventional,
            condition: ZoneCondition::NotWp,
            start: 0,
            length: capacity_sectors,
            write_pointer: 0,
            need_reset: false,
            non_seq: false,
        }]
    } else {
        Vec::new()
    };

    Ok(Box::new(FakeBackend { file, info, zones }))
}

impl FakeBackend {
    fn zone_index_at(&self, sector: u64) -> Option<usize> {
        self.zones.iter().position(|z| z.start <= sector && sector < z.end())
    }

    fn filtered<'a>(&'a self, start_sector: u64, options: u8) -> impl Iterator<Item = &'a ZoneDescriptor> + 'a {
        let option = ReportOption::from_wire(options);
        self.zones
            .iter()
            .filter(move |z| z.end() > start_sector)
            .filter(move |z| option.matches(z))
    }
}

impl Backend for FakeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fake
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn zone_count(&mut self, start_sector: u64, options: u8) -> Result<usize> {
        Ok(self.filtered(start_sector, options).count())
    }

    fn report_zones(&mut self, start_sector: u64, options: u8, max_count: usize) -> Result<Vec<ZoneDescriptor>> {
        Ok(self.filtered(start_sector, options).take(max_count).copied().collect())
    }

    fn zone_op(&mut self, sector: u64, op: ZoneOp, flags: u32) -> Result<()> {
        let all = flags & zone::zone_op_flags::ALL_ZONES != 0;
        let indices: Vec<usize> = if all {
            self.zones
                .iter()
                .enumerate()
                .filter(|(_, z)| z.zone_type.is_swr())
                .map(|(i, _)| i)
                .collect()
        } else {
            let idx = self
                .zone_index_at(sector)
                .ok_or_else(|| ZbdError::invalid(format!("no zone contains sector {sector}")))?;
            if !self.zones[idx].zone_type.is_swr() {
                return Err(ZbdError::invalid("zone operation on a conventional zone"));
            }
            vec![idx]
        };

        for idx in indices {
            let z = &mut self.zones[idx];
            let next = zone::apply_transition(z.condition, op)?;
            z.condition = next;
            z.write_pointer = match next {
                ZoneCondition::Empty => z.start,
                ZoneCondition::Full => z.end(),
                _ => z.write_pointer,
            };
        }
        Ok(())
    }

    fn preadv(&mut self, iov: &mut [IoSliceMut<'_>], sector_offset: u64) -> Result<u64> {
        let fd = self.file.as_fd();
        let mut total = 0u64;
        let mut byte_offset = (sector_offset * SECTOR_SIZE) as i64;
        for buf in iov.iter_mut() {
            let n = pread(fd, buf, byte_offset)?;
            total += (n as u64) / SECTOR_SIZE;
            byte_offset += n as i64;
            if n < buf.len() {
                break;
            }
        }
        Ok(total)
    }

    fn pwritev(&mut self, iov: &[IoSlice<'_>], sector_offset: u64) -> Result<u64> {
        let idx = self
            .zone_index_at(sector_offset)
            .ok_or_else(|| ZbdError::invalid(format!("no zone contains sector {sector_offset}")))?;
        let zone_is_swr = self.zones[idx].zone_type.is_swr();

        if zone_is_swr {
            let wp = self.zones[idx].write_pointer;
            if sector_offset != wp {
                return Err(ZbdError::device_from(
                    SenseKey::IllegalRequest,
                    AscAscq::WRITE_BOUNDARY_VIOLATION,
                ));
            }
        }

        // Never write past the zone's end in one go; a caller spanning
        // zones gets a short transfer and re-issues the remainder, which
        // will land at the start of the next zone.
        let zone_end = self.zones[idx].end();
        let max_sectors = zone_end - sector_offset;

        let fd = self.file.as_fd();
        let mut byte_offset = (sector_offset * SECTOR_SIZE) as i64;
        let mut total_sectors = 0u64;
        let mut remaining_sectors = max_sectors;

        for buf in iov.iter() {
            if remaining_sectors == 0 {
                break;
            }
            let cap_bytes = (remaining_sectors * SECTOR_SIZE).min(buf.len() as u64) as usize;
            let slice = &buf[..cap_bytes];
            let n = pwrite(fd, slice, byte_offset)?;
            let sectors = (n as u64) / SECTOR_SIZE;
            total_sectors += sectors;
            remaining_sectors -= sectors;
            byte_offset += n as i64;
            if n < slice.len() {
                break;
            }
        }

        if zone_is_swr && total_sectors > 0 {
            let z = &mut self.zones[idx];
            let new_wp = z.write_pointer + total_sectors;
            z.condition = zone::write_transition(z.condition, new_wp, z.end());
            z.write_pointer = new_wp;
        }

        Ok(total_sectors)
    }

    fn flush(&mut self) -> Result<()> {
        self.file.sync_data().map_err(ZbdError::from)
    }

    fn set_zones(&mut self, conv_size: u64, zone_size: u64) -> Result<()> {
        if zone_size == 0 {
            return Err(ZbdError::invalid("zone_size must be nonzero"));
        }
        let capacity = self.info.capacity_sectors;
        let mut zones = Vec::new();
        let mut start = 0u64;

        if conv_size > 0 {
            let len = conv_size.min(capacity);
            zones.push(ZoneDescriptor {
                zone_type: ZoneType::Conventional,
                condition: ZoneCondition::NotWp,
                start: 0,
                length: len,
                write_pointer: 0,
                need_reset: false,
                non_seq: false,
            });
            start = len;
        }

        while start < capacity {
            let len = zone_size.min(capacity - start);
            zones.push(ZoneDescriptor {
                zone_type: ZoneType::SequentialReq,
                condition: ZoneCondition::Empty,
                start,
                length: len,
                write_pointer: start,
                need_reset: false,
                non_seq: false,
            });
            start += len;
        }

        self.zones = zones;
        Ok(())
    }

    fn set_write_pointer(&mut self, sector: u64, wp_sector: u64) -> Result<()> {
        let idx = self
            .zone_index_at(sector)
            .ok_or_else(|| ZbdError::invalid(format!("no zone contains sector {sector}")))?;
        let z = &mut self.zones[idx];
        if !z.zone_type.is_swr() {
            return Err(ZbdError::invalid("cannot set write pointer on a conventional zone"));
        }
        if !(z.start..=z.end()).contains(&wp_sector) {
            return Err(ZbdError::invalid("write pointer outside zone bounds"));
        }
        z.write_pointer = wp_sector;
        z.condition = zone::write_transition(ZoneCondition::Closed, wp_sector, z.end());
        if wp_sector == z.start {
            z.condition = ZoneCondition::Empty;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn open_fake(capacity_sectors: u64) -> Box<dyn Backend> {
        let tmp = NamedTempFile::new().unwrap();
        create(tmp.path(), capacity_sectors).unwrap();
        let backend = open(tmp.path(), open_flags::O_DRV_FAKE | open_flags::RDWR).unwrap();
        std::mem::forget(tmp); // keep the file alive for the backend's lifetime in this test
        backend
    }

    #[test]
    fn rejects_when_fake_not_requested() {
        let tmp = NamedTempFile::new().unwrap();
        create(tmp.path(), 2048).unwrap();
        let err = open(tmp.path(), open_flags::RDWR).unwrap_err();
        assert!(matches!(err, ZbdError::NotMyDevice));
    }

    #[test]
    fn set_zones_lays_out_conventional_then_sequential() {
        let mut backend = open_fake(262144 + 15 * 131072);
        backend.set_zones(262144, 131072).unwrap();
        let total = backend.zone_count(0, 0).unwrap();
        assert_eq!(total, 16);

        let zones = backend.report_zones(0, 0, 16).unwrap();
        assert_eq!(zones[0].zone_type, ZoneType::Conventional);
        assert_eq!(zones[0].length, 262144);
        for z in &zones[1..] {
            assert_eq!(z.zone_type, ZoneType::SequentialReq);
            assert_eq!(z.condition, ZoneCondition::Empty);
            assert_eq!(z.write_pointer, z.start);
            assert_eq!(z.length, 131072);
        }
    }

    #[test]
    fn sequential_write_advances_pointer_and_opens_zone() {
        let mut backend = open_fake(262144 + 131072);
        backend.set_zones(262144, 131072).unwrap();

        let buf = vec![0xABu8; 4096 * 512];
        let iov = [IoSlice::new(&buf)];
        let n = backend.pwritev(&iov, 262144).unwrap();
        assert_eq!(n, 4096);

        let zones = backend.report_zones(262144, 0, 1).unwrap();
        assert_eq!(zones[0].condition, ZoneCondition::ImpOpen);
        assert_eq!(zones[0].write_pointer, 262144 + 4096);
    }

    #[test]
    fn misaligned_write_pointer_is_rejected() {
        let mut backend = open_fake(262144 + 131072);
        backend.set_zones(262144, 131072).unwrap();

        let buf = vec![0u8; 512];
        let iov = [IoSlice::new(&buf)];
        let err = backend.pwritev(&iov, 262144 + 1).unwrap_err();
        assert!(matches!(err, ZbdError::Device { .. }));
    }

    #[test]
    fn reset_zone_returns_to_empty() {
        let mut backend = open_fake(262144 + 131072);
        backend.set_zones(262144, 131072).unwrap();
        let buf = vec![0u8; 4096 * 512];
        backend.pwritev(&[IoSlice::new(&buf)], 262144).unwrap();

        backend.zone_op(262144, ZoneOp::Reset, 0).unwrap();
        let zones = backend.report_zones(262144, 0, 1).unwrap();
        assert_eq!(zones[0].condition, ZoneCondition::Empty);
        assert_eq!(zones[0].write_pointer, 262144);
    }

    #[test]
    fn reset_all_zones_spares_conventional() {
        let mut backend = open_fake(262144 + 2 * 131072);
        backend.set_zones(262144, 131072).unwrap();
        let buf = vec![0u8; 4096 * 512];
        backend.pwritev(&[IoSlice::new(&buf)], 262144).unwrap();

        backend
            .zone_op(0, ZoneOp::Reset, zone::zone_op_flags::ALL_ZONES)
            .unwrap();
        let zones = backend.report_zones(0, 0, 3).unwrap();
        assert_eq!(zones[0].zone_type, ZoneType::Conventional);
        assert_eq!(zones[1].condition, ZoneCondition::Empty);
        assert_eq!(zones[2].condition, ZoneCondition::Empty);
    }

    #[test]
    fn fresh_device_reports_zero_full_zones() {
        let mut backend = open_fake(262144 + 131072);
        backend.set_zones(262144, 131072).unwrap();
        let count = backend.zone_count(0, 0x5 /* FULL */).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn explicit_open_then_close_round_trips_through_closed() {
        let mut backend = open_fake(262144 + 131072);
        backend.set_zones(262144, 131072).unwrap();

        backend.zone_op(262144, ZoneOp::Open, 0).unwrap();
        let zones = backend.report_zones(262144, 0, 1).unwrap();
        assert_eq!(zones[0].condition, ZoneCondition::ExpOpen);
        assert_eq!(zones[0].write_pointer, 262144);

        backend.zone_op(262144, ZoneOp::Close, 0).unwrap();
        let zones = backend.report_zones(262144, 0, 1).unwrap();
        assert_eq!(zones[0].condition, ZoneCondition::Closed);
    }

    #[test]
    fn close_on_empty_zone_is_rejected() {
        let mut backend = open_fake(262144 + 131072);
        backend.set_zones(262144, 131072).unwrap();

        let err = backend.zone_op(262144, ZoneOp::Close, 0).unwrap_err();
        assert!(matches!(err, ZbdError::InvalidArgument(_)));
    }

    #[test]
    fn open_on_conventional_zone_is_rejected() {
        let mut backend = open_fake(262144 + 131072);
        backend.set_zones(262144, 131072).unwrap();

        let err = backend.zone_op(0, ZoneOp::Open, 0).unwrap_err();
        assert!(matches!(err, ZbdError::InvalidArgument(_)));
    }
}
