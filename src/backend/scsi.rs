//! Native SCSI ZBC backend: REPORT ZONES(16)/ZONE MANAGEMENT OUT against a
//! `/dev/sg*` node through the same SG_IO transport shim the ATA backend
//! uses, but with genuine SCSI CDBs -- no ATA-PASS-THROUGH wrapper.

use std::fs::OpenOptions;
use std::io::{IoSlice, IoSliceMut};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::backend::{Backend, BackendKind};
use crate::cdb;
use crate::device::{open_flags, DeviceInfo, DeviceType, ZoneModel};
use crate::error::{Result, ZbdError};
use crate::iovec::SECTOR_SIZE;
use crate::transport::{self, Direction};
use crate::zone::{self, ReportOption, ZoneDescriptor, ZoneOp};

const DEFAULT_TIMEOUT_MS: u32 = 30_000;

const OP_REPORT_ZONES_16: u8 = 0x95;
const OP_ZONE_MANAGEMENT_OUT: u8 = 0x94;
const OP_READ_16: u8 = 0x88;
const OP_WRITE_16: u8 = 0x8a;
const OP_SERVICE_ACTION_IN_16: u8 = 0x9e;
const SA_READ_CAPACITY_16: u8 = 0x10;

const MAX_SCSI_BLOCKS: u32 = u32::MAX;

fn zone_management_service_action(op: ZoneOp) -> u8 {
    match op {
        ZoneOp::Close => 0x01,
        ZoneOp::Finish => 0x02,
        ZoneOp::Open => 0x03,
        ZoneOp::Reset => 0x04,
    }
}

fn build_report_zones_16(start_sector_in_lblocks: u64, alloc_len: u32, options: u8, partial: bool) -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = OP_REPORT_ZONES_16;
    cdb[1] = 0x00; // REPORT ZONES service action
    cdb[2..10].copy_from_slice(&start_sector_in_lblocks.to_be_bytes());
    cdb[10..14].copy_from_slice(&alloc_len.to_be_bytes());
    cdb[14] = (options & 0x3f) | if partial { 0x80 } else { 0 };
    cdb
}

fn build_zone_management_out(sector_in_lblocks: u64, op: ZoneOp, all_zones: bool) -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = OP_ZONE_MANAGEMENT_OUT;
    cdb[1] = zone_management_service_action(op);
    cdb[2..10].copy_from_slice(&sector_in_lblocks.to_be_bytes());
    cdb[14] = all_zones as u8;
    cdb
}

fn build_read_16(lba: u64, blocks: u32) -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = OP_READ_16;
    cdb[2..10].copy_from_slice(&lba.to_be_bytes());
    cdb[10..14].copy_from_slice(&blocks.to_be_bytes());
    cdb
}

fn build_write_16(lba: u64, blocks: u32) -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = OP_WRITE_16;
    cdb[2..10].copy_from_slice(&lba.to_be_bytes());
    cdb[10..14].copy_from_slice(&blocks.to_be_bytes());
    cdb
}

fn build_read_capacity_16() -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = OP_SERVICE_ACTION_IN_16;
    cdb[1] = SA_READ_CAPACITY_16;
    cdb[13] = 32;
    cdb
}

pub struct ScsiBackend {
    file: std::fs::File,
    info: DeviceInfo,
}

/// SCSI Peripheral Device Type field from the standard INQUIRY reply,
/// offset 0 bits 4:0. `0x14` is "Host managed zoned block device".
const PDT_ZBC_HOST_MANAGED: u8 = 0x14;

fn probe_zbc(fd: std::os::unix::io::RawFd) -> Result<()> {
    let mut cdb = [0u8; 6];
    cdb[0] = 0x12; // INQUIRY
    cdb[4] = 36;
    let mut reply = [0u8; 36];
    transport::execute(fd, &cdb, Direction::FromDevice(&mut reply), DEFAULT_TIMEOUT_MS)?;
    if reply[0] & 0x1f != PDT_ZBC_HOST_MANAGED {
        return Err(ZbdError::NotMyDevice);
    }
    Ok(())
}

pub fn open(path: &Path, flags: u32) -> Result<Box<dyn Backend>> {
    if open_flags::driver_mask(flags) & open_flags::O_DRV_SCSI == 0 {
        return Err(ZbdError::NotMyDevice);
    }

    let file = OpenOptions::new()
        .read(true)
        .write(open_flags::is_write(flags))
        .open(path)?;
    let fd = file.as_raw_fd();

    probe_zbc(fd)?;

    let mut reply = [0u8; 32];
    transport::execute(fd, &build_read_capacity_16(), Direction::FromDevice(&mut reply), DEFAULT_TIMEOUT_MS)?;
    let (last_lba, logical_block_size) = cdb::decode_read_capacity_16(&reply)?;
    let capacity_lblocks = last_lba + 1;
    let capacity_sectors = capacity_lblocks * (logical_block_size as u64 / SECTOR_SIZE);

    let info = DeviceInfo {
        vendor: "SCSI-ZBC".to_string(),
        device_type: DeviceType::Scsi,
        zone_model: ZoneModel::HostManaged,
        capacity_sectors,
        capacity_lblocks,
        capacity_pblocks: capacity_lblocks,
        logical_block_size,
        physical_block_size: logical_block_size,
        capabilities: 0,
        max_rw_sectors: MAX_SCSI_BLOCKS,
        ..DeviceInfo::default()
    };

    Ok(Box::new(ScsiBackend { file, info }))
}

impl ScsiBackend {
    fn lblock_of(&self, sector: u64) -> u64 {
        sector / (self.info.logical_block_size as u64 / SECTOR_SIZE).max(1)
    }

    /// The SCSI REPORT ZONES(16) reply uses the same 64-byte
    /// header-plus-descriptor shape as the ATA Report Zones log page, so
    /// this reuses [`cdb::parse_report_zones_log`] rather than a second
    /// near-identical parser.
    fn report_raw(&self, start_sector: u64, max_zones: usize, options: u8) -> Result<Vec<ZoneDescriptor>> {
        let header_len = 64usize;
        let entry_len = 64usize;
        let alloc_len = (header_len + max_zones.max(1) * entry_len) as u32;
        let mut buf = vec![0u8; alloc_len as usize];
        let cdb_bytes = build_report_zones_16(self.lblock_of(start_sector), alloc_len, options, true);
        transport::execute(self.file.as_raw_fd(), &cdb_bytes, Direction::FromDevice(&mut buf), DEFAULT_TIMEOUT_MS)?;
        cdb::parse_report_zones_log(&buf)
    }
}

impl Backend for ScsiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Scsi
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn zone_count(&mut self, start_sector: u64, options: u8) -> Result<usize> {
        let option = ReportOption::from_wire(options);
        let zones = self.report_raw(start_sector, 1 << 16, options)?;
        Ok(zones.iter().filter(|z| option.matches(z)).count())
    }

    fn report_zones(&mut self, start_sector: u64, options: u8, max_count: usize) -> Result<Vec<ZoneDescriptor>> {
        let option = ReportOption::from_wire(options);
        let zones = self.report_raw(start_sector, max_count, options)?;
        Ok(zones.into_iter().filter(|z| option.matches(z)).take(max_count).collect())
    }

    fn zone_op(&mut self, sector: u64, op: ZoneOp, flags: u32) -> Result<()> {
        let all = flags & zone::zone_op_flags::ALL_ZONES != 0;
        let cdb_bytes = build_zone_management_out(self.lblock_of(sector), op, all);
        transport::execute(self.file.as_raw_fd(), &cdb_bytes, Direction::None, DEFAULT_TIMEOUT_MS)?;
        Ok(())
    }

    fn preadv(&mut self, iov: &mut [IoSliceMut<'_>], sector_offset: u64) -> Result<u64> {
        let mut total_sectors = 0u64;
        let mut lba = self.lblock_of(sector_offset);
        for buf in iov.iter_mut() {
            let blocks = (buf.len() as u64 / self.info.logical_block_size as u64).min(MAX_SCSI_BLOCKS as u64) as u32;
            let cdb_bytes = build_read_16(lba, blocks);
            let want = blocks as usize * self.info.logical_block_size as usize;
            let outcome = transport::execute(self.file.as_raw_fd(), &cdb_bytes, Direction::FromDevice(&mut buf[..want]), DEFAULT_TIMEOUT_MS)?;
            let got_blocks = outcome.transferred as u64 / self.info.logical_block_size as u64;
            total_sectors += got_blocks * (self.info.logical_block_size as u64 / SECTOR_SIZE);
            lba += got_blocks;
            if outcome.transferred < want {
                break;
            }
        }
        Ok(total_sectors)
    }

    fn pwritev(&mut self, iov: &[IoSlice<'_>], sector_offset: u64) -> Result<u64> {
        let mut total_sectors = 0u64;
        let mut lba = self.lblock_of(sector_offset);
        for buf in iov.iter() {
            let blocks = (buf.len() as u64 / self.info.logical_block_size as u64).min(MAX_SCSI_BLOCKS as u64) as u32;
            let cdb_bytes = build_write_16(lba, blocks);
            let want = blocks as usize * self.info.logical_block_size as usize;
            let outcome = transport::execute(self.file.as_raw_fd(), &cdb_bytes, Direction::ToDevice(&buf[..want]), DEFAULT_TIMEOUT_MS)?;
            let got_blocks = outcome.transferred as u64 / self.info.logical_block_size as u64;
            total_sectors += got_blocks * (self.info.logical_block_size as u64 / SECTOR_SIZE);
            lba += got_blocks;
            if outcome.transferred < want {
                break;
            }
        }
        Ok(total_sectors)
    }

    fn flush(&mut self) -> Result<()> {
        let mut cdb = [0u8; 10];
        cdb[0] = 0x35; // SYNCHRONIZE CACHE(10)
        transport::execute(self.file.as_raw_fd(), &cdb, Direction::None, DEFAULT_TIMEOUT_MS)?;
        Ok(())
    }
}
