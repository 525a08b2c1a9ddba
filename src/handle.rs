//! Per-opened-device state. Owns the backend
//! exclusively; `Drop` is this rendition's `close`.

use std::io::{IoSlice, IoSliceMut};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::backend::Backend;
use crate::device::DeviceInfo;
use crate::dispatch;
use crate::error::{Result, ZbdError};
use crate::iovec::{self, SECTOR_SIZE};
use crate::report;
use crate::zone::{ZoneDescriptor, ZoneOp};

/// A single opened zoned device. Not `Sync`/shareable across threads
/// without external synchronisation -- see the concurrency notes in the
/// crate's top-level docs.
pub struct DeviceHandle {
    path: PathBuf,
    backend: Box<dyn Backend>,
    test_mode: bool,
}

impl DeviceHandle {
    /// Probe backends in the fixed order and open `path`. See
    /// [`crate::dispatch::open`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_flags(path, 0)
    }

    pub fn open_with_flags(path: impl AsRef<Path>, flags: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let backend = dispatch::open(&path, flags)?;
        debug!(path = %path.display(), backend = ?backend.kind(), "device opened");
        Ok(Self { path, backend, test_mode: false })
    }

    /// Relax alignment checks in the splitter; used by tests exercising
    /// misaligned requests against the fake backend without real hardware
    /// behind it.
    pub fn set_test_mode(&mut self, enabled: bool) {
        self.test_mode = enabled;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &DeviceInfo {
        self.backend.info()
    }

    pub fn zone_count(&mut self, start_sector: u64, options: u8) -> Result<usize> {
        report::zone_count(self.backend.as_mut(), start_sector, options)
    }

    pub fn report_zones(&mut self, start_sector: u64, options: u8, max_count: usize) -> Result<Vec<ZoneDescriptor>> {
        report::report_zones(self.backend.as_mut(), start_sector, options, max_count)
    }

    pub fn list_zones(&mut self, start_sector: u64, options: u8) -> Result<Vec<ZoneDescriptor>> {
        report::list_zones(self.backend.as_mut(), start_sector, options)
    }

    pub fn zone_op(&mut self, sector: u64, op: ZoneOp, flags: u32) -> Result<()> {
        debug!(sector, op = ?op, flags, "zone management op");
        self.backend.zone_op(sector, op, flags)
    }

    /// Read `total_sectors` worth of data starting at `sector_offset` into
    /// `bufs`, splitting into device-legal chunks via [`crate::iovec`].
    pub fn preadv(&mut self, bufs: &mut [&mut [u8]], sector_offset: u64) -> Result<u64> {
        if bufs.is_empty() {
            return Err(ZbdError::invalid("empty iovec"));
        }
        let lens: Vec<usize> = bufs.iter().map(|b| b.len()).collect();
        let info = self.backend.info().clone();
        let backend = &mut self.backend;

        iovec::execute_vectored(
            &lens,
            sector_offset,
            info.logical_block_size,
            info.physical_block_size,
            info.max_rw_sectors,
            info.capacity_sectors,
            false,
            self.test_mode,
            move |plan, offset| {
                let mut scratch: Vec<IoSliceMut<'_>> = plan
                    .iter()
                    .map(|e| IoSliceMut::new(&mut bufs[e.iov_index][e.offset..e.offset + e.len]))
                    .collect();
                backend.preadv(&mut scratch, offset)
            },
        )
    }

    /// Write `bufs` starting at `sector_offset`. See [`Self::preadv`] for
    /// the splitting behaviour.
    pub fn pwritev(&mut self, bufs: &[&[u8]], sector_offset: u64) -> Result<u64> {
        if bufs.is_empty() {
            return Err(ZbdError::invalid("empty iovec"));
        }
        let lens: Vec<usize> = bufs.iter().map(|b| b.len()).collect();
        let info = self.backend.info().clone();
        let backend = &mut self.backend;

        iovec::execute_vectored(
            &lens,
            sector_offset,
            info.logical_block_size,
            info.physical_block_size,
            info.max_rw_sectors,
            info.capacity_sectors,
            true,
            self.test_mode,
            move |plan, offset| {
                let scratch: Vec<IoSlice<'_>> = plan.iter().map(|e| IoSlice::new(&bufs[e.iov_index][e.offset..e.offset + e.len])).collect();
                backend.pwritev(&scratch, offset)
            },
        )
    }

    pub fn flush(&mut self) -> Result<()> {
        self.backend.flush()
    }

    /// Emulator-only: redefine zone geometry. See
    /// [`crate::backend::Backend::set_zones`].
    pub fn set_zones(&mut self, conv_size: u64, zone_size: u64) -> Result<()> {
        self.backend.set_zones(conv_size, zone_size)
    }

    /// Emulator-only: force a zone's write pointer for test fixtures.
    pub fn set_write_pointer(&mut self, sector: u64, wp_sector: u64) -> Result<()> {
        self.backend.set_write_pointer(sector, wp_sector)
    }
}

/// Byte-convenience wrappers for callers who'd rather count bytes than
/// sectors; all internal plumbing still speaks 512-byte sectors.
impl DeviceHandle {
    pub fn sector_size() -> u64 {
        SECTOR_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake;
    use crate::device::open_flags;
    use tempfile::NamedTempFile;

    fn handle_with_zones(capacity_sectors: u64, conv: u64, zone: u64) -> DeviceHandle {
        let tmp = NamedTempFile::new().unwrap();
        fake::create(tmp.path(), capacity_sectors).unwrap();
        let path = tmp.path().to_path_buf();
        std::mem::forget(tmp);
        let mut handle = DeviceHandle::open_with_flags(&path, open_flags::O_DRV_FAKE | open_flags::RDWR).unwrap();
        handle.set_zones(conv, zone).unwrap();
        handle
    }

    #[test]
    fn end_to_end_layout_and_write_and_reset() {
        let mut handle = handle_with_zones(262144 + 15 * 131072, 262144, 131072);

        let zones = handle.list_zones(0, 0).unwrap();
        assert_eq!(zones.len(), 16);
        assert_eq!(zones[0].start, 0);
        assert_eq!(zones[0].length, 262144);
        for z in &zones[1..] {
            assert_eq!(z.length, 131072);
            assert_eq!(z.write_pointer, z.start);
        }

        let buf = vec![0xCCu8; 4096 * 512];
        let n = handle.pwritev(&[&buf], 262144).unwrap();
        assert_eq!(n, 4096);

        let zones = handle.report_zones(262144, 0, 1).unwrap();
        assert_eq!(zones[0].write_pointer, 262144 + 4096);

        handle.zone_op(262144, ZoneOp::Reset, 0).unwrap();
        let zones = handle.report_zones(262144, 0, 1).unwrap();
        assert_eq!(zones[0].write_pointer, 262144);
    }

    #[test]
    fn read_clamps_at_end_of_device() {
        let mut handle = handle_with_zones(16, 16, 131072);
        let capacity = handle.info().capacity_sectors;
        let mut buf = vec![0u8; 8 * 512];
        let n = handle.preadv(&mut [&mut buf], capacity - 4).unwrap();
        assert_eq!(n, 4);
    }
}
