//! Four interchangeable backend implementations behind one
//! trait -- a plain Rust trait object standing in for the vtable of
//! function pointers a C library would use here, which keeps the ordered
//! probing in [`crate::dispatch`] intact without reaching for
//! function-pointer tables directly.

pub mod ata;
pub mod block;
pub mod fake;
pub mod scsi;

use std::io::{IoSlice, IoSliceMut};
use std::path::Path;

use crate::device::DeviceInfo;
use crate::error::Result;
use crate::zone::{ZoneDescriptor, ZoneOp};

/// Which concrete backend is behind a [`crate::handle::DeviceHandle`].
/// Mirrors [`crate::device::DeviceType`] but lives at the dispatch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Block,
    Scsi,
    Ata,
    Fake,
}

/// The common surface every backend implements. `open` is a free function
/// per backend module (see [`crate::dispatch`]) rather than a trait method,
/// since it runs *before* a `Box<dyn Backend>` exists.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;
    fn info(&self) -> &DeviceInfo;

    /// Total zones matching `options` from `start_sector` to end of device.
    /// A single round-trip on real hardware (the report header carries the
    /// full matching count even when the data buffer is too small to hold
    /// it); the emulator answers from its in-memory model directly.
    fn zone_count(&mut self, start_sector: u64, options: u8) -> Result<usize>;

    /// One paginated round: at most `max_count` descriptors, and at most
    /// this backend's own internal page limit -- callers must loop.
    fn report_zones(&mut self, start_sector: u64, options: u8, max_count: usize) -> Result<Vec<ZoneDescriptor>>;

    fn zone_op(&mut self, sector: u64, op: ZoneOp, flags: u32) -> Result<()>;

    fn preadv(&mut self, iov: &mut [IoSliceMut<'_>], sector_offset: u64) -> Result<u64>;
    fn pwritev(&mut self, iov: &[IoSlice<'_>], sector_offset: u64) -> Result<u64>;

    fn flush(&mut self) -> Result<()>;

    /// Emulator-only: redefine geometry. Other backends return
    /// `ZbdError::Unsupported`.
    fn set_zones(&mut self, _conv_size: u64, _zone_size: u64) -> Result<()> {
        Err(crate::error::ZbdError::Unsupported("set_zones"))
    }

    /// Emulator-only: force a zone's write pointer for test fixtures.
    fn set_write_pointer(&mut self, _sector: u64, _wp_sector: u64) -> Result<()> {
        Err(crate::error::ZbdError::Unsupported("set_write_pointer"))
    }
}

/// Per-backend `open`. Declining a device (`NotMyDevice`) is not a failure
/// from the dispatcher's point of view; any other `Err` is fatal and is
/// surfaced immediately.
pub(crate) type OpenFn = fn(&Path, u32) -> Result<Box<dyn Backend>>;
