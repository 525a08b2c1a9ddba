//! Userspace library for zoned block devices: SCSI/ZBC, ATA/ZAC, the Linux
//! kernel's native `BLKZONED` ioctls, and a file-backed emulator, behind
//! one device abstraction.

pub mod backend;
pub mod cdb;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod iovec;
pub mod logging;
pub mod report;
pub mod sense;
pub mod transport;
pub mod zone;

pub use device::{open_flags, DeviceInfo, DeviceType, ZoneModel};
pub use dispatch::is_zoned;
pub use error::{Result, ZbdError};
pub use handle::DeviceHandle;
// Note: the `cdb` and `transport` modules are not re-exported via `use *`
// -- reach for `zbd::cdb::*`/`zbd::transport::*` directly when assembling
// raw commands; most callers only need the handle-level API above.
pub use zone::{ReportOption, ZoneCondition, ZoneDescriptor, ZoneOp, ZoneType};
