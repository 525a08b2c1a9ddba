//! Probe the fixed backend list in order, picking
//! the first that accepts the target path.

use std::path::Path;

use tracing::{debug, warn};

use crate::backend::{fake, Backend, OpenFn};
use crate::device::open_flags;
use crate::error::{Result, ZbdError};

/// Probing order is part of the on-wire contract: a path that could be
/// opened by more than one backend always resolves to the first match
/// here, never the others.
const PROBE_ORDER: &[(u32, OpenFn, &str)] = &[
    (open_flags::O_DRV_BLOCK, crate::backend::block::open, "block"),
    (open_flags::O_DRV_SCSI, crate::backend::scsi::open, "scsi"),
    (open_flags::O_DRV_ATA, crate::backend::ata::open, "ata"),
    (open_flags::O_DRV_FAKE, fake::open, "fake"),
];

/// Resolve symlinks, then try each backend in [`PROBE_ORDER`] filtered by
/// `open_flags::driver_mask(flags)`. A backend declining with
/// [`ZbdError::NotMyDevice`] is not fatal; any other error is.
pub fn open(path: &Path, flags: u32) -> Result<Box<dyn Backend>> {
    let canonical = std::fs::canonicalize(path)?;
    let mask = open_flags::driver_mask(flags);

    for &(bit, open_fn, name) in PROBE_ORDER {
        if mask & bit == 0 {
            continue;
        }
        debug!(backend = name, path = %canonical.display(), "probing backend");
        match open_fn(&canonical, flags) {
            Ok(backend) => return Ok(backend),
            Err(ZbdError::NotMyDevice) => continue,
            Err(err) => {
                warn!(backend = name, error = %err, "backend open failed fatally");
                return Err(err);
            }
        }
    }

    Err(ZbdError::NoDevice)
}

/// `is_zoned(path, fake_ok)`: open-then-close with a strictness flag. `Ok(true)`
/// means a zoned backend accepted the device; `Ok(false)` means none did
/// (or only the emulator did and `fake_ok` was false).
pub fn is_zoned(path: &Path, fake_ok: bool) -> Result<bool> {
    let flags = if fake_ok {
        open_flags::O_DRV_ALL
    } else {
        open_flags::O_DRV_BLOCK | open_flags::O_DRV_SCSI | open_flags::O_DRV_ATA
    } | open_flags::RDONLY;

    match open(path, flags) {
        Ok(backend) => Ok(backend.info().zone_model != crate::device::ZoneModel::Standard),
        Err(ZbdError::NoDevice) => Ok(false),
        Err(err) => Err(err),
    }
}
