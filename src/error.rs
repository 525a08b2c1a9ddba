//! Crate-wide error taxonomy.
//!
//! Every fallible boundary in the library returns [`ZbdError`]. Backend code
//! is free to use `?` against `std::io::Error` and `nix::Error`; both convert
//! automatically into [`ZbdError::Io`].

use thiserror::Error;

use crate::sense::{self, AscAscq};

/// A single error type covering every failure kind the design distinguishes.
#[derive(Debug, Error)]
pub enum ZbdError {
    /// Null pointers, misaligned sector/count, empty vector, size overflow.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A backend declined a device during probing; the dispatcher tries the next one.
    #[error("not this backend's device")]
    NotMyDevice,

    /// Path resolution failed, or no backend accepted the target.
    #[error("no suitable backend for device")]
    NoDevice,

    /// Allocation failure in a report buffer or scratch vector.
    #[error("out of memory")]
    OutOfMemory,

    /// Transport failure, including a residual-without-sense short transfer.
    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// The transport returned CHECK CONDITION; sense is decoded and also
    /// mirrored into the calling thread's error record.
    #[error("device error: sense_key=0x{sense_key:02x} asc=0x{asc:02x} ascq=0x{ascq:02x}")]
    Device { sense_key: u8, asc: u8, ascq: u8 },

    /// An optional backend operation (e.g. emulator `set_zones`) was called
    /// on a backend that does not implement it.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Errno(#[from] nix::Error),
}

pub type Result<T> = std::result::Result<T, ZbdError>;

impl ZbdError {
    /// Build a [`ZbdError::Device`] from a decoded sense triple, recording it
    /// into the calling thread's error record at the same time. This is the
    /// *only* path that updates the thread-local record: local validation
    /// errors (`InvalidArgument`, `Unsupported`, ...) must leave it alone.
    pub fn device(sense_key: u8, asc: u8, ascq: u8) -> Self {
        sense::record_sense(sense_key, ascq);
        ZbdError::Device { sense_key, asc, ascq }
    }

    pub fn device_from(key: sense::SenseKey, code: AscAscq) -> Self {
        Self::device(key.raw(), code.asc, code.ascq)
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ZbdError::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_updates_thread_record() {
        let _ = ZbdError::device(0x05, 0x21, 0x00);
        let rec = sense::take_last_error();
        assert_eq!(rec.sense_key, 0x05);
        assert_eq!(rec.ascq, 0x00);
    }

    #[test]
    fn local_validation_error_does_not_touch_record() {
        sense::record_sense(0, 0);
        let _ = ZbdError::invalid("bad alignment");
        let rec = sense::take_last_error();
        assert_eq!(rec.sense_key, 0);
        assert_eq!(rec.ascq, 0);
    }
}
