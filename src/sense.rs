//! SCSI sense-key and ASC/ASCQ enumerations, and the per-thread error record.

use std::cell::Cell;

/// Sense keys the library cares about. Other keys are passed through as
/// raw bytes inside [`ZbdError::Device`](crate::error::ZbdError::Device).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseKey {
    IllegalRequest,
    DataProtect,
    AbortedCommand,
    /// Anything SCSI defines that the library doesn't special-case.
    Other(u8),
}

impl SenseKey {
    pub fn from_raw(key: u8) -> Self {
        match key {
            0x05 => SenseKey::IllegalRequest,
            0x07 => SenseKey::DataProtect,
            0x0B => SenseKey::AbortedCommand,
            other => SenseKey::Other(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            SenseKey::IllegalRequest => 0x05,
            SenseKey::DataProtect => 0x07,
            SenseKey::AbortedCommand => 0x0B,
            SenseKey::Other(v) => v,
        }
    }
}

/// ASC/ASCQ codes for zone-specific conditions relevant to this library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AscAscq {
    pub asc: u8,
    pub ascq: u8,
}

impl AscAscq {
    pub const INVALID_FIELD_IN_CDB: AscAscq = AscAscq { asc: 0x24, ascq: 0x00 };
    pub const LBA_OUT_OF_RANGE: AscAscq = AscAscq { asc: 0x21, ascq: 0x00 };
    pub const UNALIGNED_WRITE: AscAscq = AscAscq { asc: 0x21, ascq: 0x04 };
    pub const WRITE_BOUNDARY_VIOLATION: AscAscq = AscAscq { asc: 0x21, ascq: 0x05 };
    pub const ATTEMPT_TO_READ_INVALID_DATA: AscAscq = AscAscq { asc: 0x21, ascq: 0x06 };
    pub const READ_BOUNDARY_VIOLATION: AscAscq = AscAscq { asc: 0x21, ascq: 0x07 };
    pub const ZONE_IS_READ_ONLY: AscAscq = AscAscq { asc: 0x27, ascq: 0x00 };
    pub const INSUFFICIENT_ZONE_RESOURCES: AscAscq = AscAscq { asc: 0x55, ascq: 0x0D };
}

/// Per-thread `{sense_key, ascq}` pair, updated only along the sense-decoding
/// path (transport layer / backend `zone_op` and I/O failures). Never shared
/// across threads: reading it from any thread but the one that issued the
/// failing command is meaningless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorRecord {
    pub sense_key: u8,
    pub ascq: u8,
}

thread_local! {
    static LAST_ERROR: Cell<ErrorRecord> = const { Cell::new(ErrorRecord { sense_key: 0, ascq: 0 }) };
}

/// Record a decoded sense reply for the calling thread.
pub(crate) fn record_sense(sense_key: u8, ascq: u8) {
    LAST_ERROR.with(|cell| cell.set(ErrorRecord { sense_key, ascq }));
}

/// Read back the calling thread's last recorded sense reply.
pub fn take_last_error() -> ErrorRecord {
    LAST_ERROR.with(|cell| cell.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sense_key_roundtrip() {
        assert_eq!(SenseKey::from_raw(0x05).raw(), 0x05);
        assert_eq!(SenseKey::from_raw(0x0B), SenseKey::AbortedCommand);
        assert!(matches!(SenseKey::from_raw(0x02), SenseKey::Other(0x02)));
    }

    #[test]
    fn error_record_is_thread_local() {
        record_sense(0x05, 0x01);
        assert_eq!(take_last_error(), ErrorRecord { sense_key: 0x05, ascq: 0x01 });

        let handle = std::thread::spawn(|| take_last_error());
        let other = handle.join().unwrap();
        assert_eq!(other, ErrorRecord::default());
    }
}
