//! Executes one prepared SCSI/ATA-pass-through
//! command against the kernel's SCSI generic (`sg`) pass-through channel
//! and surfaces sense data. SG_IO packaging below this layer (scatter
//! lists, `usr_ptr` bookkeeping) is an external collaborator; this module
//! this module only builds the struct layout and issues the ioctl itself,
//! mirroring how the predecessor driver wrapped its own ioctl surface.

use std::os::unix::io::RawFd;

use nix::ioctl_readwrite;

use crate::error::{Result, ZbdError};

/// `sg_io_hdr_t` from `<scsi/sg.h>`, interface_id `'S'`.
#[repr(C)]
struct RawSgIoHdr {
    interface_id: i32,
    dxfer_direction: i32,
    cmd_len: u8,
    mx_sb_len: u8,
    iovec_count: u16,
    dxfer_len: u32,
    dxferp: *mut libc_void,
    cmdp: *mut u8,
    sbp: *mut u8,
    timeout: u32,
    flags: u32,
    pack_id: i32,
    usr_ptr: *mut libc_void,
    status: u8,
    maskedstatus: u8,
    msg_status: u8,
    sb_len_wr: u8,
    host_status: u16,
    driver_status: u16,
    resid: i32,
    duration: u32,
    info: u32,
}

// Avoid a direct libc dependency for a single opaque pointer type.
#[allow(non_camel_case_types)]
type libc_void = core::ffi::c_void;

const SG_IO_MAGIC: u8 = b'S';
const SG_IO_NR: u8 = 0x85;

ioctl_readwrite!(sg_io, SG_IO_MAGIC, SG_IO_NR, RawSgIoHdr);

mod dxfer {
    pub const NONE: i32 = -1;
    pub const TO_DEV: i32 = -2;
    pub const FROM_DEV: i32 = -3;
}

const SCSI_STATUS_GOOD: u8 = 0x00;
const SCSI_STATUS_CHECK_CONDITION: u8 = 0x02;

const SENSE_BUF_LEN: usize = 32;

/// Which way data moves for a prepared command.
pub enum Direction<'a> {
    None,
    FromDevice(&'a mut [u8]),
    ToDevice(&'a [u8]),
}

/// Outcome of a successfully-executed command (no CHECK CONDITION, no
/// transport failure).
#[derive(Debug, Clone, Copy)]
pub struct TransferOutcome {
    /// Bytes actually moved (`dxfer_len - resid`).
    pub transferred: usize,
}

/// Execute `cdb` against `fd` through SG_IO, waiting up to `timeout_ms`.
///
/// On CHECK CONDITION the sense reply is decoded into a
/// [`ZbdError::Device`], which also updates the calling thread's error
/// record. A short transfer with no sense data is an [`ZbdError::IoFailure`],
/// per the rule that partial `preadv`/`pwritev` transfers are not errors but
/// a partial *command* completion is.
pub fn execute(fd: RawFd, cdb: &[u8], mut data: Direction<'_>, timeout_ms: u32) -> Result<TransferOutcome> {
    if cdb.len() > 16 {
        return Err(ZbdError::invalid("CDB exceeds 16 bytes"));
    }
    let mut cdb_buf = cdb.to_vec();
    let mut sense = [0u8; SENSE_BUF_LEN];

    let (dxfer_direction, dxferp, dxfer_len): (i32, *mut libc_void, u32) = match &mut data {
        Direction::None => (dxfer::NONE, std::ptr::null_mut(), 0),
        Direction::FromDevice(buf) => (dxfer::FROM_DEV, buf.as_mut_ptr() as *mut libc_void, buf.len() as u32),
        Direction::ToDevice(buf) => (
            dxfer::TO_DEV,
            buf.as_ptr() as *mut libc_void,
            buf.len() as u32,
        ),
    };

    let mut hdr = RawSgIoHdr {
        interface_id: b'S' as i32,
        dxfer_direction,
        cmd_len: cdb_buf.len() as u8,
        mx_sb_len: SENSE_BUF_LEN as u8,
        iovec_count: 0,
        dxfer_len,
        dxferp,
        cmdp: cdb_buf.as_mut_ptr(),
        sbp: sense.as_mut_ptr(),
        timeout: timeout_ms,
        flags: 0,
        pack_id: 0,
        usr_ptr: std::ptr::null_mut(),
        status: 0,
        maskedstatus: 0,
        msg_status: 0,
        sb_len_wr: 0,
        host_status: 0,
        driver_status: 0,
        resid: 0,
        duration: 0,
        info: 0,
    };

    unsafe {
        sg_io(fd, &mut hdr)?;
    }

    if hdr.host_status != 0 || hdr.driver_status != 0 {
        return Err(ZbdError::IoFailure(format!(
            "transport failure: host_status=0x{:04x} driver_status=0x{:04x}",
            hdr.host_status, hdr.driver_status
        )));
    }

    if hdr.status == SCSI_STATUS_CHECK_CONDITION {
        let (key, asc, ascq) = decode_sense(&sense[..hdr.sb_len_wr as usize]);
        return Err(ZbdError::device(key, asc, ascq));
    }

    if hdr.status != SCSI_STATUS_GOOD {
        return Err(ZbdError::IoFailure(format!("unexpected SCSI status 0x{:02x}", hdr.status)));
    }

    let resid = hdr.resid.max(0) as u32;
    if resid > 0 {
        return Err(ZbdError::IoFailure(format!(
            "short transfer: {resid} of {dxfer_len} bytes not transferred, no sense reported"
        )));
    }

    Ok(TransferOutcome {
        transferred: (dxfer_len - resid) as usize,
    })
}

/// Decode sense key / ASC / ASCQ from either fixed-format (70h/71h) or
/// descriptor-format (72h/73h) sense data.
pub fn decode_sense(sense: &[u8]) -> (u8, u8, u8) {
    if sense.len() < 2 {
        return (0, 0, 0);
    }
    let response_code = sense[0] & 0x7f;
    if response_code == 0x72 || response_code == 0x73 {
        let key = sense.get(1).copied().unwrap_or(0) & 0x0f;
        let asc = sense.get(2).copied().unwrap_or(0);
        let ascq = sense.get(3).copied().unwrap_or(0);
        (key, asc, ascq)
    } else {
        let key = sense.get(2).copied().unwrap_or(0) & 0x0f;
        let asc = sense.get(12).copied().unwrap_or(0);
        let ascq = sense.get(13).copied().unwrap_or(0);
        (key, asc, ascq)
    }
}

/// Extract the signature bytes (LBA mid, LBA high of the ATA register
/// file) directly from sense byte 9 and byte 11, as latched by
/// `EXECUTE DEVICE DIAGNOSTIC` with `CK_COND=1`.
pub fn ata_signature_bytes(sense: &[u8]) -> Option<(u8, u8)> {
    if sense.len() > 11 {
        Some((sense[9], sense[11]))
    } else {
        None
    }
}

/// Execute `cdb` expecting the device to answer with CHECK CONDITION
/// carrying an ATA Return Descriptor (i.e. a command issued with
/// `CK_COND=1`) and hand back the raw sense bytes instead of treating the
/// status as an error. Used only for `EXECUTE DEVICE DIAGNOSTIC` at
/// open-time signature classification.
pub fn execute_for_signature(fd: RawFd, cdb: &[u8], timeout_ms: u32) -> Result<[u8; SENSE_BUF_LEN]> {
    if cdb.len() > 16 {
        return Err(ZbdError::invalid("CDB exceeds 16 bytes"));
    }
    let mut cdb_buf = cdb.to_vec();
    let mut sense = [0u8; SENSE_BUF_LEN];

    let mut hdr = RawSgIoHdr {
        interface_id: b'S' as i32,
        dxfer_direction: dxfer::NONE,
        cmd_len: cdb_buf.len() as u8,
        mx_sb_len: SENSE_BUF_LEN as u8,
        iovec_count: 0,
        dxfer_len: 0,
        dxferp: std::ptr::null_mut(),
        cmdp: cdb_buf.as_mut_ptr(),
        sbp: sense.as_mut_ptr(),
        timeout: timeout_ms,
        flags: 0,
        pack_id: 0,
        usr_ptr: std::ptr::null_mut(),
        status: 0,
        maskedstatus: 0,
        msg_status: 0,
        sb_len_wr: 0,
        host_status: 0,
        driver_status: 0,
        resid: 0,
        duration: 0,
        info: 0,
    };

    unsafe {
        sg_io(fd, &mut hdr)?;
    }

    if hdr.host_status != 0 || hdr.driver_status != 0 {
        return Err(ZbdError::IoFailure(format!(
            "transport failure: host_status=0x{:04x} driver_status=0x{:04x}",
            hdr.host_status, hdr.driver_status
        )));
    }
    if hdr.status != SCSI_STATUS_CHECK_CONDITION {
        return Err(ZbdError::IoFailure(format!(
            "expected CHECK CONDITION carrying ATA signature, got status 0x{:02x}",
            hdr.status
        )));
    }

    Ok(sense)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_fixed_format_sense() {
        let mut sense = [0u8; 18];
        sense[0] = 0x70;
        sense[2] = 0x05; // ILLEGAL REQUEST
        sense[12] = 0x21; // LBA out of range
        sense[13] = 0x00;
        assert_eq!(decode_sense(&sense), (0x05, 0x21, 0x00));
    }

    #[test]
    fn decode_descriptor_format_sense() {
        let mut sense = [0u8; 32];
        sense[0] = 0x72;
        sense[1] = 0x07; // DATA PROTECT
        sense[2] = 0x27;
        sense[3] = 0x00;
        assert_eq!(decode_sense(&sense), (0x07, 0x27, 0x00));
    }

    #[test]
    fn ata_signature_extraction() {
        let mut sense = [0u8; 14];
        sense[9] = 0xCD;
        sense[11] = 0xAB;
        assert_eq!(ata_signature_bytes(&sense), Some((0xCD, 0xAB)));
        assert_eq!(ata_signature_bytes(&sense[..8]), None);
    }
}
