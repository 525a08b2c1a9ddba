//! Zone descriptors, enumerations, and the SWR state machine.

use crate::error::{Result, ZbdError};

/// Zone type, as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZoneType {
    Conventional,
    SequentialReq,
    SequentialPref,
    #[default]
    Unknown,
}

impl ZoneType {
    /// Sequential-write-required zones are the ones the state machine and
    /// write-pointer invariants apply to.
    pub fn is_swr(self) -> bool {
        matches!(self, ZoneType::SequentialReq)
    }

    pub(crate) fn from_ata_nibble(n: u8) -> Self {
        match n & 0x0F {
            0x1 => ZoneType::Conventional,
            0x2 => ZoneType::SequentialReq,
            0x3 => ZoneType::SequentialPref,
            _ => ZoneType::Unknown,
        }
    }
}

/// Zone condition as defined by ZBC/ZAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZoneCondition {
    #[default]
    NotWp,
    Empty,
    ImpOpen,
    ExpOpen,
    Closed,
    Rdonly,
    Full,
    Offline,
}

impl ZoneCondition {
    pub(crate) fn from_ata_nibble(n: u8) -> Self {
        match n & 0x0F {
            0x0 => ZoneCondition::NotWp,
            0x1 => ZoneCondition::Empty,
            0x2 => ZoneCondition::ImpOpen,
            0x3 => ZoneCondition::ExpOpen,
            0x4 => ZoneCondition::Closed,
            0xD => ZoneCondition::Rdonly,
            0xE => ZoneCondition::Full,
            0xF => ZoneCondition::Offline,
            _ => ZoneCondition::NotWp,
        }
    }

    /// Whether a write pointer is meaningful for a zone in this condition
    /// (always assuming the zone's type is not `CONVENTIONAL`).
    pub fn has_write_pointer(self) -> bool {
        !matches!(
            self,
            ZoneCondition::NotWp | ZoneCondition::Rdonly | ZoneCondition::Offline | ZoneCondition::Full
        )
    }
}

/// A single zone's static and dynamic state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneDescriptor {
    pub zone_type: ZoneType,
    pub condition: ZoneCondition,
    /// First sector, in 512-byte units.
    pub start: u64,
    /// Length in sectors.
    pub length: u64,
    /// Next legal write sector; meaningful iff `zone_type != Conventional`
    /// and `condition.has_write_pointer()`.
    pub write_pointer: u64,
    pub need_reset: bool,
    pub non_seq: bool,
}

impl ZoneDescriptor {
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    /// Check the invariants that must hold at all quiescent times for a
    /// single descriptor. Used by backends (esp. the emulator) to
    /// assert their own consistency, and by tests.
    pub fn check_invariants(&self) -> Result<()> {
        if !self.zone_type.is_swr() {
            return Ok(());
        }
        match self.condition {
            ZoneCondition::Empty
            | ZoneCondition::ImpOpen
            | ZoneCondition::ExpOpen
            | ZoneCondition::Closed => {
                if !(self.start <= self.write_pointer && self.write_pointer <= self.end()) {
                    return Err(ZbdError::invalid(format!(
                        "zone at {} has write pointer {} outside [{}, {}]",
                        self.start,
                        self.write_pointer,
                        self.start,
                        self.end()
                    )));
                }
            }
            ZoneCondition::Full => {
                if self.write_pointer != self.end() {
                    return Err(ZbdError::invalid(format!(
                        "full zone at {} has write pointer {} != end {}",
                        self.start,
                        self.write_pointer,
                        self.end()
                    )));
                }
            }
            ZoneCondition::Rdonly | ZoneCondition::Offline | ZoneCondition::NotWp => {}
        }
        if self.condition == ZoneCondition::Empty && self.write_pointer != self.start {
            return Err(ZbdError::invalid(format!(
                "empty zone at {} has write pointer {} != start",
                self.start, self.write_pointer
            )));
        }
        Ok(())
    }
}

/// Zone management operations (stable wire-level ordinals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ZoneOp {
    Reset = 1,
    Open = 2,
    Close = 3,
    Finish = 4,
}

/// Flags accompanying a [`ZoneOp`].
pub mod zone_op_flags {
    pub const ALL_ZONES: u32 = 1 << 0;
}

/// Reporting option filter (low 4 bits of the report-zones options field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReportOption {
    All = 0x0,
    Empty = 0x1,
    ImpOpen = 0x2,
    ExpOpen = 0x3,
    Closed = 0x4,
    Full = 0x5,
    ReadOnly = 0x6,
    Offline = 0x7,
    NeedReset = 0x8,
    NonSeq = 0x9,
}

/// Added to the wire-level options field by the iterator to request a
/// single paginated round rather than "give me everything you have".
pub const REPORT_OPTION_PARTIAL: u8 = 1 << 7;

impl ReportOption {
    /// Decode the low 4 bits of a wire-level options byte (the high bit is
    /// [`REPORT_OPTION_PARTIAL`], handled separately by the iterator).
    pub fn from_wire(options: u8) -> Self {
        match options & 0x0f {
            0x0 => ReportOption::All,
            0x1 => ReportOption::Empty,
            0x2 => ReportOption::ImpOpen,
            0x3 => ReportOption::ExpOpen,
            0x4 => ReportOption::Closed,
            0x5 => ReportOption::Full,
            0x6 => ReportOption::ReadOnly,
            0x7 => ReportOption::Offline,
            0x8 => ReportOption::NeedReset,
            0x9 => ReportOption::NonSeq,
            _ => ReportOption::All,
        }
    }

    pub fn matches(self, z: &ZoneDescriptor) -> bool {
        match self {
            ReportOption::All => true,
            ReportOption::Empty => z.condition == ZoneCondition::Empty,
            ReportOption::ImpOpen => z.condition == ZoneCondition::ImpOpen,
            ReportOption::ExpOpen => z.condition == ZoneCondition::ExpOpen,
            ReportOption::Closed => z.condition == ZoneCondition::Closed,
            ReportOption::Full => z.condition == ZoneCondition::Full,
            ReportOption::ReadOnly => z.condition == ZoneCondition::Rdonly,
            ReportOption::Offline => z.condition == ZoneCondition::Offline,
            ReportOption::NeedReset => z.need_reset,
            ReportOption::NonSeq => z.non_seq,
        }
    }
}

/// Validate (and, if valid, return the resulting condition for) a requested
/// zone-management transition. Does not mutate anything; callers apply the
/// result. Device-enforced limits (e.g. open-zone resource exhaustion) are
/// not modelled here — those surface from the backend as
/// `ZbdError::Device` with `INSUFFICIENT_ZONE_RESOURCES` and this function
/// is not consulted for them.
pub fn apply_transition(current: ZoneCondition, op: ZoneOp) -> Result<ZoneCondition> {
    use ZoneCondition::*;
    use ZoneOp::*;

    if matches!(current, Rdonly | Offline) {
        return Err(ZbdError::invalid(format!(
            "zone in condition {current:?} cannot be transitioned"
        )));
    }

    let next = match (current, op) {
        (_, Reset) => Empty,
        (Empty, Open) | (Closed, Open) | (ImpOpen, Open) => ExpOpen,
        (Empty, Close) => {
            return Err(ZbdError::invalid("cannot close an empty zone"));
        }
        (ImpOpen, Close) | (ExpOpen, Close) => Closed,
        (Closed, Close) => Closed,
        (current, Finish) if current != NotWp => Full,
        (current, Finish) => {
            return Err(ZbdError::invalid(format!(
                "zone in condition {current:?} cannot be finished"
            )));
        }
        (current, op @ (Open | Close)) => {
            return Err(ZbdError::invalid(format!(
                "zone in condition {current:?} cannot be {op:?}ed"
            )));
        }
    };
    Ok(next)
}

/// Transition implied by a write landing in a zone currently in `current`
/// condition, where `new_wp` is the write pointer after the write lands.
pub fn write_transition(current: ZoneCondition, new_wp: u64, zone_end: u64) -> ZoneCondition {
    if new_wp >= zone_end {
        return ZoneCondition::Full;
    }
    match current {
        ZoneCondition::Empty | ZoneCondition::Closed => ZoneCondition::ImpOpen,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_zone_write_pointer_must_equal_start() {
        let z = ZoneDescriptor {
            zone_type: ZoneType::SequentialReq,
            condition: ZoneCondition::Empty,
            start: 100,
            length: 50,
            write_pointer: 100,
            need_reset: false,
            non_seq: false,
        };
        assert!(z.check_invariants().is_ok());

        let bad = ZoneDescriptor { write_pointer: 101, ..z };
        assert!(bad.check_invariants().is_err());
    }

    #[test]
    fn full_zone_write_pointer_must_equal_end() {
        let z = ZoneDescriptor {
            zone_type: ZoneType::SequentialReq,
            condition: ZoneCondition::Full,
            start: 0,
            length: 10,
            write_pointer: 10,
            need_reset: false,
            non_seq: false,
        };
        assert!(z.check_invariants().is_ok());
        let bad = ZoneDescriptor { write_pointer: 9, ..z };
        assert!(bad.check_invariants().is_err());
    }

    #[test]
    fn conventional_zones_are_exempt() {
        let z = ZoneDescriptor {
            zone_type: ZoneType::Conventional,
            condition: ZoneCondition::NotWp,
            start: 0,
            length: 10,
            write_pointer: 12345,
            need_reset: false,
            non_seq: false,
        };
        assert!(z.check_invariants().is_ok());
    }

    #[test]
    fn state_machine_transitions() {
        assert_eq!(apply_transition(ZoneCondition::Empty, ZoneOp::Open).unwrap(), ZoneCondition::ExpOpen);
        assert_eq!(apply_transition(ZoneCondition::ImpOpen, ZoneOp::Close).unwrap(), ZoneCondition::Closed);
        assert_eq!(apply_transition(ZoneCondition::Closed, ZoneOp::Reset).unwrap(), ZoneCondition::Empty);
        assert!(apply_transition(ZoneCondition::Empty, ZoneOp::Close).is_err());
        assert!(apply_transition(ZoneCondition::Offline, ZoneOp::Reset).is_err());
    }

    #[test]
    fn write_into_empty_zone_implicitly_opens() {
        assert_eq!(write_transition(ZoneCondition::Empty, 5, 100), ZoneCondition::ImpOpen);
        assert_eq!(write_transition(ZoneCondition::ImpOpen, 100, 100), ZoneCondition::Full);
    }
}
