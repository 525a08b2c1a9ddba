//! Vectored I/O splitter: partitions a caller scatter-gather request
//! into device-legal chunks while preserving alignment invariants.
//!
//! The "carve a window" step is pure and unit-tested on its own
//! ([`carve_window`]); [`execute_vectored`] drives it through a caller
//! callback so each backend supplies its own `preadv`/`pwritev`.

use smallvec::SmallVec;

use crate::error::{Result, ZbdError};

pub const SECTOR_SIZE: u64 = 512;

/// One slice of one input iovec that falls inside the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IovPlanEntry {
    pub iov_index: usize,
    pub offset: usize,
    pub len: usize,
}

/// Inlines up to 8 entries before spilling to the heap -- the small-vector
/// re-architecture named for the splitter's scratch iovec.
pub type IovPlan = SmallVec<[IovPlanEntry; 8]>;

/// Walk `lens` (byte length of each input iovec, in order), skip
/// `consumed_bytes` already issued in prior windows, and collect up to
/// `window_bytes` worth of (possibly truncated) entries.
pub fn carve_window(lens: &[usize], consumed_bytes: usize, window_bytes: usize) -> IovPlan {
    let mut plan = IovPlan::new();
    let mut skip = consumed_bytes;
    let mut remaining = window_bytes;

    for (index, &len) in lens.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        if skip >= len {
            skip -= len;
            continue;
        }
        let offset = skip;
        skip = 0;
        let avail = len - offset;
        let take = avail.min(remaining);
        if take == 0 {
            continue;
        }
        plan.push(IovPlanEntry { iov_index: index, offset, len: take });
        remaining -= take;
    }
    plan
}

fn is_aligned(value: u64, unit: u32) -> bool {
    unit == 0 || value % (unit as u64) == 0
}

/// Run the full splitter loop: validate, clamp to capacity, and repeatedly
/// carve windows of at most `max_rw_sectors` sectors, calling `call` for
/// each until `total` sectors have been consumed. `call` returns the
/// number of sectors actually transferred for that window (may be short);
/// zero is treated as a fatal I/O failure.
///
/// Returns the number of sectors issued overall (after capacity clamping).
#[allow(clippy::too_many_arguments)]
pub fn execute_vectored<F>(
    lens: &[usize],
    sector_offset: u64,
    logical_block_size: u32,
    physical_block_size: u32,
    max_rw_sectors: u32,
    capacity_sectors: u64,
    is_write: bool,
    test_mode: bool,
    mut call: F,
) -> Result<u64>
where
    F: FnMut(&IovPlan, u64) -> Result<u64>,
{
    let total_bytes: usize = lens.iter().sum();
    if total_bytes % SECTOR_SIZE as usize != 0 {
        return Err(ZbdError::invalid("iovec byte length is not sector-aligned"));
    }
    let mut total_sectors = (total_bytes as u64) / SECTOR_SIZE;

    if (total_bytes as u64) << 9 > isize::MAX as u64 {
        return Err(ZbdError::invalid("request size overflows SSIZE_MAX"));
    }

    if !test_mode {
        let align_unit = if is_write { physical_block_size } else { logical_block_size };
        let offset_bytes = sector_offset.saturating_mul(SECTOR_SIZE);
        if !is_aligned(offset_bytes, align_unit) || !is_aligned(total_bytes as u64, align_unit) {
            return Err(ZbdError::invalid(format!(
                "request not aligned to {align_unit}-byte {} blocks",
                if is_write { "physical" } else { "logical" }
            )));
        }
    }

    if sector_offset >= capacity_sectors {
        return Ok(0);
    }
    let remaining_on_device = capacity_sectors - sector_offset;
    if total_sectors > remaining_on_device {
        total_sectors = remaining_on_device;
    }
    if total_sectors == 0 {
        return Ok(0);
    }

    let mut cursor: u64 = 0;
    while cursor < total_sectors {
        let window_sectors = (total_sectors - cursor).min(max_rw_sectors as u64);
        let consumed_bytes = (cursor * SECTOR_SIZE) as usize;
        let window_bytes = (window_sectors * SECTOR_SIZE) as usize;
        let plan = carve_window(lens, consumed_bytes, window_bytes);

        let transferred = call(&plan, sector_offset + cursor)?;
        if transferred == 0 {
            return Err(ZbdError::IoFailure("backend transferred zero sectors".into()));
        }
        cursor += transferred;
    }

    Ok(total_sectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carve_window_splits_across_entries() {
        let lens = [512usize, 1024, 512];
        let plan = carve_window(&lens, 0, 1024);
        assert_eq!(
            plan.as_slice(),
            &[
                IovPlanEntry { iov_index: 0, offset: 0, len: 512 },
                IovPlanEntry { iov_index: 1, offset: 0, len: 512 },
            ]
        );
    }

    #[test]
    fn carve_window_skips_consumed_bytes() {
        let lens = [512usize, 1024, 512];
        // already consumed the first entry and half the second
        let plan = carve_window(&lens, 512 + 512, 1024);
        assert_eq!(
            plan.as_slice(),
            &[
                IovPlanEntry { iov_index: 1, offset: 512, len: 512 },
                IovPlanEntry { iov_index: 2, offset: 0, len: 512 },
            ]
        );
    }

    #[test]
    fn execute_vectored_totals_match_and_caps_at_max_rw() {
        let lens = [4096usize];
        let mut calls = Vec::new();
        let total = execute_vectored(&lens, 0, 512, 512, 4, u64::MAX, false, false, |plan, offset| {
            let sectors: usize = plan.iter().map(|e| e.len / 512).sum();
            calls.push((offset, sectors as u64));
            Ok(sectors as u64)
        })
        .unwrap();
        assert_eq!(total, 8); // 4096 / 512
        assert_eq!(calls, vec![(0, 4), (4, 4)]);
    }

    #[test]
    fn execute_vectored_clamps_to_capacity() {
        let lens = [4096usize]; // 8 sectors
        let capacity = 4u64;
        let total = execute_vectored(&lens, capacity - 2, 512, 512, 64, capacity, false, true, |plan, _| {
            Ok(plan.iter().map(|e| e.len as u64 / 512).sum())
        })
        .unwrap();
        assert_eq!(total, 2);
    }

    #[test]
    fn execute_vectored_rejects_misalignment_outside_test_mode() {
        let lens = [1024usize];
        let err = execute_vectored(&lens, 1, 512, 4096, 64, u64::MAX, true, false, |_, _| Ok(2));
        assert!(err.is_err());
    }

    #[test]
    fn execute_vectored_propagates_zero_transfer_as_error() {
        let lens = [512usize];
        let err = execute_vectored(&lens, 0, 512, 512, 64, u64::MAX, false, false, |_, _| Ok(0));
        assert!(err.is_err());
    }
}
