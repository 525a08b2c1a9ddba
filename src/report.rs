//! Paginated zone enumeration from an arbitrary
//! starting sector, stateless between calls -- all state lives in the
//! `start_sector` cursor this module advances.

use crate::backend::Backend;
use crate::error::Result;
use crate::zone::{ZoneDescriptor, REPORT_OPTION_PARTIAL};

/// Count-only query: total zones matching `options` from `start_sector` to
/// end of device. Equivalent to calling [`report_zones`] with no output
/// buffer.
pub fn zone_count(backend: &mut dyn Backend, start_sector: u64, options: u8) -> Result<usize> {
    backend.zone_count(start_sector, options)
}

/// Accumulate up to `max_count` zone descriptors from `start_sector`,
/// looping over paginated backend rounds until the backend runs dry, the
/// cap is reached, or the cursor passes end-of-device.
pub fn report_zones(backend: &mut dyn Backend, start_sector: u64, options: u8, max_count: usize) -> Result<Vec<ZoneDescriptor>> {
    let capacity = backend.info().capacity_sectors;
    let mut out = Vec::new();
    let mut cursor = start_sector;

    while out.len() < max_count && cursor < capacity {
        let remaining = max_count - out.len();
        let page = backend.report_zones(cursor, options | REPORT_OPTION_PARTIAL, remaining)?;
        if page.is_empty() {
            break;
        }
        let last = *page.last().unwrap();
        out.extend(page);
        cursor = last.start + last.length;
    }

    out.truncate(max_count);
    Ok(out)
}

/// Convenience wrapper: count first, then fetch exactly that many
/// descriptors. Mirrors the "query then allocate then fill" two-step the
/// C API exposes.
pub fn list_zones(backend: &mut dyn Backend, start_sector: u64, options: u8) -> Result<Vec<ZoneDescriptor>> {
    let count = zone_count(backend, start_sector, options)?;
    report_zones(backend, start_sector, options, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake;
    use crate::device::open_flags;
    use tempfile::NamedTempFile;

    fn backend_with_zones(capacity_sectors: u64, conv: u64, zone: u64) -> Box<dyn Backend> {
        let tmp = NamedTempFile::new().unwrap();
        fake::create(tmp.path(), capacity_sectors).unwrap();
        let mut backend = fake::open(tmp.path(), open_flags::O_DRV_FAKE | open_flags::RDWR).unwrap();
        backend.set_zones(conv, zone).unwrap();
        std::mem::forget(tmp);
        backend
    }

    #[test]
    fn list_zones_matches_report_zones_count() {
        let mut backend = backend_with_zones(262144 + 15 * 131072, 262144, 131072);
        let listed = list_zones(backend.as_mut(), 0, 0).unwrap();
        let counted = zone_count(backend.as_mut(), 0, 0).unwrap();
        assert_eq!(listed.len(), counted);
        assert_eq!(listed.len(), 16);
    }

    #[test]
    fn report_zones_paginates_and_stops_at_cap() {
        let mut backend = backend_with_zones(262144 + 15 * 131072, 262144, 131072);
        let page = report_zones(backend.as_mut(), 0, 0, 3).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].start, 0);
    }
}
