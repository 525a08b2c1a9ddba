//! Device identity, geometry, and capability flags; the handle itself lives
//! in [`crate::handle`].

/// Sentinel meaning "no limit" for [`DeviceInfo::max_nr_open_seq_req`].
pub const NO_LIMIT: u32 = u32::MAX;
/// Sentinel meaning "not reported by the device" for the host-aware hints.
pub const NOT_REPORTED: u32 = u32::MAX;

/// Transport dialect a device was opened through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    Block,
    Scsi,
    Ata,
    Fake,
    #[default]
    Unknown,
}

/// Zoning model reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZoneModel {
    /// Not a zoned device at all.
    Standard,
    HostAware,
    HostManaged,
    /// Zoning exists but is hidden from the host; rejected by this library.
    DeviceManaged,
    #[default]
    Unknown,
}

/// Capability bitset, stored as raw bits so backends can OR in flags without
/// exhaustively matching.
pub mod capability {
    /// The device permits reads to any valid LBA regardless of zone
    /// condition (e.g. `OFFLINE` zones still readable).
    pub const UNRESTRICTED_READ: u32 = 1 << 0;
    /// The device reported a `max_nr_open_seq_req` limit (host-managed).
    pub const ZONE_RESOURCES_LIMITED: u32 = 1 << 1;
}

/// Per-device static identity and geometry, populated once at open time and
/// immutable thereafter.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Vendor identifier, at most 8 characters.
    pub vendor: String,
    pub device_type: DeviceType,
    pub zone_model: ZoneModel,

    /// Capacity in 512-byte sectors.
    pub capacity_sectors: u64,
    /// Capacity expressed in logical blocks.
    pub capacity_lblocks: u64,
    /// Capacity expressed in physical blocks.
    pub capacity_pblocks: u64,

    /// Logical block size, a power-of-two multiple of 512.
    pub logical_block_size: u32,
    /// Physical block size, a power-of-two multiple of 512.
    pub physical_block_size: u32,

    pub capabilities: u32,

    /// Per-command transfer cap, in 512-byte sectors.
    pub max_rw_sectors: u32,

    /// Host-managed only; [`NO_LIMIT`] if the device imposes none.
    pub max_nr_open_seq_req: u32,
    /// Host-aware only; [`NOT_REPORTED`] if the device didn't say.
    pub opt_nr_open_seq_pref: u32,
    /// Host-aware only; [`NOT_REPORTED`] if the device didn't say.
    pub opt_nr_non_seq_write_seq_pref: u32,
}

impl DeviceInfo {
    pub fn has_capability(&self, flag: u32) -> bool {
        self.capabilities & flag != 0
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            vendor: String::new(),
            device_type: DeviceType::Unknown,
            zone_model: ZoneModel::Unknown,
            capacity_sectors: 0,
            capacity_lblocks: 0,
            capacity_pblocks: 0,
            logical_block_size: 512,
            physical_block_size: 512,
            capabilities: 0,
            max_rw_sectors: u32::MAX,
            max_nr_open_seq_req: NO_LIMIT,
            opt_nr_open_seq_pref: NOT_REPORTED,
            opt_nr_non_seq_write_seq_pref: NOT_REPORTED,
        }
    }
}

/// Open-flag bitset. Low bits select access mode; high bits restrict which
/// backends the dispatcher is allowed to try.
pub mod open_flags {
    pub const RDONLY: u32 = 0;
    pub const RDWR: u32 = 1 << 0;

    pub const O_DRV_BLOCK: u32 = 1 << 8;
    pub const O_DRV_SCSI: u32 = 1 << 9;
    pub const O_DRV_ATA: u32 = 1 << 10;
    pub const O_DRV_FAKE: u32 = 1 << 11;

    pub const O_DRV_ALL: u32 = O_DRV_BLOCK | O_DRV_SCSI | O_DRV_ATA | O_DRV_FAKE;

    /// An empty restrict mask means "all backends allowed".
    pub fn driver_mask(flags: u32) -> u32 {
        let mask = flags & O_DRV_ALL;
        if mask == 0 { O_DRV_ALL } else { mask }
    }

    pub fn is_write(flags: u32) -> bool {
        flags & RDWR != 0
    }
}
