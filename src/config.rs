//! A serializable description of an emulated
//! device's geometry, round-trippable as TOML. Convenience only -- no
//! non-fake backend consults this.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Error type for emulator geometry file I/O, mirroring the predecessor
/// tooling's config error shape.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read emulator geometry file: {0}")]
    ReadError(#[from] io::Error),

    #[error("failed to parse emulator geometry: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("failed to serialize emulator geometry: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Geometry for a file-backed emulated device, as constructed by
/// [`crate::backend::fake::create`] plus a `set_zones` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorGeometry {
    /// Conventional-zone size, in 512-byte sectors.
    pub conv_size: u64,
    /// Sequential-zone size, in 512-byte sectors.
    pub zone_size: u64,
    /// Total device capacity, in 512-byte sectors.
    pub capacity: u64,
    pub logical_block_size: u32,
    pub physical_block_size: u32,
}

impl Default for EmulatorGeometry {
    fn default() -> Self {
        EmulatorGeometry {
            conv_size: 0,
            zone_size: 0,
            capacity: 0,
            logical_block_size: 512,
            physical_block_size: 512,
        }
    }
}

/// Load geometry from a TOML file. No default-location lookup: unlike the
/// predecessor's application config, there's no one obvious place for a
/// test fixture's geometry to live.
pub fn load_fake_geometry(path: &Path) -> Result<EmulatorGeometry, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let geometry: EmulatorGeometry = toml::from_str(&contents)?;
    Ok(geometry)
}

pub fn save_fake_geometry(geometry: &EmulatorGeometry, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = toml::to_string_pretty(geometry)?;
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn geometry_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("geometry.toml");

        let geometry = EmulatorGeometry {
            conv_size: 262144,
            zone_size: 131072,
            capacity: 262144 + 15 * 131072,
            logical_block_size: 512,
            physical_block_size: 4096,
        };
        save_fake_geometry(&geometry, &path).unwrap();

        let loaded = load_fake_geometry(&path).unwrap();
        assert_eq!(loaded, geometry);
    }

    #[test]
    fn load_missing_file_errors() {
        let err = load_fake_geometry(Path::new("/nonexistent/geometry.toml"));
        assert!(matches!(err, Err(ConfigError::ReadError(_))));
    }
}
