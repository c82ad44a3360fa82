// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Platform and device descriptions for the simulated accelerator.
//!
//! A [`PlatformRegistry`] is the enumerated set of platforms, each carrying
//! a list of [`DeviceProfile`]s. Selection by index is the only discovery
//! mechanism the harness needs.

use crate::DeviceError;

const MIB: usize = 1024 * 1024;

/// Capability limits of one simulated device.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceProfile {
    /// Device name as reported to the user.
    pub name: String,
    /// Total device memory in bytes.
    pub global_mem_bytes: usize,
    /// Largest single buffer the device accepts, in bytes.
    pub max_alloc_bytes: usize,
    /// Preferred work-group size multiple for kernels.
    pub preferred_work_group_multiple: usize,
    /// Total bytes the driver is willing to back across host and device.
    /// Requests beyond this are refused (true exhaustion).
    pub allocation_limit_bytes: usize,
}

impl DeviceProfile {
    /// A discrete-GPU-like device: 64 MB of memory, 16 MB single allocations.
    pub fn simulated_gpu() -> Self {
        Self {
            name: "Simulated GPU".to_string(),
            global_mem_bytes: 64 * MIB,
            max_alloc_bytes: 16 * MIB,
            preferred_work_group_multiple: 64,
            allocation_limit_bytes: 256 * MIB,
        }
    }

    /// An integrated-GPU-like device with a smaller memory pool.
    pub fn simulated_igpu() -> Self {
        Self {
            name: "Simulated iGPU".to_string(),
            global_mem_bytes: 32 * MIB,
            max_alloc_bytes: 8 * MIB,
            preferred_work_group_multiple: 32,
            allocation_limit_bytes: 128 * MIB,
        }
    }

    /// A tiny device for tests and quick runs.
    pub fn tiny(global_mem_bytes: usize, max_alloc_bytes: usize) -> Self {
        Self {
            name: format!("Tiny device ({global_mem_bytes} B)"),
            global_mem_bytes,
            max_alloc_bytes,
            preferred_work_group_multiple: 16,
            allocation_limit_bytes: global_mem_bytes * 4,
        }
    }
}

/// One platform: a name, a version string, and its devices.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PlatformInfo {
    pub name: String,
    /// Version string in the `"OpenCL <major>.<minor> <vendor info>"` format.
    pub version: String,
    pub devices: Vec<DeviceProfile>,
}

impl PlatformInfo {
    /// Parses the `(major, minor)` API version out of the version string.
    pub fn api_version(&self) -> Result<(u32, u32), DeviceError> {
        parse_version(&self.version)
    }

    /// Fails unless the platform supports explicit migration (1.2+).
    pub fn check_migration_support(&self) -> Result<(), DeviceError> {
        let (major, minor) = self.api_version()?;
        if major < 1 || (major == 1 && minor < 2) {
            return Err(DeviceError::UnsupportedVersion { major, minor });
        }
        Ok(())
    }
}

/// The enumerated set of platforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformRegistry {
    platforms: Vec<PlatformInfo>,
}

impl PlatformRegistry {
    /// Creates a registry from an explicit platform list.
    pub fn new(platforms: Vec<PlatformInfo>) -> Self {
        Self { platforms }
    }

    /// The built-in simulated platform with two devices.
    pub fn simulated() -> Self {
        Self::new(vec![PlatformInfo {
            name: "Simulated Accelerator Platform".to_string(),
            version: "OpenCL 3.0 simulated".to_string(),
            devices: vec![DeviceProfile::simulated_gpu(), DeviceProfile::simulated_igpu()],
        }])
    }

    /// A single-platform, single-device registry.
    pub fn single(device: DeviceProfile) -> Self {
        Self::new(vec![PlatformInfo {
            name: "Simulated Accelerator Platform".to_string(),
            version: "OpenCL 3.0 simulated".to_string(),
            devices: vec![device],
        }])
    }

    pub fn platforms(&self) -> &[PlatformInfo] {
        &self.platforms
    }

    /// Selects a platform/device pair by index.
    pub fn select(
        &self,
        platform_index: usize,
        device_index: usize,
    ) -> Result<(&PlatformInfo, &DeviceProfile), DeviceError> {
        let platform =
            self.platforms
                .get(platform_index)
                .ok_or(DeviceError::PlatformNotFound {
                    index: platform_index,
                    available: self.platforms.len(),
                })?;
        let device = platform
            .devices
            .get(device_index)
            .ok_or_else(|| DeviceError::DeviceNotFound {
                platform: platform.name.clone(),
                index: device_index,
                available: platform.devices.len(),
            })?;
        Ok((platform, device))
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::simulated()
    }
}

fn parse_version(version: &str) -> Result<(u32, u32), DeviceError> {
    let invalid = || DeviceError::InvalidVersion(version.to_string());
    let rest = version.trim().strip_prefix("OpenCL ").ok_or_else(invalid)?;
    let number = rest.split_whitespace().next().ok_or_else(invalid)?;
    let (major, minor) = number.split_once('.').ok_or_else(invalid)?;
    let major = major.parse().map_err(|_| invalid())?;
    let minor = minor.parse().map_err(|_| invalid())?;
    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_defaults() {
        let reg = PlatformRegistry::simulated();
        let (p, d) = reg.select(0, 0).unwrap();
        assert_eq!(p.name, "Simulated Accelerator Platform");
        assert_eq!(d.name, "Simulated GPU");
        assert_eq!(d.global_mem_bytes / d.max_alloc_bytes, 4);
    }

    #[test]
    fn test_select_out_of_range() {
        let reg = PlatformRegistry::simulated();
        assert!(matches!(
            reg.select(1, 0),
            Err(DeviceError::PlatformNotFound { index: 1, available: 1 })
        ));
        assert!(matches!(
            reg.select(0, 7),
            Err(DeviceError::DeviceNotFound { index: 7, available: 2, .. })
        ));
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!(parse_version("OpenCL 1.2 Mesa").unwrap(), (1, 2));
        assert_eq!(parse_version("OpenCL 3.0").unwrap(), (3, 0));
        assert!(parse_version("CUDA 12.1").is_err());
        assert!(parse_version("OpenCL x.y").is_err());
    }

    #[test]
    fn test_migration_support_gate() {
        let mut p = PlatformRegistry::simulated().platforms()[0].clone();
        assert!(p.check_migration_support().is_ok());
        p.version = "OpenCL 1.1 legacy".into();
        assert!(matches!(
            p.check_migration_support(),
            Err(DeviceError::UnsupportedVersion { major: 1, minor: 1 })
        ));
    }

    #[test]
    fn test_profile_serde_roundtrip() {
        let d = DeviceProfile::tiny(1 << 20, 1 << 18);
        let json = serde_json::to_string(&d).unwrap();
        let back: DeviceProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
