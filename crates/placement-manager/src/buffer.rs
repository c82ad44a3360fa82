// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Managed buffers, their placement states and allocation strategies.

use accel_device::{BufferId, DeviceBuffer, HostPtrMode, Location, MemFlags, MigrationContent};
use std::fmt;

/// Where the manager believes a buffer currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Placement {
    /// Allocated but never placed.
    Unbound,
    HostResident,
    DeviceResident,
    /// A migration towards the given location is in flight.
    Migrating(Location),
}

impl Placement {
    /// `true` if the buffer counts against the resident limit.
    pub fn occupies_device(self) -> bool {
        matches!(self, Self::DeviceResident | Self::Migrating(Location::Device))
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbound => write!(f, "unbound"),
            Self::HostResident => write!(f, "host-resident"),
            Self::DeviceResident => write!(f, "device-resident"),
            Self::Migrating(to) => write!(f, "migrating to {to}"),
        }
    }
}

/// How buffers are backed when allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocStrategy {
    /// Driver-owned read-write storage.
    Plain,
    /// Backed by host memory the caller provides.
    HostPtrBacked,
    /// Driver-allocated host-accessible storage.
    HostAccessible,
    /// Device storage the host never maps.
    DeviceOnly,
}

impl AllocStrategy {
    pub fn mem_flags(self) -> MemFlags {
        match self {
            Self::Plain => MemFlags::read_write(),
            Self::HostPtrBacked => MemFlags::read_write().with_host_ptr(HostPtrMode::UseHostPtr),
            Self::HostAccessible => {
                MemFlags::read_write().with_host_ptr(HostPtrMode::AllocHostPtr)
            }
            Self::DeviceOnly => MemFlags::read_write().no_host_access(),
        }
    }

    /// Host-backed strategies start out host-resident.
    pub fn starts_on_host(self) -> bool {
        matches!(self, Self::HostPtrBacked | Self::HostAccessible)
    }
}

impl fmt::Display for AllocStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Plain => "plain",
            Self::HostPtrBacked => "host-ptr",
            Self::HostAccessible => "host-accessible",
            Self::DeviceOnly => "device-only",
        };
        f.write_str(name)
    }
}

/// Whether a migration must carry the buffer's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum ContentPolicy {
    #[default]
    Preserve,
    /// The destination content may be anything; skips the transfer.
    Undefined,
}

impl From<ContentPolicy> for MigrationContent {
    fn from(policy: ContentPolicy) -> Self {
        match policy {
            ContentPolicy::Preserve => MigrationContent::Preserve,
            ContentPolicy::Undefined => MigrationContent::Undefined,
        }
    }
}

/// A buffer allocated through the placement manager.
///
/// Cloning shares the underlying device buffer; the manager stays the
/// single owner of its lifecycle.
#[derive(Clone)]
pub struct MemoryBuffer {
    device: DeviceBuffer,
    strategy: AllocStrategy,
}

impl MemoryBuffer {
    pub(crate) fn new(device: DeviceBuffer, strategy: AllocStrategy) -> Self {
        Self { device, strategy }
    }

    pub fn id(&self) -> BufferId {
        self.device.id()
    }

    pub fn size_bytes(&self) -> usize {
        self.device.size_bytes()
    }

    pub fn elements(&self) -> usize {
        self.device.elements()
    }

    pub fn strategy(&self) -> AllocStrategy {
        self.strategy
    }

    /// The device object, for enqueueing commands against it.
    pub fn device_buffer(&self) -> &DeviceBuffer {
        &self.device
    }
}

impl fmt::Debug for MemoryBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBuffer")
            .field("id", &self.id())
            .field("size_bytes", &self.size_bytes())
            .field("strategy", &self.strategy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_flags() {
        assert!(!AllocStrategy::Plain.mem_flags().is_host_backed());
        assert!(AllocStrategy::HostAccessible.mem_flags().is_host_backed());
        assert!(AllocStrategy::DeviceOnly.mem_flags().host_no_access);
        assert!(AllocStrategy::HostPtrBacked.starts_on_host());
        assert!(!AllocStrategy::DeviceOnly.starts_on_host());
    }

    #[test]
    fn test_strategy_serde() {
        let json = serde_json::to_string(&AllocStrategy::HostPtrBacked).unwrap();
        assert_eq!(json, "\"host-ptr-backed\"");
        let back: AllocStrategy = serde_json::from_str("\"device-only\"").unwrap();
        assert_eq!(back, AllocStrategy::DeviceOnly);
    }

    #[test]
    fn test_placement_occupancy() {
        assert!(Placement::DeviceResident.occupies_device());
        assert!(Placement::Migrating(Location::Device).occupies_device());
        assert!(!Placement::Migrating(Location::Host).occupies_device());
        assert!(!Placement::Unbound.occupies_device());
    }
}
