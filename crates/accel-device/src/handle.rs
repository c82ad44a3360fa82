// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The accelerator handle: one selected device, one context, one queue.

use crate::memory::DeviceMemory;
use crate::{
    CommandQueue, DeviceBuffer, DeviceCounters, DeviceError, DeviceProfile, Location, MemFlags,
    PlatformInfo, PlatformRegistry, QueueProperties, UserToken,
};
use std::fmt;
use std::sync::Arc;

struct HandleInner {
    platform_index: usize,
    device_index: usize,
    platform: PlatformInfo,
    device: DeviceProfile,
    memory: Arc<DeviceMemory>,
    queue: CommandQueue,
}

/// An opened accelerator. Cheap to clone; every clone shares the same
/// device memory and in-order queue.
#[derive(Clone)]
pub struct AcceleratorHandle {
    inner: Arc<HandleInner>,
}

impl AcceleratorHandle {
    /// Selects a platform/device pair and opens it.
    ///
    /// # Errors
    /// `PlatformNotFound`/`DeviceNotFound` for out-of-range indices,
    /// `InvalidVersion`/`UnsupportedVersion` when the platform lacks
    /// explicit migration support.
    pub fn probe(
        registry: &PlatformRegistry,
        platform_index: usize,
        device_index: usize,
        properties: QueueProperties,
    ) -> Result<Self, DeviceError> {
        let (platform, device) = registry.select(platform_index, device_index)?;
        platform.check_migration_support()?;

        let memory = Arc::new(DeviceMemory::new(device.clone()));
        let queue = CommandQueue::new(Arc::clone(&memory), properties)?;
        tracing::info!(
            platform = %platform.name,
            device = %device.name,
            global_mem = device.global_mem_bytes,
            max_alloc = device.max_alloc_bytes,
            profiling = properties.profiling,
            "accelerator opened"
        );

        Ok(Self {
            inner: Arc::new(HandleInner {
                platform_index,
                device_index,
                platform: platform.clone(),
                device: device.clone(),
                memory,
                queue,
            }),
        })
    }

    pub fn platform(&self) -> &PlatformInfo {
        &self.inner.platform
    }

    pub fn device(&self) -> &DeviceProfile {
        &self.inner.device
    }

    pub fn platform_index(&self) -> usize {
        self.inner.platform_index
    }

    pub fn device_index(&self) -> usize {
        self.inner.device_index
    }

    pub fn max_single_alloc_bytes(&self) -> usize {
        self.inner.device.max_alloc_bytes
    }

    pub fn total_memory_bytes(&self) -> usize {
        self.inner.device.global_mem_bytes
    }

    pub fn preferred_parallelism_granularity(&self) -> usize {
        self.inner.device.preferred_work_group_multiple
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.inner.queue
    }

    pub fn profiling_enabled(&self) -> bool {
        self.inner.queue.profiling_enabled()
    }

    /// Creates a zero-initialised buffer at the given physical location.
    pub fn create_buffer(
        &self,
        size_bytes: usize,
        flags: MemFlags,
        initial: Location,
    ) -> Result<DeviceBuffer, DeviceError> {
        self.inner.memory.create_buffer(size_bytes, flags, initial)
    }

    /// Destroys a buffer. Fails if it is released already or still mapped.
    pub fn release_buffer(&self, buffer: &DeviceBuffer) -> Result<(), DeviceError> {
        self.inner.memory.release_buffer(buffer)
    }

    pub fn create_user_token(&self) -> UserToken {
        self.inner.queue.create_user_token()
    }

    /// Snapshot of the device-side memory counters.
    pub fn counters(&self) -> DeviceCounters {
        self.inner.memory.snapshot()
    }
}

impl fmt::Debug for AcceleratorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceleratorHandle")
            .field("platform", &self.inner.platform.name)
            .field("device", &self.inner.device.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_capabilities() {
        let h = AcceleratorHandle::probe(
            &PlatformRegistry::simulated(),
            0,
            1,
            QueueProperties::default(),
        )
        .unwrap();
        assert_eq!(h.device().name, "Simulated iGPU");
        assert_eq!(h.max_single_alloc_bytes(), 8 * 1024 * 1024);
        assert_eq!(h.preferred_parallelism_granularity(), 32);
        assert!(h.profiling_enabled());
    }

    #[test]
    fn test_probe_rejects_old_platform() {
        let mut platform = PlatformRegistry::simulated().platforms()[0].clone();
        platform.version = "OpenCL 1.1".into();
        let reg = PlatformRegistry::new(vec![platform]);
        assert!(matches!(
            AcceleratorHandle::probe(&reg, 0, 0, QueueProperties::default()),
            Err(DeviceError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_probe_out_of_range() {
        assert!(matches!(
            AcceleratorHandle::probe(
                &PlatformRegistry::simulated(),
                3,
                0,
                QueueProperties::default()
            ),
            Err(DeviceError::PlatformNotFound { .. })
        ));
    }

    #[test]
    fn test_clones_share_counters() {
        let h = AcceleratorHandle::probe(
            &PlatformRegistry::single(DeviceProfile::tiny(4096, 1024)),
            0,
            0,
            QueueProperties::default(),
        )
        .unwrap();
        let h2 = h.clone();
        let _b = h
            .create_buffer(1024, MemFlags::read_write(), Location::Device)
            .unwrap();
        assert_eq!(h2.counters().resident_bytes, 1024);
    }
}
