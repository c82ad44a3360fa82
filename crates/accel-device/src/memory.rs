// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device memory objects and the device-side residency model.
//!
//! Every buffer has a physical [`Location`]. Commands that need a buffer on
//! the device move it there implicitly when it is host-located, exactly as
//! a driver would. The device never refuses residency: when more bytes are
//! device-located than the device holds, it records an oversubscription
//! and carries on, which is the silent degradation the placement manager's
//! bookkeeping exists to avoid.

use crate::{DeviceError, DeviceProfile};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identity of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct BufferId(pub(crate) u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the host side of a buffer is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum HostPtrMode {
    /// Driver-owned storage, no host backing requested.
    None,
    /// Storage backed by caller-provided host memory.
    UseHostPtr,
    /// Driver-allocated, host-accessible storage.
    AllocHostPtr,
}

/// Allocation flags for [`crate::AcceleratorHandle::create_buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MemFlags {
    pub host_ptr: HostPtrMode,
    /// The host never maps this buffer.
    pub host_no_access: bool,
}

impl MemFlags {
    pub const fn read_write() -> Self {
        Self {
            host_ptr: HostPtrMode::None,
            host_no_access: false,
        }
    }

    pub const fn with_host_ptr(mut self, mode: HostPtrMode) -> Self {
        self.host_ptr = mode;
        self
    }

    pub const fn no_host_access(mut self) -> Self {
        self.host_no_access = true;
        self
    }

    /// `true` when the storage lives in host-addressable memory.
    pub fn is_host_backed(&self) -> bool {
        self.host_ptr != HostPtrMode::None
    }
}

/// Physical location of a buffer's authoritative content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Location {
    Host,
    Device,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Device => write!(f, "device"),
        }
    }
}

/// Host mapping mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum MapMode {
    Read,
    Write,
    /// Write access with previous content discarded.
    WriteInvalidate,
}

impl MapMode {
    /// `true` if the host view starts with the buffer's content.
    pub fn needs_content(self) -> bool {
        matches!(self, Self::Read | Self::Write)
    }

    /// `true` if unmapping publishes the host view's content.
    pub fn writes_back(self) -> bool {
        matches!(self, Self::Write | Self::WriteInvalidate)
    }
}

/// Whether a migration carries the content along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum MigrationContent {
    Preserve,
    /// The content at the destination is unspecified; no transfer happens.
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mapping {
    /// The host view owns the storage itself.
    ZeroCopy,
    /// The host view is a staging copy.
    Staged,
}

pub(crate) struct BufferState {
    pub(crate) data: Vec<f32>,
    pub(crate) location: Location,
    pub(crate) mapping: Option<Mapping>,
    pub(crate) released: bool,
}

struct BufferCell {
    id: BufferId,
    size_bytes: usize,
    flags: MemFlags,
    state: Mutex<BufferState>,
}

/// Handle to a device memory object. Cloning shares the same buffer.
#[derive(Clone)]
pub struct DeviceBuffer {
    cell: Arc<BufferCell>,
}

impl DeviceBuffer {
    pub fn id(&self) -> BufferId {
        self.cell.id
    }

    pub fn size_bytes(&self) -> usize {
        self.cell.size_bytes
    }

    /// Number of `f32` elements the buffer holds.
    pub fn elements(&self) -> usize {
        self.cell.size_bytes / std::mem::size_of::<f32>()
    }

    pub fn flags(&self) -> MemFlags {
        self.cell.flags
    }

    /// Current physical location.
    pub fn location(&self) -> Location {
        self.lock().location
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    pub fn is_mapped(&self) -> bool {
        self.lock().mapping.is_some()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.cell
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn ensure_live(&self) -> Result<(), DeviceError> {
        if self.is_released() {
            return Err(DeviceError::InvalidBuffer(self.id()));
        }
        Ok(())
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("id", &self.id())
            .field("size_bytes", &self.size_bytes())
            .field("flags", &self.flags())
            .finish()
    }
}

/// Locks two distinct buffers in id order and returns the guards in
/// argument order.
pub(crate) fn lock_pair<'a>(
    a: &'a DeviceBuffer,
    b: &'a DeviceBuffer,
) -> (MutexGuard<'a, BufferState>, MutexGuard<'a, BufferState>) {
    if a.id() < b.id() {
        let ga = a.lock();
        let gb = b.lock();
        (ga, gb)
    } else {
        let gb = b.lock();
        let ga = a.lock();
        (ga, gb)
    }
}

/// Device-side memory counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeviceCounters {
    /// Bytes currently allocated across host and device.
    pub allocated_bytes: usize,
    /// Bytes currently located on the device.
    pub resident_bytes: usize,
    /// High-water mark of `resident_bytes`.
    pub peak_resident_bytes: usize,
    /// Migrations the device performed on its own because a command
    /// touched a host-located buffer.
    pub implicit_migrations: u64,
    /// Migrations requested through migrate commands.
    pub explicit_migrations: u64,
    /// Number of times residency exceeded device memory.
    pub oversubscriptions: u64,
}

pub(crate) struct DeviceMemory {
    profile: DeviceProfile,
    next_id: AtomicU64,
    counters: Mutex<DeviceCounters>,
}

impl DeviceMemory {
    pub(crate) fn new(profile: DeviceProfile) -> Self {
        Self {
            profile,
            next_id: AtomicU64::new(0),
            counters: Mutex::new(DeviceCounters::default()),
        }
    }

    pub(crate) fn create_buffer(
        &self,
        size_bytes: usize,
        flags: MemFlags,
        initial: Location,
    ) -> Result<DeviceBuffer, DeviceError> {
        if size_bytes == 0 || size_bytes % std::mem::size_of::<f32>() != 0 {
            return Err(DeviceError::InvalidValue {
                op: "create_buffer",
                detail: format!("size {size_bytes} must be a non-zero multiple of 4"),
            });
        }
        if size_bytes > self.profile.max_alloc_bytes {
            return Err(DeviceError::AllocationRefused {
                requested_bytes: size_bytes,
                reason: format!(
                    "exceeds the single-allocation limit of {} bytes",
                    self.profile.max_alloc_bytes
                ),
            });
        }

        let mut counters = self.counters();
        if counters.allocated_bytes + size_bytes > self.profile.allocation_limit_bytes {
            return Err(DeviceError::AllocationRefused {
                requested_bytes: size_bytes,
                reason: format!(
                    "out of resources: {} of {} bytes already allocated",
                    counters.allocated_bytes, self.profile.allocation_limit_bytes
                ),
            });
        }

        let elements = size_bytes / std::mem::size_of::<f32>();
        let mut data = Vec::new();
        data.try_reserve_exact(elements)
            .map_err(|e| DeviceError::AllocationRefused {
                requested_bytes: size_bytes,
                reason: format!("host backing store: {e}"),
            })?;
        data.resize(elements, 0.0);

        counters.allocated_bytes += size_bytes;
        if initial == Location::Device {
            self.add_resident(&mut counters, size_bytes);
        }
        drop(counters);

        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(buffer = %id, size_bytes, location = %initial, "buffer created");
        Ok(DeviceBuffer {
            cell: Arc::new(BufferCell {
                id,
                size_bytes,
                flags,
                state: Mutex::new(BufferState {
                    data,
                    location: initial,
                    mapping: None,
                    released: false,
                }),
            }),
        })
    }

    pub(crate) fn release_buffer(&self, buffer: &DeviceBuffer) -> Result<(), DeviceError> {
        let mut state = buffer.lock();
        if state.released {
            return Err(DeviceError::InvalidBuffer(buffer.id()));
        }
        if state.mapping.is_some() {
            return Err(DeviceError::BufferMapped(buffer.id()));
        }
        state.released = true;
        state.data = Vec::new();

        let mut counters = self.counters();
        counters.allocated_bytes = counters.allocated_bytes.saturating_sub(buffer.size_bytes());
        if state.location == Location::Device {
            counters.resident_bytes = counters.resident_bytes.saturating_sub(buffer.size_bytes());
        }
        tracing::debug!(buffer = %buffer.id(), "buffer released");
        Ok(())
    }

    /// Validates that a command may touch the buffer on the device, moving
    /// it there implicitly when it is host-located.
    pub(crate) fn prepare_for_device(
        &self,
        buffer: &DeviceBuffer,
        state: &mut BufferState,
    ) -> Result<(), DeviceError> {
        if state.released {
            return Err(DeviceError::InvalidBuffer(buffer.id()));
        }
        if state.mapping.is_some() {
            return Err(DeviceError::BufferMapped(buffer.id()));
        }
        if state.location == Location::Host {
            self.relocate(buffer, state, Location::Device, MigrationContent::Preserve, false);
        }
        Ok(())
    }

    /// Moves a buffer's storage between host and device.
    pub(crate) fn relocate(
        &self,
        buffer: &DeviceBuffer,
        state: &mut BufferState,
        target: Location,
        content: MigrationContent,
        explicit: bool,
    ) {
        if state.location == target {
            return;
        }
        if content == MigrationContent::Preserve {
            let mut moved = Vec::with_capacity(state.data.len());
            moved.extend_from_slice(&state.data);
            state.data = moved;
        }
        state.location = target;

        let size = buffer.size_bytes();
        let mut counters = self.counters();
        if explicit {
            counters.explicit_migrations += 1;
        } else {
            counters.implicit_migrations += 1;
            tracing::debug!(buffer = %buffer.id(), "implicit migration to {target}");
        }
        match target {
            Location::Device => self.add_resident(&mut counters, size),
            Location::Host => {
                counters.resident_bytes = counters.resident_bytes.saturating_sub(size);
            }
        }
    }

    pub(crate) fn snapshot(&self) -> DeviceCounters {
        *self.counters()
    }

    fn add_resident(&self, counters: &mut DeviceCounters, size: usize) {
        counters.resident_bytes += size;
        counters.peak_resident_bytes = counters.peak_resident_bytes.max(counters.resident_bytes);
        if counters.resident_bytes > self.profile.global_mem_bytes {
            counters.oversubscriptions += 1;
            tracing::debug!(
                resident = counters.resident_bytes,
                capacity = self.profile.global_mem_bytes,
                "device oversubscribed"
            );
        }
    }

    fn counters(&self) -> MutexGuard<'_, DeviceCounters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> DeviceMemory {
        DeviceMemory::new(DeviceProfile::tiny(4096, 1024))
    }

    #[test]
    fn test_create_zeroed() {
        let mem = memory();
        let buf = mem
            .create_buffer(1024, MemFlags::read_write(), Location::Host)
            .unwrap();
        assert_eq!(buf.elements(), 256);
        assert!(buf.lock().data.iter().all(|&v| v == 0.0));
        assert_eq!(mem.snapshot().allocated_bytes, 1024);
        assert_eq!(mem.snapshot().resident_bytes, 0);
    }

    #[test]
    fn test_create_rejections() {
        let mem = memory();
        assert!(matches!(
            mem.create_buffer(0, MemFlags::read_write(), Location::Host),
            Err(DeviceError::InvalidValue { .. })
        ));
        assert!(matches!(
            mem.create_buffer(2048, MemFlags::read_write(), Location::Host),
            Err(DeviceError::AllocationRefused { requested_bytes: 2048, .. })
        ));
    }

    #[test]
    fn test_allocation_limit_exhaustion() {
        // tiny(): limit is 4x global memory = 16 KB = 16 buffers of 1 KB.
        let mem = memory();
        let mut held = Vec::new();
        for _ in 0..16 {
            held.push(
                mem.create_buffer(1024, MemFlags::read_write(), Location::Host)
                    .unwrap(),
            );
        }
        assert!(matches!(
            mem.create_buffer(1024, MemFlags::read_write(), Location::Host),
            Err(DeviceError::AllocationRefused { .. })
        ));
        mem.release_buffer(&held[0]).unwrap();
        assert!(mem
            .create_buffer(1024, MemFlags::read_write(), Location::Host)
            .is_ok());
    }

    #[test]
    fn test_oversubscription_is_counted_not_refused() {
        let mem = memory();
        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(
                mem.create_buffer(1024, MemFlags::read_write(), Location::Device)
                    .unwrap(),
            );
        }
        let c = mem.snapshot();
        assert_eq!(c.resident_bytes, 5120);
        assert_eq!(c.oversubscriptions, 1);
    }

    #[test]
    fn test_implicit_migration() {
        let mem = memory();
        let buf = mem
            .create_buffer(1024, MemFlags::read_write(), Location::Host)
            .unwrap();
        let mut state = buf.lock();
        mem.prepare_for_device(&buf, &mut state).unwrap();
        assert_eq!(state.location, Location::Device);
        drop(state);
        assert_eq!(mem.snapshot().implicit_migrations, 1);
        assert_eq!(mem.snapshot().resident_bytes, 1024);
    }

    #[test]
    fn test_release_twice() {
        let mem = memory();
        let buf = mem
            .create_buffer(1024, MemFlags::read_write(), Location::Device)
            .unwrap();
        mem.release_buffer(&buf).unwrap();
        assert!(buf.is_released());
        assert_eq!(mem.snapshot().resident_bytes, 0);
        assert!(matches!(
            mem.release_buffer(&buf),
            Err(DeviceError::InvalidBuffer(_))
        ));
    }
}
