// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Scoped host mappings.
//!
//! A map is a two-step guard:
//!
//! ```text
//! Pipeline::map() ──► PendingMap ──acquire()──► MappedView ──unmap()──► token
//!                        │ drop                     │ drop
//!                        ▼                          ▼
//!                  wait, then unmap             unmap (no waits)
//! ```
//!
//! Both guards borrow the pipeline mutably, so nothing else can be
//! submitted while a mapping is live, and both enqueue the unmap when
//! dropped: a mapping cannot leak.

use crate::{Pipeline, PipelineError};
use accel_device::{DependencyToken, MapMode, MapSlot};
use placement_manager::MemoryBuffer;

/// A submitted map whose host view is not available yet.
pub struct PendingMap<'p> {
    pipeline: Option<&'p mut Pipeline>,
    buffer: MemoryBuffer,
    mode: MapMode,
    token: DependencyToken,
    slot: MapSlot,
}

impl<'p> PendingMap<'p> {
    pub(crate) fn new(
        pipeline: &'p mut Pipeline,
        buffer: MemoryBuffer,
        mode: MapMode,
        token: DependencyToken,
        slot: MapSlot,
    ) -> Self {
        Self {
            pipeline: Some(pipeline),
            buffer,
            mode,
            token,
            slot,
        }
    }

    /// The map command's token.
    pub fn token(&self) -> &DependencyToken {
        &self.token
    }

    /// Waits for the map to complete and returns the host view.
    pub fn acquire(mut self) -> Result<MappedView<'p>, PipelineError> {
        let pipeline = self
            .pipeline
            .as_deref()
            .ok_or(PipelineError::AlreadyUnmapped(self.buffer.id()))?;
        pipeline.await_token(&self.token)?;
        let data = self
            .slot
            .take()
            .ok_or(PipelineError::ViewUnavailable(self.buffer.id()))?;
        let pipeline = self
            .pipeline
            .take()
            .ok_or(PipelineError::AlreadyUnmapped(self.buffer.id()))?;
        Ok(MappedView {
            pipeline: Some(pipeline),
            buffer: self.buffer.clone(),
            mode: self.mode,
            map_token: self.token.clone(),
            data,
        })
    }
}

impl Drop for PendingMap<'_> {
    fn drop(&mut self) {
        let Some(pipeline) = self.pipeline.take() else {
            return;
        };
        // The map may still be in flight; its view only exists once it
        // has completed.
        if self.token.wait().is_err() {
            return;
        }
        if let Some(data) = self.slot.take() {
            if let Err(e) = pipeline.unmap(&self.buffer, data, self.mode, &[]) {
                tracing::warn!(buffer = %self.buffer.id(), error = %e, "unmap of unacquired view failed");
            }
        }
    }
}

/// A live host view of a buffer.
pub struct MappedView<'p> {
    pipeline: Option<&'p mut Pipeline>,
    buffer: MemoryBuffer,
    mode: MapMode,
    map_token: DependencyToken,
    data: Vec<f32>,
}

impl MappedView<'_> {
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Writable view. Writes reach the buffer only for `Write` and
    /// `WriteInvalidate` mappings.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn buffer(&self) -> &MemoryBuffer {
        &self.buffer
    }

    pub fn mode(&self) -> MapMode {
        self.mode
    }

    /// Token of the map command that produced this view.
    pub fn map_token(&self) -> &DependencyToken {
        &self.map_token
    }

    /// Releases the mapping after `waits_on`; returns the unmap token.
    pub fn unmap(mut self, waits_on: &[DependencyToken]) -> Result<DependencyToken, PipelineError> {
        self.release(waits_on)
    }

    fn release(&mut self, waits_on: &[DependencyToken]) -> Result<DependencyToken, PipelineError> {
        let pipeline = self
            .pipeline
            .take()
            .ok_or(PipelineError::AlreadyUnmapped(self.buffer.id()))?;
        let data = std::mem::take(&mut self.data);
        pipeline.unmap(&self.buffer, data, self.mode, waits_on)
    }
}

impl Drop for MappedView<'_> {
    fn drop(&mut self) {
        if self.pipeline.is_some() {
            if let Err(e) = self.release(&[]) {
                tracing::warn!(buffer = %self.buffer.id(), error = %e, "unmap on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for MappedView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedView")
            .field("buffer", &self.buffer.id())
            .field("mode", &self.mode)
            .field("elements", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Operation, Pipeline};
    use accel_device::{
        AcceleratorHandle, DeviceProfile, Kernel, MapMode, PlatformRegistry, QueueProperties,
    };
    use placement_manager::{AllocStrategy, PlacementManager};

    fn pipeline() -> Pipeline {
        let handle = AcceleratorHandle::probe(
            &PlatformRegistry::single(DeviceProfile::tiny(4096, 1024)),
            0,
            0,
            QueueProperties::default(),
        )
        .unwrap();
        Pipeline::new(PlacementManager::new(handle, None))
    }

    #[test]
    fn test_dropped_view_is_unmapped() {
        let mut p = pipeline();
        let bufs = p.allocate(1, 1024, AllocStrategy::HostAccessible).unwrap();
        {
            let mut view = p
                .map(&bufs[0], MapMode::Write, &[])
                .unwrap()
                .acquire()
                .unwrap();
            view.as_mut_slice()[0] = 5.0;
        }
        p.finish().unwrap();
        assert!(!bufs[0].device_buffer().is_mapped());

        let view = p
            .map(&bufs[0], MapMode::Read, &[])
            .unwrap()
            .acquire()
            .unwrap();
        assert_eq!(view.as_slice()[0], 5.0);
    }

    #[test]
    fn test_dropped_pending_map_is_unmapped() {
        let mut p = pipeline();
        let bufs = p.allocate(1, 1024, AllocStrategy::Plain).unwrap();
        let pending = p.map(&bufs[0], MapMode::Read, &[]).unwrap();
        let token = pending.token().clone();
        drop(pending);
        assert!(token.is_complete());
        p.finish().unwrap();
        assert!(!bufs[0].device_buffer().is_mapped());
    }

    #[test]
    fn test_read_mapping_discards_writes() {
        let mut p = pipeline();
        let bufs = p.allocate(2, 1024, AllocStrategy::Plain).unwrap();
        let set = p
            .submit(&Operation::kernel(Kernel::Set, &bufs[0], &bufs[1]), &[])
            .unwrap();
        let mut view = p
            .map(&bufs[1], MapMode::Read, &[set])
            .unwrap()
            .acquire()
            .unwrap();
        assert_eq!(view.as_slice()[7], 7.0);
        view.as_mut_slice()[7] = -1.0;
        let unmap = view.unmap(&[]).unwrap();
        let view = p
            .map(&bufs[1], MapMode::Read, &[unmap])
            .unwrap()
            .acquire()
            .unwrap();
        assert_eq!(view.as_slice()[7], 7.0);
        assert_eq!(view.map_token().label(), "map");
    }

    #[test]
    fn test_read_mapping_of_host_accessible_discards_writes() {
        let mut p = pipeline();
        let bufs = p.allocate(1, 1024, AllocStrategy::HostAccessible).unwrap();
        let mut view = p
            .map(&bufs[0], MapMode::Read, &[])
            .unwrap()
            .acquire()
            .unwrap();
        view.as_mut_slice()[7] = -1.0;
        let unmap = view.unmap(&[]).unwrap();
        let view = p
            .map(&bufs[0], MapMode::Read, &[unmap])
            .unwrap()
            .acquire()
            .unwrap();
        assert_eq!(view.as_slice()[7], 0.0);
    }
}
