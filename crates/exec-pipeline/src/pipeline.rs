// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The submission pipeline.
//!
//! `submit` never blocks: it turns an [`Operation`] into device commands,
//! wiring in the migrations the placement manager needs, and returns the
//! token of the final command. The only blocking calls are
//! [`Pipeline::await_token`], map acquisition, [`Pipeline::finish`] and
//! buffer release.

use crate::{Operation, PendingMap, PipelineError};
use accel_device::{
    AcceleratorHandle, CopyRegion, DependencyToken, Kernel, KernelLaunch, Location, MapMode,
    NdRange,
};
use placement_manager::{AllocStrategy, MemoryBuffer, PlacementManager, PlacementStats};
use std::time::Duration;

/// Dependency-wired front end over one device queue.
pub struct Pipeline {
    placement: PlacementManager,
    watchdog: Option<Duration>,
}

impl Pipeline {
    pub fn new(placement: PlacementManager) -> Self {
        Self {
            placement,
            watchdog: None,
        }
    }

    /// Bounds every [`Pipeline::await_token`] by `limit`.
    pub fn with_watchdog(mut self, limit: Duration) -> Self {
        self.watchdog = Some(limit);
        self
    }

    pub fn handle(&self) -> &AcceleratorHandle {
        self.placement.handle()
    }

    pub fn placement(&self) -> &PlacementManager {
        &self.placement
    }

    pub fn allocate(
        &mut self,
        count: usize,
        size_bytes: usize,
        strategy: AllocStrategy,
    ) -> Result<Vec<MemoryBuffer>, PipelineError> {
        Ok(self.placement.allocate(count, size_bytes, strategy)?)
    }

    /// Submits `op` after every token in `waits_on`.
    pub fn submit(
        &mut self,
        op: &Operation,
        waits_on: &[DependencyToken],
    ) -> Result<DependencyToken, PipelineError> {
        self.check_dangling(waits_on)?;
        let queue = self.placement.handle().queue().clone();

        let token = match op {
            Operation::KernelLaunch {
                kernel,
                buffers,
                elements,
            } => {
                let waits = self.make_resident(buffers.iter().collect(), waits_on)?;
                let range = match kernel {
                    Kernel::Nop => NdRange::exact(*elements),
                    _ => NdRange::rounded(
                        *elements,
                        self.handle().preferred_parallelism_granularity(),
                    ),
                };
                let launch = KernelLaunch {
                    kernel: *kernel,
                    buffers: buffers.iter().map(|b| b.device_buffer().clone()).collect(),
                    elements: *elements,
                    range,
                };
                queue.enqueue_kernel(launch, &waits)?
            }
            Operation::BufferCopy { src, dst, bytes } => {
                let waits = self.make_resident(vec![src, dst], waits_on)?;
                queue.enqueue_copy(
                    src.device_buffer(),
                    dst.device_buffer(),
                    CopyRegion::whole(*bytes),
                    &waits,
                )?
            }
            Operation::FillBuffer { buffer, pattern } => {
                let waits = self.make_resident(vec![buffer], waits_on)?;
                queue.enqueue_fill(buffer.device_buffer(), *pattern, &waits)?
            }
            Operation::MigrateToHost { buffer, content } => {
                return Ok(self
                    .placement
                    .migrate_with(buffer, Location::Host, *content, waits_on)?);
            }
            Operation::MigrateToDevice { buffer, content } => {
                return Ok(self
                    .placement
                    .migrate_with(buffer, Location::Device, *content, waits_on)?);
            }
        };

        for buffer in op.buffers() {
            self.placement.record_access(buffer, &token)?;
        }
        tracing::debug!(op = %op.kind(), token = %token.id(), "submitted");
        Ok(token)
    }

    /// Evicts `buffer` to the host after `last_use`.
    pub fn evict_to_host(
        &mut self,
        buffer: &MemoryBuffer,
        last_use: &[DependencyToken],
    ) -> Result<DependencyToken, PipelineError> {
        self.check_dangling(last_use)?;
        Ok(self.placement.evict_to_host(buffer, last_use)?)
    }

    /// A token that signals once every token in `tokens` has.
    pub fn barrier(&mut self, tokens: &[DependencyToken]) -> Result<DependencyToken, PipelineError> {
        self.check_dangling(tokens)?;
        Ok(self.handle().queue().enqueue_marker(tokens)?)
    }

    /// Blocks until `token` signals, bounded by the watchdog if one is set.
    pub fn await_token(&self, token: &DependencyToken) -> Result<(), PipelineError> {
        match self.watchdog {
            Some(limit) => token.wait_timeout(limit)?,
            None => token.wait()?,
        }
        Ok(())
    }

    /// Maps `buffer` for host access once `waits_on` have completed.
    ///
    /// The returned guard holds the pipeline until the mapping is released,
    /// which happens through [`crate::MappedView::unmap`] or on drop.
    pub fn map(
        &mut self,
        buffer: &MemoryBuffer,
        mode: MapMode,
        waits_on: &[DependencyToken],
    ) -> Result<PendingMap<'_>, PipelineError> {
        self.check_dangling(waits_on)?;
        self.placement.placement(buffer)?;
        let (token, slot) = self
            .handle()
            .queue()
            .enqueue_map(buffer.device_buffer(), mode, waits_on)?;
        self.placement.record_access(buffer, &token)?;
        tracing::debug!(buffer = %buffer.id(), ?mode, token = %token.id(), "map submitted");
        Ok(PendingMap::new(self, buffer.clone(), mode, token, slot))
    }

    pub(crate) fn unmap(
        &mut self,
        buffer: &MemoryBuffer,
        data: Vec<f32>,
        mode: MapMode,
        waits_on: &[DependencyToken],
    ) -> Result<DependencyToken, PipelineError> {
        self.check_dangling(waits_on)?;
        let token = self
            .handle()
            .queue()
            .enqueue_unmap(buffer.device_buffer(), data, mode, waits_on)?;
        self.placement.record_access(buffer, &token)?;
        Ok(token)
    }

    /// Releases one buffer after its outstanding accesses.
    pub fn release(&mut self, buffer: &MemoryBuffer) -> Result<(), PipelineError> {
        Ok(self.placement.release(buffer)?)
    }

    /// Drains the queue and settles every in-flight placement.
    pub fn finish(&mut self) -> Result<(), PipelineError> {
        self.handle().queue().finish()?;
        self.placement.refresh();
        Ok(())
    }

    /// Drains the queue and releases every buffer. Safe to call on the
    /// abort path: a failed drain is logged and release still happens.
    pub fn shutdown(&mut self) -> Result<(), PipelineError> {
        if let Err(e) = self.finish() {
            tracing::warn!(error = %e, "queue drain failed during shutdown");
        }
        self.placement.release_all()?;
        tracing::debug!("pipeline shut down");
        Ok(())
    }

    pub fn stats(&self) -> PlacementStats {
        self.placement.stats()
    }

    fn make_resident(
        &mut self,
        buffers: Vec<&MemoryBuffer>,
        waits_on: &[DependencyToken],
    ) -> Result<Vec<DependencyToken>, PipelineError> {
        let mut waits = waits_on.to_vec();
        if !buffers.is_empty() {
            waits.extend(self.placement.ensure_resident(&buffers, waits_on)?);
        }
        Ok(waits)
    }

    fn check_dangling(&self, waits_on: &[DependencyToken]) -> Result<(), PipelineError> {
        for token in waits_on {
            if let Some(buffer) = token
                .buffers()
                .iter()
                .find(|id| self.placement.is_released(**id))
            {
                return Err(PipelineError::DanglingDependency {
                    token: token.id(),
                    label: token.label(),
                    buffer: *buffer,
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("placement", &self.placement)
            .field("watchdog", &self.watchdog)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel_device::{DeviceProfile, PlatformRegistry, QueueProperties};
    use placement_manager::{ContentPolicy, MemoryBudget, Placement};

    const KB: usize = 1024;

    fn pipeline(budget: Option<MemoryBudget>) -> Pipeline {
        let handle = AcceleratorHandle::probe(
            &PlatformRegistry::single(DeviceProfile::tiny(4 * KB, KB)),
            0,
            0,
            QueueProperties::default(),
        )
        .unwrap();
        Pipeline::new(PlacementManager::new(handle, budget))
    }

    #[test]
    fn test_set_add_verify() {
        let mut p = pipeline(None);
        let bufs = p.allocate(2, KB, AllocStrategy::Plain).unwrap();
        let set = p
            .submit(&Operation::kernel(Kernel::Set, &bufs[0], &bufs[1]), &[])
            .unwrap();
        let add = p
            .submit(&Operation::kernel(Kernel::Add, &bufs[0], &bufs[1]), &[set])
            .unwrap();
        let view = p
            .map(&bufs[0], MapMode::Read, &[add])
            .unwrap()
            .acquire()
            .unwrap();
        assert_eq!(view.as_slice()[10], 10.0);
        assert_eq!(view.as_slice()[255], 255.0);
        view.unmap(&[]).unwrap().wait().unwrap();
        p.shutdown().unwrap();
    }

    #[test]
    fn test_kernel_makes_host_buffers_resident() {
        let mut p = pipeline(Some(MemoryBudget::from_bytes(2 * KB)));
        let bufs = p.allocate(4, KB, AllocStrategy::HostAccessible).unwrap();
        let mut last = Vec::new();
        for pair in bufs.chunks(2) {
            let t = p
                .submit(&Operation::kernel(Kernel::Set, &pair[0], &pair[1]), &last)
                .unwrap();
            last = vec![t];
        }
        p.finish().unwrap();
        assert_eq!(p.placement().placement(&bufs[2]).unwrap(), Placement::DeviceResident);
        assert_eq!(p.placement().placement(&bufs[0]).unwrap(), Placement::HostResident);
        let c = p.handle().counters();
        assert_eq!(c.implicit_migrations, 0);
        assert!(c.peak_resident_bytes <= 2 * KB);
        assert_eq!(c.oversubscriptions, 0);
    }

    #[test]
    fn test_dangling_dependency() {
        let mut p = pipeline(None);
        let bufs = p.allocate(2, KB, AllocStrategy::Plain).unwrap();
        let fill = p
            .submit(
                &Operation::FillBuffer {
                    buffer: bufs[0].clone(),
                    pattern: 1.0,
                },
                &[],
            )
            .unwrap();
        p.release(&bufs[0]).unwrap();
        let err = p
            .submit(
                &Operation::FillBuffer {
                    buffer: bufs[1].clone(),
                    pattern: 2.0,
                },
                &[fill],
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::DanglingDependency { label: "fill", .. }));
    }

    #[test]
    fn test_copy_between_device_buffers() {
        let mut p = pipeline(None);
        let staging = p.allocate(1, KB, AllocStrategy::HostAccessible).unwrap();
        let dev = p.allocate(1, KB, AllocStrategy::DeviceOnly).unwrap();
        let mut view = p
            .map(&staging[0], MapMode::WriteInvalidate, &[])
            .unwrap()
            .acquire()
            .unwrap();
        view.as_mut_slice().fill(4.0);
        let unmap = view.unmap(&[]).unwrap();
        let copy = p.submit(&Operation::copy(&staging[0], &dev[0]), &[unmap]).unwrap();
        let back = p.submit(&Operation::copy(&dev[0], &staging[0]), &[copy]).unwrap();
        let view = p
            .map(&staging[0], MapMode::Read, &[back])
            .unwrap()
            .acquire()
            .unwrap();
        assert!(view.as_slice().iter().all(|&v| v == 4.0));
    }

    #[test]
    fn test_migrate_ops_and_barrier() {
        let mut p = pipeline(None);
        let bufs = p.allocate(2, KB, AllocStrategy::HostPtrBacked).unwrap();
        let a = p
            .submit(
                &Operation::MigrateToDevice {
                    buffer: bufs[0].clone(),
                    content: ContentPolicy::Preserve,
                },
                &[],
            )
            .unwrap();
        let b = p
            .submit(
                &Operation::MigrateToDevice {
                    buffer: bufs[1].clone(),
                    content: ContentPolicy::Undefined,
                },
                &[],
            )
            .unwrap();
        let all = p.barrier(&[a, b]).unwrap();
        p.await_token(&all).unwrap();
        p.finish().unwrap();
        assert_eq!(p.placement().resident_bytes(), 2 * KB);
        assert_eq!(p.stats().bytes_migrated, KB as u64);
    }

    #[test]
    fn test_watchdog_times_out() {
        let p = pipeline(None).with_watchdog(Duration::from_millis(5));
        let gate = p.handle().create_user_token();
        let err = p.await_token(&gate.token()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Device(accel_device::DeviceError::Timeout { .. })
        ));
    }
}
