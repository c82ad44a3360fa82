// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The in-order command queue.
//!
//! Commands are validated on the submitting thread and rejected without a
//! token when invalid. Accepted commands are shipped to a dedicated worker
//! thread that executes them strictly in submission order:
//!
//! ```text
//! enqueue_*  ──►  validate  ──►  token (Queued)  ──►  channel
//!                                                        │
//!   worker:  Submitted ─► wait on dependencies ─► Running ─► Complete | Failed
//! ```
//!
//! A command whose dependency failed fails too, without running.

use crate::kernel::{self, Kernel, KernelLaunch};
use crate::memory::{lock_pair, DeviceMemory, Mapping};
use crate::{
    BufferId, DependencyToken, DeviceBuffer, DeviceError, Location, MapMode, MigrationContent,
    TokenId, UserToken,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Properties fixed at queue creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueProperties {
    /// Record profiling timestamps for every command.
    pub profiling: bool,
}

impl Default for QueueProperties {
    fn default() -> Self {
        Self { profiling: true }
    }
}

/// Byte region of a buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRegion {
    pub src_offset_bytes: usize,
    pub dst_offset_bytes: usize,
    pub bytes: usize,
}

impl CopyRegion {
    /// The first `bytes` bytes of both buffers.
    pub fn whole(bytes: usize) -> Self {
        Self {
            src_offset_bytes: 0,
            dst_offset_bytes: 0,
            bytes,
        }
    }
}

/// Receives the host view of a map command once it completes.
#[derive(Debug, Clone, Default)]
pub struct MapSlot {
    data: Arc<Mutex<Option<Vec<f32>>>>,
}

impl MapSlot {
    /// Takes the host view. `None` until the map command has completed, or
    /// after it has been taken.
    pub fn take(&self) -> Option<Vec<f32>> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn put(&self, data: Vec<f32>) {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = Some(data);
    }
}

enum Command {
    Kernel(KernelLaunch),
    Copy {
        src: DeviceBuffer,
        dst: DeviceBuffer,
        region: CopyRegion,
    },
    Fill {
        buffer: DeviceBuffer,
        pattern: f32,
    },
    Map {
        buffer: DeviceBuffer,
        mode: MapMode,
        slot: MapSlot,
    },
    Unmap {
        buffer: DeviceBuffer,
        data: Vec<f32>,
        mode: MapMode,
    },
    Migrate {
        buffers: Vec<DeviceBuffer>,
        target: Location,
        content: MigrationContent,
    },
    Marker,
}

struct Job {
    command: Command,
    token: DependencyToken,
    waits: Vec<DependencyToken>,
}

struct QueueInner {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    epoch: Instant,
    profiling: bool,
    next_token: AtomicU64,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            if worker.join().is_err() {
                tracing::warn!("command queue worker panicked");
            }
        }
    }
}

/// Handle to the single in-order queue of a device.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

impl CommandQueue {
    pub(crate) fn new(
        memory: Arc<DeviceMemory>,
        properties: QueueProperties,
    ) -> Result<Self, DeviceError> {
        let epoch = Instant::now();
        let (sender, receiver) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("accel-queue".into())
            .spawn(move || run_worker(receiver, memory, epoch))
            .map_err(|e| {
                tracing::warn!(error = %e, "failed to start queue worker");
                DeviceError::QueueClosed
            })?;
        Ok(Self {
            inner: Arc::new(QueueInner {
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
                epoch,
                profiling: properties.profiling,
                next_token: AtomicU64::new(0),
            }),
        })
    }

    pub fn profiling_enabled(&self) -> bool {
        self.inner.profiling
    }

    /// Nanoseconds on the queue's profiling clock.
    pub fn now_ns(&self) -> u64 {
        self.inner.epoch.elapsed().as_nanos() as u64
    }

    /// Creates a token that only the host can signal.
    pub fn create_user_token(&self) -> UserToken {
        UserToken::new(self.next_id(), self.inner.epoch)
    }

    pub fn enqueue_kernel(
        &self,
        launch: KernelLaunch,
        waits: &[DependencyToken],
    ) -> Result<DependencyToken, DeviceError> {
        launch.validate()?;
        let label = launch.kernel.name();
        let buffers = launch.buffers.iter().map(DeviceBuffer::id).collect();
        self.submit(label, Command::Kernel(launch), buffers, waits)
    }

    pub fn enqueue_copy(
        &self,
        src: &DeviceBuffer,
        dst: &DeviceBuffer,
        region: CopyRegion,
        waits: &[DependencyToken],
    ) -> Result<DependencyToken, DeviceError> {
        let invalid = |detail: String| DeviceError::InvalidValue {
            op: "enqueue_copy",
            detail,
        };
        src.ensure_live()?;
        dst.ensure_live()?;
        if src.id() == dst.id() {
            return Err(invalid("source and destination are the same buffer".into()));
        }
        let align = std::mem::size_of::<f32>();
        if region.bytes == 0
            || region.bytes % align != 0
            || region.src_offset_bytes % align != 0
            || region.dst_offset_bytes % align != 0
        {
            return Err(invalid(format!("unaligned or empty region {region:?}")));
        }
        if region.src_offset_bytes + region.bytes > src.size_bytes()
            || region.dst_offset_bytes + region.bytes > dst.size_bytes()
        {
            return Err(invalid(format!("region {region:?} is out of bounds")));
        }
        let buffers = vec![src.id(), dst.id()];
        let command = Command::Copy {
            src: src.clone(),
            dst: dst.clone(),
            region,
        };
        self.submit("copy", command, buffers, waits)
    }

    /// Fills the whole buffer with `pattern`.
    pub fn enqueue_fill(
        &self,
        buffer: &DeviceBuffer,
        pattern: f32,
        waits: &[DependencyToken],
    ) -> Result<DependencyToken, DeviceError> {
        buffer.ensure_live()?;
        let command = Command::Fill {
            buffer: buffer.clone(),
            pattern,
        };
        self.submit("fill", command, vec![buffer.id()], waits)
    }

    /// Maps the buffer for host access. The host view lands in the returned
    /// slot once the token completes.
    pub fn enqueue_map(
        &self,
        buffer: &DeviceBuffer,
        mode: MapMode,
        waits: &[DependencyToken],
    ) -> Result<(DependencyToken, MapSlot), DeviceError> {
        buffer.ensure_live()?;
        if buffer.flags().host_no_access {
            return Err(DeviceError::InvalidValue {
                op: "enqueue_map",
                detail: format!("buffer {} was created without host access", buffer.id()),
            });
        }
        let slot = MapSlot::default();
        let command = Command::Map {
            buffer: buffer.clone(),
            mode,
            slot: slot.clone(),
        };
        let token = self.submit("map", command, vec![buffer.id()], waits)?;
        Ok((token, slot))
    }

    /// Returns a host view taken by [`CommandQueue::enqueue_map`].
    pub fn enqueue_unmap(
        &self,
        buffer: &DeviceBuffer,
        data: Vec<f32>,
        mode: MapMode,
        waits: &[DependencyToken],
    ) -> Result<DependencyToken, DeviceError> {
        buffer.ensure_live()?;
        if data.len() != buffer.elements() {
            return Err(DeviceError::InvalidValue {
                op: "enqueue_unmap",
                detail: format!(
                    "host view has {} elements, buffer {} has {}",
                    data.len(),
                    buffer.id(),
                    buffer.elements()
                ),
            });
        }
        let command = Command::Unmap {
            buffer: buffer.clone(),
            data,
            mode,
        };
        self.submit("unmap", command, vec![buffer.id()], waits)
    }

    pub fn enqueue_migrate(
        &self,
        buffers: &[DeviceBuffer],
        target: Location,
        content: MigrationContent,
        waits: &[DependencyToken],
    ) -> Result<DependencyToken, DeviceError> {
        if buffers.is_empty() {
            return Err(DeviceError::InvalidValue {
                op: "enqueue_migrate",
                detail: "no buffers to migrate".into(),
            });
        }
        for buffer in buffers {
            buffer.ensure_live()?;
        }
        let label = match target {
            Location::Host => "migrate-to-host",
            Location::Device => "migrate-to-device",
        };
        let ids = buffers.iter().map(DeviceBuffer::id).collect();
        let command = Command::Migrate {
            buffers: buffers.to_vec(),
            target,
            content,
        };
        self.submit(label, command, ids, waits)
    }

    /// A no-op command that completes once every token in `waits` has.
    pub fn enqueue_marker(&self, waits: &[DependencyToken]) -> Result<DependencyToken, DeviceError> {
        self.submit("marker", Command::Marker, Vec::new(), waits)
    }

    /// Blocks until every previously enqueued command has signaled.
    pub fn finish(&self) -> Result<(), DeviceError> {
        // In-order execution: a trailing marker signals after everything
        // before it. Failures of earlier commands are reported via their
        // own tokens.
        let marker = self.submit("finish", Command::Marker, Vec::new(), &[])?;
        marker.wait()
    }

    fn next_id(&self) -> TokenId {
        TokenId(self.inner.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn submit(
        &self,
        label: &'static str,
        command: Command,
        buffers: Vec<BufferId>,
        waits: &[DependencyToken],
    ) -> Result<DependencyToken, DeviceError> {
        let token = DependencyToken::new(
            self.next_id(),
            label,
            buffers,
            self.inner.profiling,
            waits.to_vec(),
            self.now_ns(),
        );
        let job = Job {
            command,
            token: token.clone(),
            waits: waits.to_vec(),
        };
        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        sender
            .as_ref()
            .ok_or(DeviceError::QueueClosed)?
            .send(job)
            .map_err(|_| DeviceError::QueueClosed)?;
        tracing::debug!(token = %token.id(), label, waits = waits.len(), "command enqueued");
        Ok(token)
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("profiling", &self.inner.profiling)
            .finish()
    }
}

// ── Worker ─────────────────────────────────────────────────────

fn run_worker(receiver: mpsc::Receiver<Job>, memory: Arc<DeviceMemory>, epoch: Instant) {
    let now = || epoch.elapsed().as_nanos() as u64;
    for job in receiver {
        job.token.mark_submitted(now());
        if let Some(detail) = failed_dependency(&job.waits) {
            job.token.fail(detail, now());
            continue;
        }
        job.token.mark_running(now());
        match execute(&memory, job.command) {
            Ok(()) => job.token.complete(now()),
            Err(e) => {
                tracing::debug!(token = %job.token.id(), label = job.token.label(), error = %e, "command failed");
                job.token.fail(e.to_string(), now());
            }
        }
    }
}

fn failed_dependency(waits: &[DependencyToken]) -> Option<String> {
    waits.iter().find_map(|dep| {
        dep.wait()
            .err()
            .map(|e| format!("dependency failed: {e}"))
    })
}

fn execute(memory: &DeviceMemory, command: Command) -> Result<(), DeviceError> {
    match command {
        Command::Kernel(launch) => run_kernel(memory, &launch),
        Command::Copy { src, dst, region } => {
            let (mut s, mut d) = lock_pair(&src, &dst);
            memory.prepare_for_device(&src, &mut s)?;
            memory.prepare_for_device(&dst, &mut d)?;
            let align = std::mem::size_of::<f32>();
            let (so, doff, n) = (
                region.src_offset_bytes / align,
                region.dst_offset_bytes / align,
                region.bytes / align,
            );
            d.data[doff..doff + n].copy_from_slice(&s.data[so..so + n]);
            Ok(())
        }
        Command::Fill { buffer, pattern } => {
            let mut state = buffer.lock();
            memory.prepare_for_device(&buffer, &mut state)?;
            state.data.fill(pattern);
            Ok(())
        }
        Command::Map { buffer, mode, slot } => {
            let mut state = buffer.lock();
            if state.released {
                return Err(DeviceError::InvalidBuffer(buffer.id()));
            }
            if state.mapping.is_some() {
                return Err(DeviceError::BufferMapped(buffer.id()));
            }
            // Read mappings always get a private copy so host writes
            // through them never reach the buffer.
            let zero_copy = state.location == Location::Host
                && buffer.flags().is_host_backed()
                && mode.writes_back();
            let view = if zero_copy {
                state.mapping = Some(Mapping::ZeroCopy);
                std::mem::take(&mut state.data)
            } else {
                state.mapping = Some(Mapping::Staged);
                if mode.needs_content() {
                    state.data.clone()
                } else {
                    vec![0.0; buffer.elements()]
                }
            };
            slot.put(view);
            Ok(())
        }
        Command::Unmap { buffer, data, mode } => {
            let mut state = buffer.lock();
            match state.mapping.take() {
                Some(Mapping::ZeroCopy) => state.data = data,
                Some(Mapping::Staged) => {
                    if mode.writes_back() {
                        state.data.copy_from_slice(&data);
                    }
                }
                None => {
                    return Err(DeviceError::InvalidValue {
                        op: "enqueue_unmap",
                        detail: format!("buffer {} is not mapped", buffer.id()),
                    })
                }
            }
            Ok(())
        }
        Command::Migrate {
            buffers,
            target,
            content,
        } => {
            for buffer in &buffers {
                let mut state = buffer.lock();
                if state.released {
                    return Err(DeviceError::InvalidBuffer(buffer.id()));
                }
                if state.mapping.is_some() {
                    return Err(DeviceError::BufferMapped(buffer.id()));
                }
                memory.relocate(buffer, &mut state, target, content, true);
            }
            Ok(())
        }
        Command::Marker => Ok(()),
    }
}

fn run_kernel(memory: &DeviceMemory, launch: &KernelLaunch) -> Result<(), DeviceError> {
    let global = launch.range.global;
    match (launch.kernel, launch.buffers.as_slice()) {
        (Kernel::Nop, _) => kernel::nop(global),
        (Kernel::Set, [dst, src]) | (Kernel::Add, [dst, src]) => {
            let (mut d, mut s) = lock_pair(dst, src);
            memory.prepare_for_device(dst, &mut d)?;
            memory.prepare_for_device(src, &mut s)?;
            if launch.kernel == Kernel::Set {
                kernel::set(&mut d.data, &mut s.data, launch.elements, global);
            } else {
                kernel::add(&mut d.data, &s.data, launch.elements, global);
            }
        }
        (kernel, args) => {
            return Err(DeviceError::InvalidValue {
                op: "enqueue_kernel",
                detail: format!("{kernel} launched with {} buffers", args.len()),
            })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceProfile, MemFlags, NdRange, TokenStatus};

    fn setup(profiling: bool) -> (Arc<DeviceMemory>, CommandQueue) {
        let memory = Arc::new(DeviceMemory::new(DeviceProfile::tiny(1 << 16, 1 << 14)));
        let queue = CommandQueue::new(Arc::clone(&memory), QueueProperties { profiling }).unwrap();
        (memory, queue)
    }

    fn host_buffer(memory: &DeviceMemory, bytes: usize) -> DeviceBuffer {
        memory
            .create_buffer(bytes, MemFlags::read_write(), Location::Host)
            .unwrap()
    }

    fn launch(kernel: Kernel, dst: &DeviceBuffer, src: &DeviceBuffer) -> KernelLaunch {
        KernelLaunch {
            kernel,
            buffers: vec![dst.clone(), src.clone()],
            elements: dst.elements(),
            range: NdRange::rounded(dst.elements(), 16),
        }
    }

    fn read_back(queue: &CommandQueue, buffer: &DeviceBuffer) -> Vec<f32> {
        let (token, slot) = queue.enqueue_map(buffer, MapMode::Read, &[]).unwrap();
        token.wait().unwrap();
        let data = slot.take().unwrap();
        let copy = data.clone();
        queue
            .enqueue_unmap(buffer, data, MapMode::Read, &[])
            .unwrap()
            .wait()
            .unwrap();
        copy
    }

    #[test]
    fn test_set_add_map() {
        let (memory, queue) = setup(true);
        let a = host_buffer(&memory, 400);
        let b = host_buffer(&memory, 400);
        let set = queue.enqueue_kernel(launch(Kernel::Set, &a, &b), &[]).unwrap();
        let add = queue
            .enqueue_kernel(launch(Kernel::Add, &a, &b), &[set])
            .unwrap();
        add.wait().unwrap();
        let data = read_back(&queue, &a);
        assert_eq!(data[0], 0.0);
        assert_eq!(data[99], 99.0);
        // Both buffers were host-located; the kernel moved them.
        assert_eq!(memory.snapshot().implicit_migrations, 2);
    }

    #[test]
    fn test_profiling_order() {
        let (memory, queue) = setup(true);
        let a = host_buffer(&memory, 64);
        let t = queue.enqueue_fill(&a, 1.0, &[]).unwrap();
        t.wait().unwrap();
        let info = t.profiling_info().unwrap();
        assert!(info.queued_ns <= info.submit_ns);
        assert!(info.submit_ns <= info.start_ns);
        assert!(info.start_ns <= info.end_ns);
    }

    #[test]
    fn test_profiling_disabled() {
        let (memory, queue) = setup(false);
        let a = host_buffer(&memory, 64);
        let t = queue.enqueue_fill(&a, 1.0, &[]).unwrap();
        t.wait().unwrap();
        assert!(matches!(t.profiling_info(), Err(DeviceError::ProfilingNotEnabled)));
    }

    #[test]
    fn test_invalid_enqueue_produces_no_token() {
        let (memory, queue) = setup(true);
        let a = host_buffer(&memory, 64);
        memory.release_buffer(&a).unwrap();
        assert!(matches!(
            queue.enqueue_fill(&a, 0.0, &[]),
            Err(DeviceError::InvalidBuffer(_))
        ));
        let b = host_buffer(&memory, 64);
        assert!(queue.enqueue_copy(&b, &b, CopyRegion::whole(64), &[]).is_err());
        assert!(queue
            .enqueue_copy(&b, &host_buffer(&memory, 32), CopyRegion::whole(64), &[])
            .is_err());
    }

    #[test]
    fn test_user_token_gates_queue() {
        let (memory, queue) = setup(true);
        let a = host_buffer(&memory, 64);
        let gate = queue.create_user_token();
        let fill = queue.enqueue_fill(&a, 3.0, &[gate.token()]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(!fill.is_signaled());
        gate.signal();
        fill.wait().unwrap();
        assert_eq!(read_back(&queue, &a)[0], 3.0);
    }

    #[test]
    fn test_failed_dependency_propagates() {
        let (memory, queue) = setup(true);
        let a = host_buffer(&memory, 64);
        let gate = queue.create_user_token();
        let fill = queue.enqueue_fill(&a, 3.0, &[gate.token()]).unwrap();
        gate.fail("aborted");
        assert!(matches!(fill.wait(), Err(DeviceError::ExecutionFailed { .. })));
        assert!(matches!(fill.status(), TokenStatus::Failed(_)));
    }

    #[test]
    fn test_zero_copy_map_of_host_backed_buffer() {
        let (memory, queue) = setup(true);
        let flags = MemFlags::read_write().with_host_ptr(crate::HostPtrMode::AllocHostPtr);
        let a = memory.create_buffer(64, flags, Location::Host).unwrap();
        let (token, slot) = queue.enqueue_map(&a, MapMode::Write, &[]).unwrap();
        token.wait().unwrap();
        let mut view = slot.take().unwrap();
        assert!(a.lock().data.is_empty());
        view[3] = 7.0;
        queue
            .enqueue_unmap(&a, view, MapMode::Write, &[])
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(a.lock().data[3], 7.0);
    }

    #[test]
    fn test_read_map_of_host_backed_buffer_is_private() {
        let (memory, queue) = setup(true);
        let flags = MemFlags::read_write().with_host_ptr(crate::HostPtrMode::AllocHostPtr);
        let a = memory.create_buffer(64, flags, Location::Host).unwrap();
        let (token, slot) = queue.enqueue_map(&a, MapMode::Read, &[]).unwrap();
        token.wait().unwrap();
        let mut view = slot.take().unwrap();
        assert_eq!(a.lock().data.len(), 16);
        view[7] = -1.0;
        queue
            .enqueue_unmap(&a, view, MapMode::Read, &[])
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(a.lock().data[7], 0.0);
    }

    #[test]
    fn test_kernel_on_mapped_buffer_fails() {
        let (memory, queue) = setup(true);
        let a = host_buffer(&memory, 64);
        let b = host_buffer(&memory, 64);
        let (map, slot) = queue.enqueue_map(&a, MapMode::Read, &[]).unwrap();
        let add = queue
            .enqueue_kernel(launch(Kernel::Add, &a, &b), &[map])
            .unwrap();
        assert!(add.wait().is_err());
        let view = slot.take().unwrap();
        queue
            .enqueue_unmap(&a, view, MapMode::Read, &[])
            .unwrap()
            .wait()
            .unwrap();
    }

    #[test]
    fn test_migrate_and_finish() {
        let (memory, queue) = setup(true);
        let a = host_buffer(&memory, 256);
        queue
            .enqueue_migrate(
                &[a.clone()],
                Location::Device,
                MigrationContent::Preserve,
                &[],
            )
            .unwrap();
        queue.finish().unwrap();
        assert_eq!(a.location(), Location::Device);
        let c = memory.snapshot();
        assert_eq!(c.explicit_migrations, 1);
        assert_eq!(c.implicit_migrations, 0);
        assert_eq!(c.resident_bytes, 256);
    }
}
