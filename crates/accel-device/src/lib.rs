// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # accel-device
//!
//! An in-process simulated compute accelerator that follows the
//! queue/kernel/buffer programming model of GPU compute APIs.
//!
//! # Key Components
//!
//! - [`PlatformRegistry`] — the enumerated platforms and their
//!   [`DeviceProfile`]s (memory size, single-allocation limit, preferred
//!   work-group multiple).
//! - [`AcceleratorHandle`] — one opened device with a single in-order
//!   [`CommandQueue`].
//! - [`DeviceBuffer`] — a fixed-size memory object with a physical
//!   [`Location`] (host or device).
//! - [`DependencyToken`] — completion handle of one enqueued command,
//!   carrying its profiling timestamps once signaled.
//!
//! # Execution Model
//!
//! ```text
//!   host thread                          worker thread
//!   ───────────                          ─────────────
//!   enqueue_kernel(add, waits=[t3]) ──►  t3 signaled? ──► run add ──► t4 Complete
//!         │
//!         ▼
//!   t4 (Queued)  ── wait() blocks until Complete | Failed
//! ```
//!
//! Commands that touch a host-located buffer migrate it to the device
//! implicitly. The device never refuses residency; [`DeviceCounters`]
//! record implicit migrations and oversubscription so callers can check
//! that their own placement bookkeeping kept both at zero.
//!
//! # Example
//! ```
//! use accel_device::{AcceleratorHandle, Location, MemFlags, PlatformRegistry, QueueProperties};
//!
//! let handle = AcceleratorHandle::probe(
//!     &PlatformRegistry::simulated(), 0, 0, QueueProperties::default(),
//! ).unwrap();
//! let buf = handle
//!     .create_buffer(4096, MemFlags::read_write(), Location::Host)
//!     .unwrap();
//! let token = handle.queue().enqueue_fill(&buf, 1.0, &[]).unwrap();
//! token.wait().unwrap();
//! assert!(token.profiling_info().is_ok());
//! ```

mod error;
mod handle;
pub mod kernel;
mod memory;
mod platform;
mod queue;
mod token;

pub use error::DeviceError;
pub use handle::AcceleratorHandle;
pub use kernel::{Kernel, KernelLaunch, NdRange};
pub use memory::{
    BufferId, DeviceBuffer, DeviceCounters, HostPtrMode, Location, MapMode, MemFlags,
    MigrationContent,
};
pub use platform::{DeviceProfile, PlatformInfo, PlatformRegistry};
pub use queue::{CommandQueue, CopyRegion, MapSlot, QueueProperties};
pub use token::{DependencyToken, ProfilingInfo, TokenId, TokenStatus, UserToken};
