// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # placement-manager
//!
//! Deliberate overcommitment of accelerator memory with explicit,
//! dependency-checked buffer migration.
//!
//! # Key Components
//!
//! - [`PlacementManager`] — allocates buffers (possibly more than the
//!   device holds), tracks each buffer's [`Placement`], and issues
//!   migrations that respect both access ordering and the resident bound.
//! - [`MemoryBuffer`] — a managed buffer. The manager is the single owner
//!   of its lifecycle; commands only borrow it.
//! - [`MemoryBudget`] — an optional resident bound tighter than device
//!   memory, with human-readable parsing (`"48M"`, `"1G"`, etc.).
//! - [`PlacementStats`] — migration counts, bytes moved, peak residency.
//!
//! # Placement Model
//!
//! ```text
//!             allocate
//!                │
//!     ┌──────────┼────────────┐
//!     ▼          ▼            ▼
//!  Unbound   HostResident ◄─► DeviceResident
//!     │          ▲   │            ▲   │
//!     │          │   ▼            │   │
//!     └────► Migrating(to) ───────┘   │
//!                ▲────────────────────┘
//!                         release ──► (gone)
//! ```
//!
//! # Example
//! ```
//! use accel_device::{AcceleratorHandle, Location, PlatformRegistry, QueueProperties};
//! use placement_manager::{AllocStrategy, PlacementManager};
//!
//! let handle = AcceleratorHandle::probe(
//!     &PlatformRegistry::simulated(), 0, 0, QueueProperties::default(),
//! ).unwrap();
//! let mut manager = PlacementManager::new(handle, None);
//!
//! let count = manager.overcommit_buffer_count();
//! let size = manager.handle().max_single_alloc_bytes();
//! let buffers = manager.allocate(count, size, AllocStrategy::HostAccessible).unwrap();
//!
//! let token = manager.migrate(&buffers[0], Location::Device, &[]).unwrap();
//! token.wait().unwrap();
//! manager.release_all().unwrap();
//! ```

mod budget;
mod buffer;
mod error;
mod manager;
mod stats;

pub use budget::MemoryBudget;
pub use buffer::{AllocStrategy, ContentPolicy, MemoryBuffer, Placement};
pub use error::PlacementError;
pub use manager::{overcommit_buffer_count, PlacementManager};
pub use stats::PlacementStats;
