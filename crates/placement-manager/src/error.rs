// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for buffer placement.

use accel_device::{BufferId, DeviceError, TokenId};

/// Errors raised by the placement manager.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// A buffer request was refused, either up front (larger than the
    /// single-allocation limit) or by the device.
    #[error("allocation of {requested_bytes} bytes failed (single-allocation limit {max_single_alloc}): {detail}")]
    AllocationError {
        requested_bytes: usize,
        max_single_alloc: usize,
        detail: String,
    },

    /// A migration was requested that is not ordered after every
    /// outstanding access of the buffer.
    #[error("migration of buffer {buffer} is not ordered after pending {label} (token {pending})")]
    OrderingViolation {
        buffer: BufferId,
        pending: TokenId,
        label: &'static str,
    },

    /// The buffer is not tracked by this manager.
    #[error("buffer {0} is not managed here")]
    UnknownBuffer(BufferId),

    /// The buffer has already been released.
    #[error("buffer {0} has been released")]
    Released(BufferId),

    /// A working set that cannot be resident at once, even after evicting
    /// everything else.
    #[error("working set of {required} bytes exceeds the resident limit of {limit} bytes")]
    WorkingSetTooLarge { required: usize, limit: usize },

    /// A device-bound migration would over-commit the resident limit.
    #[error("migrating buffer {buffer} ({required} bytes) would exceed the resident limit: {available} of {limit} bytes free")]
    ResidencyExceeded {
        buffer: BufferId,
        required: usize,
        available: usize,
        limit: usize,
    },

    /// A resident budget string could not be parsed.
    #[error("invalid budget '{input}': {reason}")]
    InvalidBudget { input: String, reason: String },

    /// Attempted to allocate a zero-sized buffer.
    #[error("cannot allocate zero-sized buffer")]
    ZeroSizedAllocation,

    #[error(transparent)]
    Device(#[from] DeviceError),
}
