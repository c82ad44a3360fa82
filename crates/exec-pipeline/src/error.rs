// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the submission pipeline.

use accel_device::{BufferId, DeviceError, TokenId};
use placement_manager::PlacementError;

/// Errors raised while submitting or awaiting operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A waits-on token belongs to a command on a buffer that has since
    /// been released.
    #[error("token {token} ({label}) references released buffer {buffer}")]
    DanglingDependency {
        token: TokenId,
        label: &'static str,
        buffer: BufferId,
    },

    /// A completed map produced no host view.
    #[error("map of buffer {0} completed without a host view")]
    ViewUnavailable(BufferId),

    /// The view was already unmapped.
    #[error("mapping of buffer {0} has already been released")]
    AlreadyUnmapped(BufferId),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}
