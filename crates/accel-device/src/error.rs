// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the simulated accelerator.

use crate::{BufferId, TokenId};
use std::time::Duration;

/// Errors reported by the accelerator: selection, allocation, enqueue-time
/// validation and command execution.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The requested platform index is out of range.
    #[error("there is no platform #{index} ({available} platforms found)")]
    PlatformNotFound { index: usize, available: usize },

    /// The requested device index is out of range for the platform.
    #[error("there is no device #{index} on platform '{platform}' ({available} devices found)")]
    DeviceNotFound {
        platform: String,
        index: usize,
        available: usize,
    },

    /// The platform version string could not be parsed.
    #[error("unable to determine platform version from '{0}'")]
    InvalidVersion(String),

    /// The platform does not support explicit buffer migration.
    #[error("platform version {major}.{minor} is not at least 1.2")]
    UnsupportedVersion { major: u32, minor: u32 },

    /// The device refused a buffer request.
    #[error("allocation of {requested_bytes} bytes refused: {reason}")]
    AllocationRefused {
        requested_bytes: usize,
        reason: String,
    },

    /// A command referenced a buffer that has been released.
    #[error("invalid buffer {0}: released or never allocated")]
    InvalidBuffer(BufferId),

    /// A command argument failed enqueue-time validation.
    #[error("invalid value for {op}: {detail}")]
    InvalidValue { op: &'static str, detail: String },

    /// A command touched a buffer that is currently mapped on the host.
    #[error("buffer {0} is mapped on the host")]
    BufferMapped(BufferId),

    /// Profiling timestamps were requested on a queue created without profiling.
    #[error("profiling is not enabled on this queue")]
    ProfilingNotEnabled,

    /// Profiling timestamps were requested before the token signaled.
    #[error("token {0} has not signaled yet")]
    NotSignaled(TokenId),

    /// The command behind a token failed (or one of its dependencies did).
    #[error("{label} (token {token}) failed: {detail}")]
    ExecutionFailed {
        token: TokenId,
        label: &'static str,
        detail: String,
    },

    /// A watchdog-bounded wait expired.
    #[error("timed out after {waited:?} waiting for {label} (token {token})")]
    Timeout {
        token: TokenId,
        label: &'static str,
        waited: Duration,
    },

    /// The queue worker is gone; nothing more can be enqueued.
    #[error("command queue has shut down")]
    QueueClosed,
}
