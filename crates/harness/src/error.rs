// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for harness runs.

use accel_device::{BufferId, DeviceError};
use exec_pipeline::PipelineError;
use placement_manager::PlacementError;
use profiling::{ProfilingError, StatsError};

/// Errors that abort a scenario.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The requested platform or device could not be opened.
    #[error("device selection failed: {0}")]
    Selection(#[source] DeviceError),

    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("profiling error: {0}")]
    Profiling(#[from] ProfilingError),

    #[error("statistics error: {0}")]
    Stats(#[from] StatsError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// A verified buffer held the wrong value.
    #[error("mismatch in buffer {buffer} @ {index}: got {got} instead of {expected}")]
    ValueMismatch {
        buffer: BufferId,
        index: usize,
        got: f32,
        expected: f32,
    },

    /// A probe expected the device to reject something and it did not.
    #[error("probe failed: {0}")]
    ProbeFailed(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl HarnessError {
    /// The error's class in the run-level taxonomy.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Selection(_) => "SelectionError",
            Self::Placement(e) => placement_category(e),
            Self::Pipeline(PipelineError::DanglingDependency { .. }) => "DanglingDependency",
            Self::Pipeline(PipelineError::Placement(e)) => placement_category(e),
            Self::Pipeline(_) => "PipelineError",
            Self::Profiling(ProfilingError::ProfilingUnavailable) => "ProfilingUnavailable",
            Self::Profiling(ProfilingError::Device(DeviceError::ProfilingNotEnabled)) => {
                "ProfilingUnavailable"
            }
            Self::Profiling(_) | Self::Device(_) => "DeviceError",
            Self::Stats(_) => "StatisticsError",
            Self::ValueMismatch { .. } => "ValueMismatch",
            Self::ProbeFailed(_) => "ProbeFailed",
            Self::ConfigError(_) => "ConfigError",
        }
    }
}

fn placement_category(e: &PlacementError) -> &'static str {
    match e {
        PlacementError::AllocationError { .. }
        | PlacementError::ZeroSizedAllocation
        | PlacementError::WorkingSetTooLarge { .. }
        | PlacementError::ResidencyExceeded { .. } => "AllocationError",
        PlacementError::OrderingViolation { .. } => "OrderingViolation",
        _ => "PlacementError",
    }
}
