// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for sample collection and statistics.

use accel_device::DeviceError;

/// Errors raised while reading profiling timestamps.
#[derive(Debug, thiserror::Error)]
pub enum ProfilingError {
    /// The queue was created without profiling.
    #[error("profiling timestamps are unavailable on this queue")]
    ProfilingUnavailable,

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Errors raised while aggregating trial samples.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// A reduction was asked for over zero samples.
    #[error("cannot reduce an empty sample set")]
    EmptySampleSet,

    /// An aggregator was configured with zero trials per series.
    #[error("trial count must be at least 1")]
    ZeroTrials,

    /// A series already holds its configured number of trials.
    #[error("series {series} already holds all {trials} trials")]
    SeriesFull { series: String, trials: usize },

    /// A series is missing trials; partial sets are never summarized.
    #[error("series {series} has {got} of {expected} trials")]
    IncompleteSeries {
        series: String,
        got: usize,
        expected: usize,
    },
}
