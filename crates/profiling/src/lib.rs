// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # profiling
//!
//! Turns completed dependency tokens into timing statistics.
//!
//! - [`ProfilingSample`] — the queued/submit/start/end timestamps of one
//!   operation, with signed intervals and clock-anomaly detection.
//! - [`TrialAggregator`] — fixed-size series of trials keyed by policy,
//!   operation kind and [`Metric`], reduced to [`StatisticsSummary`]s.
//! - [`reduce`] — a pure min/median/mean/max reduction.
//!
//! # Example
//! ```
//! use profiling::reduce;
//!
//! let stats = reduce(&[5.0, 1.0, 3.0, 2.0, 4.0]).unwrap();
//! assert_eq!(stats.min, 1.0);
//! assert_eq!(stats.median, 4.0); // upper median index (n + 1) / 2
//! assert_eq!(stats.max, 5.0);
//! ```

mod error;
mod sample;
mod stats;

pub use error::{ProfilingError, StatsError};
pub use sample::{ClockAnomaly, Metric, ProfilingSample};
pub use stats::{
    bandwidth_gbps, median_index, reduce, traffic_bytes, BandwidthStats, DurationStats,
    SeriesKey, StatisticsSummary, TrialAggregator,
};
