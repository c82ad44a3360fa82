// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Trial statistics.
//!
//! Samples are grouped into series keyed by (policy, operation kind,
//! metric). Every series must hold exactly the configured number of
//! trials before it can be summarized: a run that lost a trial produces
//! no statistics at all.

use crate::{Metric, ProfilingSample, StatsError};
use accel_device::Kernel;
use exec_pipeline::OperationKind;
use std::fmt;

/// Order statistics of one series.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct DurationStats {
    pub min: f64,
    pub median: f64,
    pub mean: f64,
    pub max: f64,
}

/// Index of the reported median in a sorted series of `n` samples.
///
/// This is the upper index `(n + 1) / 2`, which for even and odd `n`
/// alike sits one past the textbook median. Clamped to `n - 1` so a
/// single sample is its own median.
pub fn median_index(n: usize) -> usize {
    ((n + 1) / 2).min(n.saturating_sub(1))
}

/// Reduces a series to min/median/mean/max.
pub fn reduce(samples: &[f64]) -> Result<DurationStats, StatsError> {
    if samples.is_empty() {
        return Err(StatsError::EmptySampleSet);
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    Ok(DurationStats {
        min: sorted[0],
        median: sorted[median_index(n)],
        mean: sorted.iter().sum::<f64>() / n as f64,
        max: sorted[n - 1],
    })
}

/// Bytes of device memory traffic one operation causes on a buffer of
/// `buffer_bytes`.
pub fn traffic_bytes(kind: OperationKind, buffer_bytes: usize) -> usize {
    match kind {
        // Read one buffer, write the other.
        OperationKind::Kernel(Kernel::Set | Kernel::Add) | OperationKind::Copy => 2 * buffer_bytes,
        OperationKind::Kernel(Kernel::Nop) | OperationKind::Barrier => 0,
        OperationKind::Map
        | OperationKind::Unmap
        | OperationKind::Fill
        | OperationKind::MigrateToHost
        | OperationKind::MigrateToDevice => buffer_bytes,
    }
}

/// GB/s for `bytes` moved in `duration_ms`. `None` unless the duration
/// is positive.
pub fn bandwidth_gbps(bytes: usize, duration_ms: f64) -> Option<f64> {
    if duration_ms > 0.0 {
        Some(bytes as f64 / duration_ms * 1.0e-6)
    } else {
        None
    }
}

/// Bandwidth at each of the duration statistics.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct BandwidthStats {
    pub at_min: Option<f64>,
    pub at_median: Option<f64>,
    pub at_mean: Option<f64>,
    pub at_max: Option<f64>,
}

impl BandwidthStats {
    pub fn from_durations(bytes: usize, duration: &DurationStats) -> Self {
        Self {
            at_min: bandwidth_gbps(bytes, duration.min),
            at_median: bandwidth_gbps(bytes, duration.median),
            at_mean: bandwidth_gbps(bytes, duration.mean),
            at_max: bandwidth_gbps(bytes, duration.max),
        }
    }
}

/// Identity of one series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct SeriesKey {
    pub policy: String,
    pub kind: OperationKind,
    pub metric: Metric,
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.policy, self.kind, self.metric)
    }
}

/// Summary of one complete series.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StatisticsSummary {
    pub policy: String,
    pub kind: OperationKind,
    pub metric: Metric,
    pub trials: usize,
    pub duration_ms: DurationStats,
    pub bytes_moved: usize,
    /// Present for execution series that move data.
    pub bandwidth_gbps: Option<BandwidthStats>,
}

#[derive(Debug)]
struct Series {
    key: SeriesKey,
    bytes_moved: usize,
    samples_ms: Vec<f64>,
}

/// Collects a fixed number of trials per series, in insertion order.
#[derive(Debug)]
pub struct TrialAggregator {
    trials: usize,
    series: Vec<Series>,
}

impl TrialAggregator {
    pub fn new(trials: usize) -> Result<Self, StatsError> {
        if trials == 0 {
            return Err(StatsError::ZeroTrials);
        }
        Ok(Self {
            trials,
            series: Vec::new(),
        })
    }

    pub fn trials(&self) -> usize {
        self.trials
    }

    /// Records `metric` of `sample` under `policy`; traffic is derived
    /// from the sample's kind and the buffer size.
    pub fn record(
        &mut self,
        policy: &str,
        sample: &ProfilingSample,
        metric: Metric,
        buffer_bytes: usize,
    ) -> Result<(), StatsError> {
        let key = SeriesKey {
            policy: policy.to_string(),
            kind: sample.kind,
            metric,
        };
        self.record_value(
            key,
            traffic_bytes(sample.kind, buffer_bytes),
            sample.interval_ms(metric),
        )
    }

    /// Records a raw duration in milliseconds.
    pub fn record_value(
        &mut self,
        key: SeriesKey,
        bytes_moved: usize,
        value_ms: f64,
    ) -> Result<(), StatsError> {
        let trials = self.trials;
        let index = match self.series.iter().position(|s| s.key == key) {
            Some(i) => i,
            None => {
                self.series.push(Series {
                    key,
                    bytes_moved,
                    samples_ms: Vec::with_capacity(trials),
                });
                self.series.len() - 1
            }
        };
        let series = &mut self.series[index];
        if series.samples_ms.len() == trials {
            return Err(StatsError::SeriesFull {
                series: series.key.to_string(),
                trials,
            });
        }
        series.samples_ms.push(value_ms);
        Ok(())
    }

    /// Summarizes every series, in the order they were first recorded.
    pub fn summarize(&self) -> Result<Vec<StatisticsSummary>, StatsError> {
        self.series
            .iter()
            .map(|series| {
                if series.samples_ms.len() != self.trials {
                    return Err(StatsError::IncompleteSeries {
                        series: series.key.to_string(),
                        got: series.samples_ms.len(),
                        expected: self.trials,
                    });
                }
                let duration_ms = reduce(&series.samples_ms)?;
                let bandwidth_gbps = (series.key.metric == Metric::Execution
                    && series.bytes_moved > 0)
                    .then(|| BandwidthStats::from_durations(series.bytes_moved, &duration_ms));
                Ok(StatisticsSummary {
                    policy: series.key.policy.clone(),
                    kind: series.key.kind,
                    metric: series.key.metric,
                    trials: self.trials,
                    duration_ms,
                    bytes_moved: series.bytes_moved,
                    bandwidth_gbps,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(policy: &str) -> SeriesKey {
        SeriesKey {
            policy: policy.into(),
            kind: OperationKind::Kernel(Kernel::Add),
            metric: Metric::Execution,
        }
    }

    #[test]
    fn test_reduce_upper_median() {
        let s = reduce(&[5.0, 1.0, 3.0, 2.0, 4.0]).unwrap();
        assert_eq!(s.min, 1.0);
        assert_eq!(s.median, 4.0);
        assert_eq!(s.max, 5.0);
        assert!((s.mean - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_reduce_edges() {
        assert!(matches!(reduce(&[]), Err(StatsError::EmptySampleSet)));
        let one = reduce(&[2.5]).unwrap();
        assert_eq!((one.min, one.median, one.max), (2.5, 2.5, 2.5));
        assert_eq!(reduce(&[1.0, 2.0]).unwrap().median, 2.0);
        assert_eq!(median_index(4), 2);
        assert_eq!(median_index(1), 0);
    }

    #[test]
    fn test_reduce_keeps_negative_values() {
        let s = reduce(&[-1.0, 2.0, 3.0]).unwrap();
        assert_eq!(s.min, -1.0);
    }

    #[test]
    fn test_traffic_and_bandwidth() {
        assert_eq!(traffic_bytes(OperationKind::Kernel(Kernel::Set), 100), 200);
        assert_eq!(traffic_bytes(OperationKind::Map, 100), 100);
        assert_eq!(traffic_bytes(OperationKind::Kernel(Kernel::Nop), 100), 0);
        // 1 GB in 1000 ms is 1 GB/s.
        let gbps = bandwidth_gbps(1_000_000_000, 1000.0).unwrap();
        assert!((gbps - 1.0).abs() < 1e-12);
        assert_eq!(bandwidth_gbps(100, 0.0), None);
        assert_eq!(bandwidth_gbps(100, -1.0), None);
    }

    #[test]
    fn test_aggregator_rejects_zero_trials() {
        assert!(matches!(TrialAggregator::new(0), Err(StatsError::ZeroTrials)));
    }

    #[test]
    fn test_aggregator_series_full() {
        let mut agg = TrialAggregator::new(2).unwrap();
        agg.record_value(key("plain"), 8, 1.0).unwrap();
        agg.record_value(key("plain"), 8, 2.0).unwrap();
        assert!(matches!(
            agg.record_value(key("plain"), 8, 3.0),
            Err(StatsError::SeriesFull { trials: 2, .. })
        ));
    }

    #[test]
    fn test_aggregator_refuses_incomplete() {
        let mut agg = TrialAggregator::new(3).unwrap();
        agg.record_value(key("plain"), 8, 1.0).unwrap();
        agg.record_value(key("plain"), 8, 1.0).unwrap();
        assert!(matches!(
            agg.summarize(),
            Err(StatsError::IncompleteSeries { got: 2, expected: 3, .. })
        ));
    }

    #[test]
    fn test_aggregator_insertion_order_and_bandwidth() {
        let mut agg = TrialAggregator::new(1).unwrap();
        agg.record_value(key("plain"), 2_000_000, 2.0).unwrap();
        agg.record_value(key("host-ptr"), 2_000_000, 1.0).unwrap();
        let queue_wait = SeriesKey {
            metric: Metric::QueueWait,
            ..key("plain")
        };
        agg.record_value(queue_wait, 2_000_000, 0.5).unwrap();

        let summaries = agg.summarize().unwrap();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].policy, "plain");
        assert_eq!(summaries[1].policy, "host-ptr");
        let bw = summaries[1].bandwidth_gbps.unwrap();
        assert!((bw.at_median.unwrap() - 2.0).abs() < 1e-12);
        assert!(summaries[2].bandwidth_gbps.is_none());
    }

    #[test]
    fn test_summary_serializes_kind_as_name() {
        let mut agg = TrialAggregator::new(1).unwrap();
        agg.record_value(key("plain"), 8, 1.0).unwrap();
        let json = serde_json::to_string(&agg.summarize().unwrap()[0]).unwrap();
        assert!(json.contains("\"kind\":\"add\""));
        assert!(json.contains("\"metric\":\"execution\""));
    }
}
