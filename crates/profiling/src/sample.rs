// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Profiling samples: the four timestamps of one completed operation.
//!
//! ```text
//!  queued ──────► submit ──────► start ──────► end
//!      queue-wait     dispatch-latency   execution
//! ```
//!
//! Intervals are signed. A negative interval means the device clock went
//! backwards; it is reported as a [`ClockAnomaly`] and kept as-is.

use crate::ProfilingError;
use accel_device::{DependencyToken, DeviceError, ProfilingInfo};
use exec_pipeline::OperationKind;
use std::fmt;

/// One interval between consecutive profiling timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    /// `submit - queued`
    QueueWait,
    /// `start - submit`
    DispatchLatency,
    /// `end - start`
    Execution,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Self::QueueWait, Self::DispatchLatency, Self::Execution];
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueWait => write!(f, "queue-wait"),
            Self::DispatchLatency => write!(f, "dispatch-latency"),
            Self::Execution => write!(f, "execution"),
        }
    }
}

/// A negative interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ClockAnomaly {
    pub kind: OperationKind,
    pub metric: Metric,
    pub interval_ns: i64,
}

impl fmt::Display for ClockAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} interval is negative ({} ns)",
            self.kind, self.metric, self.interval_ns
        )
    }
}

/// Profiling timestamps of one operation, in device-clock nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ProfilingSample {
    pub kind: OperationKind,
    pub queued_ns: u64,
    pub submit_ns: u64,
    pub start_ns: u64,
    pub end_ns: u64,
}

impl ProfilingSample {
    /// Waits for `token` and reads its timestamps.
    ///
    /// # Errors
    /// `ProfilingUnavailable` if the queue records no timestamps; the
    /// device error if the operation failed.
    pub fn collect(kind: OperationKind, token: &DependencyToken) -> Result<Self, ProfilingError> {
        token.wait()?;
        let info = token.profiling_info().map_err(|e| match e {
            DeviceError::ProfilingNotEnabled => ProfilingError::ProfilingUnavailable,
            other => ProfilingError::Device(other),
        })?;
        let sample = Self::from_info(kind, info);
        for anomaly in sample.anomalies() {
            tracing::warn!(token = %token.id(), "clock anomaly: {anomaly}");
        }
        Ok(sample)
    }

    pub fn from_info(kind: OperationKind, info: ProfilingInfo) -> Self {
        Self {
            kind,
            queued_ns: info.queued_ns,
            submit_ns: info.submit_ns,
            start_ns: info.start_ns,
            end_ns: info.end_ns,
        }
    }

    /// Signed interval for `metric`, in nanoseconds.
    pub fn interval_ns(&self, metric: Metric) -> i64 {
        let (from, to) = match metric {
            Metric::QueueWait => (self.queued_ns, self.submit_ns),
            Metric::DispatchLatency => (self.submit_ns, self.start_ns),
            Metric::Execution => (self.start_ns, self.end_ns),
        };
        // Two's complement: the wrapped difference is the signed one.
        to.wrapping_sub(from) as i64
    }

    /// Signed interval for `metric`, in milliseconds.
    pub fn interval_ms(&self, metric: Metric) -> f64 {
        self.interval_ns(metric) as f64 * 1.0e-6
    }

    pub fn anomalies(&self) -> Vec<ClockAnomaly> {
        Metric::ALL
            .iter()
            .map(|&metric| (metric, self.interval_ns(metric)))
            .filter(|&(_, ns)| ns < 0)
            .map(|(metric, interval_ns)| ClockAnomaly {
                kind: self.kind,
                metric,
                interval_ns,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel_device::{
        AcceleratorHandle, DeviceProfile, Location, MemFlags, PlatformRegistry, QueueProperties,
    };

    fn sample(q: u64, s: u64, st: u64, e: u64) -> ProfilingSample {
        ProfilingSample {
            kind: OperationKind::Copy,
            queued_ns: q,
            submit_ns: s,
            start_ns: st,
            end_ns: e,
        }
    }

    #[test]
    fn test_intervals() {
        let s = sample(100, 150, 175, 1175);
        assert_eq!(s.interval_ns(Metric::QueueWait), 50);
        assert_eq!(s.interval_ns(Metric::DispatchLatency), 25);
        assert_eq!(s.interval_ns(Metric::Execution), 1000);
        assert!((s.interval_ms(Metric::Execution) - 0.001).abs() < 1e-12);
        assert!(s.anomalies().is_empty());
    }

    #[test]
    fn test_negative_interval_is_reported_not_clamped() {
        let s = sample(100, 150, 140, 200);
        assert_eq!(s.interval_ns(Metric::DispatchLatency), -10);
        let anomalies = s.anomalies();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].metric, Metric::DispatchLatency);
        assert!(anomalies[0].to_string().contains("-10 ns"));
    }

    fn handle(profiling: bool) -> AcceleratorHandle {
        AcceleratorHandle::probe(
            &PlatformRegistry::single(DeviceProfile::tiny(4096, 1024)),
            0,
            0,
            QueueProperties { profiling },
        )
        .unwrap()
    }

    #[test]
    fn test_collect_from_device() {
        let h = handle(true);
        let buf = h
            .create_buffer(1024, MemFlags::read_write(), Location::Device)
            .unwrap();
        let t = h.queue().enqueue_fill(&buf, 2.0, &[]).unwrap();
        let s = ProfilingSample::collect(OperationKind::Fill, &t).unwrap();
        assert!(s.queued_ns <= s.submit_ns);
        assert!(s.submit_ns <= s.start_ns);
        assert!(s.start_ns <= s.end_ns);
    }

    #[test]
    fn test_collect_without_profiling() {
        let h = handle(false);
        let t = h.queue().enqueue_marker(&[]).unwrap();
        assert!(matches!(
            ProfilingSample::collect(OperationKind::Barrier, &t),
            Err(ProfilingError::ProfilingUnavailable)
        ));
    }
}
