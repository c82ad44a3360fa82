// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Scenario reports.
//!
//! A [`ScenarioReport`] carries everything a run produced: the step log,
//! the per-series statistics, clock anomalies, and the placement and
//! device counters at the end of the run. It renders as a text table or
//! serializes to JSON.

use crate::Scenario;
use accel_device::{AcceleratorHandle, DeviceCounters};
use placement_manager::PlacementStats;
use profiling::{ClockAnomaly, ProfilingSample, StatisticsSummary};
use std::fmt::Write as _;

/// Unit durations are rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Milliseconds,
    Nanoseconds,
}

impl TimeUnit {
    fn suffix(self) -> &'static str {
        match self {
            Self::Milliseconds => "ms",
            Self::Nanoseconds => "ns",
        }
    }

    fn from_ms(self, ms: f64) -> f64 {
        match self {
            Self::Milliseconds => ms,
            Self::Nanoseconds => ms * 1.0e6,
        }
    }
}

/// Everything one scenario run produced.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub platform: String,
    pub device: String,
    pub log: Vec<String>,
    pub time_unit: TimeUnit,
    pub summaries: Vec<StatisticsSummary>,
    pub anomalies: Vec<ClockAnomaly>,
    pub placement: PlacementStats,
    pub device_counters: DeviceCounters,
}

impl ScenarioReport {
    pub fn new(scenario: Scenario, handle: &AcceleratorHandle) -> Self {
        Self {
            scenario,
            platform: handle.platform().name.clone(),
            device: handle.device().name.clone(),
            log: Vec::new(),
            time_unit: TimeUnit::Milliseconds,
            summaries: Vec::new(),
            anomalies: Vec::new(),
            placement: PlacementStats::default(),
            device_counters: DeviceCounters::default(),
        }
    }

    /// Appends a line to the step log.
    pub fn record(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(scenario = %self.scenario, "{line}");
        self.log.push(line);
    }

    pub(crate) fn note_anomalies(&mut self, sample: &ProfilingSample) {
        self.anomalies.extend(sample.anomalies());
    }

    /// Renders the log followed by the statistics table.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Platform: {}", self.platform);
        let _ = writeln!(out, "Device:   {}", self.device);
        let _ = writeln!(out, "Scenario: {}", self.scenario);
        out.push('\n');
        for line in &self.log {
            let _ = writeln!(out, "{line}");
        }

        if !self.summaries.is_empty() {
            let unit = self.time_unit;
            out.push('\n');
            let _ = writeln!(
                out,
                "{:<22} {:<8} {:<17} {:>14} {:>14} {:>14} {:>14}  {}",
                "policy",
                "kind",
                "metric",
                format!("min [{}]", unit.suffix()),
                format!("median [{}]", unit.suffix()),
                format!("mean [{}]", unit.suffix()),
                format!("max [{}]", unit.suffix()),
                "B/W min/median/mean/max [GB/s]",
            );
            for s in &self.summaries {
                let d = &s.duration_ms;
                let bandwidth = s
                    .bandwidth_gbps
                    .map(|bw| {
                        [bw.at_min, bw.at_median, bw.at_mean, bw.at_max]
                            .iter()
                            .map(|v| v.map_or("-".to_string(), |g| format!("{g:.3}")))
                            .collect::<Vec<_>>()
                            .join("/")
                    })
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "{:<22} {:<8} {:<17} {:>14.3} {:>14.3} {:>14.3} {:>14.3}  {}",
                    s.policy,
                    s.kind.to_string(),
                    s.metric.to_string(),
                    unit.from_ms(d.min),
                    unit.from_ms(d.median),
                    unit.from_ms(d.mean),
                    unit.from_ms(d.max),
                    bandwidth,
                );
            }
        }

        if !self.anomalies.is_empty() {
            out.push('\n');
            for anomaly in &self.anomalies {
                let _ = writeln!(out, "warning: {anomaly}");
            }
        }

        out.push('\n');
        let _ = writeln!(out, "{}", self.summary());
        out
    }

    /// Returns a one-line summary of the run.
    pub fn summary(&self) -> String {
        format!(
            "{} on {}: {} series, {} anomalies | {} | device peak {:.1} KB, {} implicit migrations, {} oversubscriptions",
            self.scenario,
            self.device,
            self.summaries.len(),
            self.anomalies.len(),
            self.placement.summary(),
            self.device_counters.peak_resident_bytes as f64 / 1024.0,
            self.device_counters.implicit_migrations,
            self.device_counters.oversubscriptions,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel_device::{DeviceProfile, Kernel, PlatformRegistry, QueueProperties};
    use exec_pipeline::OperationKind;
    use profiling::{Metric, TrialAggregator};

    fn report() -> ScenarioReport {
        let handle = AcceleratorHandle::probe(
            &PlatformRegistry::single(DeviceProfile::tiny(4096, 1024)),
            0,
            0,
            QueueProperties::default(),
        )
        .unwrap();
        ScenarioReport::new(Scenario::Bandwidth, &handle)
    }

    #[test]
    fn test_render_includes_log_and_table() {
        let mut r = report();
        r.record("turn 0: 2 plain buffers of 1024 B");
        let mut agg = TrialAggregator::new(1).unwrap();
        let key = profiling::SeriesKey {
            policy: "0:plain".into(),
            kind: OperationKind::Kernel(Kernel::Add),
            metric: Metric::Execution,
        };
        agg.record_value(key, 2048, 0.5).unwrap();
        r.summaries = agg.summarize().unwrap();

        let text = r.render_text();
        assert!(text.contains("Scenario: bandwidth"));
        assert!(text.contains("turn 0: 2 plain buffers"));
        assert!(text.contains("0:plain"));
        assert!(text.contains("median [ms]"));
    }

    #[test]
    fn test_nanosecond_rendering() {
        let mut r = report();
        r.time_unit = TimeUnit::Nanoseconds;
        let mut agg = TrialAggregator::new(1).unwrap();
        let key = profiling::SeriesKey {
            policy: "gws=1".into(),
            kind: OperationKind::Kernel(Kernel::Nop),
            metric: Metric::QueueWait,
        };
        agg.record_value(key, 0, 0.002).unwrap();
        r.summaries = agg.summarize().unwrap();
        let text = r.render_text();
        assert!(text.contains("median [ns]"));
        assert!(text.contains("2000.000"));
    }

    #[test]
    fn test_serializes_to_json() {
        let r = report();
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"scenario\":\"bandwidth\""));
        assert!(json.contains("\"time_unit\":\"milliseconds\""));
    }
}
