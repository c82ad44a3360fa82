// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Launch overhead of an empty kernel at each configured work size.

use crate::{HarnessConfig, HarnessError, ScenarioReport, TimeUnit};
use exec_pipeline::{Operation, Pipeline};
use profiling::{Metric, ProfilingSample, TrialAggregator};

pub(crate) fn run(
    pipeline: &mut Pipeline,
    config: &HarnessConfig,
    report: &mut ScenarioReport,
) -> Result<(), HarnessError> {
    report.time_unit = TimeUnit::Nanoseconds;
    let mut aggregator = TrialAggregator::new(config.trials)?;

    for &global in &config.latency_work_sizes {
        let op = Operation::nop(global);
        let policy = format!("gws={global}");
        for trial in 0..config.trials {
            let token = pipeline.submit(&op, &[])?;
            pipeline.await_token(&token)?;
            let sample = ProfilingSample::collect(op.kind(), &token)?;
            report.note_anomalies(&sample);
            for metric in Metric::ALL {
                aggregator.record(&policy, &sample, metric, 0)?;
            }
            report.record(format!(
                "{policy} loop {trial}: queue-wait {} ns, dispatch {} ns, execution {} ns",
                sample.interval_ns(Metric::QueueWait),
                sample.interval_ns(Metric::DispatchLatency),
                sample.interval_ns(Metric::Execution),
            ));
        }
    }

    report.summaries = aggregator.summarize()?;
    Ok(())
}
