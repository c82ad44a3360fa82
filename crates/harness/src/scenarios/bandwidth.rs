// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Effective bandwidth of `set → add → map` under each allocation strategy.
//!
//! The plain strategy runs first and last so that warm-up effects show
//! up as a difference between the two plain turns.

use super::check_values;
use crate::{HarnessConfig, HarnessError, ScenarioReport};
use accel_device::{Kernel, MapMode};
use exec_pipeline::{Operation, OperationKind, Pipeline};
use placement_manager::AllocStrategy;
use profiling::{bandwidth_gbps, traffic_bytes, Metric, ProfilingSample, TrialAggregator};

const TURNS: [AllocStrategy; 4] = [
    AllocStrategy::Plain,
    AllocStrategy::HostPtrBacked,
    AllocStrategy::HostAccessible,
    AllocStrategy::Plain,
];

pub(crate) fn run(
    pipeline: &mut Pipeline,
    config: &HarnessConfig,
    report: &mut ScenarioReport,
) -> Result<(), HarnessError> {
    let size = pipeline.handle().max_single_alloc_bytes();
    let mut aggregator = TrialAggregator::new(config.trials)?;

    for (turn, strategy) in TURNS.into_iter().enumerate() {
        let policy = format!("{turn}:{strategy}");
        let buffers = pipeline.allocate(2, size, strategy)?;
        let (dst, src) = (&buffers[0], &buffers[1]);
        report.record(format!("turn {turn}: 2 {strategy} buffers of {size} B"));

        for trial in 0..config.trials {
            let set = pipeline.submit(&Operation::kernel(Kernel::Set, dst, src), &[])?;
            let add = pipeline.submit(&Operation::kernel(Kernel::Add, dst, src), &[set.clone()])?;
            let view = pipeline.map(dst, MapMode::Read, &[add.clone()])?.acquire()?;
            check_values(dst, view.as_slice(), |e| e as f32)?;
            let map = view.map_token().clone();
            view.unmap(&[])?;

            let steps = [
                (OperationKind::Kernel(Kernel::Set), &set),
                (OperationKind::Kernel(Kernel::Add), &add),
                (OperationKind::Map, &map),
            ];
            for (kind, token) in steps {
                let sample = ProfilingSample::collect(kind, token)?;
                report.note_anomalies(&sample);
                aggregator.record(&policy, &sample, Metric::Execution, size)?;

                let ms = sample.interval_ms(Metric::Execution);
                let line = match bandwidth_gbps(traffic_bytes(kind, size), ms) {
                    Some(gbps) => format!("{policy} loop {trial}: {kind} {ms:.6} ms, {gbps:.3} GB/s"),
                    None => format!("{policy} loop {trial}: {kind} {ms:.6} ms"),
                };
                report.record(line);
            }
        }

        pipeline.finish()?;
        for buffer in buffers.iter().rev() {
            pipeline.release(buffer)?;
        }
    }

    report.summaries = aggregator.summarize()?;
    Ok(())
}
