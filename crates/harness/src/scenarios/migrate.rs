// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Accumulate an overcommitted set of host-accessible buffers into
//! buffer 0, evicting each one once it has been consumed.
//!
//! After step `i`, every element of buffer 0 holds `1 + 2 + … + i`.

use super::{triangular, verify, write_value};
use crate::{HarnessError, ScenarioReport};
use accel_device::{DependencyToken, Kernel};
use exec_pipeline::{Operation, Pipeline};
use placement_manager::{AllocStrategy, ContentPolicy};

pub(crate) fn run(pipeline: &mut Pipeline, report: &mut ScenarioReport) -> Result<(), HarnessError> {
    let count = pipeline.placement().overcommit_buffer_count();
    let size = pipeline.handle().max_single_alloc_bytes();
    let buffers = pipeline.allocate(count, size, AllocStrategy::HostAccessible)?;
    report.record(format!(
        "allocated {count} host-accessible buffers of {size} B ({} B of {} B device memory)",
        count * size,
        pipeline.handle().total_memory_bytes()
    ));

    let base = &buffers[0];
    write_value(pipeline, base, 0.0, &[])?;

    let mut previous_add: Option<DependencyToken> = None;
    for i in 1..count {
        let source = &buffers[i];
        let written = write_value(pipeline, source, i as f32, &[])?;

        if i > 1 {
            let last_use: Vec<DependencyToken> = previous_add.iter().cloned().collect();
            pipeline.submit(
                &Operation::MigrateToHost {
                    buffer: buffers[i - 1].clone(),
                    content: ContentPolicy::Undefined,
                },
                &last_use,
            )?;
        }
        pipeline.finish()?;

        let add = pipeline.submit(&Operation::kernel(Kernel::Add, base, source), &[written])?;
        verify(pipeline, base, &[add.clone()], |_| triangular(i))?;
        report.record(format!(
            "step {i}: buffer {} added into {}, {} resident",
            source.id(),
            base.id(),
            pipeline.placement().resident_bytes()
        ));
        previous_add = Some(add);
    }

    pipeline.finish()?;
    for buffer in buffers.iter().rev() {
        pipeline.release(buffer)?;
    }
    report.record(format!("released {count} buffers"));
    Ok(())
}
