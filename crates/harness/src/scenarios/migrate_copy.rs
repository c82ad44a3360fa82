// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Stream an overcommitted set of host staging buffers through two
//! device-only buffers.
//!
//! ```text
//! staging[i] ──copy──► dev1 ──add──► dev0 ──copy──► staging[0] ──verify
//! ```
//!
//! Staging buffers are brought to the device on demand; the placement
//! manager evicts the least recently used ones to stay within the bound.

use super::{triangular, verify, write_value};
use crate::{HarnessError, ScenarioReport};
use accel_device::Kernel;
use exec_pipeline::{Operation, Pipeline};
use placement_manager::{AllocStrategy, ContentPolicy};

pub(crate) fn run(pipeline: &mut Pipeline, report: &mut ScenarioReport) -> Result<(), HarnessError> {
    let count = pipeline.placement().overcommit_buffer_count();
    let size = pipeline.handle().max_single_alloc_bytes();

    let staging = pipeline.allocate(count, size, AllocStrategy::HostAccessible)?;
    report.record(format!(
        "allocated {count} staging buffers of {size} B"
    ));
    let mut parked = Vec::with_capacity(count);
    for buffer in &staging {
        parked.push(pipeline.submit(
            &Operation::MigrateToHost {
                buffer: buffer.clone(),
                content: ContentPolicy::Undefined,
            },
            &[],
        )?);
    }

    let device = pipeline.allocate(2, size, AllocStrategy::DeviceOnly)?;
    let (accumulator, operand) = (&device[0], &device[1]);
    report.record(format!(
        "allocated 2 device-only buffers {} and {}",
        accumulator.id(),
        operand.id()
    ));
    let zeroed = pipeline.submit(
        &Operation::FillBuffer {
            buffer: accumulator.clone(),
            pattern: 0.0,
        },
        &[],
    )?;
    pipeline.await_token(&zeroed)?;
    for token in &parked {
        pipeline.await_token(token)?;
    }

    for (i, source) in staging.iter().enumerate() {
        let written = write_value(pipeline, source, i as f32, &[])?;
        let copied_in = pipeline.submit(&Operation::copy(source, operand), &[written])?;
        pipeline.finish()?;

        let add = pipeline.submit(
            &Operation::kernel(Kernel::Add, accumulator, operand),
            &[copied_in],
        )?;
        let copied_out = pipeline.submit(&Operation::copy(accumulator, &staging[0]), &[add])?;
        verify(pipeline, &staging[0], &[copied_out], |_| triangular(i))?;
        report.record(format!(
            "step {i}: staging {} streamed, {} resident",
            source.id(),
            pipeline.placement().resident_bytes()
        ));
    }

    pipeline.finish()?;
    for buffer in device.iter().rev().chain(staging.iter().rev()) {
        pipeline.release(buffer)?;
    }
    report.record(format!("released {} buffers", count + 2));
    Ok(())
}
