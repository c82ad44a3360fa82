// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Probes how the device and the pipeline refuse bad work.
//!
//! Every probe expects a refusal. A refusal is logged and the run goes
//! on; an accepted command fails the scenario with `ProbeFailed`.

use crate::{HarnessError, ScenarioReport};
use accel_device::DeviceError;
use exec_pipeline::{Operation, Pipeline, PipelineError};
use placement_manager::AllocStrategy;

pub(crate) fn run(pipeline: &mut Pipeline, report: &mut ScenarioReport) -> Result<(), HarnessError> {
    let (major, minor) = pipeline.handle().platform().api_version()?;
    report.record(format!("platform API version {major}.{minor}"));

    probe_released_fill(pipeline, report)?;
    probe_dangling_dependency(pipeline, report)?;
    probe_failed_dependency(pipeline, report)?;
    Ok(())
}

/// A fill of a released buffer is refused at enqueue and yields no token.
fn probe_released_fill(
    pipeline: &mut Pipeline,
    report: &mut ScenarioReport,
) -> Result<(), HarnessError> {
    let size = pipeline.handle().max_single_alloc_bytes();
    let buffers = pipeline.allocate(1, size, AllocStrategy::Plain)?;
    let released = &buffers[0];
    pipeline.release(released)?;

    match pipeline
        .handle()
        .queue()
        .enqueue_fill(released.device_buffer(), 1.0, &[])
    {
        Err(e @ DeviceError::InvalidBuffer(_)) => {
            report.record(format!("fill of released buffer rejected by the queue: {e}"));
        }
        Err(e) => {
            return Err(HarnessError::ProbeFailed(format!(
                "fill of released buffer failed with an unexpected error: {e}"
            )))
        }
        Ok(token) => {
            return Err(HarnessError::ProbeFailed(format!(
                "fill of released buffer {} was accepted as {}",
                released.id(),
                token.id()
            )))
        }
    }

    let fill = Operation::FillBuffer {
        buffer: released.clone(),
        pattern: 1.0,
    };
    match pipeline.submit(&fill, &[]) {
        Err(e) => report.record(format!("fill of released buffer rejected by the pipeline: {e}")),
        Ok(token) => {
            return Err(HarnessError::ProbeFailed(format!(
                "pipeline accepted a fill of released buffer {} as {}",
                released.id(),
                token.id()
            )))
        }
    }
    Ok(())
}

/// Waiting on a token whose buffer has been released is a dangling
/// dependency.
fn probe_dangling_dependency(
    pipeline: &mut Pipeline,
    report: &mut ScenarioReport,
) -> Result<(), HarnessError> {
    let size = pipeline.handle().max_single_alloc_bytes();
    let buffers = pipeline.allocate(2, size, AllocStrategy::Plain)?;
    let (gone, kept) = (&buffers[0], &buffers[1]);

    let filled = pipeline.submit(
        &Operation::FillBuffer {
            buffer: gone.clone(),
            pattern: 2.0,
        },
        &[],
    )?;
    pipeline.await_token(&filled)?;
    pipeline.release(gone)?;

    let follow_up = Operation::FillBuffer {
        buffer: kept.clone(),
        pattern: 3.0,
    };
    match pipeline.submit(&follow_up, &[filled]) {
        Err(e @ PipelineError::DanglingDependency { .. }) => {
            report.record(format!("submission after a released buffer's token rejected: {e}"));
        }
        Err(e) => {
            return Err(HarnessError::ProbeFailed(format!(
                "dangling dependency failed with an unexpected error: {e}"
            )))
        }
        Ok(token) => {
            return Err(HarnessError::ProbeFailed(format!(
                "dangling dependency accepted as {}",
                token.id()
            )))
        }
    }
    pipeline.release(kept)?;
    Ok(())
}

/// A command behind a failed precondition fails with it instead of running.
fn probe_failed_dependency(
    pipeline: &mut Pipeline,
    report: &mut ScenarioReport,
) -> Result<(), HarnessError> {
    let size = pipeline.handle().max_single_alloc_bytes();
    let buffers = pipeline.allocate(1, size, AllocStrategy::Plain)?;
    let target = &buffers[0];

    let gate = pipeline.handle().create_user_token();
    let fill = pipeline.submit(
        &Operation::FillBuffer {
            buffer: target.clone(),
            pattern: 4.0,
        },
        &[gate.token()],
    )?;
    gate.fail("precondition abandoned");

    match pipeline.await_token(&fill) {
        Err(e) => report.record(format!("fill behind a failed precondition did not run: {e}")),
        Ok(()) => {
            return Err(HarnessError::ProbeFailed(format!(
                "fill {} ran although its precondition failed",
                fill.id()
            )))
        }
    }
    pipeline.release(target)?;
    Ok(())
}
