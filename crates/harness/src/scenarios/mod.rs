// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The runnable scenarios.
//!
//! Each scenario drives one [`Pipeline`] end to end and writes what it
//! did into a [`ScenarioReport`]. Scenarios never release buffers on
//! the error path themselves; the engine shuts the pipeline down after
//! every run, successful or not.

mod bandwidth;
mod fail_event;
mod latency;
mod migrate;
mod migrate_copy;

use crate::{HarnessConfig, HarnessError, ScenarioReport};
use accel_device::{DependencyToken, MapMode};
use exec_pipeline::Pipeline;
use placement_manager::MemoryBuffer;
use std::fmt;

/// A scenario the harness can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Overcommit host-accessible buffers and accumulate them into one
    /// device buffer, evicting each after use.
    Migrate,
    /// Stream host staging buffers through two device-only buffers.
    MigrateCopy,
    /// Time `set → add → map` under each allocation strategy.
    Bandwidth,
    /// Time empty kernel launches over several work sizes.
    Latency,
    /// Probe how invalid commands and dangling dependencies are refused.
    FailEvent,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Self::Migrate,
        Self::MigrateCopy,
        Self::Bandwidth,
        Self::Latency,
        Self::FailEvent,
    ];
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Migrate => "migrate",
            Self::MigrateCopy => "migrate-copy",
            Self::Bandwidth => "bandwidth",
            Self::Latency => "latency",
            Self::FailEvent => "fail-event",
        };
        f.write_str(name)
    }
}

pub(crate) fn run(
    scenario: Scenario,
    pipeline: &mut Pipeline,
    config: &HarnessConfig,
    report: &mut ScenarioReport,
) -> Result<(), HarnessError> {
    match scenario {
        Scenario::Migrate => migrate::run(pipeline, report),
        Scenario::MigrateCopy => migrate_copy::run(pipeline, report),
        Scenario::Bandwidth => bandwidth::run(pipeline, config, report),
        Scenario::Latency => latency::run(pipeline, config, report),
        Scenario::FailEvent => fail_event::run(pipeline, report),
    }
}

// ── Shared steps ───────────────────────────────────────────────

/// Overwrites every element of `buffer` with `value` through a host
/// mapping; returns the unmap token.
pub(crate) fn write_value(
    pipeline: &mut Pipeline,
    buffer: &MemoryBuffer,
    value: f32,
    waits_on: &[DependencyToken],
) -> Result<DependencyToken, HarnessError> {
    let mut view = pipeline
        .map(buffer, MapMode::WriteInvalidate, waits_on)?
        .acquire()?;
    view.as_mut_slice().fill(value);
    Ok(view.unmap(&[])?)
}

/// Maps `buffer` for reading after `waits_on` and checks every element
/// against `expected`. Stops at the first mismatch.
pub(crate) fn verify(
    pipeline: &mut Pipeline,
    buffer: &MemoryBuffer,
    waits_on: &[DependencyToken],
    expected: impl Fn(usize) -> f32,
) -> Result<(), HarnessError> {
    let view = pipeline.map(buffer, MapMode::Read, waits_on)?.acquire()?;
    check_values(buffer, view.as_slice(), expected)
}

pub(crate) fn check_values(
    buffer: &MemoryBuffer,
    values: &[f32],
    expected: impl Fn(usize) -> f32,
) -> Result<(), HarnessError> {
    for (index, &got) in values.iter().enumerate() {
        let want = expected(index);
        if got != want {
            return Err(HarnessError::ValueMismatch {
                buffer: buffer.id(),
                index,
                got,
                expected: want,
            });
        }
    }
    Ok(())
}

/// `1 + 2 + … + i`, the running total the accumulation scenarios expect.
pub(crate) fn triangular(i: usize) -> f32 {
    (i * (i + 1) / 2) as f32
}
