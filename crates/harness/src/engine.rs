// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The harness with a type-state–enforced lifecycle.
//!
//! ```text
//! Harness<Idle>
//!     │  .probe(platform, device)
//!     ▼
//! Harness<Ready>
//!     │  .run(scenario)
//!     ▼
//!   ScenarioReport
//! ```
//!
//! A scenario can only run against an opened device; the compiler rejects
//! `.run()` on an `Idle` harness.

use crate::scenarios::{self, Scenario};
use crate::{HarnessConfig, HarnessError, ScenarioReport};
use accel_device::{AcceleratorHandle, PlatformRegistry, QueueProperties};
use exec_pipeline::Pipeline;
use placement_manager::PlacementManager;
use std::time::Instant;

// ── Type-state markers ─────────────────────────────────────────

/// No device has been opened yet.
#[derive(Debug)]
pub struct Idle;

/// A device is open and scenarios can run.
pub struct Ready {
    handle: AcceleratorHandle,
}

/// Sealed trait for harness states.
pub trait HarnessState {}
impl HarnessState for Idle {}
impl HarnessState for Ready {}

// ── Harness ────────────────────────────────────────────────────

/// Runs scenarios against one selected device.
///
/// # Example
/// ```no_run
/// use harness::{Harness, HarnessConfig, Scenario};
///
/// # fn example() -> Result<(), harness::HarnessError> {
/// let harness = Harness::new(HarnessConfig::default())?.probe(0, 0)?;
/// let report = harness.run(Scenario::Migrate)?;
/// println!("{}", report.summary());
/// # Ok(())
/// # }
/// ```
pub struct Harness<S: HarnessState = Idle> {
    config: HarnessConfig,
    state: S,
}

impl<S: HarnessState> Harness<S> {
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }
}

// ── Idle → Ready ───────────────────────────────────────────────

impl Harness<Idle> {
    /// Creates a harness from a validated configuration.
    pub fn new(config: HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        tracing::info!(trials = config.trials, "harness created");
        Ok(Self { config, state: Idle })
    }

    /// The platforms this harness can select from.
    pub fn registry(&self) -> PlatformRegistry {
        self.config.registry()
    }

    /// Opens device `device_index` of platform `platform_index`.
    pub fn probe(
        self,
        platform_index: usize,
        device_index: usize,
    ) -> Result<Harness<Ready>, HarnessError> {
        let properties = QueueProperties {
            profiling: self.config.enable_profiling,
        };
        let handle = AcceleratorHandle::probe(
            &self.config.registry(),
            platform_index,
            device_index,
            properties,
        )
        .map_err(HarnessError::Selection)?;
        Ok(Harness {
            config: self.config,
            state: Ready { handle },
        })
    }
}

// ── Ready: scenario execution ──────────────────────────────────

impl Harness<Ready> {
    pub fn handle(&self) -> &AcceleratorHandle {
        &self.state.handle
    }

    /// Runs one scenario on a fresh pipeline.
    ///
    /// Every buffer the scenario allocated is released before this
    /// returns, whether the scenario succeeded or not.
    pub fn run(&self, scenario: Scenario) -> Result<ScenarioReport, HarnessError> {
        let handle = self.state.handle.clone();
        let manager = PlacementManager::new(handle.clone(), self.config.parse_budget()?);
        let mut pipeline = Pipeline::new(manager);
        if let Some(limit) = self.config.watchdog() {
            pipeline = pipeline.with_watchdog(limit);
        }

        let mut report = ScenarioReport::new(scenario, &handle);
        tracing::info!(%scenario, device = %report.device, "scenario started");
        let start = Instant::now();

        let outcome = scenarios::run(scenario, &mut pipeline, &self.config, &mut report);
        let cleanup = pipeline.shutdown();
        match outcome {
            Ok(()) => cleanup?,
            Err(e) => {
                if let Err(c) = cleanup {
                    tracing::warn!(error = %c, "cleanup after failed scenario also failed");
                }
                tracing::error!(%scenario, category = e.category(), error = %e, "scenario aborted");
                return Err(e);
            }
        }

        report.placement = pipeline.stats();
        report.device_counters = handle.counters();
        tracing::info!(
            %scenario,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "scenario finished"
        );
        Ok(report)
    }
}
