// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # harness
//!
//! Runs overallocation, migration, bandwidth, latency and failure-probe
//! scenarios against a selected accelerator.
//!
//! The harness takes:
//! - A [`HarnessConfig`] (trials, resident budget, profiling, watchdog).
//! - A platform/device selection from the configured registry.
//!
//! And drives one [`exec_pipeline::Pipeline`] per scenario, verifying
//! buffer contents and reducing profiled trials to statistics.
//!
//! # Type-State Lifecycle
//! ```text
//! Harness<Idle> → Harness<Ready> → ScenarioReport
//! ```
//! Transitions are compile-time checked.
//!
//! # Blocking
//! Scenarios block on device tokens. Async callers should run them on a
//! blocking thread.

mod config;
mod engine;
mod error;
mod report;
mod scenarios;

pub use config::HarnessConfig;
pub use engine::{Harness, HarnessState, Idle, Ready};
pub use error::HarnessError;
pub use report::{ScenarioReport, TimeUnit};
pub use scenarios::Scenario;
