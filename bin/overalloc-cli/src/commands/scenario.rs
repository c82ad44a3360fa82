// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Scenario subcommands: select a device, run, print the report.
//!
//! ```text
//! Harness<Idle> → probe(platform, device) → Harness<Ready> → run(scenario)
//! ```

use anyhow::Context;
use harness::{Harness, HarnessError, Scenario, ScenarioReport};
use std::path::PathBuf;

pub async fn execute(
    config: Option<PathBuf>,
    scenario: Scenario,
    platform: usize,
    device: usize,
    json: bool,
) -> anyhow::Result<()> {
    let config = super::load_config(config.as_deref())?;
    tracing::info!(%scenario, platform, device, "running scenario");

    // Token waits block, so the run stays off the async workers.
    let report = tokio::task::spawn_blocking(move || -> Result<ScenarioReport, HarnessError> {
        let ready = Harness::new(config)?.probe(platform, device)?;
        ready.run(scenario)
    })
    .await
    .context("scenario thread panicked")?
    .with_context(|| format!("{scenario} failed on platform {platform}, device {device}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("╔══════════════════════════════════════════════════════╗");
        println!("║           overalloc · {:<31}║", scenario.to_string());
        println!("╚══════════════════════════════════════════════════════╝");
        println!();
        print!("{}", report.render_text());
    }
    Ok(())
}
