// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # overalloc
//!
//! Command-line interface for the overallocation harness.
//!
//! ## Usage
//! ```bash
//! # Overcommit device memory and migrate buffers explicitly
//! overalloc migrate 0 0
//!
//! # Per-strategy bandwidth on the second device, as JSON
//! overalloc --json bandwidth 0 1
//!
//! # List platforms and devices
//! overalloc devices
//! ```

mod commands;

use clap::{Args, Parser, Subcommand};
use harness::Scenario;

#[derive(Parser)]
#[command(
    name = "overalloc",
    about = "Overallocation and buffer-migration harness for accelerators",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print the report as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Platform and device selection.
#[derive(Args, Debug, Clone, Copy)]
struct Target {
    /// Platform index.
    #[arg(default_value_t = 0)]
    platform: usize,

    /// Device index within the platform.
    #[arg(default_value_t = 0)]
    device: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate more than the device holds and accumulate through explicit migrations.
    Migrate(Target),

    /// Stream host staging buffers through two device-only buffers.
    MigrateCopy(Target),

    /// Measure set/add/map bandwidth under each allocation strategy.
    Bandwidth(Target),

    /// Measure empty-kernel launch latency over several work sizes.
    Latency(Target),

    /// Probe how invalid commands and dangling dependencies are refused.
    FailEvent(Target),

    /// List the available platforms and devices.
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);

    let (scenario, target) = match cli.command {
        Commands::Migrate(t) => (Scenario::Migrate, t),
        Commands::MigrateCopy(t) => (Scenario::MigrateCopy, t),
        Commands::Bandwidth(t) => (Scenario::Bandwidth, t),
        Commands::Latency(t) => (Scenario::Latency, t),
        Commands::FailEvent(t) => (Scenario::FailEvent, t),
        Commands::Devices => return commands::devices::execute(cli.config, cli.json).await,
    };
    commands::scenario::execute(cli.config, scenario, target.platform, target.device, cli.json)
        .await
}
