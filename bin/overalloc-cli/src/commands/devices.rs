// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `overalloc devices`: list the registry with each device's limits.

use harness::Harness;
use std::path::PathBuf;

pub async fn execute(config: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config.as_deref())?;
    let registry = Harness::new(config)?.registry();

    if json {
        println!("{}", serde_json::to_string_pretty(registry.platforms())?);
        return Ok(());
    }

    for (pi, platform) in registry.platforms().iter().enumerate() {
        let version = match platform.api_version() {
            Ok((major, minor)) => format!("{major}.{minor}"),
            Err(e) => format!("unknown ({e})"),
        };
        println!("Platform #{pi}: {} (API {version})", platform.name);
        for (di, device) in platform.devices.iter().enumerate() {
            println!(
                "  Device #{di}: {:<32} {:>8.1} MB global, {:>8.1} MB max alloc, work-group multiple {}",
                device.name,
                mib(device.global_mem_bytes),
                mib(device.max_alloc_bytes),
                device.preferred_work_group_multiple,
            );
        }
    }
    Ok(())
}

fn mib(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
