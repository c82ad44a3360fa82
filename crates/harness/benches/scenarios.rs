// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for complete scenario runs on a small simulated device.

use accel_device::{DeviceProfile, PlatformInfo};
use criterion::{criterion_group, criterion_main, Criterion};
use harness::{Harness, HarnessConfig, Ready, Scenario};

fn ready_harness() -> Harness<Ready> {
    let config = HarnessConfig {
        trials: 3,
        latency_work_sizes: vec![1, 1024],
        platforms: Some(vec![PlatformInfo {
            name: "Bench platform".into(),
            version: "OpenCL 3.0 bench".into(),
            devices: vec![DeviceProfile::tiny(1024 * 1024, 256 * 1024)],
        }]),
        ..Default::default()
    };
    Harness::new(config).unwrap().probe(0, 0).unwrap()
}

fn bench_bandwidth_scenario(c: &mut Criterion) {
    let harness = ready_harness();
    c.bench_function("scenario_bandwidth", |b| {
        b.iter(|| harness.run(Scenario::Bandwidth).unwrap())
    });
}

fn bench_migrate_scenarios(c: &mut Criterion) {
    let harness = ready_harness();
    let mut group = c.benchmark_group("migration");
    for scenario in [Scenario::Migrate, Scenario::MigrateCopy] {
        group.bench_function(scenario.to_string(), |b| {
            b.iter(|| harness.run(scenario).unwrap())
        });
    }
    group.finish();
}

fn bench_latency_scenario(c: &mut Criterion) {
    let harness = ready_harness();
    c.bench_function("scenario_latency", |b| {
        b.iter(|| harness.run(Scenario::Latency).unwrap())
    });
}

criterion_group!(
    benches,
    bench_bandwidth_scenario,
    bench_migrate_scenarios,
    bench_latency_scenario
);
criterion_main!(benches);
