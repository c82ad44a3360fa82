// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Harness configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! trials = 5
//! resident_budget = "48M"
//! enable_profiling = true
//! watchdog_ms = 30000
//! latency_work_sizes = [1, 1024, 1048576]
//!
//! [[platforms]]
//! name = "Lab platform"
//! version = "OpenCL 2.1 lab"
//!
//! [[platforms.devices]]
//! name = "Small card"
//! global_mem_bytes = 262144
//! max_alloc_bytes = 65536
//! preferred_work_group_multiple = 16
//! allocation_limit_bytes = 1048576
//! ```

use crate::HarnessError;
use accel_device::{PlatformInfo, PlatformRegistry};
use placement_manager::MemoryBudget;
use std::path::Path;
use std::time::Duration;

/// Configuration for a harness run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HarnessConfig {
    /// Trials per measured series.
    #[serde(default = "default_trials")]
    pub trials: usize,
    /// Resident bound tighter than device memory (human-readable, e.g. `"48M"`).
    pub resident_budget: Option<String>,
    /// Whether the queue records profiling timestamps.
    #[serde(default = "default_true")]
    pub enable_profiling: bool,
    /// Upper bound on any single token wait, in milliseconds.
    pub watchdog_ms: Option<u64>,
    /// Global work sizes probed by the latency scenario.
    #[serde(default = "default_work_sizes")]
    pub latency_work_sizes: Vec<usize>,
    /// Replaces the built-in simulated platforms.
    pub platforms: Option<Vec<PlatformInfo>>,
}

fn default_trials() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_work_sizes() -> Vec<usize> {
    vec![1, 1024, 1024 * 1024]
}

impl HarnessConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, HarnessError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, HarnessError> {
        toml::from_str(toml_str)
            .map_err(|e| HarnessError::ConfigError(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, HarnessError> {
        toml::to_string_pretty(self)
            .map_err(|e| HarnessError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Parses the resident budget, if one is configured.
    pub fn parse_budget(&self) -> Result<Option<MemoryBudget>, HarnessError> {
        self.resident_budget
            .as_deref()
            .map(|s| {
                MemoryBudget::parse(s)
                    .map_err(|e| HarnessError::ConfigError(format!("invalid budget: {e}")))
            })
            .transpose()
    }

    pub fn watchdog(&self) -> Option<Duration> {
        self.watchdog_ms.map(Duration::from_millis)
    }

    /// The platform registry this run selects from.
    pub fn registry(&self) -> PlatformRegistry {
        match &self.platforms {
            Some(platforms) => PlatformRegistry::new(platforms.clone()),
            None => PlatformRegistry::simulated(),
        }
    }

    /// Rejects settings no scenario can run with.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.trials == 0 {
            return Err(HarnessError::ConfigError(
                "trials must be at least 1".to_string(),
            ));
        }
        if self.latency_work_sizes.is_empty() {
            return Err(HarnessError::ConfigError(
                "latency_work_sizes must not be empty".to_string(),
            ));
        }
        if self.latency_work_sizes.contains(&0) {
            return Err(HarnessError::ConfigError(
                "latency_work_sizes must be positive".to_string(),
            ));
        }
        self.parse_budget()?;
        Ok(())
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            trials: default_trials(),
            resident_budget: None,
            enable_profiling: true,
            watchdog_ms: None,
            latency_work_sizes: default_work_sizes(),
            platforms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = HarnessConfig::default();
        assert_eq!(c.trials, 5);
        assert!(c.enable_profiling);
        assert_eq!(c.latency_work_sizes, vec![1, 1024, 1_048_576]);
        assert!(c.validate().is_ok());
        assert_eq!(c.registry(), PlatformRegistry::simulated());
    }

    #[test]
    fn test_parse_budget() {
        let c = HarnessConfig {
            resident_budget: Some("48M".into()),
            ..Default::default()
        };
        assert_eq!(
            c.parse_budget().unwrap(),
            Some(MemoryBudget::from_bytes(48 * 1024 * 1024))
        );
        assert!(HarnessConfig::default().parse_budget().unwrap().is_none());

        let bad = HarnessConfig {
            resident_budget: Some("lots".into()),
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(HarnessError::ConfigError(_))));
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
trials = 3
resident_budget = "1M"
enable_profiling = false
watchdog_ms = 250
latency_work_sizes = [1, 64]

[[platforms]]
name = "Lab"
version = "OpenCL 1.2 lab"

[[platforms.devices]]
name = "Card"
global_mem_bytes = 4096
max_alloc_bytes = 1024
preferred_work_group_multiple = 16
allocation_limit_bytes = 16384
"#;
        let c = HarnessConfig::from_toml(toml).unwrap();
        assert_eq!(c.trials, 3);
        assert_eq!(c.resident_budget.as_deref(), Some("1M"));
        assert!(!c.enable_profiling);
        assert_eq!(c.watchdog(), Some(Duration::from_millis(250)));
        assert_eq!(c.latency_work_sizes, vec![1, 64]);
        let registry = c.registry();
        let (platform, device) = registry.select(0, 0).unwrap();
        assert_eq!(platform.name, "Lab");
        assert_eq!(device.max_alloc_bytes, 1024);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let c = HarnessConfig::from_toml("").unwrap();
        assert_eq!(c.trials, 5);
        assert!(c.enable_profiling);
        assert!(c.platforms.is_none());
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = HarnessConfig {
            resident_budget: Some("2M".into()),
            ..Default::default()
        };
        let toml = c.to_toml().unwrap();
        let back = HarnessConfig::from_toml(&toml).unwrap();
        assert_eq!(back.trials, c.trials);
        assert_eq!(back.resident_budget, c.resident_budget);
        assert_eq!(back.latency_work_sizes, c.latency_work_sizes);
    }

    #[test]
    fn test_validate_rejects_zero_trials() {
        let c = HarnessConfig {
            trials: 0,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(HarnessError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_work_sizes() {
        let empty = HarnessConfig {
            latency_work_sizes: vec![],
            ..Default::default()
        };
        assert!(empty.validate().is_err());
        let zero = HarnessConfig {
            latency_work_sizes: vec![1, 0],
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_from_file_missing() {
        let err = HarnessConfig::from_file(Path::new("/nonexistent/harness.toml")).unwrap_err();
        assert!(err.to_string().contains("cannot read config"));
    }
}
