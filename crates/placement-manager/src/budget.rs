// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The optional resident budget.
//!
//! A [`MemoryBudget`] lowers the placement manager's resident bound below
//! the device's total memory. It never raises it.

use crate::PlacementError;
use std::fmt;

const UNITS: [(&str, usize); 7] = [
    ("GB", 1 << 30),
    ("G", 1 << 30),
    ("MB", 1 << 20),
    ("M", 1 << 20),
    ("KB", 1 << 10),
    ("K", 1 << 10),
    ("B", 1),
];

/// A ceiling on device-resident bytes.
///
/// ```
/// use placement_manager::MemoryBudget;
///
/// let budget = MemoryBudget::parse("192K").unwrap();
/// assert_eq!(budget.clamp_to(256 * 1024), 192 * 1024);
/// assert_eq!(budget.clamp_to(128 * 1024), 128 * 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    /// The resident bound on a device with `total_bytes` of memory.
    pub fn clamp_to(&self, total_bytes: usize) -> usize {
        self.bytes.min(total_bytes)
    }

    /// Parses a byte count with an optional binary unit (`K`, `KB`, `M`,
    /// `MB`, `G`, `GB` or `B`, any case).
    pub fn parse(input: &str) -> Result<Self, PlacementError> {
        let invalid = |reason: &str| PlacementError::InvalidBudget {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let text = input.trim().to_ascii_uppercase();
        if text.is_empty() {
            return Err(invalid("empty"));
        }

        let (digits, unit) = UNITS
            .iter()
            .find_map(|&(suffix, unit)| text.strip_suffix(suffix).map(|d| (d, unit)))
            .unwrap_or((text.as_str(), 1));
        let count: usize = digits
            .trim_end()
            .parse()
            .map_err(|_| invalid("expected a number followed by an optional K, M or G unit"))?;

        match count.checked_mul(unit) {
            None => Err(invalid("overflows usize")),
            Some(0) => Err(invalid("budget must be non-zero")),
            Some(bytes) => Ok(Self { bytes }),
        }
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (suffix, unit) = UNITS
            .iter()
            .step_by(2)
            .copied()
            .find(|&(_, unit)| self.bytes % unit == 0)
            .unwrap_or(("B", 1));
        write!(f, "{} {suffix}", self.bytes / unit)
    }
}
