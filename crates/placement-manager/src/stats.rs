// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Placement statistics for diagnostics.
//!
//! [`PlacementStats`] tracks what the manager did on the caller's behalf:
//! how many buffers it handed out, how often it moved them, and how close
//! the resident set came to the bound.

/// Residency samples kept in the trace before older ones are dropped.
const TRACE_CAPACITY: usize = 1024;

/// Cumulative statistics about buffer placement.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PlacementStats {
    /// Buffers successfully allocated.
    pub buffers_allocated: u64,
    /// Allocation requests refused (up front or by the device).
    pub allocation_failures: u64,
    /// Buffers released.
    pub buffers_released: u64,
    pub migrations_to_device: u64,
    pub migrations_to_host: u64,
    /// Evictions issued by `ensure_resident` rather than the caller.
    pub auto_evictions: u64,
    /// Bytes whose content was carried by a migration.
    pub bytes_migrated: u64,
    /// High-water mark of manager-accounted resident bytes.
    pub peak_resident_bytes: usize,
    /// Resident bytes after each placement change, oldest first.
    pub residency_trace: Vec<usize>,
}

impl PlacementStats {
    pub(crate) fn record_allocation(&mut self) {
        self.buffers_allocated += 1;
    }

    pub(crate) fn record_failure(&mut self) {
        self.allocation_failures += 1;
    }

    pub(crate) fn record_release(&mut self) {
        self.buffers_released += 1;
    }

    pub(crate) fn record_migration(&mut self, to_device: bool, carried_bytes: usize) {
        if to_device {
            self.migrations_to_device += 1;
        } else {
            self.migrations_to_host += 1;
        }
        self.bytes_migrated += carried_bytes as u64;
    }

    pub(crate) fn record_auto_eviction(&mut self) {
        self.auto_evictions += 1;
    }

    /// Records the resident total after a placement change.
    pub(crate) fn record_residency(&mut self, resident_bytes: usize) {
        self.peak_resident_bytes = self.peak_resident_bytes.max(resident_bytes);
        if self.residency_trace.len() == TRACE_CAPACITY {
            self.residency_trace.remove(0);
        }
        self.residency_trace.push(resident_bytes);
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let peak_mb = self.peak_resident_bytes as f64 / (1024.0 * 1024.0);
        let moved_mb = self.bytes_migrated as f64 / (1024.0 * 1024.0);
        format!(
            "Buffers: {} allocated ({} failed), {} released; \
             migrations: {} to device, {} to host ({} automatic), {:.2} MB carried; \
             peak resident {:.2} MB",
            self.buffers_allocated,
            self.allocation_failures,
            self.buffers_released,
            self.migrations_to_device,
            self.migrations_to_host,
            self.auto_evictions,
            moved_mb,
            peak_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let s = PlacementStats::default();
        assert_eq!(s.buffers_allocated, 0);
        assert!(s.residency_trace.is_empty());
    }

    #[test]
    fn test_peak_tracking() {
        let mut s = PlacementStats::default();
        s.record_residency(100);
        s.record_residency(50);
        assert_eq!(s.peak_resident_bytes, 100);
        s.record_residency(200);
        assert_eq!(s.peak_resident_bytes, 200);
        assert_eq!(s.residency_trace, vec![100, 50, 200]);
    }

    #[test]
    fn test_trace_is_bounded() {
        let mut s = PlacementStats::default();
        for i in 0..TRACE_CAPACITY + 10 {
            s.record_residency(i);
        }
        assert_eq!(s.residency_trace.len(), TRACE_CAPACITY);
        assert_eq!(s.residency_trace[0], 10);
    }

    #[test]
    fn test_migration_counts() {
        let mut s = PlacementStats::default();
        s.record_migration(true, 1024);
        s.record_migration(false, 0);
        assert_eq!(s.migrations_to_device, 1);
        assert_eq!(s.migrations_to_host, 1);
        assert_eq!(s.bytes_migrated, 1024);
    }

    #[test]
    fn test_summary() {
        let mut s = PlacementStats::default();
        s.record_allocation();
        s.record_allocation();
        s.record_failure();
        s.record_migration(true, 1024 * 1024);
        let summary = s.summary();
        assert!(summary.contains("2 allocated (1 failed)"));
        assert!(summary.contains("1 to device"));
        assert!(summary.contains("1.00 MB carried"));
    }
}
