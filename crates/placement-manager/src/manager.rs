// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The overcommitting placement manager.
//!
//! The manager hands out more buffers than the device can hold and keeps
//! its own ledger of which ones are device-resident. Every migration it
//! issues is checked against two rules:
//!
//! 1. **Ordering** — a migration must be ordered after every outstanding
//!    access of its buffer, directly or through the tokens it waits on.
//! 2. **Residency** — device-bound migrations wait on all in-flight
//!    evictions and are refused if the ledger would exceed the bound.
//!
//! Together these keep the device's physical residency equal to the
//! ledger, so the device never has to migrate or oversubscribe on its own.

use crate::{
    AllocStrategy, ContentPolicy, MemoryBudget, MemoryBuffer, Placement, PlacementError,
    PlacementStats,
};
use accel_device::{AcceleratorHandle, BufferId, DependencyToken, Location};
use std::collections::{BTreeMap, BTreeSet};

/// Number of maximum-size buffers that overcommits total device memory:
/// one more than fits, and never fewer than three.
pub fn overcommit_buffer_count(total_bytes: usize, max_single_alloc: usize) -> usize {
    (total_bytes / max_single_alloc.max(1) + 1).max(3)
}

struct InFlight {
    token: DependencyToken,
    target: Location,
    previous: Placement,
}

struct BufferRecord {
    buffer: MemoryBuffer,
    placement: Placement,
    migration: Option<InFlight>,
    /// Tokens of commands touching this buffer that may not have signaled.
    accesses: Vec<DependencyToken>,
    last_use: u64,
}

impl BufferRecord {
    fn outstanding(&self) -> Vec<DependencyToken> {
        self.accesses
            .iter()
            .filter(|t| !t.is_signaled())
            .cloned()
            .collect()
    }
}

/// Owner of every buffer's placement.
pub struct PlacementManager {
    handle: AcceleratorHandle,
    resident_limit: usize,
    records: BTreeMap<BufferId, BufferRecord>,
    released: BTreeSet<BufferId>,
    evictions: Vec<DependencyToken>,
    clock: u64,
    stats: PlacementStats,
}

impl PlacementManager {
    /// Creates a manager for the device. An optional budget tightens the
    /// resident bound below total device memory; it never raises it.
    pub fn new(handle: AcceleratorHandle, budget: Option<MemoryBudget>) -> Self {
        let total = handle.total_memory_bytes();
        let resident_limit = budget.map_or(total, |b| b.clamp_to(total));
        match budget {
            Some(budget) => tracing::debug!(resident_limit, total, %budget, "placement manager created"),
            None => tracing::debug!(resident_limit, total, "placement manager created"),
        }
        Self {
            handle,
            resident_limit,
            records: BTreeMap::new(),
            released: BTreeSet::new(),
            evictions: Vec::new(),
            clock: 0,
            stats: PlacementStats::default(),
        }
    }

    pub fn handle(&self) -> &AcceleratorHandle {
        &self.handle
    }

    /// Bytes that may be device-resident at once.
    pub fn resident_limit(&self) -> usize {
        self.resident_limit
    }

    /// Overcommitting buffer count for this device.
    pub fn overcommit_buffer_count(&self) -> usize {
        overcommit_buffer_count(
            self.handle.total_memory_bytes(),
            self.handle.max_single_alloc_bytes(),
        )
    }

    /// Allocates `count` buffers of `size_bytes` each.
    ///
    /// Host-backed strategies start host-resident. Device strategies start
    /// device-resident while they fit under the bound and unbound after
    /// that. On failure, buffers created earlier in the call are released.
    pub fn allocate(
        &mut self,
        count: usize,
        size_bytes: usize,
        strategy: AllocStrategy,
    ) -> Result<Vec<MemoryBuffer>, PlacementError> {
        if size_bytes == 0 {
            return Err(PlacementError::ZeroSizedAllocation);
        }
        let max_single_alloc = self.handle.max_single_alloc_bytes();
        if size_bytes > max_single_alloc {
            self.stats.record_failure();
            return Err(PlacementError::AllocationError {
                requested_bytes: size_bytes,
                max_single_alloc,
                detail: "exceeds the single-allocation limit".into(),
            });
        }

        self.refresh();
        let mut made: Vec<MemoryBuffer> = Vec::with_capacity(count);
        for _ in 0..count {
            // Evictions in flight still hold their device memory, and a
            // buffer created on the device cannot wait for them.
            let on_device = !strategy.starts_on_host()
                && self.occupied_bytes() + size_bytes <= self.resident_limit;
            let (location, placement) = if strategy.starts_on_host() {
                (Location::Host, Placement::HostResident)
            } else if on_device {
                (Location::Device, Placement::DeviceResident)
            } else {
                (Location::Host, Placement::Unbound)
            };

            match self
                .handle
                .create_buffer(size_bytes, strategy.mem_flags(), location)
            {
                Ok(device) => {
                    let buffer = MemoryBuffer::new(device, strategy);
                    self.records.insert(
                        buffer.id(),
                        BufferRecord {
                            buffer: buffer.clone(),
                            placement,
                            migration: None,
                            accesses: Vec::new(),
                            last_use: 0,
                        },
                    );
                    self.stats.record_allocation();
                    made.push(buffer);
                }
                Err(e) => {
                    self.stats.record_failure();
                    tracing::warn!(
                        requested = size_bytes,
                        allocated = made.len(),
                        error = %e,
                        "allocation failed, releasing the partial set"
                    );
                    for buffer in made.iter().rev() {
                        if let Err(cleanup) = self.release(buffer) {
                            tracing::warn!(buffer = %buffer.id(), error = %cleanup, "cleanup release failed");
                        }
                    }
                    return Err(PlacementError::AllocationError {
                        requested_bytes: size_bytes,
                        max_single_alloc,
                        detail: e.to_string(),
                    });
                }
            }
        }
        self.stats.record_residency(self.resident_bytes());
        tracing::info!(count, size_bytes, %strategy, "buffers allocated");
        Ok(made)
    }

    /// Migrates a buffer, carrying its content.
    pub fn migrate(
        &mut self,
        buffer: &MemoryBuffer,
        target: Location,
        waits_on: &[DependencyToken],
    ) -> Result<DependencyToken, PlacementError> {
        self.migrate_with(buffer, target, ContentPolicy::Preserve, waits_on)
    }

    /// Migrates a buffer. Non-blocking; the returned token signals once the
    /// buffer is at `target`.
    ///
    /// # Errors
    /// `OrderingViolation` if an outstanding access is not ordered before
    /// `waits_on`; `ResidencyExceeded` if a device-bound migration would
    /// overflow the bound.
    pub fn migrate_with(
        &mut self,
        buffer: &MemoryBuffer,
        target: Location,
        content: ContentPolicy,
        waits_on: &[DependencyToken],
    ) -> Result<DependencyToken, PlacementError> {
        self.refresh();
        let id = buffer.id();
        let record = self.record(id)?;
        check_ordering(id, &record.accesses, waits_on)?;

        let mut waits = waits_on.to_vec();
        if target == Location::Device {
            if !record.placement.occupies_device() {
                let used = self.resident_bytes();
                if used + buffer.size_bytes() > self.resident_limit {
                    return Err(PlacementError::ResidencyExceeded {
                        buffer: id,
                        required: buffer.size_bytes(),
                        available: self.resident_limit.saturating_sub(used),
                        limit: self.resident_limit,
                    });
                }
            }
            waits.extend(self.evictions.iter().cloned());
        }

        let token = self.handle.queue().enqueue_migrate(
            std::slice::from_ref(buffer.device_buffer()),
            target,
            content.into(),
            &waits,
        )?;

        self.clock += 1;
        let clock = self.clock;
        let record = self.record_mut(id)?;
        let previous = match &record.migration {
            Some(in_flight) => in_flight.previous,
            None => record.placement,
        };
        record.placement = Placement::Migrating(target);
        record.migration = Some(InFlight {
            token: token.clone(),
            target,
            previous,
        });
        record.accesses.push(token.clone());
        record.last_use = clock;

        if target == Location::Host {
            self.evictions.push(token.clone());
        }
        let carried = match content {
            ContentPolicy::Preserve => buffer.size_bytes(),
            ContentPolicy::Undefined => 0,
        };
        self.stats
            .record_migration(target == Location::Device, carried);
        self.stats.record_residency(self.resident_bytes());
        tracing::debug!(buffer = %id, to = %target, token = %token.id(), "migration issued");
        Ok(token)
    }

    /// Evicts a buffer to the host once `last_use` has completed.
    pub fn evict_to_host(
        &mut self,
        buffer: &MemoryBuffer,
        last_use: &[DependencyToken],
    ) -> Result<DependencyToken, PlacementError> {
        self.migrate(buffer, Location::Host, last_use)
    }

    /// Makes every buffer of `working_set` device-resident, evicting least
    /// recently used buffers outside the set as needed.
    ///
    /// Returns the migration tokens issued; commands using the working set
    /// must wait on them (and on `waits_on`).
    pub fn ensure_resident(
        &mut self,
        working_set: &[&MemoryBuffer],
        waits_on: &[DependencyToken],
    ) -> Result<Vec<DependencyToken>, PlacementError> {
        self.refresh();
        let mut members = BTreeMap::new();
        for buffer in working_set {
            self.record(buffer.id())?;
            members.insert(buffer.id(), (*buffer).clone());
        }
        let required: usize = members.values().map(MemoryBuffer::size_bytes).sum();
        if required > self.resident_limit {
            return Err(PlacementError::WorkingSetTooLarge {
                required,
                limit: self.resident_limit,
            });
        }

        self.clock += 1;
        let clock = self.clock;
        let mut missing = Vec::new();
        for id in members.keys() {
            let record = self.record_mut(*id)?;
            record.last_use = clock;
            if !record.placement.occupies_device() {
                missing.push(record.buffer.clone());
            }
        }
        let missing_bytes: usize = missing.iter().map(MemoryBuffer::size_bytes).sum();

        let mut issued = Vec::new();
        let mut used = self.resident_bytes();
        while used + missing_bytes > self.resident_limit {
            let victim = self
                .records
                .values()
                .filter(|r| r.placement.occupies_device() && !members.contains_key(&r.buffer.id()))
                .min_by_key(|r| r.last_use)
                .map(|r| (r.buffer.clone(), r.outstanding()))
                .ok_or(PlacementError::WorkingSetTooLarge {
                    required: used + missing_bytes,
                    limit: self.resident_limit,
                })?;
            let (victim, last_use) = victim;
            issued.push(self.evict_to_host(&victim, &last_use)?);
            self.stats.record_auto_eviction();
            used -= victim.size_bytes();
        }

        for buffer in &missing {
            let mut waits = waits_on.to_vec();
            waits.extend(self.record(buffer.id())?.outstanding());
            issued.push(self.migrate(buffer, Location::Device, &waits)?);
        }
        Ok(issued)
    }

    /// Notes that the command behind `token` touches `buffer`.
    pub fn record_access(
        &mut self,
        buffer: &MemoryBuffer,
        token: &DependencyToken,
    ) -> Result<(), PlacementError> {
        self.clock += 1;
        let clock = self.clock;
        let record = self.record_mut(buffer.id())?;
        record.accesses.push(token.clone());
        record.last_use = clock;
        Ok(())
    }

    /// Accesses of `buffer` that have not signaled yet.
    pub fn outstanding_accesses(
        &self,
        buffer: &MemoryBuffer,
    ) -> Result<Vec<DependencyToken>, PlacementError> {
        Ok(self.record(buffer.id())?.outstanding())
    }

    pub fn placement(&self, buffer: &MemoryBuffer) -> Result<Placement, PlacementError> {
        Ok(self.record(buffer.id())?.placement)
    }

    pub fn is_released(&self, id: BufferId) -> bool {
        self.released.contains(&id)
    }

    /// Manager-accounted device-resident bytes, counting device-bound
    /// migrations in flight.
    pub fn resident_bytes(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.placement.occupies_device())
            .map(|r| r.buffer.size_bytes())
            .sum()
    }

    /// Resident bytes plus buffers still leaving the device.
    fn occupied_bytes(&self) -> usize {
        self.records
            .values()
            .filter(|r| {
                r.placement.occupies_device() || r.placement == Placement::Migrating(Location::Host)
            })
            .map(|r| r.buffer.size_bytes())
            .sum()
    }

    /// Live buffers, in allocation order.
    pub fn buffers(&self) -> impl DoubleEndedIterator<Item = &MemoryBuffer> {
        self.records.values().map(|r| &r.buffer)
    }

    /// Settles completed migrations and forgets signaled accesses.
    pub fn refresh(&mut self) {
        for record in self.records.values_mut() {
            record.accesses.retain(|t| !t.is_signaled());
            let settled = match &record.migration {
                Some(in_flight) if in_flight.token.is_signaled() => {
                    Some(if in_flight.token.is_complete() {
                        match in_flight.target {
                            Location::Device => Placement::DeviceResident,
                            Location::Host => Placement::HostResident,
                        }
                    } else {
                        in_flight.previous
                    })
                }
                _ => None,
            };
            if let Some(placement) = settled {
                record.placement = placement;
                record.migration = None;
            }
        }
        self.evictions.retain(|t| !t.is_signaled());
    }

    /// Releases a buffer once every outstanding access has signaled.
    pub fn release(&mut self, buffer: &MemoryBuffer) -> Result<(), PlacementError> {
        let id = buffer.id();
        let pending = self.record(id)?.outstanding();
        for token in &pending {
            if let Err(e) = token.wait() {
                tracing::warn!(buffer = %id, error = %e, "access failed before release");
            }
        }
        self.handle.release_buffer(buffer.device_buffer())?;
        self.records.remove(&id);
        self.released.insert(id);
        self.evictions.retain(|t| !t.is_signaled());
        self.stats.record_release();
        self.stats.record_residency(self.resident_bytes());
        tracing::debug!(buffer = %id, "buffer released");
        Ok(())
    }

    /// Releases every live buffer, newest first. Keeps going past failures
    /// and returns the first one.
    pub fn release_all(&mut self) -> Result<(), PlacementError> {
        let live: Vec<MemoryBuffer> = self.buffers().rev().cloned().collect();
        let mut first_error = None;
        for buffer in &live {
            if let Err(e) = self.release(buffer) {
                tracing::warn!(buffer = %buffer.id(), error = %e, "release failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn stats(&self) -> PlacementStats {
        self.stats.clone()
    }

    fn record(&self, id: BufferId) -> Result<&BufferRecord, PlacementError> {
        if self.released.contains(&id) {
            return Err(PlacementError::Released(id));
        }
        self.records.get(&id).ok_or(PlacementError::UnknownBuffer(id))
    }

    fn record_mut(&mut self, id: BufferId) -> Result<&mut BufferRecord, PlacementError> {
        if self.released.contains(&id) {
            return Err(PlacementError::Released(id));
        }
        self.records
            .get_mut(&id)
            .ok_or(PlacementError::UnknownBuffer(id))
    }
}

impl std::fmt::Debug for PlacementManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementManager")
            .field("resident_limit", &self.resident_limit)
            .field("resident_bytes", &self.resident_bytes())
            .field("buffers", &self.records.len())
            .finish()
    }
}

fn check_ordering(
    buffer: BufferId,
    accesses: &[DependencyToken],
    waits_on: &[DependencyToken],
) -> Result<(), PlacementError> {
    for access in accesses.iter().filter(|t| !t.is_signaled()) {
        if !waits_on.iter().any(|w| w.orders_after(access)) {
            return Err(PlacementError::OrderingViolation {
                buffer,
                pending: access.id(),
                label: access.label(),
            });
        }
    }
    Ok(())
}
