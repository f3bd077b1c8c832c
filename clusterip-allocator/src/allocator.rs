// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Range allocator.
//!
//! [RangeAllocator] owns the [AllocationBitmap] of one [CidrRange]. Every operation runs inside
//! a single mutex, held for the whole translate-and-mark or scan-and-mark sequence, so concurrent
//! callers can never be handed the same address.

use std::{
    net::IpAddr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use clusterip_observability::metrics::registry::MetricsRegistry;
use ipnet::IpNet;
use rand::Rng as _;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::{
    bitmap::{AllocationBitmap, BitmapError},
    metrics::AllocatorMetrics,
    range::{CidrRange, OutOfRange},
};

pub mod dto;

/// Allocation errors.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum AllocationError {
    /// The address is not a usable address of the range.
    #[error(transparent)]
    OutOfRange(#[from] OutOfRange),
    /// The address is in use.
    #[error("address {0} already allocated")]
    AlreadyAllocated(IpAddr),
    /// All addresses of the range are allocated.
    #[error("no addresses available in range {0}")]
    Exhausted(IpNet),
}

impl AllocationError {
    fn label(&self) -> &'static str {
        match self {
            AllocationError::OutOfRange(_) => "out_of_range",
            AllocationError::AlreadyAllocated(_) => "already_allocated",
            AllocationError::Exhausted(_) => "exhausted",
        }
    }
}

/// Allocates addresses of a single [CidrRange].
#[derive(Debug)]
pub struct RangeAllocator {
    range: CidrRange,
    state: Mutex<AllocatorState>,
    metrics: AllocatorMetrics,
}

#[derive(Debug)]
struct AllocatorState {
    bitmap: AllocationBitmap,
    /// Source of scan start hints for [RangeAllocator::allocate_next].
    rng: ChaCha8Rng,
}

impl RangeAllocator {
    /// Creates an allocator with every address of `range` free.
    ///
    /// # Arguments
    /// * `range` - The range to allocate from.
    /// * `rng` - Picks the position at which [Self::allocate_next] starts looking for a free
    ///   address, spreading allocations over the range.
    pub fn new(range: CidrRange, rng: ChaCha8Rng) -> Self {
        Self::with_metrics(range, rng, AllocatorMetrics::new(&MetricsRegistry::new()))
    }

    /// Creates an allocator that reports into the given metrics.
    pub fn with_metrics(range: CidrRange, rng: ChaCha8Rng, metrics: AllocatorMetrics) -> Self {
        let bitmap = AllocationBitmap::new(range.capacity());
        metrics.capacity.set(gauge_value(range.capacity()));
        metrics.free_addresses.set(gauge_value(bitmap.free()));
        Self {
            range,
            state: Mutex::new(AllocatorState { bitmap, rng }),
            metrics,
        }
    }

    /// The range this allocator hands out addresses from.
    pub fn range(&self) -> &CidrRange {
        &self.range
    }

    /// Number of usable addresses of the range.
    pub fn capacity(&self) -> u64 {
        self.range.capacity()
    }

    /// Number of addresses currently free.
    ///
    /// For observability only: the value may be stale by the time the caller acts on it. Callers
    /// must attempt the allocation and handle [AllocationError::Exhausted] instead.
    pub fn free(&self) -> u64 {
        self.lock().bitmap.free()
    }

    /// Returns true if `address` is a usable address of the range and currently allocated.
    pub fn is_allocated(&self, address: IpAddr) -> bool {
        self.range
            .offset_of(address)
            .is_ok_and(|offset| !self.lock().bitmap.is_free(offset))
    }

    /// Allocates the specific `address`.
    pub fn allocate(&self, address: IpAddr) -> Result<(), AllocationError> {
        let result = self
            .range
            .offset_of(address)
            .map_err(AllocationError::from)
            .and_then(|offset| {
                let mut state = self.lock();
                state
                    .bitmap
                    .mark_allocated(offset)
                    .map_err(|e| self.bitmap_error(e, address))?;
                self.metrics
                    .free_addresses
                    .set(gauge_value(state.bitmap.free()));
                Ok(())
            });
        self.record_allocation("specific", &result);
        result
    }

    /// Allocates any free address.
    pub fn allocate_next(&self) -> Result<IpAddr, AllocationError> {
        let result = {
            let mut state = self.lock();
            let hint = state.rng.random_range(0..self.range.capacity());
            match state.bitmap.next_free(hint) {
                Ok(offset) => {
                    let address = self.range.address_at(offset);
                    state
                        .bitmap
                        .mark_allocated(offset)
                        .map_err(|e| self.bitmap_error(e, address))
                        .map(|()| {
                            self.metrics.free_addresses.set(gauge_value(state.bitmap.free()));
                            address
                        })
                }
                Err(e) => Err(self.bitmap_error(e, self.range.prefix().network())),
            }
        };
        if let Ok(address) = &result {
            tracing::debug!(%address, range = %self.range, "Allocated next free address");
        }
        self.record_allocation("next", &result);
        result
    }

    /// Releases `address`. Releasing a free address is a no-op.
    pub fn release(&self, address: IpAddr) -> Result<(), AllocationError> {
        let offset = match self.range.offset_of(address) {
            Ok(offset) => offset,
            Err(e) => {
                self.metrics
                    .releases_total
                    .with_label_values(&["out_of_range"])
                    .inc();
                return Err(e.into());
            }
        };

        let released = {
            let mut state = self.lock();
            let released = state.bitmap.mark_free(offset);
            self.metrics.free_addresses.set(gauge_value(state.bitmap.free()));
            released
        };

        if released {
            tracing::debug!(%address, "Released address");
            self.metrics
                .releases_total
                .with_label_values(&["released"])
                .inc();
        } else {
            tracing::debug!(%address, "Address was not allocated, nothing to release");
            self.metrics
                .releases_total
                .with_label_values(&["already_free"])
                .inc();
        }
        Ok(())
    }

    pub(crate) fn metrics(&self) -> &AllocatorMetrics {
        &self.metrics
    }

    // No operation can leave the bitmap half-updated, so a poisoned lock still guards a
    // consistent bitmap.
    fn lock(&self) -> MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bitmap_error(&self, error: BitmapError, address: IpAddr) -> AllocationError {
        match error {
            BitmapError::AlreadyAllocated(_) => AllocationError::AlreadyAllocated(address),
            BitmapError::Exhausted => AllocationError::Exhausted(self.range.prefix()),
            BitmapError::OutOfBounds(..) => {
                AllocationError::OutOfRange(OutOfRange {
                    address,
                    range: self.range.prefix(),
                })
            }
        }
    }

    fn record_allocation<T>(&self, kind: &str, result: &Result<T, AllocationError>) {
        let label = match result {
            Ok(_) => "ok",
            Err(e) => e.label(),
        };
        self.metrics
            .allocations_total
            .with_label_values(&[kind, label])
            .inc();
    }
}

fn gauge_value(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use assert_matches::assert_matches;
    use rand::SeedableRng;

    use super::*;

    fn allocator(cidr: &str) -> RangeAllocator {
        RangeAllocator::new(cidr.parse().unwrap(), ChaCha8Rng::seed_from_u64(42))
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test_log::test]
    fn should_exhaust_single_address_range() {
        let allocator = allocator("2001:db8::/127");
        assert_eq!(allocator.capacity(), 1);

        assert_eq!(allocator.allocate_next(), Ok(ip("2001:db8::1")));
        assert_matches!(allocator.allocate_next(), Err(AllocationError::Exhausted(_)));
        assert_eq!(allocator.free(), 0);
    }

    #[test_log::test]
    fn should_reject_out_of_range_address() {
        let allocator = allocator("10.0.0.0/24");
        assert_matches!(
            allocator.allocate(ip("10.0.1.5")),
            Err(AllocationError::OutOfRange(OutOfRange { address, .. })) if address == ip("10.0.1.5")
        );
        assert_matches!(
            allocator.allocate(ip("10.0.0.255")),
            Err(AllocationError::OutOfRange(_))
        );
        assert_eq!(allocator.free(), 254);
    }

    #[test_log::test]
    fn should_only_hand_out_host_addresses() {
        let allocator = allocator("10.0.0.0/30");
        let mut allocated = vec![
            allocator.allocate_next().unwrap(),
            allocator.allocate_next().unwrap(),
        ];
        allocated.sort();
        assert_eq!(allocated, vec![ip("10.0.0.1"), ip("10.0.0.2")]);
        assert_matches!(allocator.allocate_next(), Err(AllocationError::Exhausted(_)));
    }

    #[test_log::test]
    fn should_reject_specific_address_in_use() {
        let allocator = allocator("10.0.0.0/24");
        allocator.allocate(ip("10.0.0.10")).unwrap();
        assert_eq!(
            allocator.allocate(ip("10.0.0.10")),
            Err(AllocationError::AlreadyAllocated(ip("10.0.0.10")))
        );
        assert!(allocator.is_allocated(ip("10.0.0.10")));
        assert_eq!(allocator.free(), 253);
    }

    #[test_log::test]
    fn should_not_hand_out_specifically_allocated_address() {
        let allocator = allocator("10.0.0.0/29");
        allocator.allocate(ip("10.0.0.3")).unwrap();

        let mut seen = HashSet::new();
        while let Ok(address) = allocator.allocate_next() {
            assert_ne!(address, ip("10.0.0.3"));
            assert!(seen.insert(address), "{address} handed out twice");
        }
        assert_eq!(seen.len(), 5);
    }

    #[test_log::test]
    fn should_release_idempotently() {
        let allocator = allocator("10.0.0.0/24");
        let address = allocator.allocate_next().unwrap();

        allocator.release(address).unwrap();
        allocator.release(address).unwrap();
        allocator.release(ip("10.0.0.77")).unwrap();
        assert!(!allocator.is_allocated(address));
        assert_eq!(allocator.free(), 254);

        allocator.allocate(address).expect("released address can be allocated again");
    }

    #[test_log::test]
    fn should_report_release_outside_range() {
        let allocator = allocator("fd00::/120");
        assert_matches!(
            allocator.release(ip("fd00::1:1")),
            Err(AllocationError::OutOfRange(_))
        );
        assert_matches!(
            allocator.release(ip("10.0.0.1")),
            Err(AllocationError::OutOfRange(_))
        );
    }

    #[test_log::test]
    fn should_spread_allocations_over_the_range() {
        let allocator = allocator("10.0.0.0/16");
        let allocated: Vec<_> = (0..16).map(|_| allocator.allocate_next().unwrap()).collect();

        let distinct: HashSet<_> = allocated.iter().collect();
        assert_eq!(distinct.len(), allocated.len());
        // A scan that always started at offset 0 would return 10.0.0.1..=10.0.0.16.
        let sequential: Vec<IpAddr> = (1..=16u8)
            .map(|host| IpAddr::from([10, 0, 0, host]))
            .collect();
        assert_ne!(allocated, sequential);
    }

    #[test_log::test]
    fn should_track_metrics() {
        let registry = MetricsRegistry::new();
        let allocator = RangeAllocator::with_metrics(
            "10.0.0.0/30".parse().unwrap(),
            ChaCha8Rng::seed_from_u64(1),
            AllocatorMetrics::new(&registry),
        );
        let metrics = allocator.metrics().clone();
        assert_eq!(metrics.capacity.get(), 2);
        assert_eq!(metrics.free_addresses.get(), 2);

        allocator.allocate(ip("10.0.0.1")).unwrap();
        allocator.allocate(ip("10.0.0.1")).unwrap_err();
        allocator.allocate_next().unwrap();
        allocator.allocate_next().unwrap_err();
        assert_eq!(metrics.free_addresses.get(), 0);

        let count = |kind: &str, result: &str| {
            metrics
                .allocations_total
                .with_label_values(&[kind, result])
                .get()
        };
        assert_eq!(count("specific", "ok"), 1);
        assert_eq!(count("specific", "already_allocated"), 1);
        assert_eq!(count("next", "ok"), 1);
        assert_eq!(count("next", "exhausted"), 1);

        allocator.release(ip("10.0.0.2")).unwrap();
        assert_eq!(metrics.free_addresses.get(), 1);
    }
}
