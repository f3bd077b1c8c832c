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
//! Reconciliation of the allocator with the record store.
//!
//! The bitmap starts empty at process start. Before the allocator serves any request, every
//! address referenced by the record store is marked allocated. The pass may be repeated
//! periodically to absorb records created by other writers. Reconciliation only ever marks
//! addresses: an address missing from the store is already free in a fresh bitmap, and freeing
//! addresses of a running allocator is left to the release path.

use std::{net::IpAddr, sync::Arc, time::Duration};

use serde::Serialize;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{
    allocator::{AllocationError, RangeAllocator},
    store::{RecordStore, RecordStoreError},
};

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The record store could not be read.
    #[error("failed to list records: {0}")]
    Store(#[source] RecordStoreError),
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Records listed by the store.
    pub seen: usize,
    /// Addresses newly marked allocated.
    pub marked: usize,
    /// Addresses that were already marked.
    pub already_allocated: usize,
    /// Addresses that belong to a different range.
    pub foreign: usize,
    /// Records whose address could not be parsed.
    pub invalid: usize,
}

/// Rebuilds allocator state from a [RecordStore].
pub struct Reconciler<S> {
    store: Arc<S>,
}

impl<S> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: RecordStore> Reconciler<S> {
    /// Creates a reconciler reading from `store`.
    pub fn new(store: S) -> Self {
        Self::from_shared(Arc::new(store))
    }

    /// Creates a reconciler reading from a shared `store`.
    pub fn from_shared(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Runs the startup pass on an allocator that has not been shared yet.
    ///
    /// The allocator is only handed out once the pass succeeded; a failure to read the store
    /// leaves the caller without an allocator to serve from.
    pub async fn bootstrap(
        &self,
        allocator: RangeAllocator,
    ) -> Result<(Arc<RangeAllocator>, ReconcileReport), ReconcileError> {
        let report = self.reconcile(&allocator).await?;
        if report.already_allocated > 0 {
            warn!(
                duplicates = report.already_allocated,
                "Record store references some addresses more than once"
            );
        }
        Ok((Arc::new(allocator), report))
    }

    /// Marks every address of the store that belongs to the allocator's range.
    pub async fn reconcile(
        &self,
        allocator: &RangeAllocator,
    ) -> Result<ReconcileReport, ReconcileError> {
        let addresses = self
            .store
            .list_addresses()
            .await
            .map_err(ReconcileError::Store)?;

        let mut report = ReconcileReport::default();
        for raw in &addresses {
            report.seen += 1;
            let result = match raw.trim().parse::<IpAddr>() {
                Ok(address) => self.mark(allocator, address, &mut report),
                Err(_) => {
                    warn!(address = %raw, "Ignoring record with unparsable address");
                    report.invalid += 1;
                    "invalid"
                }
            };
            allocator
                .metrics()
                .reconciled_records_total
                .with_label_values(&[result])
                .inc();
        }

        info!(
            range = %allocator.range(),
            seen = report.seen,
            marked = report.marked,
            already_allocated = report.already_allocated,
            foreign = report.foreign,
            invalid = report.invalid,
            free = allocator.free(),
            "Reconciled allocator with record store"
        );
        Ok(report)
    }

    /// Repeats [Self::reconcile] every `interval`, starting one interval from now.
    ///
    /// Failures are logged and retried on the next tick. The future never completes on its
    /// own; it is meant to be spawned on a cancellable task set. A zero `interval` disables the
    /// periodic pass and returns immediately.
    pub async fn run_periodic(
        self,
        allocator: Arc<RangeAllocator>,
        interval: Duration,
    ) -> std::io::Result<()> {
        if interval.is_zero() {
            warn!("Zero reconciliation interval, periodic reconciliation disabled");
            return Ok(());
        }
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.reconcile(&allocator).await {
                warn!(error = %e, "Periodic reconciliation failed, retrying on next tick");
            }
        }
    }

    fn mark(
        &self,
        allocator: &RangeAllocator,
        address: IpAddr,
        report: &mut ReconcileReport,
    ) -> &'static str {
        match allocator.allocate(address) {
            Ok(()) => {
                report.marked += 1;
                "marked"
            }
            Err(AllocationError::AlreadyAllocated(_)) => {
                debug!(%address, "Address already marked allocated");
                report.already_allocated += 1;
                "already_allocated"
            }
            Err(AllocationError::OutOfRange(_)) => {
                debug!(%address, "Record address not in allocator range");
                report.foreign += 1;
                "foreign"
            }
            // A full range has this address allocated as well.
            Err(AllocationError::Exhausted(_)) => {
                debug!(%address, "Address already marked allocated, range is full");
                report.already_allocated += 1;
                "already_allocated"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::store::StaticRecordStore;

    fn allocator(cidr: &str) -> RangeAllocator {
        RangeAllocator::new(cidr.parse().unwrap(), ChaCha8Rng::seed_from_u64(42))
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    /// A store whose content can be changed, and that can be made to fail.
    #[derive(Default)]
    struct MutableStore {
        addresses: Mutex<Option<Vec<String>>>,
    }

    impl MutableStore {
        fn set(&self, addresses: &[&str]) {
            *self.addresses.lock().unwrap() =
                Some(addresses.iter().map(|a| a.to_string()).collect());
        }

        fn fail(&self) {
            *self.addresses.lock().unwrap() = None;
        }
    }

    #[async_trait]
    impl RecordStore for MutableStore {
        async fn list_addresses(&self) -> Result<Vec<String>, RecordStoreError> {
            self.addresses
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| "store unavailable".into())
        }
    }

    #[test_log::test(tokio::test)]
    async fn should_mark_recorded_addresses() {
        let reconciler = Reconciler::new(StaticRecordStore::new(["10.0.0.1", "10.0.0.2"]));
        let (allocator, _) = reconciler.bootstrap(allocator("10.0.0.0/24")).await.unwrap();

        assert_eq!(allocator.free(), allocator.capacity() - 2);
        assert_eq!(
            allocator.allocate(ip("10.0.0.1")),
            Err(AllocationError::AlreadyAllocated(ip("10.0.0.1")))
        );
    }

    #[test_log::test(tokio::test)]
    async fn should_tolerate_duplicates_foreign_and_invalid_records() {
        let reconciler = Reconciler::new(StaticRecordStore::new([
            "10.0.0.7",
            "10.0.0.7",
            " 10.0.0.8 ",
            "10.0.1.7",
            "10.0.0.0",
            "fd00::7",
            "not-an-ip",
        ]));
        let allocator = allocator("10.0.0.0/24");

        let report = reconciler.reconcile(&allocator).await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                seen: 7,
                marked: 2,
                already_allocated: 1,
                foreign: 3,
                invalid: 1,
            }
        );
        assert!(allocator.is_allocated(ip("10.0.0.8")));
        assert_eq!(
            allocator
                .metrics()
                .reconciled_records_total
                .with_label_values(&["foreign"])
                .get(),
            3
        );
    }

    #[test_log::test(tokio::test)]
    async fn should_refuse_to_bootstrap_when_store_fails() {
        let store = MutableStore::default();
        store.fail();

        let result = Reconciler::new(store).bootstrap(allocator("10.0.0.0/24")).await;
        assert_matches!(result, Err(ReconcileError::Store(_)));
    }

    #[test_log::test(tokio::test)]
    async fn should_not_free_addresses_missing_from_store() {
        let store = Arc::new(MutableStore::default());
        store.set(&["10.0.0.1"]);
        let reconciler = Reconciler::from_shared(store.clone());
        let (allocator, _) = reconciler.bootstrap(allocator("10.0.0.0/24")).await.unwrap();
        allocator.allocate(ip("10.0.0.9")).unwrap();

        store.set(&[]);
        let report = reconciler.reconcile(&allocator).await.unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert!(allocator.is_allocated(ip("10.0.0.1")));
        assert!(allocator.is_allocated(ip("10.0.0.9")));
    }

    #[test_log::test(tokio::test)]
    async fn should_count_records_of_a_full_range_as_already_allocated() {
        let reconciler = Reconciler::new(StaticRecordStore::new(["10.0.0.1", "10.0.0.2"]));
        let (allocator, _) = reconciler.bootstrap(allocator("10.0.0.0/30")).await.unwrap();
        assert_eq!(allocator.free(), 0);

        let report = reconciler.reconcile(&allocator).await.unwrap();
        assert_eq!(report.seen, 2);
        assert_eq!(report.already_allocated, 2);
        assert_eq!(report.marked, 0);
    }

    #[test_log::test(tokio::test)]
    async fn should_not_run_periodically_with_zero_interval() {
        let reconciler = Reconciler::new(StaticRecordStore::new(["10.0.0.1"]));
        let (allocator, _) = reconciler.bootstrap(allocator("10.0.0.0/24")).await.unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            reconciler.run_periodic(allocator, Duration::ZERO),
        )
        .await
        .expect("zero interval returns immediately")
        .unwrap();
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test_log::test(tokio::test)]
    async fn should_absorb_external_records_periodically() {
        let store = Arc::new(MutableStore::default());
        store.set(&["10.0.0.1"]);
        let reconciler = Reconciler::from_shared(store.clone());
        let (allocator, _) = reconciler.bootstrap(allocator("10.0.0.0/24")).await.unwrap();

        let task = tokio::spawn(
            reconciler
                .clone()
                .run_periodic(allocator.clone(), Duration::from_millis(20)),
        );

        store.set(&["10.0.0.1", "10.0.0.2"]);
        wait_until(|| allocator.is_allocated(ip("10.0.0.2"))).await;

        // A failing pass does not stop later passes.
        store.fail();
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.set(&["10.0.0.3"]);
        wait_until(|| allocator.is_allocated(ip("10.0.0.3"))).await;
        assert!(!task.is_finished());

        task.abort();
    }
}
