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
//! Allocator metrics.

use clusterip_observability::metrics::registry::MetricsRegistry;
use prometheus::{IntCounterVec, IntGauge};

/// Metrics of a [RangeAllocator](crate::allocator::RangeAllocator).
#[derive(Debug, Clone)]
pub struct AllocatorMetrics {
    /// Number of usable addresses not currently allocated.
    pub free_addresses: IntGauge,
    /// Number of usable addresses of the range.
    pub capacity: IntGauge,
    /// Allocation attempts by kind (`specific`, `next`) and result.
    pub allocations_total: IntCounterVec,
    /// Release attempts by result.
    pub releases_total: IntCounterVec,
    /// Records processed by reconciliation passes, by result.
    pub reconciled_records_total: IntCounterVec,
}

impl AllocatorMetrics {
    /// Creates the allocator metrics in `metrics_registry`.
    pub fn new(metrics_registry: &MetricsRegistry) -> Self {
        Self {
            free_addresses: metrics_registry.int_gauge(
                "clusterip_free_addresses",
                "Number of usable addresses not currently allocated.",
            ),
            capacity: metrics_registry.int_gauge(
                "clusterip_capacity",
                "Number of usable addresses of the configured range.",
            ),
            allocations_total: metrics_registry.int_counter_vec(
                "clusterip_allocations_total",
                "Total number of allocation attempts.",
                &["kind", "result"],
            ),
            releases_total: metrics_registry.int_counter_vec(
                "clusterip_releases_total",
                "Total number of release attempts.",
                &["result"],
            ),
            reconciled_records_total: metrics_registry.int_counter_vec(
                "clusterip_reconciled_records_total",
                "Total number of records processed during reconciliation.",
                &["result"],
            ),
        }
    }
}
