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
//! Allocator runtime.
//!
//! Wires configuration, record store, reconciler and gateway together. The allocator is only
//! returned after the startup reconciliation succeeded.

use std::sync::Arc;

use clusterip_observability::metrics::registry::MetricsRegistry;
use clusterip_task_handler::CancelTaskSet;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::info;

use crate::{
    allocator::RangeAllocator,
    config::AllocatorConfig,
    gateway::AllocationGateway,
    metrics::AllocatorMetrics,
    range::{CidrRange, RangeError},
    reconciler::{ReconcileError, ReconcileReport, Reconciler},
    store::RecordStore,
};

/// Runtime start errors.
#[derive(Debug, Error)]
pub enum AllocatorRuntimeError {
    /// The configured subnet is not a usable range.
    #[error("invalid service subnet: {0}")]
    InvalidRange(#[from] RangeError),
    /// The startup reconciliation failed.
    #[error("startup reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),
}

/// Builder for an [AllocatorRuntime].
pub struct AllocatorRuntimeBuilder {
    config: AllocatorConfig,
    metrics_registry: Option<MetricsRegistry>,
    rng: Option<ChaCha8Rng>,
}

impl AllocatorRuntimeBuilder {
    /// Create a new runtime builder.
    pub fn new(config: AllocatorConfig) -> Self {
        Self {
            config,
            metrics_registry: None,
            rng: None,
        }
    }

    /// Register the allocator metrics in `metrics_registry`. Without it, metrics are kept in an
    /// isolated registry.
    pub fn with_metrics_registry(mut self, metrics_registry: MetricsRegistry) -> Self {
        self.metrics_registry = Some(metrics_registry);
        self
    }

    /// Use `rng` for allocation start hints instead of an OS-seeded one.
    pub fn with_rng(mut self, rng: ChaCha8Rng) -> Self {
        self.rng = Some(rng);
        self
    }

    /// Builds the allocator, reconciles it with `store` and, if configured, spawns periodic
    /// resynchronization on `task_set`.
    pub async fn start<S: RecordStore>(
        self,
        store: S,
        task_set: &mut CancelTaskSet,
    ) -> Result<AllocatorRuntime, AllocatorRuntimeError> {
        let range: CidrRange = self.config.service_subnet.parse()?;
        let metrics = AllocatorMetrics::new(&self.metrics_registry.unwrap_or_default());
        let rng = self.rng.unwrap_or_else(ChaCha8Rng::from_os_rng);
        let allocator = RangeAllocator::with_metrics(range, rng, metrics);

        info!(range = %range, capacity = range.capacity(), "Reconciling allocator before serving");
        let reconciler = Reconciler::new(store);
        let (allocator, startup_report) = reconciler.bootstrap(allocator).await?;

        let resync_interval = self
            .config
            .resync_interval
            .filter(|interval| !interval.is_zero());
        if let Some(interval) = resync_interval {
            info!(?interval, "Starting periodic reconciliation");
            task_set.spawn_cancellable_task(reconciler.run_periodic(allocator.clone(), interval));
        }

        Ok(AllocatorRuntime {
            gateway: AllocationGateway::new(allocator.clone()),
            allocator,
            startup_report,
        })
    }
}

/// A reconciled allocator and the gateway in front of it.
#[derive(Debug)]
pub struct AllocatorRuntime {
    /// The reconciled allocator.
    pub allocator: Arc<RangeAllocator>,
    /// Gateway for admission requests.
    pub gateway: AllocationGateway,
    /// Result of the startup reconciliation.
    pub startup_report: ReconcileReport,
}
