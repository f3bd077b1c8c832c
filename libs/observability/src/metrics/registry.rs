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
//! Prometheus metric registry.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder, core::Collector};

/// Registers the metrics of one or more components.
///
/// Components take a `&MetricsRegistry` when their metrics are built. This lets the caller decide
/// whether metrics end up in the global registry (and thus on the `/metrics` endpoint) or in an
/// isolated registry, e.g. in tests.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    registry: prometheus::Registry,
}

impl MetricsRegistry {
    /// Uses prometheus' default registry and registers the process collector.
    pub fn new_global() -> Self {
        let registry = prometheus::default_registry().clone();

        #[cfg(target_os = "linux")]
        registry
            .register(Box::new(
                prometheus::process_collector::ProcessCollector::for_self(),
            ))
            // Another instance may already have registered the process collector.
            .ok();

        Self { registry }
    }

    /// Creates an isolated registry with no collectors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register an `IntGauge`.
    pub fn int_gauge<S: Into<String>>(&self, name: S, help: S) -> IntGauge {
        self.register_collector(IntGauge::new(name, help).expect("valid gauge options"))
    }

    /// Create and register an `IntCounter`.
    pub fn int_counter<S: Into<String>>(&self, name: S, help: S) -> IntCounter {
        self.register_collector(IntCounter::new(name, help).expect("valid counter options"))
    }

    /// Create and register an `IntCounterVec`.
    pub fn int_counter_vec<S: Into<String>>(
        &self,
        name: S,
        help: S,
        label_names: &[&str],
    ) -> IntCounterVec {
        self.register_collector(
            IntCounterVec::new(Opts::new(name, help), label_names).expect("valid counter options"),
        )
    }

    /// Encodes all registered metrics in the prometheus text format.
    pub fn encode_text(&self) -> Vec<u8> {
        let families = self.registry.gather();
        let mut buffer = Vec::with_capacity(families.len() * 64);
        // Encoding into a Vec only fails for malformed metric families, which the registry
        // rejects at registration.
        TextEncoder::new().encode(&families, &mut buffer).ok();
        buffer
    }

    // Panics on duplicate names; metric names are static per component.
    fn register_collector<C: 'static + Collector + Clone>(&self, c: C) -> C {
        self.registry
            .register(Box::new(c.clone()))
            .expect("metric registered twice");
        c
    }
}
