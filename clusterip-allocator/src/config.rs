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
//! Allocator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Subnet used when none is configured.
pub const DEFAULT_SERVICE_SUBNET: &str = "10.96.0.0/16";

/// Configuration of an allocator instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// CIDR of the range addresses are allocated from. The address family follows from it.
    pub service_subnet: String,
    /// If set, the record store is reconciled again at this period after startup.
    #[serde(default)]
    pub resync_interval: Option<Duration>,
}

impl AllocatorConfig {
    /// Creates a configuration for `service_subnet` without periodic resynchronization.
    pub fn new(service_subnet: impl Into<String>) -> Self {
        Self {
            service_subnet: service_subnet.into(),
            resync_interval: None,
        }
    }

    /// Enables periodic resynchronization. A zero interval disables it.
    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = Some(interval).filter(|interval| !interval.is_zero());
        self
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_SUBNET)
    }
}
