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
//! The service resource.
//!
//! The gateway admits services, the record store persists them. Only the fields the allocator
//! needs are modelled.

use serde::{Deserialize, Serialize};

/// Cluster IP value of a service that explicitly requests no address.
pub const HEADLESS: &str = "None";

/// A service and its cluster IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Namespace of the service.
    #[serde(default)]
    pub namespace: String,
    /// Name of the service.
    pub name: String,
    /// The requested or assigned address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
}

impl Service {
    /// Creates a service without a cluster IP.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            cluster_ip: None,
        }
    }

    /// Sets the cluster IP.
    pub fn with_cluster_ip(mut self, cluster_ip: impl Into<String>) -> Self {
        self.cluster_ip = Some(cluster_ip.into());
        self
    }

    /// True if the service explicitly requests no address.
    pub fn is_headless(&self) -> bool {
        self.cluster_ip.as_deref().map(str::trim) == Some(HEADLESS)
    }

    /// The requested or assigned address, if the service carries one.
    pub fn address(&self) -> Option<&str> {
        self.cluster_ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty() && *ip != HEADLESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_ignores_blank_and_headless_values() {
        let svc = Service::new("default", "web");
        assert_eq!(svc.address(), None);
        assert_eq!(svc.clone().with_cluster_ip("  ").address(), None);
        assert_eq!(svc.clone().with_cluster_ip(HEADLESS).address(), None);
        assert!(svc.clone().with_cluster_ip(HEADLESS).is_headless());
        assert_eq!(
            svc.with_cluster_ip(" 10.96.0.1 ").address(),
            Some("10.96.0.1")
        );
    }

    #[test]
    fn deserializes_records_without_cluster_ip() {
        let svc: Service = serde_json::from_str(r#"{"name": "web"}"#).unwrap();
        assert_eq!(svc, Service::new("", "web"));
    }
}
