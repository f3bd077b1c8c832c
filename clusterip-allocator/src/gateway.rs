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
//! Allocation gateway.
//!
//! Turns admitted services into allocator calls. A service that names a cluster IP has that
//! address validated and allocated. A service without one is assigned the next free address and
//! returned patched. Decoding requests and encoding patches is left to the transport.

use std::{net::IpAddr, sync::Arc};

use thiserror::Error;
use tracing::info;

use crate::{
    allocator::{AllocationError, RangeAllocator},
    service::Service,
};

/// Gateway errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The service carries a cluster IP that is not an IP address.
    #[error("invalid IP address {0:?}")]
    InvalidAddress(String),
    /// The allocator rejected the request.
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

/// Result of admitting a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Admit the service unchanged.
    Allowed,
    /// Admit the service with the assigned cluster IP.
    Patched(Service),
}

/// Entry point for admission requests.
#[derive(Debug, Clone)]
pub struct AllocationGateway {
    allocator: Arc<RangeAllocator>,
}

impl AllocationGateway {
    /// Creates a gateway in front of a reconciled allocator.
    pub fn new(allocator: Arc<RangeAllocator>) -> Self {
        Self { allocator }
    }

    /// The allocator behind this gateway.
    pub fn allocator(&self) -> &Arc<RangeAllocator> {
        &self.allocator
    }

    /// Admits a newly created service.
    pub fn admit(&self, service: Service) -> Result<AdmissionOutcome, GatewayError> {
        if service.is_headless() {
            info!(namespace = %service.namespace, name = %service.name, "Headless service, no address allocated");
            return Ok(AdmissionOutcome::Allowed);
        }

        if let Some(requested) = service.address() {
            let address = parse_address(requested)?;
            self.allocator.allocate(address)?;
            info!(namespace = %service.namespace, name = %service.name, %address, "Requested address allocated");
            return Ok(AdmissionOutcome::Allowed);
        }

        let address = self.allocator.allocate_next()?;
        info!(namespace = %service.namespace, name = %service.name, %address, "Address allocated");
        Ok(AdmissionOutcome::Patched(
            service.with_cluster_ip(address.to_string()),
        ))
    }

    /// Releases the address of a deleted service.
    pub fn release(&self, service: &Service) -> Result<(), GatewayError> {
        let Some(assigned) = service.address() else {
            return Ok(());
        };
        let address = parse_address(assigned)?;
        self.allocator.release(address)?;
        info!(namespace = %service.namespace, name = %service.name, %address, "Address released");
        Ok(())
    }
}

fn parse_address(raw: &str) -> Result<IpAddr, GatewayError> {
    raw.parse()
        .map_err(|_| GatewayError::InvalidAddress(raw.to_string()))
}
