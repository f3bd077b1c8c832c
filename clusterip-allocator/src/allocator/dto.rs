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
//! Data transfer objects (DTOs) for the allocator status.

use serde::{Deserialize, Serialize};

use crate::{allocator::RangeAllocator, range::AddressFamily};

/// Point-in-time view of an allocator.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AllocatorStatusDto {
    /// The configured range.
    pub range: String,
    /// Address family of the range.
    pub family: AddressFamily,
    /// Number of usable addresses.
    pub capacity: u64,
    /// Number of free addresses.
    pub free: u64,
    /// Number of allocated addresses.
    pub allocated: u64,
}

impl RangeAllocator {
    /// Returns a consistent snapshot of the allocation counters.
    pub fn status(&self) -> AllocatorStatusDto {
        let free = self.free();
        AllocatorStatusDto {
            range: self.range().to_string(),
            family: self.range().family(),
            capacity: self.capacity(),
            free,
            allocated: self.capacity() - free,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn status_serializes_counters() {
        let allocator =
            RangeAllocator::new("10.96.0.0/28".parse().unwrap(), ChaCha8Rng::seed_from_u64(7));
        allocator.allocate("10.96.0.5".parse().unwrap()).unwrap();

        let json = serde_json::to_value(allocator.status()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "range": "10.96.0.0/28",
                "family": "v4",
                "capacity": 14,
                "free": 13,
                "allocated": 1,
            })
        );
    }
}
