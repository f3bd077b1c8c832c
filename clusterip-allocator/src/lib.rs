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
//! # ClusterIP Allocator
//!
//! Assigns unique addresses from a configured CIDR range.
//!
//! The [allocator::RangeAllocator] keeps the allocation state of every usable address of a
//! [range::CidrRange] in an in-memory [bitmap::AllocationBitmap]. The state is not persisted:
//! at startup the [reconciler::Reconciler] rebuilds it from the addresses referenced in an
//! external [store::RecordStore], and only then is the allocator handed to the
//! [gateway::AllocationGateway].
//!
//! Uniqueness is guaranteed within one allocator instance. Several processes allocating from the
//! same range each hold their own bitmap; they must rely on the record store rejecting duplicate
//! addresses when a record is persisted.

pub mod allocator;
pub mod bitmap;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod metrics;
pub mod range;
pub mod reconciler;
pub mod runtime;
pub mod service;
pub mod store;
