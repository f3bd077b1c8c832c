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
//! Record store collaborator.
//!
//! The allocator does not persist anything. The durable record of which addresses are in use
//! lives in an external store; the [reconciler](crate::reconciler) reads it through
//! [RecordStore].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use clusterip_io_util::read_json_file;

use crate::service::Service;

/// The error type for record stores.
pub type RecordStoreError = Box<dyn std::error::Error + Send + Sync>;

/// Read access to the records that reference addresses.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Lists the address of every record that currently references one.
    ///
    /// The result must be a consistent snapshot: an address referenced by a record that exists
    /// for the whole duration of the call must be included.
    async fn list_addresses(&self) -> Result<Vec<String>, RecordStoreError>;
}

/// A fixed list of addresses.
#[derive(Debug, Clone, Default)]
pub struct StaticRecordStore {
    addresses: Vec<String>,
}

impl StaticRecordStore {
    /// Creates a store that always reports `addresses`.
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl RecordStore for StaticRecordStore {
    async fn list_addresses(&self) -> Result<Vec<String>, RecordStoreError> {
        Ok(self.addresses.clone())
    }
}

/// Services stored as a JSON array in a file.
///
/// The file is read anew on every listing, so changes made by other writers are picked up by
/// the next reconciliation pass.
#[derive(Debug, Clone)]
pub struct JsonFileRecordStore {
    path: PathBuf,
}

impl JsonFileRecordStore {
    /// Creates a store backed by the file at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Reads all services.
    pub async fn records(&self) -> std::io::Result<Vec<Service>> {
        read_json_file(&self.path).await
    }
}

#[async_trait]
impl RecordStore for JsonFileRecordStore {
    async fn list_addresses(&self) -> Result<Vec<String>, RecordStoreError> {
        let records = self.records().await.map_err(|e| {
            format!("failed to read records from {}: {e}", self.path.display())
        })?;
        Ok(records
            .iter()
            .filter_map(Service::address)
            .map(str::to_string)
            .collect())
    }
}
