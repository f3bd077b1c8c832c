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
//! JSON file helpers.

use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncWriteExt},
};

/// Reads the file at `path` and deserializes its JSON content.
///
/// Deserialization failures are reported as [std::io::ErrorKind::InvalidData].
pub async fn read_json_file<P, T>(path: P) -> std::io::Result<T>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let mut buf = Vec::new();
    File::open(path.as_ref())
        .await?
        .read_to_end(&mut buf)
        .await?;
    serde_json::from_slice(&buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Serializes `content` as pretty-printed JSON and writes it to `path`, replacing any previous
/// content.
pub async fn write_json_file(path: impl AsRef<Path>, content: &impl Serialize) -> std::io::Result<()> {
    let buf = serde_json::to_vec_pretty(content).map_err(std::io::Error::other)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path.as_ref())
        .await?;
    file.write_all(&buf).await?;
    file.flush().await
}

/// Returns a path in the system temp directory that is unique per test thread.
pub fn temp_path<S: AsRef<str>>(name: S) -> PathBuf {
    let thread = std::thread::current();
    let prefix = thread
        .name()
        .map(|name| name.replace("::", "_"))
        .unwrap_or_else(|| format!("{:?}", thread.id()));
    std::env::temp_dir().join(format!("{prefix}_{}", name.as_ref()))
}
