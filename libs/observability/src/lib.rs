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
//! Logging and prometheus metrics.

use std::{io::IsTerminal, path::Path};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt::time::UtcTime, prelude::*};

pub mod metrics;

/// Environment variable to define the log level.
pub const LOG_LEVEL_ENV: &str = "RUST_LOG";

/// Error returned by [setup_tracing].
pub type SetupTracingError = tracing::subscriber::SetGlobalDefaultError;

/// Installs the global tracing subscriber.
///
/// # Arguments
///
/// * `log_dir`: If provided, logs are written at debug level to `<executable name>.log` in this
///   directory.
/// * `log_to_stderr`: If true, logs filtered by [LOG_LEVEL_ENV] (default `info`) are written to
///   stderr.
///
/// The returned guards flush the non-blocking writers and must be kept alive for the lifetime of
/// the process.
pub fn setup_tracing<P: AsRef<Path>>(
    log_dir: Option<P>,
    log_to_stderr: bool,
) -> Result<Vec<WorkerGuard>, SetupTracingError> {
    let log_level =
        EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut guards = vec![];
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![];

    if let Some(log_dir) = log_dir {
        let log_file =
            tracing_appender::rolling::never(log_dir.as_ref(), format!("{}.log", exec_name()));
        let (writer, guard) = tracing_appender::non_blocking(log_file);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer)
                .with_filter(tracing::level_filters::LevelFilter::DEBUG)
                .boxed(),
        );
        guards.push(guard);
    }

    if log_to_stderr {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(std::io::stderr().is_terminal())
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer)
                .with_filter(log_level)
                .boxed(),
        );
        guards.push(guard);
    }

    tracing::subscriber::set_global_default(Registry::default().with(layers))?;
    tracing::debug!("Logging initialized");
    Ok(guards)
}

fn exec_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem()?.to_str().map(str::to_string))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}
