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
//! Command line options.

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::config::{AllocatorConfig, DEFAULT_SERVICE_SUBNET};

/// ClusterIP allocator
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Opts {
    /// Top-level subcommand
    #[command(subcommand)]
    pub command: Commands,

    /// Logging options
    #[command(flatten)]
    pub logging: LoggingOptions,
}

/// Logging options.
#[derive(Debug, Args)]
pub struct LoggingOptions {
    /// Log to stderr.
    #[arg(long, global = true, default_value = "true")]
    pub stderr: bool,

    /// Directory for the log file.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
}

/// Options shared by all subcommands.
#[derive(Debug, Args)]
pub struct AllocatorOptions {
    /// The service subnet addresses are allocated from.
    #[arg(long, default_value = DEFAULT_SERVICE_SUBNET)]
    pub service_subnet: String,

    /// JSON file holding the persisted services.
    #[arg(long)]
    pub records_file: PathBuf,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile with the record store and keep the allocator running until shutdown.
    Run {
        #[command(flatten)]
        allocator: AllocatorOptions,

        /// Reconcile with the record store again every this many seconds.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        resync_interval_secs: Option<u64>,

        /// Expose prometheus metrics on this port.
        #[arg(long)]
        metrics_port: Option<u16>,
    },
    /// Reconcile once and print the allocator status as JSON.
    Status {
        #[command(flatten)]
        allocator: AllocatorOptions,
    },
}

impl AllocatorOptions {
    /// Builds the allocator configuration.
    pub fn config(&self, resync_interval_secs: Option<u64>) -> AllocatorConfig {
        let config = AllocatorConfig::new(self.service_subnet.clone());
        match resync_interval_secs {
            Some(secs) => config.with_resync_interval(Duration::from_secs(secs)),
            None => config,
        }
    }
}
