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
//! ClusterIP allocator binary.

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::Context;
use clap::Parser;
use clusterip_allocator::{
    cli::{AllocatorOptions, Commands, Opts},
    runtime::AllocatorRuntimeBuilder,
    store::JsonFileRecordStore,
};
use clusterip_observability::{
    metrics::{endpoint, registry::MetricsRegistry},
    setup_tracing,
};
use clusterip_task_handler::CancelTaskSet;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let _guards = setup_tracing(opts.logging.log_dir.as_ref(), opts.logging.stderr)
        .context("failed to set up logging")?;

    match opts.command {
        Commands::Run {
            allocator,
            resync_interval_secs,
            metrics_port,
        } => run(allocator, resync_interval_secs, metrics_port).await,
        Commands::Status { allocator } => status(allocator).await,
    }
}

async fn run(
    options: AllocatorOptions,
    resync_interval_secs: Option<u64>,
    metrics_port: Option<u16>,
) -> anyhow::Result<()> {
    let mut task_set = CancelTaskSet::new_with_signal_handler();
    let metrics_registry = MetricsRegistry::new_global();

    let runtime = AllocatorRuntimeBuilder::new(options.config(resync_interval_secs))
        .with_metrics_registry(metrics_registry.clone())
        .start(JsonFileRecordStore::new(&options.records_file), &mut task_set)
        .await
        .context("failed to start allocator")?;

    if let Some(port) = metrics_port {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics endpoint to {addr}"))?;
        let token = task_set.cancellation_token();
        task_set.spawn_cancellable_task(endpoint::start(token, listener, metrics_registry));
    }

    info!(status = ?runtime.allocator.status(), "Allocator ready");
    task_set.join_all().await;
    info!("Allocator stopped");
    Ok(())
}

async fn status(options: AllocatorOptions) -> anyhow::Result<()> {
    let mut task_set = CancelTaskSet::new();
    let runtime = AllocatorRuntimeBuilder::new(options.config(None))
        .start(JsonFileRecordStore::new(&options.records_file), &mut task_set)
        .await
        .context("failed to reconcile allocator")?;

    let output = serde_json::json!({
        "status": runtime.allocator.status(),
        "reconciliation": runtime.startup_report,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
