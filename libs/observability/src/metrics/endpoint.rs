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
//! HTTP endpoint to expose prometheus metrics.

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    error_handling::HandleErrorLayer,
    extract::State,
    http::{Response, StatusCode},
    response::IntoResponse,
    routing::get,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::{BoxError, ServiceBuilder, timeout::TimeoutLayer};
use tracing::{error, info};

use crate::metrics::registry::MetricsRegistry;

const METRICS_TIMEOUT: Duration = Duration::from_secs(3);

/// Serves `GET /metrics` on `listener` until `cancellation_token` is cancelled.
pub async fn start(
    cancellation_token: CancellationToken,
    listener: TcpListener,
    metrics_registry: MetricsRegistry,
) -> std::io::Result<()> {
    let requests_total = metrics_registry.int_counter(
        "metrics_endpoint_requests_total",
        "Total number of requests for the /metrics endpoint.",
    );
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|_: BoxError| async {
                    StatusCode::GATEWAY_TIMEOUT
                }))
                .layer(TimeoutLayer::new(METRICS_TIMEOUT)),
        )
        .with_state((metrics_registry, requests_total));

    info!(addr=?listener.local_addr(), "Starting metrics endpoint");
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(cancellation_token.cancelled_owned())
        .await
    {
        error!(error=%e, "Metrics endpoint stopped unexpectedly");
        return Err(e);
    }
    info!("Metrics endpoint stopped");
    Ok(())
}

async fn metrics_handler(
    State((metrics_registry, requests_total)): State<(MetricsRegistry, prometheus::IntCounter)>,
) -> impl IntoResponse {
    requests_total.inc();
    Response::new(Body::from(metrics_registry.encode_text()))
}
