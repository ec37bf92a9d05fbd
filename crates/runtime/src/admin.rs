// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Admin HTTP surface.
//!
//! - GET `/metrics` — Prometheus exposition
//! - GET `/health` — liveness probe
//! - GET `/ready` — readiness probe (ready and at least one generation applied)

use crate::stage::StageRuntime;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct AdminState {
    runtime: Arc<StageRuntime>,
}

/// Builds the admin router for one stage replica.
pub fn router(runtime: Arc<StageRuntime>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(AdminState { runtime })
}

async fn metrics(State(state): State<AdminState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = state.runtime.metrics().registry().gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        );
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        String::from_utf8_lossy(&buf).into_owned(),
    )
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn ready(State(state): State<AdminState>) -> StatusCode {
    if state.runtime.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Serves the admin endpoints until `cancel` fires.
pub async fn serve_admin(
    runtime: Arc<StageRuntime>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "admin endpoints listening");
    axum::serve(listener, router(runtime))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}
