// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Control-plane subscriber.
//!
//! Maintains a long-lived `StreamConfig` subscription, applies every received
//! generation, and acknowledges each application attempt. The subscription is
//! re-established with jittered backoff; the registration carries the current
//! generation so a leader with a newer one pushes it immediately.

use crate::stage::StageRuntime;
use fbc_proto::proto::control::v1::config_service_client::ConfigServiceClient;
use fbc_proto::proto::control::v1::{AckConfigRequest, ConfigRequest};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Spawns the config subscriber task.
pub fn spawn_config_client(
    runtime: Arc<StageRuntime>,
    endpoint: String,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(runtime, endpoint, cancel).await;
    })
}

async fn run(runtime: Arc<StageRuntime>, endpoint: String, cancel: CancellationToken) {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match subscribe_once(&runtime, &endpoint, &cancel).await {
            Ok(()) => {
                // Clean end of stream (leader restart); resubscribe promptly.
                attempt = 0;
            }
            Err(e) => {
                attempt = attempt.saturating_add(1);
                tracing::warn!(error = %e, attempt, "config subscription failed");
            }
        }
        let delay = backoff_delay(attempt);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_millis(200);
    let cap = Duration::from_secs(10);
    let exp = base.saturating_mul(1u32 << attempt.min(16));
    let jitter = rand::rng().random_range(0.5..=1.0);
    exp.min(cap).mul_f64(jitter)
}

fn config_request(runtime: &StageRuntime) -> ConfigRequest {
    ConfigRequest {
        stage_name: runtime.fb_name().to_owned(),
        instance_id: runtime.settings().instance_id.clone(),
        current_generation: runtime.applied_generation(),
    }
}

async fn apply_and_ack(
    runtime: &Arc<StageRuntime>,
    client: &mut ConfigServiceClient<tonic::transport::Channel>,
    config: &fbc_proto::proto::control::v1::PipelineConfig,
) {
    let generation = config.generation;
    let ack = runtime.apply_config(config);
    let request = AckConfigRequest {
        stage_name: runtime.fb_name().to_owned(),
        instance_id: runtime.settings().instance_id.clone(),
        applied_generation: ack.applied_generation,
        success: ack.success,
        error: ack.error.unwrap_or_default(),
    };
    if let Err(e) = client.ack_config(request).await {
        tracing::warn!(generation, error = %e, "config ack failed");
    }
}

async fn subscribe_once(
    runtime: &Arc<StageRuntime>,
    endpoint: &str,
    cancel: &CancellationToken,
) -> Result<(), tonic::Status> {
    let mut client = ConfigServiceClient::connect(endpoint.to_owned())
        .await
        .map_err(|e| tonic::Status::unavailable(e.to_string()))?;

    // Initial sync via the unary snapshot; a NotFound just means nothing has
    // been distributed yet. Stale generations are no-ops at apply time, so a
    // duplicate push on the stream below is harmless.
    match client.get_config(config_request(runtime)).await {
        Ok(response) => {
            let config = response.into_inner();
            if config.generation > runtime.applied_generation() {
                apply_and_ack(runtime, &mut client, &config).await;
            }
        }
        Err(status) => {
            tracing::debug!(code = ?status.code(), "no config snapshot on initial sync");
        }
    }

    let mut stream = client.stream_config(config_request(runtime)).await?.into_inner();
    tracing::info!(endpoint, "subscribed to control plane");

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            m = stream.message() => m?,
        };
        let Some(config) = message else {
            return Ok(());
        };
        apply_and_ack(runtime, &mut client, &config).await;
    }
}
