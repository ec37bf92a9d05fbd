// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The `ConfigService` gRPC surface.

use crate::registry::{ClientRegistry, StreamItem};
use fbc_config::fb;
use fbc_proto::proto::control::v1 as wire;
use fbc_proto::proto::control::v1::config_service_server::{ConfigService, ConfigServiceServer};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Notify;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// Shared control-plane state.
#[derive(Debug)]
pub struct CpState {
    /// Connected replicas and their rollout state.
    pub registry: ClientRegistry,
    /// The latest distributed snapshot, if any.
    pub current: RwLock<Option<wire::PipelineConfig>>,
    /// The generation of the latest observed spec.
    pub observed_generation: AtomicI64,
    /// Signalled whenever the status subresource should be rewritten.
    pub status_notify: Notify,
}

impl Default for CpState {
    fn default() -> Self {
        Self::new()
    }
}

impl CpState {
    /// Empty state; filled by the watch loop.
    pub fn new() -> Self {
        Self {
            registry: ClientRegistry::new(),
            current: RwLock::new(None),
            observed_generation: AtomicI64::new(0),
            status_notify: Notify::new(),
        }
    }

    /// The latest snapshot, cloned.
    pub fn snapshot(&self) -> Option<wire::PipelineConfig> {
        self.current.read().clone()
    }

    /// Installs a new snapshot and broadcasts it.
    pub async fn distribute(&self, config: wire::PipelineConfig) {
        let generation = config.generation;
        {
            let mut current = self.current.write();
            *current = Some(config.clone());
        }
        self.observed_generation.store(generation, Ordering::Release);
        tracing::info!(
            generation,
            subscribers = self.registry.connected(),
            "distributing configuration generation"
        );
        self.registry.broadcast(&config).await;
        self.status_notify.notify_one();
    }
}

/// The service implementation.
#[derive(Debug, Clone)]
pub struct ConfigDistributor {
    state: Arc<CpState>,
}

impl ConfigDistributor {
    /// Wraps the shared state.
    pub fn new(state: Arc<CpState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl ConfigService for ConfigDistributor {
    async fn get_config(
        &self,
        request: Request<wire::ConfigRequest>,
    ) -> Result<Response<wire::PipelineConfig>, Status> {
        let req = request.into_inner();
        if !fb::is_known(&req.stage_name) {
            return Err(Status::invalid_argument(format!(
                "unknown function block `{}`",
                req.stage_name
            )));
        }
        match self.state.snapshot() {
            Some(config) => Ok(Response::new(config)),
            None => Err(Status::not_found("no configuration distributed yet")),
        }
    }

    type StreamConfigStream = ReceiverStream<StreamItem>;

    async fn stream_config(
        &self,
        request: Request<wire::ConfigRequest>,
    ) -> Result<Response<Self::StreamConfigStream>, Status> {
        let req = request.into_inner();
        if !fb::is_known(&req.stage_name) {
            return Err(Status::invalid_argument(format!(
                "unknown function block `{}`",
                req.stage_name
            )));
        }
        let (subscription, rx) = self.state.registry.register(
            &req.stage_name,
            &req.instance_id,
            req.current_generation,
        );
        tracing::info!(
            stage = %req.stage_name,
            instance = %req.instance_id,
            current_generation = req.current_generation,
            "replica subscribed"
        );
        // Initial sync: a leader holding a newer generation pushes it now.
        if let Some(config) = self.state.snapshot() {
            if config.generation > req.current_generation {
                let _ = subscription.offer(&config).await;
            }
        }
        self.state.status_notify.notify_one();
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn ack_config(
        &self,
        request: Request<wire::AckConfigRequest>,
    ) -> Result<Response<wire::AckConfigResponse>, Status> {
        let req = request.into_inner();
        if !req.success {
            tracing::warn!(
                stage = %req.stage_name,
                instance = %req.instance_id,
                generation = req.applied_generation,
                error = %req.error,
                "replica rejected configuration"
            );
        }
        self.state.registry.record_ack(
            &req.stage_name,
            &req.instance_id,
            req.applied_generation,
            req.success,
        );
        self.state.status_notify.notify_one();
        Ok(Response::new(wire::AckConfigResponse { ok: true }))
    }
}

/// Serves the config surface until cancelled.
pub async fn serve(
    state: Arc<CpState>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    tracing::info!(%addr, "control plane listening");
    Server::builder()
        .add_service(ConfigServiceServer::new(ConfigDistributor::new(state)))
        .serve_with_shutdown(addr, cancel.cancelled_owned())
        .await
}
