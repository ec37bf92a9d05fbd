// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The ingress gRPC server.

use crate::stage::StageRuntime;
use crate::tracecontext::TraceParent;
use fbc_proto::proto::chain::v1::chain_push_service_server::{
    ChainPushService, ChainPushServiceServer,
};
use fbc_proto::proto::chain::v1::{MetricBatch, PushResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// `ChainPushService` implementation delegating to the stage runtime.
#[derive(Debug)]
pub struct ChainService {
    runtime: Arc<StageRuntime>,
}

impl ChainService {
    /// Wraps the runtime for serving.
    pub fn new(runtime: Arc<StageRuntime>) -> Self {
        Self { runtime }
    }
}

#[tonic::async_trait]
impl ChainPushService for ChainService {
    async fn push_batch(
        &self,
        request: Request<MetricBatch>,
    ) -> Result<Response<PushResult>, Status> {
        let trace = TraceParent::extract(request.metadata());
        let batch = request.into_inner();
        let result = self.runtime.handle_push(batch, trace).await;
        Ok(Response::new(result))
    }
}

/// Errors from serving the ingress or admin endpoints.
#[derive(thiserror::Error, Debug)]
pub enum ServeError {
    /// The gRPC server failed to bind or serve.
    #[error("ingress transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The admin HTTP listener failed.
    #[error("admin endpoint error: {0}")]
    Admin(#[from] std::io::Error),

    /// Stage construction failed before serving.
    #[error("stage initialization error: {details}")]
    Init {
        /// A description of the failure.
        details: String,
    },
}

/// Serves the ingress RPC until `cancel` fires, then stops accepting new
/// requests and drains in-flight ones.
pub async fn serve_ingress(
    runtime: Arc<StageRuntime>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), ServeError> {
    tracing::info!(%addr, fb_name = runtime.fb_name(), "ingress listening");
    Server::builder()
        .add_service(ChainPushServiceServer::new(ChainService::new(runtime)))
        .serve_with_shutdown(addr, cancel.cancelled_owned())
        .await?;
    Ok(())
}
