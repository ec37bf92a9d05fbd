// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Stage process orchestration: wires the runtime, the ingress and admin
//! servers, the connection tasks, and the config subscriber into one
//! gracefully-terminating process.

use crate::admin::serve_admin;
use crate::config_client::spawn_config_client;
use crate::lifecycle::shutdown_signal;
use crate::server::{ServeError, serve_ingress};
use crate::stage::{RuntimeSettings, StageProcessor, StageRuntime};
use fbc_proto::proto::control::v1 as control;
use std::net::SocketAddr;
use std::sync::Arc;

/// Everything needed to bring one stage process up.
#[derive(Clone)]
pub struct StageOptions {
    /// Ingress RPC listener address.
    pub listen: SocketAddr,
    /// Admin HTTP listener address.
    pub admin_listen: SocketAddr,
    /// Control-plane endpoint; `None` runs the stage from `initial_config`
    /// alone (static deployments and tests).
    pub control_plane: Option<String>,
    /// Configuration applied before serving, if any.
    pub initial_config: Option<control::PipelineConfig>,
    /// Process-level runtime settings.
    pub runtime: RuntimeSettings,
    /// Applies hot `log_level` changes to the process subscriber.
    pub on_log_level: Option<crate::stage::LogReloadFn>,
}

/// Runs one stage process to completion.
pub async fn run_stage(
    options: StageOptions,
    processor: Arc<dyn StageProcessor>,
) -> Result<(), ServeError> {
    let runtime =
        StageRuntime::new(options.runtime.clone(), processor).map_err(|e| ServeError::Init {
            details: e.to_string(),
        })?;
    if let Some(reload) = options.on_log_level.clone() {
        runtime.set_log_reload(reload);
    }

    let connection_tasks = runtime.spawn_connection_tasks();
    let cancel = runtime.shutdown_token();

    if let Some(config) = &options.initial_config {
        let ack = runtime.apply_config(config);
        if !ack.success {
            tracing::error!(
                error = ack.error.as_deref().unwrap_or("unknown"),
                "initial configuration rejected"
            );
        }
    }

    let config_task = options
        .control_plane
        .clone()
        .map(|endpoint| spawn_config_client(runtime.clone(), endpoint, cancel.child_token()));

    let ingress = tokio::spawn(serve_ingress(
        runtime.clone(),
        options.listen,
        cancel.clone(),
    ));
    let admin = tokio::spawn(serve_admin(
        runtime.clone(),
        options.admin_listen,
        cancel.clone(),
    ));

    shutdown_signal(cancel.clone()).await;
    tracing::info!(fb_name = runtime.fb_name(), "shutting down");
    runtime.begin_shutdown();
    runtime.drain().await;

    match ingress.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "ingress server failed"),
        Err(e) => tracing::error!(error = %e, "ingress task panicked"),
    }
    match admin.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "admin server failed"),
        Err(e) => tracing::error!(error = %e, "admin task panicked"),
    }
    if let Some(task) = config_task {
        let _ = task.await;
    }
    for task in connection_tasks {
        let _ = task.await;
    }
    tracing::info!(fb_name = runtime.fb_name(), "stage stopped");
    Ok(())
}
