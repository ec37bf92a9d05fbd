// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The control-plane process: leadership, spec watch, distribution, and
//! status write-back.

use crate::error::Error;
use crate::leader::{FileLease, LeaseConfig, acquire_leadership, renewal_loop};
use crate::service::{self, CpState};
use crate::spec_source::{FileSpecSource, SpecEvent, SpecSource};
use fbc_config::spec::PipelineSpecDoc;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Everything needed to bring the control plane up.
#[derive(Debug, Clone)]
pub struct ControlPlaneOptions {
    /// gRPC listener address.
    pub listen: SocketAddr,
    /// Path of the declarative pipeline spec document.
    pub spec_path: PathBuf,
    /// Lease file enabling leader election; `None` runs unelected (single
    /// replica deployments).
    pub lease_path: Option<PathBuf>,
    /// This replica's identity in the lease.
    pub identity: String,
}

/// Applies one observed document: skip unchanged specs, reject invalid
/// ones, distribute the rest. The leader never rewinds generations.
pub async fn observe_document(
    state: &Arc<CpState>,
    doc: &PipelineSpecDoc,
    last_fingerprint: &Mutex<Option<String>>,
) {
    let fingerprint = match doc.spec_fingerprint() {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(error = %e, "spec fingerprint failed");
            return;
        }
    };
    if last_fingerprint.lock().as_ref() == Some(&fingerprint) {
        tracing::debug!(
            generation = doc.metadata.generation,
            "spec unchanged; not distributing"
        );
        return;
    }
    if let Err(e) = doc.validate() {
        tracing::error!(
            generation = doc.metadata.generation,
            error = %e,
            "CONFIG_INVALID: rejecting spec revision"
        );
        return;
    }
    let config = match doc.to_wire_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "building wire config failed");
            return;
        }
    };
    let observed = state.observed_generation.load(Ordering::Acquire);
    if config.generation <= observed {
        tracing::warn!(
            generation = config.generation,
            observed,
            "ignoring non-advancing generation"
        );
        return;
    }
    state.distribute(config).await;
    let mut guard = last_fingerprint.lock();
    *guard = Some(fingerprint);
}

/// Rewrites the document's status subresource from the current registry
/// state. The write is atomic (temp + rename) and re-reads the document so
/// a concurrent operator edit is not clobbered.
fn write_status(state: &Arc<CpState>, spec_path: &Path) {
    let observed = state.observed_generation.load(Ordering::Acquire);
    let status = state.registry.rollup(observed);
    let mut doc = match PipelineSpecDoc::load_file(spec_path) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(error = %e, "status write skipped; spec unreadable");
            return;
        }
    };
    doc.status = Some(status);
    let yaml = match doc.to_yaml() {
        Ok(yaml) => yaml,
        Err(e) => {
            tracing::warn!(error = %e, "status serialization failed");
            return;
        }
    };
    let tmp = spec_path.with_extension("status-tmp");
    if let Err(e) =
        std::fs::write(&tmp, yaml).and_then(|()| std::fs::rename(&tmp, spec_path))
    {
        tracing::warn!(error = %e, "status write failed");
    }
}

async fn status_writer(state: Arc<CpState>, spec_path: PathBuf, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = state.status_notify.notified() => {
                // Coalesce ack bursts before rewriting the file.
                tokio::time::sleep(Duration::from_millis(200)).await;
                write_status(&state, &spec_path);
            }
        }
    }
    write_status(&state, &spec_path);
}

/// Runs the control plane to completion.
///
/// Returns `Err(LeadershipLost)` when the lease is lost; the caller exits
/// the process non-zero to force re-election.
pub async fn run(options: ControlPlaneOptions, cancel: CancellationToken) -> Result<(), Error> {
    let lease = options.lease_path.as_ref().map(|path| {
        FileLease::new(
            path.clone(),
            LeaseConfig::new("fb-chain-controller", options.identity.clone()),
        )
    });
    if let Some(lease) = &lease {
        acquire_leadership(lease, &cancel).await?;
        if cancel.is_cancelled() {
            return Ok(());
        }
    }

    let state = Arc::new(CpState::new());
    let last_fingerprint = Mutex::new(None);

    let (tx, mut events) = mpsc::channel(8);
    let source = Box::new(FileSpecSource::new(options.spec_path.clone()));
    let source_task = tokio::spawn(source.run(tx, cancel.child_token()));
    let serve_task = tokio::spawn(service::serve(
        state.clone(),
        options.listen,
        cancel.clone(),
    ));
    let status_task = tokio::spawn(status_writer(
        state.clone(),
        options.spec_path.clone(),
        cancel.child_token(),
    ));

    let mut renewal = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match lease {
                Some(lease) => renewal_loop(&lease, &cancel).await,
                None => {
                    cancel.cancelled().await;
                    Ok(())
                }
            }
        }
    });

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            lost = &mut renewal => {
                cancel.cancel();
                break lost.unwrap_or(Ok(()));
            }
            event = events.recv() => match event {
                None => break Ok(()),
                Some(SpecEvent::Added(doc)) | Some(SpecEvent::Modified(doc)) => {
                    observe_document(&state, &doc, &last_fingerprint).await;
                }
                Some(SpecEvent::Deleted) => {
                    tracing::warn!("pipeline spec deleted; keeping last distributed generation");
                }
            }
        }
    };

    cancel.cancel();
    renewal.abort();
    let _ = source_task.await;
    let _ = status_task.await;
    match serve_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "control-plane server failed"),
        Err(e) => tracing::error!(error = %e, "control-plane server task panicked"),
    }
    result
}
