// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The DLQ service stage.
//!
//! Ingests failed batches over the same `PushBatch` RPC the chain uses and
//! appends them durably. Batches whose replay-attempt count has exhausted
//! the configured budget are quarantined as poison pills instead of
//! re-entering the live keyspace.

use crate::record::DlqRecord;
use crate::store::DlqStore;
use async_trait::async_trait;
use chrono::Utc;
use fbc_config::fb;
use fbc_config::params::{DlqParams, StageParams};
use fbc_proto::proto::chain::v1::MetricBatch;
use fbc_runtime::stage::{Disposition, StageProcessor};
use fbc_runtime::{Batch, StageError};
use parking_lot::{Mutex, RwLock};
use prometheus::{IntCounter, Opts, Registry};
use std::path::PathBuf;

#[derive(Debug, Clone)]
struct DlqMetrics {
    records: IntCounter,
    poison: IntCounter,
}

impl DlqMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        let opts = |name: &str, help: &str| Opts::new(name, help).const_label("fb_name", fb::DLQ);
        Ok(Self {
            records: IntCounter::with_opts(opts(
                "fb_dlq_records_total",
                "Failed batches captured durably",
            ))?,
            poison: IntCounter::with_opts(opts(
                "fb_dlq_poison_total",
                "Batches quarantined after exhausting replay attempts",
            ))?,
        })
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.records.clone()))?;
        registry.register(Box::new(self.poison.clone()))?;
        Ok(())
    }
}

/// The FB-DLQ stage processor.
pub struct DlqService {
    params: RwLock<DlqParams>,
    store: RwLock<DlqStore>,
    store_path: Mutex<Option<PathBuf>>,
    metrics: DlqMetrics,
}

impl std::fmt::Debug for DlqService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DlqService").finish_non_exhaustive()
    }
}

impl DlqService {
    /// Builds the service with an in-memory store until parameters arrive.
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            params: RwLock::new(DlqParams::default()),
            store: RwLock::new(DlqStore::in_memory()),
            store_path: Mutex::new(None),
            metrics: DlqMetrics::new()?,
        })
    }

    /// A handle to the current store (for the inventory tool and tests).
    pub fn store(&self) -> DlqStore {
        self.store.read().clone()
    }
}

#[async_trait]
impl StageProcessor for DlqService {
    fn fb_name(&self) -> &'static str {
        fb::DLQ
    }

    fn register_metrics(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        self.metrics.register(registry)
    }

    fn apply_params(&self, bytes: &[u8]) -> Result<(), StageError> {
        let params =
            DlqParams::parse(bytes).map_err(|e| StageError::config_invalid(e.to_string()))?;
        params
            .validate()
            .map_err(|e| StageError::config_invalid(e.to_string()))?;

        {
            let mut store_path = self.store_path.lock();
            if store_path.as_ref() != Some(&params.store_path) {
                let store = DlqStore::open_disk(&params.store_path)
                    .map_err(|e| StageError::config_invalid(format!("DLQ store: {e}")))?;
                let previous = {
                    let mut guard = self.store.write();
                    std::mem::replace(&mut *guard, store)
                };
                let _ = tokio::spawn(async move {
                    if let Err(e) = previous.close().await {
                        tracing::warn!(error = %e, "closing previous DLQ store failed");
                    }
                });
                *store_path = Some(params.store_path.clone());
            }
        }
        let mut guard = self.params.write();
        *guard = params;
        Ok(())
    }

    async fn process(&self, batch: &mut Batch) -> Result<Disposition, StageError> {
        let max_attempts = self.params.read().max_replay_attempts;
        let store = self.store();
        let wire = MetricBatch::from(batch.clone());
        let record = DlqRecord::from_batch(&wire, Utc::now());

        let outcome = if record.replay_attempts() >= max_attempts {
            tracing::warn!(
                batch_id = %record.batch_id,
                attempts = record.replay_attempts(),
                "quarantining poison pill"
            );
            self.metrics.poison.inc();
            store.quarantine(&record).await
        } else {
            self.metrics.records.inc();
            store.append(&record).await
        };
        outcome.map_err(|e| StageError::processing_failed(format!("DLQ append: {e}")))?;
        store
            .flush()
            .await
            .map_err(|e| StageError::processing_failed(format!("DLQ flush: {e}")))?;
        Ok(Disposition::Consumed)
    }

    async fn flush(&self) -> Result<(), StageError> {
        self.store()
            .flush()
            .await
            .map_err(|e| StageError::processing_failed(format!("DLQ flush: {e}")))
    }
}
