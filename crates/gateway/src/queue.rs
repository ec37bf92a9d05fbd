// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The persistent sending queue.
//!
//! Accepted batches are durably queued before export; the drain worker
//! submits them with bounded retry and deletes them only after the sink
//! accepts. Keys are time-ordered so export roughly preserves acceptance
//! order.

use crate::GwMetrics;
use crate::sink::Sink;
use fbc_config::params::ExportRetryParams;
use fbc_store::{KvStore, MemoryStore, ScanRange};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const KEY_PREFIX: &[u8] = b"q/";
const DRAIN_CHUNK: usize = 32;

/// One queued export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEntry {
    /// Originating batch id (part of the queue key, kept for logs).
    pub batch_id: String,
    /// User-visible metadata forwarded to the sink.
    pub metadata: HashMap<String, String>,
    /// The serialized payload.
    pub payload: String,
}

/// Failure to enqueue a batch.
#[derive(thiserror::Error, Debug)]
pub enum EnqueueError {
    /// The queue is at capacity; overflow is terminal for the batch.
    #[error("sending queue full ({capacity} entries)")]
    Full {
        /// The configured capacity.
        capacity: u64,
    },

    /// The backing store failed.
    #[error("sending queue store: {0}")]
    Store(#[from] fbc_store::Error),
}

/// The queue over a swappable store backing.
pub struct SendingQueue {
    store: RwLock<Arc<dyn KvStore>>,
}

impl std::fmt::Debug for SendingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendingQueue").finish_non_exhaustive()
    }
}

impl SendingQueue {
    /// Starts on the in-memory backing until configuration arrives.
    pub fn new() -> Self {
        Self {
            store: RwLock::new(Arc::new(MemoryStore::new())),
        }
    }

    /// Swaps the backing store.
    pub fn install(&self, store: Arc<dyn KvStore>) {
        let mut guard = self.store.write();
        *guard = store;
    }

    fn current(&self) -> Arc<dyn KvStore> {
        self.store.read().clone()
    }

    /// Durably appends one entry, enforcing the capacity bound.
    pub async fn enqueue(&self, entry: &ExportEntry, capacity: u64) -> Result<(), EnqueueError> {
        let store = self.current();
        if store.count().await? >= capacity {
            return Err(EnqueueError::Full { capacity });
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let key = format!("q/{nanos:020}-{}", entry.batch_id).into_bytes();
        let value = serde_json::to_vec(entry).map_err(|e| {
            EnqueueError::Store(fbc_store::Error::Backend {
                details: e.to_string(),
            })
        })?;
        store.put(&key, &value, None).await?;
        Ok(())
    }

    /// Entries currently queued.
    pub async fn depth(&self) -> u64 {
        self.current().count().await.unwrap_or(0)
    }

    /// One drain pass: submit up to a chunk of entries, delete successes.
    /// Failed entries stay queued for the next pass. Returns the number
    /// exported.
    pub async fn drain_once(
        &self,
        sink: &dyn Sink,
        url: &str,
        retry: &ExportRetryParams,
        metrics: &GwMetrics,
    ) -> u64 {
        let store = self.current();
        let entries = match store
            .scan(ScanRange::prefix(KEY_PREFIX).with_limit(DRAIN_CHUNK))
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "sending queue scan failed");
                return 0;
            }
        };
        let mut exported = 0u64;
        for item in entries {
            let entry: ExportEntry = match serde_json::from_slice(&item.value) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::error!(error = %e, "dropping undecodable queue entry");
                    let _ = store.delete(&item.key).await;
                    continue;
                }
            };
            if self
                .submit_with_retry(sink, url, retry, &entry)
                .await
            {
                if let Err(e) = store.delete(&item.key).await {
                    tracing::warn!(batch_id = %entry.batch_id, error = %e, "queue delete failed");
                }
                metrics.exported.inc();
                exported += 1;
            } else {
                metrics.export_failures.inc();
            }
        }
        metrics.queue_depth.set(self.depth().await as i64);
        exported
    }

    async fn submit_with_retry(
        &self,
        sink: &dyn Sink,
        url: &str,
        retry: &ExportRetryParams,
        entry: &ExportEntry,
    ) -> bool {
        let mut backoff = retry.initial_backoff;
        for attempt in 1..=retry.max_attempts {
            match sink.send(url, entry.payload.as_bytes(), &entry.metadata).await {
                Ok(()) => return true,
                Err(e) if attempt < retry.max_attempts => {
                    tracing::debug!(
                        batch_id = %entry.batch_id,
                        attempt,
                        error = %e,
                        "export attempt failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(retry.max_backoff);
                }
                Err(e) => {
                    tracing::warn!(
                        batch_id = %entry.batch_id,
                        attempts = retry.max_attempts,
                        error = %e,
                        "export failed; entry stays queued"
                    );
                }
            }
        }
        false
    }

    /// Flushes the backing store.
    pub async fn flush(&self) -> Result<(), fbc_store::Error> {
        self.current().flush().await
    }
}

impl Default for SendingQueue {
    fn default() -> Self {
        Self::new()
    }
}
