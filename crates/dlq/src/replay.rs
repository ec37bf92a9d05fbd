// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Filtered, rate-controlled re-injection into the pipeline head.
//!
//! Workers pull records off a shared queue one at a time, annotate them as
//! replays, and push them to the head stage. Throttling is a per-worker
//! sleep between batches; `dry_run` walks the filter without writing
//! anything anywhere.

use crate::error::Error;
use crate::record::DlqRecord;
use crate::store::{DlqStore, ScanFilter};
use chrono::Utc;
use fbc_config::labels;
use fbc_proto::proto::chain::v1::MetricBatch;
use fbc_proto::proto::chain::v1::PushStatus;
use fbc_proto::proto::chain::v1::chain_push_service_client::ChainPushServiceClient;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Replay run configuration.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Which records to replay.
    pub filter: ScanFilter,
    /// Worker count.
    pub concurrency: usize,
    /// Per-worker sleep between batches.
    pub throttle: Duration,
    /// Walk the filter without writing.
    pub dry_run: bool,
    /// Delete records the head accepted.
    pub delete_replayed: bool,
    /// Pipeline-head (`fb-rx`) endpoint.
    pub target: String,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            filter: ScanFilter::default(),
            concurrency: 1,
            throttle: Duration::ZERO,
            dry_run: false,
            delete_replayed: false,
            target: String::new(),
        }
    }
}

/// Outcome of one replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records matching the filter.
    pub scanned: u64,
    /// Records the head accepted.
    pub replayed: u64,
    /// Records deleted after acceptance.
    pub deleted: u64,
    /// Records the head rejected or that never reached it.
    pub errors: u64,
    /// Rejections per error code (`TRANSPORT` for RPC-level failures).
    pub failures_by_code: BTreeMap<String, u64>,
}

/// Runs one replay pass.
pub async fn run(store: &DlqStore, options: ReplayOptions) -> Result<ReplayStats, Error> {
    let records = store.scan(&options.filter).await?;
    let mut stats = ReplayStats {
        scanned: records.len() as u64,
        ..ReplayStats::default()
    };
    if options.dry_run || records.is_empty() {
        return Ok(stats);
    }

    let queue = Arc::new(Mutex::new(records.into_iter().collect::<VecDeque<_>>()));
    let shared = Arc::new(Mutex::new(ReplayStats::default()));
    let mut workers = Vec::new();
    for worker_id in 0..options.concurrency.max(1) {
        let queue = queue.clone();
        let shared = shared.clone();
        let store = store.clone();
        let options = options.clone();
        workers.push(tokio::spawn(async move {
            let mut client = match ChainPushServiceClient::connect(options.target.clone()).await {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(worker_id, error = %e, "replay worker failed to connect");
                    return;
                }
            };
            loop {
                let Some(record) = queue.lock().pop_front() else {
                    break;
                };
                let batch = replay_batch(&record);
                match client.push_batch(batch).await {
                    Ok(response) => {
                        let result = response.into_inner();
                        if result.status() == PushStatus::Success {
                            let mut deleted = false;
                            if options.delete_replayed {
                                match store.delete(&record.record_id).await {
                                    Ok(()) => deleted = true,
                                    Err(e) => tracing::warn!(
                                        record_id = %record.record_id,
                                        error = %e,
                                        "failed to delete replayed record"
                                    ),
                                }
                            }
                            let mut stats = shared.lock();
                            stats.replayed += 1;
                            if deleted {
                                stats.deleted += 1;
                            }
                        } else {
                            let mut stats = shared.lock();
                            stats.errors += 1;
                            *stats
                                .failures_by_code
                                .entry(result.error_code.clone())
                                .or_insert(0) += 1;
                        }
                    }
                    Err(status) => {
                        tracing::warn!(
                            record_id = %record.record_id,
                            error = %status,
                            "replay push failed"
                        );
                        let mut stats = shared.lock();
                        stats.errors += 1;
                        *stats
                            .failures_by_code
                            .entry("TRANSPORT".to_owned())
                            .or_insert(0) += 1;
                    }
                }
                if !options.throttle.is_zero() {
                    tokio::time::sleep(options.throttle).await;
                }
            }
        }));
    }
    for worker in workers {
        let _ = worker.await;
    }

    // Records no worker could take (e.g. every connection failed).
    let leftover = queue.lock().len() as u64;
    {
        let collected = shared.lock();
        stats.replayed = collected.replayed;
        stats.deleted = collected.deleted;
        stats.errors = collected.errors + leftover;
        stats.failures_by_code = collected.failures_by_code.clone();
    }
    if leftover > 0 {
        *stats
            .failures_by_code
            .entry("UNREACHABLE".to_owned())
            .or_insert(0) += leftover;
    }
    Ok(stats)
}

/// Builds the re-injected batch for a record.
fn replay_batch(record: &DlqRecord) -> MetricBatch {
    let mut internal_labels = record.internal_labels.clone();
    let _ = internal_labels.insert(labels::REPLAY.to_owned(), "true".to_owned());
    let _ = internal_labels.insert(
        labels::REPLAY_TIMESTAMP.to_owned(),
        Utc::now().to_rfc3339(),
    );
    let _ = internal_labels.insert(
        labels::REPLAY_ATTEMPTS.to_owned(),
        (record.replay_attempts() + 1).to_string(),
    );
    MetricBatch {
        batch_id: record.batch_id.clone(),
        data: record.data.clone(),
        format: record.format.clone(),
        replay: true,
        config_generation: 0,
        metadata: record.metadata.clone(),
        internal_labels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_batch_carries_replay_annotations() {
        let mut source = MetricBatch {
            batch_id: "b1".to_owned(),
            data: b"{}".to_vec(),
            format: "fbmetrics/json/v1".to_owned(),
            ..MetricBatch::default()
        };
        let _ = source
            .internal_labels
            .insert(labels::REPLAY_ATTEMPTS.to_owned(), "1".to_owned());
        let record = DlqRecord::from_batch(&source, Utc::now());
        let batch = replay_batch(&record);
        assert!(batch.replay);
        assert_eq!(
            batch.internal_labels.get(labels::REPLAY).map(String::as_str),
            Some("true")
        );
        assert_eq!(
            batch.internal_labels.get(labels::REPLAY_ATTEMPTS).map(String::as_str),
            Some("2")
        );
        assert!(batch.internal_labels.contains_key(labels::REPLAY_TIMESTAMP));
    }
}
