// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The on-disk DLQ record.
//!
//! One UTF-8 JSON document per KV value; the key is
//! `record_id = <unix-nanos, zero-padded>-<batch_id>` so lexicographic order
//! is time order.

use chrono::{DateTime, Utc};
use fbc_config::labels;
use fbc_proto::proto::chain::v1::MetricBatch;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One captured batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqRecord {
    /// Time-sortable identity, also the store key.
    pub record_id: String,
    /// The failed batch's id.
    pub batch_id: String,
    /// The batch payload, verbatim.
    pub data: Vec<u8>,
    /// The payload encoding tag.
    pub format: String,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Taxonomy code the batch failed with.
    pub error_code: String,
    /// Human-readable failure description.
    pub error_message: String,
    /// Stage that routed the batch here.
    pub fb_sender: String,
    /// The batch's internal labels at capture time.
    pub internal_labels: HashMap<String, String>,
    /// The batch's user-visible metadata at capture time.
    pub metadata: HashMap<String, String>,
}

impl DlqRecord {
    /// Builds a record from an ingested batch; failure annotations come from
    /// the internal labels set by the sending stage.
    pub fn from_batch(batch: &MetricBatch, timestamp: DateTime<Utc>) -> Self {
        let nanos = timestamp.timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
        let label = |key: &str| {
            batch
                .internal_labels
                .get(key)
                .cloned()
                .unwrap_or_default()
        };
        Self {
            record_id: format!("{nanos:020}-{}", batch.batch_id),
            batch_id: batch.batch_id.clone(),
            data: batch.data.clone(),
            format: batch.format.clone(),
            timestamp,
            error_code: label(labels::ERROR_CODE),
            error_message: label(labels::ERROR),
            fb_sender: label(labels::FB_SENDER),
            internal_labels: batch.internal_labels.clone(),
            metadata: batch.metadata.clone(),
        }
    }

    /// Replay attempts already recorded on this record's batch.
    pub fn replay_attempts(&self) -> u32 {
        self.internal_labels
            .get(labels::REPLAY_ATTEMPTS)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_is_time_sortable() {
        let early = Utc::now();
        let late = early + chrono::Duration::seconds(5);
        let batch = MetricBatch {
            batch_id: "zzz".to_owned(),
            ..MetricBatch::default()
        };
        let first = DlqRecord::from_batch(&batch, early);
        let batch2 = MetricBatch {
            batch_id: "aaa".to_owned(),
            ..MetricBatch::default()
        };
        let second = DlqRecord::from_batch(&batch2, late);
        // Later capture sorts later even though its batch id sorts earlier.
        assert!(first.record_id < second.record_id);
    }

    #[test]
    fn failure_annotations_come_from_internal_labels() {
        let mut batch = MetricBatch {
            batch_id: "b1".to_owned(),
            data: b"payload".to_vec(),
            format: "fbmetrics/json/v1".to_owned(),
            ..MetricBatch::default()
        };
        let _ = batch
            .internal_labels
            .insert(labels::FB_SENDER.to_owned(), "fb-dp".to_owned());
        let _ = batch
            .internal_labels
            .insert(labels::ERROR_CODE.to_owned(), "FORWARDING_FAILED".to_owned());
        let _ = batch
            .internal_labels
            .insert(labels::ERROR.to_owned(), "peer gone".to_owned());
        let record = DlqRecord::from_batch(&batch, Utc::now());
        assert_eq!(record.fb_sender, "fb-dp");
        assert_eq!(record.error_code, "FORWARDING_FAILED");
        assert_eq!(record.error_message, "peer gone");
        assert_eq!(record.replay_attempts(), 0);
    }
}
