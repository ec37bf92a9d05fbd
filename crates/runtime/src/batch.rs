// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The in-process batch representation.
//!
//! `batch_id` is stable across all forwarding; `config_generation` only ever
//! grows as the batch traverses the chain; `internal_labels` never leave the
//! pipeline through the exporter.

use crate::error::ErrorCode;
use fbc_config::labels;
use fbc_proto::proto::chain::v1 as wire;
use std::collections::HashMap;

/// One unit of work traversing the chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// Opaque, globally unique, immutable identity.
    pub batch_id: String,
    /// Serialized payload; encoding named by `format`.
    pub data: Vec<u8>,
    /// Payload encoding tag.
    pub format: String,
    /// True iff re-injected by the DLQ replayer.
    pub replay: bool,
    /// Generation the producing stage had applied when emitting.
    pub config_generation: i64,
    /// User-visible metadata.
    pub metadata: HashMap<String, String>,
    /// Pipeline-internal bookkeeping.
    pub internal_labels: HashMap<String, String>,
}

impl Batch {
    /// Annotates the batch for DLQ routing.
    pub fn annotate_failure(&mut self, fb_name: &str, code: ErrorCode, message: &str) {
        let _ = self
            .internal_labels
            .insert(labels::FB_SENDER.to_owned(), fb_name.to_owned());
        let _ = self
            .internal_labels
            .insert(labels::ERROR_CODE.to_owned(), code.as_str().to_owned());
        let _ = self
            .internal_labels
            .insert(labels::ERROR.to_owned(), message.to_owned());
    }

    /// Raises `config_generation` to `generation` if it is higher; the field
    /// is strictly non-decreasing along the chain.
    pub fn stamp_generation(&mut self, generation: i64) {
        if generation > self.config_generation {
            self.config_generation = generation;
        }
    }
}

impl From<wire::MetricBatch> for Batch {
    fn from(b: wire::MetricBatch) -> Self {
        Self {
            batch_id: b.batch_id,
            data: b.data,
            format: b.format,
            replay: b.replay,
            config_generation: b.config_generation,
            metadata: b.metadata,
            internal_labels: b.internal_labels,
        }
    }
}

impl From<Batch> for wire::MetricBatch {
    fn from(b: Batch) -> Self {
        Self {
            batch_id: b.batch_id,
            data: b.data,
            format: b.format,
            replay: b.replay,
            config_generation: b.config_generation,
            metadata: b.metadata,
            internal_labels: b.internal_labels,
        }
    }
}
