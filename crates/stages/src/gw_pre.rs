// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! FB-GW-PRE: pre-gateway normalization.
//!
//! Prepares batches for schema enforcement: attribute keys are normalized
//! (lowercase, `-` to `_`) and selected batch-metadata keys are promoted to
//! resource attributes so they survive export.

use async_trait::async_trait;
use fbc_config::fb;
use fbc_config::params::{GwPreParams, StageParams};
use fbc_pdata::MetricPayload;
use fbc_runtime::stage::{Disposition, StageProcessor};
use fbc_runtime::{Batch, StageError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// The pre-gateway stage.
#[derive(Debug)]
pub struct GwPreStage {
    params: RwLock<GwPreParams>,
}

impl GwPreStage {
    /// A stage with default normalization.
    pub fn new() -> Self {
        Self {
            params: RwLock::new(GwPreParams::default()),
        }
    }
}

impl Default for GwPreStage {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_key(key: &str) -> String {
    key.to_ascii_lowercase().replace('-', "_")
}

fn normalize_map(map: &mut BTreeMap<String, String>) {
    let normalized: BTreeMap<String, String> = std::mem::take(map)
        .into_iter()
        .map(|(k, v)| (normalize_key(&k), v))
        .collect();
    *map = normalized;
}

#[async_trait]
impl StageProcessor for GwPreStage {
    fn fb_name(&self) -> &'static str {
        fb::GW_PRE
    }

    fn apply_params(&self, bytes: &[u8]) -> Result<(), StageError> {
        let params =
            GwPreParams::parse(bytes).map_err(|e| StageError::config_invalid(e.to_string()))?;
        let mut guard = self.params.write();
        *guard = params;
        Ok(())
    }

    async fn process(&self, batch: &mut Batch) -> Result<Disposition, StageError> {
        let params = self.params.read().clone();
        let mut payload = MetricPayload::decode(&batch.format, &batch.data)
            .map_err(|e| StageError::invalid_input(e.to_string()))?;

        if params.normalize_attribute_keys {
            normalize_map(&mut payload.resource);
            for record in &mut payload.records {
                normalize_map(&mut record.attributes);
            }
        }
        for key in &params.promote_metadata_keys {
            if let Some(value) = batch.metadata.get(key) {
                let _ = payload
                    .resource
                    .entry(normalize_key(key))
                    .or_insert_with(|| value.clone());
            }
        }

        batch.data = payload
            .encode()
            .map_err(|e| StageError::processing_failed(e.to_string()))?;
        Ok(Disposition::Forward)
    }
}
