// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! FB-EN-K8S: orchestrator-metadata enrichment.
//!
//! Metadata comes from a downward-API file mounted into the pod (a flat
//! key/value YAML document); the orchestrator API itself stays external. A
//! missing file means passthrough.

use async_trait::async_trait;
use fbc_config::fb;
use fbc_config::params::{EnK8sParams, StageParams};
use fbc_pdata::MetricPayload;
use fbc_runtime::stage::{Disposition, StageProcessor};
use fbc_runtime::{Batch, StageError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// The orchestrator-enrichment stage.
#[derive(Debug)]
pub struct EnK8sStage {
    params: RwLock<EnK8sParams>,
    metadata: RwLock<BTreeMap<String, String>>,
}

impl EnK8sStage {
    /// A stage with no metadata until parameters arrive.
    pub fn new() -> Self {
        Self {
            params: RwLock::new(EnK8sParams::default()),
            metadata: RwLock::new(BTreeMap::new()),
        }
    }

    fn load_metadata(params: &EnK8sParams) -> BTreeMap<String, String> {
        let Some(path) = &params.metadata_file else {
            return BTreeMap::new();
        };
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_yaml::from_str::<BTreeMap<String, String>>(&text) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "orchestrator metadata unparseable");
                    BTreeMap::new()
                }
            },
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "orchestrator metadata absent; passthrough");
                BTreeMap::new()
            }
        }
    }
}

impl Default for EnK8sStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageProcessor for EnK8sStage {
    fn fb_name(&self) -> &'static str {
        fb::EN_K8S
    }

    fn apply_params(&self, bytes: &[u8]) -> Result<(), StageError> {
        let params =
            EnK8sParams::parse(bytes).map_err(|e| StageError::config_invalid(e.to_string()))?;
        {
            let mut metadata = self.metadata.write();
            *metadata = Self::load_metadata(&params);
        }
        let mut guard = self.params.write();
        *guard = params;
        Ok(())
    }

    async fn process(&self, batch: &mut Batch) -> Result<Disposition, StageError> {
        let metadata = self.metadata.read().clone();
        if metadata.is_empty() {
            return Ok(Disposition::Forward);
        }
        let prefix = self.params.read().attribute_prefix.clone();

        let mut payload = MetricPayload::decode(&batch.format, &batch.data)
            .map_err(|e| StageError::invalid_input(e.to_string()))?;
        for (key, value) in &metadata {
            let _ = payload
                .resource
                .entry(format!("{prefix}{key}"))
                .or_insert_with(|| value.clone());
        }
        batch.data = payload
            .encode()
            .map_err(|e| StageError::processing_failed(e.to_string()))?;
        Ok(Disposition::Forward)
    }
}
