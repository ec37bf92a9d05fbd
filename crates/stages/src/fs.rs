// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! FB-FS: filter and sample.
//!
//! Records matching configured name patterns are dropped; surviving batches
//! are then sampled as a whole. With the deterministic-seed global setting
//! in effect, sampling is a pure function of `(seed, batch_id)` so replays
//! and repeated runs make identical decisions.

use async_trait::async_trait;
use fbc_config::fb;
use fbc_config::params::{FsParams, StageParams};
use fbc_pdata::MetricPayload;
use fbc_proto::proto::control::v1::GlobalSettings;
use fbc_runtime::stage::{Disposition, StageProcessor};
use fbc_runtime::{Batch, StageError};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// The filter/sampler stage.
#[derive(Debug)]
pub struct FsStage {
    params: RwLock<FsParams>,
    seed: RwLock<Option<String>>,
}

impl FsStage {
    /// A stage that samples nothing out until configured otherwise.
    pub fn new() -> Self {
        Self {
            params: RwLock::new(FsParams::default()),
            seed: RwLock::new(None),
        }
    }

    fn keep_batch(&self, batch_id: &str, sample_rate: f64) -> bool {
        if sample_rate >= 1.0 {
            return true;
        }
        if sample_rate <= 0.0 {
            return false;
        }
        let fraction = match self.seed.read().as_ref() {
            Some(seed) => {
                let mut hasher = Sha256::new();
                hasher.update(seed.as_bytes());
                hasher.update(batch_id.as_bytes());
                let digest = hasher.finalize();
                let mut head = [0u8; 8];
                head.copy_from_slice(&digest[..8]);
                u64::from_be_bytes(head) as f64 / u64::MAX as f64
            }
            None => rand::random::<f64>(),
        };
        fraction < sample_rate
    }
}

impl Default for FsStage {
    fn default() -> Self {
        Self::new()
    }
}

fn name_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

#[async_trait]
impl StageProcessor for FsStage {
    fn fb_name(&self) -> &'static str {
        fb::FS
    }

    fn apply_global(&self, settings: &GlobalSettings) -> Result<(), StageError> {
        let seed = if settings.deterministic_seed_env_var.is_empty() {
            None
        } else {
            match std::env::var(&settings.deterministic_seed_env_var) {
                Ok(value) if !value.is_empty() => Some(value),
                _ => {
                    tracing::warn!(
                        env_var = %settings.deterministic_seed_env_var,
                        "deterministic seed requested but env var unset; sampling randomly"
                    );
                    None
                }
            }
        };
        let mut guard = self.seed.write();
        *guard = seed;
        Ok(())
    }

    fn apply_params(&self, bytes: &[u8]) -> Result<(), StageError> {
        let params = FsParams::parse(bytes).map_err(|e| StageError::config_invalid(e.to_string()))?;
        params
            .validate()
            .map_err(|e| StageError::config_invalid(e.to_string()))?;
        let mut guard = self.params.write();
        *guard = params;
        Ok(())
    }

    async fn process(&self, batch: &mut Batch) -> Result<Disposition, StageError> {
        let params = self.params.read().clone();

        if !params.drop_name_patterns.is_empty() {
            let mut payload = MetricPayload::decode(&batch.format, &batch.data)
                .map_err(|e| StageError::invalid_input(e.to_string()))?;
            payload.records.retain(|record| {
                !params
                    .drop_name_patterns
                    .iter()
                    .any(|p| name_matches(p, &record.name))
            });
            batch.data = payload
                .encode()
                .map_err(|e| StageError::processing_failed(e.to_string()))?;
        }

        if self.keep_batch(&batch.batch_id, params.sample_rate) {
            Ok(Disposition::Forward)
        } else {
            tracing::debug!(batch_id = %batch.batch_id, "batch sampled out");
            Ok(Disposition::Consumed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbc_pdata::{FORMAT_JSON_V1, MetricRecord};
    use std::collections::BTreeMap;

    fn batch_with_names(names: &[&str]) -> Batch {
        let payload = MetricPayload {
            resource: BTreeMap::new(),
            records: names
                .iter()
                .map(|n| MetricRecord {
                    name: (*n).to_owned(),
                    kind: "counter".to_owned(),
                    value: 1.0,
                    unit: None,
                    attributes: BTreeMap::new(),
                    source: None,
                    host_name: None,
                    pid: None,
                    process_start_time_ns: None,
                    boot_id_ref: None,
                    timestamp_unix_nanos: 1,
                })
                .collect(),
        };
        Batch {
            batch_id: "b1".to_owned(),
            data: payload.encode().unwrap(),
            format: FORMAT_JSON_V1.to_owned(),
            ..Batch::default()
        }
    }

    #[tokio::test]
    async fn drop_patterns_filter_records() {
        let stage = FsStage::new();
        stage
            .apply_params(br#"{ "drop_name_patterns": ["debug.*", "tmp.counter"] }"#)
            .unwrap();
        let mut batch = batch_with_names(&["debug.alloc", "tmp.counter", "http.requests"]);
        let disposition = stage.process(&mut batch).await.unwrap();
        assert_eq!(disposition, Disposition::Forward);
        let payload = MetricPayload::decode(&batch.format, &batch.data).unwrap();
        assert_eq!(payload.records.len(), 1);
        assert_eq!(payload.records[0].name, "http.requests");
    }

    #[tokio::test]
    async fn zero_rate_samples_everything_out() {
        let stage = FsStage::new();
        stage.apply_params(br#"{ "sample_rate": 0.0 }"#).unwrap();
        let mut batch = batch_with_names(&["m"]);
        assert_eq!(
            stage.process(&mut batch).await.unwrap(),
            Disposition::Consumed
        );
    }

    #[tokio::test]
    async fn deterministic_sampling_is_stable_per_batch_id() {
        let stage = FsStage::new();
        {
            let mut seed = stage.seed.write();
            *seed = Some("seed-1".to_owned());
        }
        stage.apply_params(br#"{ "sample_rate": 0.5 }"#).unwrap();
        let first = stage.keep_batch("batch-42", 0.5);
        for _ in 0..10 {
            assert_eq!(stage.keep_batch("batch-42", 0.5), first);
        }
    }
}
