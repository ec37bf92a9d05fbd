// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! FB-AGG: in-batch aggregation.
//!
//! Records with identical `(name, kind, attributes)` merge within one batch:
//! summable kinds add their values, everything else keeps the last value.
//! Cross-batch aggregation windows are out of scope.

use async_trait::async_trait;
use fbc_config::fb;
use fbc_config::params::{AggParams, StageParams};
use fbc_pdata::{MetricPayload, MetricRecord};
use fbc_runtime::stage::{Disposition, StageProcessor};
use fbc_runtime::{Batch, StageError};
use parking_lot::RwLock;
use std::collections::HashMap;

/// The aggregation stage.
#[derive(Debug)]
pub struct AggStage {
    params: RwLock<AggParams>,
}

impl AggStage {
    /// A stage with the default merge strategy.
    pub fn new() -> Self {
        Self {
            params: RwLock::new(AggParams::default()),
        }
    }
}

impl Default for AggStage {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_key(record: &MetricRecord) -> String {
    let attrs = serde_json::to_string(&record.attributes).unwrap_or_default();
    format!("{}\u{1f}{}\u{1f}{attrs}", record.name, record.kind)
}

#[async_trait]
impl StageProcessor for AggStage {
    fn fb_name(&self) -> &'static str {
        fb::AGG
    }

    fn apply_params(&self, bytes: &[u8]) -> Result<(), StageError> {
        let params =
            AggParams::parse(bytes).map_err(|e| StageError::config_invalid(e.to_string()))?;
        let mut guard = self.params.write();
        *guard = params;
        Ok(())
    }

    async fn process(&self, batch: &mut Batch) -> Result<Disposition, StageError> {
        let params = self.params.read().clone();
        let mut payload = MetricPayload::decode(&batch.format, &batch.data)
            .map_err(|e| StageError::invalid_input(e.to_string()))?;

        let mut merged: Vec<MetricRecord> = Vec::with_capacity(payload.records.len());
        let mut index: HashMap<String, usize> = HashMap::new();
        for record in payload.records.drain(..) {
            let key = merge_key(&record);
            match index.get(&key) {
                Some(&at) => {
                    let existing = &mut merged[at];
                    if params.sum_kinds.iter().any(|k| k == &record.kind) {
                        existing.value += record.value;
                    } else {
                        existing.value = record.value;
                    }
                    existing.timestamp_unix_nanos =
                        existing.timestamp_unix_nanos.max(record.timestamp_unix_nanos);
                }
                None => {
                    let _ = index.insert(key, merged.len());
                    merged.push(record);
                }
            }
        }
        payload.records = merged;

        batch.data = payload
            .encode()
            .map_err(|e| StageError::processing_failed(e.to_string()))?;
        Ok(Disposition::Forward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbc_pdata::FORMAT_JSON_V1;
    use std::collections::BTreeMap;

    fn record(name: &str, kind: &str, value: f64, ts: u64) -> MetricRecord {
        MetricRecord {
            name: name.to_owned(),
            kind: kind.to_owned(),
            value,
            unit: None,
            attributes: BTreeMap::new(),
            source: None,
            host_name: None,
            pid: None,
            process_start_time_ns: None,
            boot_id_ref: None,
            timestamp_unix_nanos: ts,
        }
    }

    fn batch_of(records: Vec<MetricRecord>) -> Batch {
        Batch {
            batch_id: "b1".to_owned(),
            data: MetricPayload {
                resource: BTreeMap::new(),
                records,
            }
            .encode()
            .unwrap(),
            format: FORMAT_JSON_V1.to_owned(),
            ..Batch::default()
        }
    }

    #[tokio::test]
    async fn counters_sum_and_gauges_keep_last() {
        let stage = AggStage::new();
        let mut batch = batch_of(vec![
            record("http.requests", "counter", 2.0, 10),
            record("http.requests", "counter", 3.0, 20),
            record("mem.used", "gauge", 100.0, 10),
            record("mem.used", "gauge", 80.0, 20),
        ]);
        let _ = stage.process(&mut batch).await.unwrap();
        let payload = MetricPayload::decode(&batch.format, &batch.data).unwrap();
        assert_eq!(payload.records.len(), 2);
        let requests = payload.records.iter().find(|r| r.name == "http.requests").unwrap();
        assert!((requests.value - 5.0).abs() < f64::EPSILON);
        assert_eq!(requests.timestamp_unix_nanos, 20);
        let mem = payload.records.iter().find(|r| r.name == "mem.used").unwrap();
        assert!((mem.value - 80.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn distinct_attributes_do_not_merge() {
        let stage = AggStage::new();
        let mut tagged = record("http.requests", "counter", 1.0, 10);
        let _ = tagged
            .attributes
            .insert("region".to_owned(), "eu".to_owned());
        let mut batch = batch_of(vec![record("http.requests", "counter", 1.0, 10), tagged]);
        let _ = stage.process(&mut batch).await.unwrap();
        let payload = MetricPayload::decode(&batch.format, &batch.data).unwrap();
        assert_eq!(payload.records.len(), 2);
    }
}
