// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! FB-CL: the PII classifier.
//!
//! Fields named by configuration are either replaced by
//! `SHA-256(salt ∥ value)` under a `.hashed` sibling key or dropped outright.
//! After scrubbing, a [`leak_guard`] inspects the serialized payload for raw
//! PII markers; a hit is a terminal `PII_LEAK`. This is the only stage with a
//! mandatory post-transformation sanity check — the gateway re-runs the same
//! guard as defence in depth.

pub mod salt;

use async_trait::async_trait;
use fbc_config::fb;
use fbc_config::params::{ClParams, PiiAction, StageParams};
use fbc_pdata::MetricPayload;
use fbc_runtime::stage::{Disposition, StageProcessor};
use fbc_runtime::{Batch, StageError};
use parking_lot::RwLock;
use prometheus::{IntCounter, Opts, Registry};
use salt::SaltState;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Suffix of the sibling attribute that carries a hashed value.
pub const HASHED_SUFFIX: &str = ".hashed";

/// Hashes one value with the active salt.
pub fn hash_value(salt: &[u8], value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Scans a serialized payload for raw PII attribute keys.
///
/// Both the plain key pattern and its JSON-escaped form (a marker embedded
/// inside a string value) are checked. Returns the first offending field, if
/// any. The hashed sibling (`<field>.hashed`) does not match because keys
/// are quote-delimited.
pub fn leak_guard(serialized: &[u8], fields: &[String]) -> Option<String> {
    let text = String::from_utf8_lossy(serialized);
    for field in fields {
        let marker = format!("\"{field}\":");
        let escaped_marker = format!("\\\"{field}\\\":");
        if text.contains(&marker) || text.contains(&escaped_marker) {
            return Some(field.clone());
        }
    }
    None
}

#[derive(Debug, Clone)]
struct ClMetrics {
    fields_hashed: IntCounter,
    fields_dropped: IntCounter,
    leaks: IntCounter,
}

impl ClMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        let opts = |name: &str, help: &str| Opts::new(name, help).const_label("fb_name", fb::CL);
        Ok(Self {
            fields_hashed: IntCounter::with_opts(opts(
                "fb_cl_fields_hashed_total",
                "PII fields replaced by salted hashes",
            ))?,
            fields_dropped: IntCounter::with_opts(opts(
                "fb_cl_fields_dropped_total",
                "PII fields removed",
            ))?,
            leaks: IntCounter::with_opts(opts(
                "fb_cl_leaks_total",
                "Batches rejected by the leak guard",
            ))?,
        })
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.fields_hashed.clone()))?;
        registry.register(Box::new(self.fields_dropped.clone()))?;
        registry.register(Box::new(self.leaks.clone()))?;
        Ok(())
    }
}

/// The FB-CL stage processor.
pub struct Classifier {
    params: RwLock<ClParams>,
    salt: RwLock<SaltState>,
    metrics: ClMetrics,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier").finish_non_exhaustive()
    }
}

impl Classifier {
    /// Builds the classifier with the deployment-default salt until
    /// parameters arrive.
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            params: RwLock::new(ClParams::default()),
            salt: RwLock::new(SaltState::deployment_default()),
            metrics: ClMetrics::new()?,
        })
    }

    fn scrub_attributes(
        &self,
        attributes: &mut BTreeMap<String, String>,
        params: &ClParams,
        salt: &[u8],
    ) {
        for rule in &params.pii_fields {
            let Some(value) = attributes.remove(&rule.field) else {
                continue;
            };
            match rule.action {
                PiiAction::Hash => {
                    let hashed = hash_value(salt, &value);
                    let _ = attributes.insert(format!("{}{HASHED_SUFFIX}", rule.field), hashed);
                    self.metrics.fields_hashed.inc();
                }
                PiiAction::Drop => {
                    self.metrics.fields_dropped.inc();
                }
            }
        }
    }
}

#[async_trait]
impl StageProcessor for Classifier {
    fn fb_name(&self) -> &'static str {
        fb::CL
    }

    fn register_metrics(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        self.metrics.register(registry)
    }

    fn apply_params(&self, bytes: &[u8]) -> Result<(), StageError> {
        let params = ClParams::parse(bytes).map_err(|e| StageError::config_invalid(e.to_string()))?;
        params
            .validate()
            .map_err(|e| StageError::config_invalid(e.to_string()))?;

        {
            let mut salt = self.salt.write();
            salt.rotate_if_needed(params.salt_secret_path.as_deref());
        }
        let mut guard = self.params.write();
        *guard = params;
        Ok(())
    }

    async fn process(&self, batch: &mut Batch) -> Result<Disposition, StageError> {
        let params = self.params.read().clone();
        if params.pii_fields.is_empty() {
            return Ok(Disposition::Forward);
        }
        let salt = self.salt.read().value().to_vec();

        let mut payload = MetricPayload::decode(&batch.format, &batch.data)
            .map_err(|e| StageError::invalid_input(e.to_string()))?;
        self.scrub_attributes(&mut payload.resource, &params, &salt);
        for record in &mut payload.records {
            self.scrub_attributes(&mut record.attributes, &params, &salt);
        }
        let serialized = payload
            .encode()
            .map_err(|e| StageError::processing_failed(e.to_string()))?;

        let fields: Vec<String> = params.pii_fields.iter().map(|r| r.field.clone()).collect();
        if let Some(field) = leak_guard(&serialized, &fields) {
            self.metrics.leaks.inc();
            return Err(StageError::pii_leak(format!(
                "raw value survived scrubbing for `{field}`"
            )));
        }
        batch.data = serialized;
        Ok(Disposition::Forward)
    }
}
