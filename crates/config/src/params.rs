// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-stage parameter schemas.
//!
//! On the wire, stage parameters are opaque JSON bytes. Each stage owns its
//! schema; this module holds the typed forms plus the registry the control
//! plane uses to reject unknown stages and malformed parameters before a
//! generation is ever distributed.

use crate::error::Error;
use crate::fb;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::Duration;

/// Parse-and-validate contract implemented by every stage's parameter type.
pub trait StageParams: DeserializeOwned + Default {
    /// The function block owning this schema.
    const FB_NAME: &'static str;

    /// Decodes the opaque wire bytes. Empty bytes mean "all defaults".
    fn parse(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes).map_err(|e| Error::InvalidParameters {
            fb_name: Self::FB_NAME.to_owned(),
            details: e.to_string(),
        })
    }

    /// Semantic checks beyond what serde enforces.
    fn validate(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Validates the parameter bytes for `fb_name` against the owning schema.
///
/// Unknown stage names are rejected; the control plane calls this before
/// distribution, stages call their own typed [`StageParams::parse`] on apply.
pub fn validate_parameters(fb_name: &str, bytes: &[u8]) -> Result<(), Error> {
    fn check<P: StageParams>(bytes: &[u8]) -> Result<(), Error> {
        P::parse(bytes)?.validate()
    }
    match fb_name {
        fb::RX => check::<RxParams>(bytes),
        fb::EN_HOST => check::<EnHostParams>(bytes),
        fb::EN_K8S => check::<EnK8sParams>(bytes),
        fb::CL => check::<ClParams>(bytes),
        fb::DP => check::<DpParams>(bytes),
        fb::FS => check::<FsParams>(bytes),
        fb::AGG => check::<AggParams>(bytes),
        fb::GW_PRE => check::<GwPreParams>(bytes),
        fb::GW => check::<GwParams>(bytes),
        fb::DLQ => check::<DlqParams>(bytes),
        other => Err(Error::UnknownFunctionBlock {
            fb_name: other.to_owned(),
        }),
    }
}

fn default_true() -> bool {
    true
}

/// Receiver (chain head) parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RxParams {
    /// Payload formats the receiver admits; anything else is `INVALID_INPUT`.
    #[serde(default = "default_accepted_formats")]
    pub accepted_formats: Vec<String>,
}

fn default_accepted_formats() -> Vec<String> {
    vec!["fbmetrics/json/v1".to_owned()]
}

impl Default for RxParams {
    fn default() -> Self {
        Self {
            accepted_formats: default_accepted_formats(),
        }
    }
}

impl StageParams for RxParams {
    const FB_NAME: &'static str = fb::RX;

    fn validate(&self) -> Result<(), Error> {
        if self.accepted_formats.is_empty() {
            return Err(Error::InvalidParameters {
                fb_name: Self::FB_NAME.to_owned(),
                details: "accepted_formats must not be empty".to_owned(),
            });
        }
        Ok(())
    }
}

/// Host-enrichment parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnHostParams {
    /// Overrides the discovered host name (useful in tests and containers).
    #[serde(default)]
    pub override_host_name: Option<String>,
    /// Attach `os.type` / `os.version` attributes to enriched records.
    #[serde(default = "default_true")]
    pub add_os_attributes: bool,
}

impl StageParams for EnHostParams {
    const FB_NAME: &'static str = fb::EN_HOST;
}

/// Orchestrator-enrichment parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnK8sParams {
    /// Downward-API metadata file mounted into the pod; absent file means
    /// passthrough.
    #[serde(default)]
    pub metadata_file: Option<PathBuf>,
    /// Prefix for the attached attribute keys.
    #[serde(default = "default_k8s_prefix")]
    pub attribute_prefix: String,
}

fn default_k8s_prefix() -> String {
    "k8s.".to_owned()
}

impl StageParams for EnK8sParams {
    const FB_NAME: &'static str = fb::EN_K8S;
}

/// What the classifier does with a matched PII field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiAction {
    /// Replace the value with `SHA-256(salt ∥ value)`.
    #[default]
    Hash,
    /// Remove the field entirely.
    Drop,
}

/// One classifier rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PiiFieldRule {
    /// Attribute key treated as PII.
    pub field: String,
    /// Disposition for matches.
    #[serde(default)]
    pub action: PiiAction,
}

/// Classifier parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClParams {
    /// Fields scrubbed by the classifier.
    #[serde(default)]
    pub pii_fields: Vec<PiiFieldRule>,
    /// Secret file holding the hashing salt; absent means the deployment
    /// default salt.
    #[serde(default)]
    pub salt_secret_path: Option<PathBuf>,
}

impl StageParams for ClParams {
    const FB_NAME: &'static str = fb::CL;

    fn validate(&self) -> Result<(), Error> {
        for rule in &self.pii_fields {
            if rule.field.is_empty() {
                return Err(Error::InvalidParameters {
                    fb_name: Self::FB_NAME.to_owned(),
                    details: "pii_fields entries must name a field".to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// Backing store for the dedup engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backing", rename_all = "snake_case")]
pub enum DedupStoreParams {
    /// In-memory map with periodic sweep; does not survive restarts.
    #[default]
    Memory,
    /// Persistent on-disk store, garbage-collected at a fixed interval.
    Disk {
        /// Filesystem path of the store.
        path: PathBuf,
    },
}

/// Deduplication-engine parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DpParams {
    /// How long a fingerprint suppresses duplicates.
    #[serde(with = "humantime_serde", default = "default_dedup_ttl")]
    pub dedup_ttl: Duration,
    /// Window within which cross-source priority displacement applies.
    #[serde(with = "humantime_serde", default = "default_source_cache_window")]
    pub source_cache_window: Duration,
    /// Store backing; correctness is identical across backings.
    #[serde(default)]
    pub store: DedupStoreParams,
    /// When true, replayed batches skip the duplicate check (they still
    /// update the store). When false, replays are treated as duplicates of
    /// the original batch window.
    #[serde(default = "default_true")]
    pub replays_bypass_dedup: bool,
}

const fn default_dedup_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

const fn default_source_cache_window() -> Duration {
    Duration::from_secs(5 * 60)
}

impl Default for DpParams {
    fn default() -> Self {
        Self {
            dedup_ttl: default_dedup_ttl(),
            source_cache_window: default_source_cache_window(),
            store: DedupStoreParams::default(),
            replays_bypass_dedup: true,
        }
    }
}

impl StageParams for DpParams {
    const FB_NAME: &'static str = fb::DP;

    fn validate(&self) -> Result<(), Error> {
        if self.dedup_ttl.is_zero() {
            return Err(Error::OutOfRange {
                fb_name: Self::FB_NAME.to_owned(),
                field: "dedup_ttl".to_owned(),
                details: "must be non-zero".to_owned(),
            });
        }
        Ok(())
    }
}

/// Filter/sampler parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FsParams {
    /// Metric-name patterns to drop (`*` suffix wildcard supported).
    #[serde(default)]
    pub drop_name_patterns: Vec<String>,
    /// Fraction of batches kept after filtering, in `[0, 1]`.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

const fn default_sample_rate() -> f64 {
    1.0
}

impl Default for FsParams {
    fn default() -> Self {
        Self {
            drop_name_patterns: Vec::new(),
            sample_rate: default_sample_rate(),
        }
    }
}

impl StageParams for FsParams {
    const FB_NAME: &'static str = fb::FS;

    fn validate(&self) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(Error::OutOfRange {
                fb_name: Self::FB_NAME.to_owned(),
                field: "sample_rate".to_owned(),
                details: "must be in [0, 1]".to_owned(),
            });
        }
        Ok(())
    }
}

/// Aggregation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggParams {
    /// Record kinds merged by summation; everything else merges last-value.
    #[serde(default = "default_sum_kinds")]
    pub sum_kinds: Vec<String>,
}

fn default_sum_kinds() -> Vec<String> {
    vec!["counter".to_owned(), "sum".to_owned()]
}

impl Default for AggParams {
    fn default() -> Self {
        Self {
            sum_kinds: default_sum_kinds(),
        }
    }
}

impl StageParams for AggParams {
    const FB_NAME: &'static str = fb::AGG;
}

/// Pre-gateway normalization parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GwPreParams {
    /// Lowercase attribute keys and replace `-` with `_`.
    #[serde(default = "default_true")]
    pub normalize_attribute_keys: bool,
    /// Batch-metadata keys promoted to record attributes before export.
    #[serde(default)]
    pub promote_metadata_keys: Vec<String>,
}

impl Default for GwPreParams {
    fn default() -> Self {
        Self {
            normalize_attribute_keys: true,
            promote_metadata_keys: Vec::new(),
        }
    }
}

impl StageParams for GwPreParams {
    const FB_NAME: &'static str = fb::GW_PRE;
}

/// Gateway export retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportRetryParams {
    /// Attempts per batch, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the first retry.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max_backoff: Duration,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff() -> Duration {
    Duration::from_millis(500)
}

const fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

impl Default for ExportRetryParams {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

/// Gateway parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GwParams {
    /// Remote sink endpoint receiving exported payloads.
    pub sink_url: String,
    /// Metric names admitted for export; empty means all.
    #[serde(default)]
    pub allowed_metric_names: Vec<String>,
    /// Attribute keys admitted for export; empty means all.
    #[serde(default)]
    pub allowed_attributes: Vec<String>,
    /// PII attribute keys re-checked before export (defence in depth).
    #[serde(default)]
    pub pii_fields: Vec<String>,
    /// Filesystem path of the persistent sending queue.
    #[serde(default = "default_sending_queue_path")]
    pub sending_queue_path: PathBuf,
    /// Maximum queued batches; overflow is terminal.
    #[serde(default = "default_sending_queue_capacity")]
    pub sending_queue_capacity: u64,
    /// Retry policy for transient export failures.
    #[serde(default)]
    pub retry: ExportRetryParams,
}

fn default_sending_queue_path() -> PathBuf {
    PathBuf::from("/var/lib/fbchain/gw-queue")
}

const fn default_sending_queue_capacity() -> u64 {
    10_000
}

impl Default for GwParams {
    fn default() -> Self {
        Self {
            sink_url: String::new(),
            allowed_metric_names: Vec::new(),
            allowed_attributes: Vec::new(),
            pii_fields: Vec::new(),
            sending_queue_path: default_sending_queue_path(),
            sending_queue_capacity: default_sending_queue_capacity(),
            retry: ExportRetryParams::default(),
        }
    }
}

impl StageParams for GwParams {
    const FB_NAME: &'static str = fb::GW;

    fn validate(&self) -> Result<(), Error> {
        if self.sink_url.is_empty() {
            return Err(Error::InvalidParameters {
                fb_name: Self::FB_NAME.to_owned(),
                details: "sink_url is required".to_owned(),
            });
        }
        if self.sending_queue_capacity == 0 {
            return Err(Error::OutOfRange {
                fb_name: Self::FB_NAME.to_owned(),
                field: "sending_queue_capacity".to_owned(),
                details: "must be >= 1".to_owned(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::OutOfRange {
                fb_name: Self::FB_NAME.to_owned(),
                field: "retry.max_attempts".to_owned(),
                details: "must be >= 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// DLQ service parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DlqParams {
    /// Filesystem path of the durable record store.
    #[serde(default = "default_dlq_store_path")]
    pub store_path: PathBuf,
    /// Replay attempts after which a record is isolated as a poison pill.
    #[serde(default = "default_max_replay_attempts")]
    pub max_replay_attempts: u32,
}

fn default_dlq_store_path() -> PathBuf {
    PathBuf::from("/var/lib/fbchain/dlq")
}

const fn default_max_replay_attempts() -> u32 {
    3
}

impl Default for DlqParams {
    fn default() -> Self {
        Self {
            store_path: default_dlq_store_path(),
            max_replay_attempts: default_max_replay_attempts(),
        }
    }
}

impl StageParams for DlqParams {
    const FB_NAME: &'static str = fb::DLQ;

    fn validate(&self) -> Result<(), Error> {
        if self.max_replay_attempts == 0 {
            return Err(Error::OutOfRange {
                fb_name: Self::FB_NAME.to_owned(),
                field: "max_replay_attempts".to_owned(),
                details: "must be >= 1".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bytes_parse_to_defaults() {
        let params = DpParams::parse(b"").unwrap();
        assert_eq!(params, DpParams::default());
        assert!(params.replays_bypass_dedup);
    }

    #[test]
    fn dp_params_roundtrip_with_humantime_durations() {
        let json = r#"{
            "dedup_ttl": "30m",
            "source_cache_window": "2m",
            "store": { "backing": "disk", "path": "/data/dp" },
            "replays_bypass_dedup": false
        }"#;
        let params = DpParams::parse(json.as_bytes()).unwrap();
        assert_eq!(params.dedup_ttl, Duration::from_secs(30 * 60));
        assert!(matches!(params.store, DedupStoreParams::Disk { .. }));
        assert!(!params.replays_bypass_dedup);
        params.validate().unwrap();
    }

    #[test]
    fn fs_sample_rate_out_of_range_is_rejected() {
        let err = validate_parameters(fb::FS, br#"{ "sample_rate": 1.5 }"#).unwrap_err();
        assert!(err.to_string().contains("sample_rate"));
    }

    #[test]
    fn gateway_requires_sink_url() {
        assert!(validate_parameters(fb::GW, b"{}").is_err());
        let ok = br#"{ "sink_url": "http://sink:8080/v1/metrics" }"#;
        validate_parameters(fb::GW, ok).unwrap();
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let err = validate_parameters("fb-nope", b"{}").unwrap_err();
        assert!(matches!(err, Error::UnknownFunctionBlock { .. }));
    }

    #[test]
    fn unknown_parameter_keys_are_rejected() {
        let err = validate_parameters(fb::RX, br#"{ "bogus": true }"#).unwrap_err();
        assert!(matches!(err, Error::InvalidParameters { .. }));
    }
}
