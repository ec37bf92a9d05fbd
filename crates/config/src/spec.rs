// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The declarative pipeline spec document.
//!
//! The document is a namespaced object with `metadata`, `spec`, and `status`
//! sections, encoded as YAML. The operator edits `spec` and bumps
//! `metadata.generation`; the control-plane leader validates the spec, builds
//! the wire [`PipelineConfig`](fbc_proto::proto::control::v1::PipelineConfig)
//! for that generation, and writes rollout progress back into `status`.

use crate::error::Error;
use crate::params::validate_parameters;
use crate::pipeline::CircuitBreakerConfig;
use crate::fb;
use chrono::{DateTime, Utc};
use fbc_proto::proto::control::v1 as wire;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Identity of the pipeline object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecMetadata {
    /// Pipeline name.
    pub name: String,
    /// Namespace the pipeline lives in.
    #[serde(default)]
    pub namespace: String,
    /// Monotonic generation, bumped on every spec change.
    pub generation: i64,
}

/// Pipeline-wide knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Environment variable naming the deterministic-seed source.
    #[serde(default)]
    pub deterministic_seed_env_var: String,
    /// Policy governing internal labels (informational; stripping is pinned
    /// to the gateway).
    #[serde(default)]
    pub internal_label_policy: String,
}

/// The `common` section of one function block in the spec document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FbCommonSpec {
    /// Address of the next stage; absent for chain tails.
    #[serde(default)]
    pub next_fb: Option<String>,
    /// Address of the DLQ service.
    #[serde(default)]
    pub dlq: Option<String>,
    /// Requested log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Ratio of batches carrying sampled trace spans, in `[0, 1]`.
    #[serde(default)]
    pub trace_ratio: f64,
    /// Breaker thresholds for the next-stage peer.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_log_level() -> String {
    "info".to_owned()
}

/// One function block in the spec document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FbSpec {
    /// Disabled stages are skipped by the deployment but still validated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Image tag, informational to the core.
    #[serde(default)]
    pub image_tag: String,
    /// Structured stage parameters; serialized to JSON bytes on the wire.
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Shared per-stage settings.
    #[serde(default)]
    pub common: FbCommonSpec,
}

const fn default_enabled() -> bool {
    true
}

/// The `spec` section of the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Operator-visible version string.
    pub pipeline_version: String,
    /// Pipeline-wide knobs.
    #[serde(default)]
    pub global_settings: GlobalSettings,
    /// Declared function blocks, keyed by stage name.
    pub function_blocks: BTreeMap<String, FbSpec>,
}

/// Per-stage rollout status entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FbStatusEntry {
    /// Stage name.
    pub name: String,
    /// Stage readiness as last reported.
    pub ready: bool,
    /// Whether the latest generation applied successfully.
    pub config_applied: bool,
    /// Generation the stage last acked.
    pub config_generation: i64,
    /// When this entry last changed.
    pub last_transition_time: DateTime<Utc>,
}

/// Aggregated condition on the pipeline object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition type, e.g. `RolloutComplete`.
    #[serde(rename = "type")]
    pub kind: String,
    /// `True`, `False`, or `Unknown`.
    pub status: String,
    /// When the condition last changed.
    pub last_transition_time: DateTime<Utc>,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
}

/// The `status` subresource written back by the control-plane leader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Latest generation the leader has observed.
    pub observed_generation: i64,
    /// Highest generation applied by every connected stage, 0 until the
    /// first complete rollout.
    pub config_generation_applied: i64,
    /// Per-stage rollout entries.
    #[serde(default)]
    pub fb_status: Vec<FbStatusEntry>,
    /// Aggregated conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// The whole pipeline document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpecDoc {
    /// Object identity.
    pub metadata: SpecMetadata,
    /// Desired pipeline shape.
    pub spec: PipelineSpec,
    /// Rollout status, written by the leader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PipelineStatus>,
}

impl PipelineSpecDoc {
    /// Parses a document from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, Error> {
        serde_yaml::from_str(text).map_err(|e| Error::DeserializationError {
            format: "YAML".to_owned(),
            details: e.to_string(),
        })
    }

    /// Loads a document from a file.
    pub fn load_file(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::FileReadError {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        Self::from_yaml(&text)
    }

    /// Serializes the document back to YAML.
    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(|e| Error::DeserializationError {
            format: "YAML".to_owned(),
            details: e.to_string(),
        })
    }

    /// A canonical fingerprint of the `spec` section only, used to detect
    /// whether a modify event actually changed the desired state.
    pub fn spec_fingerprint(&self) -> Result<String, Error> {
        serde_json::to_string(&self.spec).map_err(|e| Error::DeserializationError {
            format: "JSON".to_owned(),
            details: e.to_string(),
        })
    }

    /// Validates the spec: known stages only, chain wiring present for
    /// enabled stages, thresholds in range, stage parameters well-formed.
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        for (name, fb_spec) in &self.spec.function_blocks {
            if !fb::is_known(name) {
                errors.push(Error::UnknownFunctionBlock {
                    fb_name: name.clone(),
                });
                continue;
            }
            if fb_spec.enabled && !fb::is_chain_tail(name) && fb_spec.common.next_fb.is_none() {
                errors.push(Error::MissingNextFb {
                    fb_name: name.clone(),
                });
            }
            if fb_spec.enabled && name != fb::DLQ && fb_spec.common.dlq.is_none() {
                errors.push(Error::MissingDlq {
                    fb_name: name.clone(),
                });
            }
            if !(0.0..=1.0).contains(&fb_spec.common.trace_ratio) {
                errors.push(Error::OutOfRange {
                    fb_name: name.clone(),
                    field: "trace_ratio".to_owned(),
                    details: "must be in [0, 1]".to_owned(),
                });
            }
            if let Err(e) = fb_spec.common.circuit_breaker.validate(name) {
                errors.push(e);
            }
            match parameter_bytes(fb_spec) {
                Ok(bytes) => {
                    if let Err(e) = validate_parameters(name, &bytes) {
                        errors.push(e);
                    }
                }
                Err(e) => errors.push(e),
            }
        }
        Error::from_errors(errors)
    }

    /// Builds the wire snapshot distributed for this document's generation.
    ///
    /// The document must have been validated first; parameter serialization
    /// errors still surface here.
    pub fn to_wire_config(&self) -> Result<wire::PipelineConfig, Error> {
        let mut function_blocks = std::collections::HashMap::new();
        for (name, fb_spec) in &self.spec.function_blocks {
            let parameters = parameter_bytes(fb_spec)?;
            let common = &fb_spec.common;
            let _ = function_blocks.insert(
                name.clone(),
                wire::FbConfig {
                    enabled: fb_spec.enabled,
                    image_tag: fb_spec.image_tag.clone(),
                    parameters,
                    common: Some(wire::CommonConfig {
                        next_fb: common.next_fb.clone().unwrap_or_default(),
                        dlq: common.dlq.clone().unwrap_or_default(),
                        log_level: common.log_level.clone(),
                        trace_ratio: common.trace_ratio,
                        circuit_breaker: Some(common.circuit_breaker.to_wire()),
                    }),
                },
            );
        }
        Ok(wire::PipelineConfig {
            generation: self.metadata.generation,
            pipeline_version: self.spec.pipeline_version.clone(),
            global_settings: Some(wire::GlobalSettings {
                deterministic_seed_env_var: self
                    .spec
                    .global_settings
                    .deterministic_seed_env_var
                    .clone(),
                internal_label_policy: self.spec.global_settings.internal_label_policy.clone(),
            }),
            function_blocks,
        })
    }
}

fn parameter_bytes(fb_spec: &FbSpec) -> Result<Vec<u8>, Error> {
    if fb_spec.parameters.is_null() {
        return Ok(Vec::new());
    }
    serde_json::to_vec(&fb_spec.parameters).map_err(|e| Error::DeserializationError {
        format: "JSON".to_owned(),
        details: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_DOC: &str = r#"
metadata:
  name: default
  namespace: telemetry
  generation: 3
spec:
  pipeline_version: "1.4.0"
  global_settings:
    deterministic_seed_env_var: FBCHAIN_SEED
    internal_label_policy: strip-at-gateway
  function_blocks:
    fb-rx:
      common:
        next_fb: "http://fb-cl:4317"
        dlq: "http://fb-dlq:4317"
    fb-cl:
      parameters:
        pii_fields:
          - field: user.email
      common:
        next_fb: "http://fb-gw:4317"
        dlq: "http://fb-dlq:4317"
    fb-gw:
      parameters:
        sink_url: "http://sink:8080/v1/metrics"
      common:
        dlq: "http://fb-dlq:4317"
    fb-dlq:
      parameters:
        store_path: "/data/dlq"
      common: {}
"#;

    #[test]
    fn minimal_document_validates_and_builds_wire_config() {
        let doc = PipelineSpecDoc::from_yaml(MINIMAL_DOC).unwrap();
        doc.validate().unwrap();
        let config = doc.to_wire_config().unwrap();
        assert_eq!(config.generation, 3);
        assert_eq!(config.pipeline_version, "1.4.0");
        assert_eq!(config.function_blocks.len(), 4);
        let rx = &config.function_blocks["fb-rx"];
        assert!(rx.enabled);
        assert_eq!(
            rx.common.as_ref().map(|c| c.next_fb.as_str()),
            Some("http://fb-cl:4317")
        );
    }

    #[test]
    fn enabled_stage_without_next_fb_is_invalid() {
        let mut doc = PipelineSpecDoc::from_yaml(MINIMAL_DOC).unwrap();
        if let Some(rx) = doc.spec.function_blocks.get_mut("fb-rx") {
            rx.common.next_fb = None;
        }
        let err = doc.validate().unwrap_err();
        assert!(err.to_string().contains("next_fb"));
    }

    #[test]
    fn gateway_tail_needs_no_next_fb() {
        let doc = PipelineSpecDoc::from_yaml(MINIMAL_DOC).unwrap();
        doc.validate().unwrap();
    }

    #[test]
    fn unknown_stage_is_rejected_at_validation() {
        let doc_text = MINIMAL_DOC.replace("fb-rx:", "fb-mystery:");
        let doc = PipelineSpecDoc::from_yaml(&doc_text).unwrap();
        let err = doc.validate().unwrap_err();
        assert!(err.to_string().contains("fb-mystery"));
    }

    #[test]
    fn fingerprint_ignores_status_and_metadata() {
        let mut doc = PipelineSpecDoc::from_yaml(MINIMAL_DOC).unwrap();
        let before = doc.spec_fingerprint().unwrap();
        doc.metadata.generation = 99;
        doc.status = Some(PipelineStatus::default());
        assert_eq!(doc.spec_fingerprint().unwrap(), before);
    }

    #[test]
    fn status_roundtrips_through_yaml() {
        let mut doc = PipelineSpecDoc::from_yaml(MINIMAL_DOC).unwrap();
        doc.status = Some(PipelineStatus {
            observed_generation: 3,
            config_generation_applied: 3,
            fb_status: vec![FbStatusEntry {
                name: "fb-rx".to_owned(),
                ready: true,
                config_applied: true,
                config_generation: 3,
                last_transition_time: Utc::now(),
            }],
            conditions: Vec::new(),
        });
        let text = doc.to_yaml().unwrap();
        let parsed = PipelineSpecDoc::from_yaml(&text).unwrap();
        let status = parsed.status.expect("status");
        assert_eq!(status.config_generation_applied, 3);
        assert_eq!(status.fb_status[0].name, "fb-rx");
    }
}
