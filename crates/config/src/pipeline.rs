// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Typed views over the distributed pipeline configuration.
//!
//! The wire representation is [`fbc_proto::proto::control::v1::PipelineConfig`];
//! stages decode the parts they consume into the types below when a new
//! generation is applied.

use crate::error::Error;
use fbc_proto::proto::control::v1 as wire;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit-breaker thresholds for one downstream peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Failure percentage at which the breaker trips.
    #[serde(default = "default_error_threshold_pct")]
    pub error_threshold_pct: u32,
    /// Requests that must be observed in the window before the breaker may trip.
    #[serde(default = "default_minimum_request_count")]
    pub minimum_request_count: u64,
    /// Seconds the breaker stays open before probing.
    #[serde(default = "default_open_state_seconds")]
    pub open_state_seconds: u64,
    /// Successful probes required to close again from half-open.
    #[serde(default = "default_half_open_request_threshold")]
    pub half_open_request_threshold: u32,
}

const fn default_error_threshold_pct() -> u32 {
    50
}

const fn default_minimum_request_count() -> u64 {
    20
}

const fn default_open_state_seconds() -> u64 {
    30
}

const fn default_half_open_request_threshold() -> u32 {
    5
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_pct: default_error_threshold_pct(),
            minimum_request_count: default_minimum_request_count(),
            open_state_seconds: default_open_state_seconds(),
            half_open_request_threshold: default_half_open_request_threshold(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Duration the breaker stays open before probing.
    pub fn open_state(&self) -> Duration {
        Duration::from_secs(self.open_state_seconds)
    }

    /// Decodes the wire form, falling back to defaults when absent.
    pub fn from_wire(settings: Option<&wire::CircuitBreakerSettings>) -> Self {
        match settings {
            Some(s) => Self {
                error_threshold_pct: s.error_threshold_pct,
                minimum_request_count: s.minimum_request_count,
                open_state_seconds: s.open_state_seconds,
                half_open_request_threshold: s.half_open_request_threshold,
            },
            None => Self::default(),
        }
    }

    /// Encodes into the wire form.
    pub fn to_wire(&self) -> wire::CircuitBreakerSettings {
        wire::CircuitBreakerSettings {
            error_threshold_pct: self.error_threshold_pct,
            minimum_request_count: self.minimum_request_count,
            open_state_seconds: self.open_state_seconds,
            half_open_request_threshold: self.half_open_request_threshold,
        }
    }

    /// Range checks for the thresholds.
    pub fn validate(&self, fb_name: &str) -> Result<(), Error> {
        if self.error_threshold_pct == 0 || self.error_threshold_pct > 100 {
            return Err(Error::OutOfRange {
                fb_name: fb_name.to_owned(),
                field: "circuit_breaker.error_threshold_pct".to_owned(),
                details: "must be in 1..=100".to_owned(),
            });
        }
        if self.minimum_request_count == 0 {
            return Err(Error::OutOfRange {
                fb_name: fb_name.to_owned(),
                field: "circuit_breaker.minimum_request_count".to_owned(),
                details: "must be >= 1".to_owned(),
            });
        }
        if self.half_open_request_threshold == 0 {
            return Err(Error::OutOfRange {
                fb_name: fb_name.to_owned(),
                field: "circuit_breaker.half_open_request_threshold".to_owned(),
                details: "must be >= 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Decoded `common` section of one stage's wire config.
#[derive(Debug, Clone, PartialEq)]
pub struct StageCommon {
    /// Address of the next stage; `None` for chain tails.
    pub next_fb: Option<String>,
    /// Address of the DLQ service; `None` only for the DLQ service itself.
    pub dlq: Option<String>,
    /// Log level requested for the stage (`error`..`trace`).
    pub log_level: String,
    /// Ratio of batches carrying sampled trace spans, in `[0, 1]`.
    pub trace_ratio: f64,
    /// Breaker thresholds for the next-stage peer.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for StageCommon {
    fn default() -> Self {
        Self {
            next_fb: None,
            dlq: None,
            log_level: "info".to_owned(),
            trace_ratio: 0.0,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl StageCommon {
    /// Decodes the wire form; empty addresses become `None`.
    pub fn from_wire(common: Option<&wire::CommonConfig>) -> Self {
        match common {
            Some(c) => Self {
                next_fb: non_empty(&c.next_fb),
                dlq: non_empty(&c.dlq),
                log_level: if c.log_level.is_empty() {
                    "info".to_owned()
                } else {
                    c.log_level.clone()
                },
                trace_ratio: c.trace_ratio,
                circuit_breaker: CircuitBreakerConfig::from_wire(c.circuit_breaker.as_ref()),
            },
            None => Self::default(),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}

/// Returns the wire config of one function block, if present in the snapshot.
pub fn stage_config<'a>(
    config: &'a wire::PipelineConfig,
    fb_name: &str,
) -> Option<&'a wire::FbConfig> {
    config.function_blocks.get(fb_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_defaults_applied_when_wire_settings_absent() {
        let cb = CircuitBreakerConfig::from_wire(None);
        assert_eq!(cb.error_threshold_pct, 50);
        assert_eq!(cb.minimum_request_count, 20);
        assert_eq!(cb.open_state(), Duration::from_secs(30));
        assert_eq!(cb.half_open_request_threshold, 5);
    }

    #[test]
    fn breaker_rejects_zero_threshold() {
        let cb = CircuitBreakerConfig {
            error_threshold_pct: 0,
            ..CircuitBreakerConfig::default()
        };
        assert!(cb.validate("fb-dp").is_err());
    }

    #[test]
    fn stage_common_maps_empty_addresses_to_none() {
        let common = wire::CommonConfig {
            next_fb: String::new(),
            dlq: "http://fb-dlq:4317".to_owned(),
            log_level: String::new(),
            trace_ratio: 0.25,
            circuit_breaker: None,
        };
        let decoded = StageCommon::from_wire(Some(&common));
        assert_eq!(decoded.next_fb, None);
        assert_eq!(decoded.dlq.as_deref(), Some("http://fb-dlq:4317"));
        assert_eq!(decoded.log_level, "info");
        assert!((decoded.trace_ratio - 0.25).abs() < f64::EPSILON);
    }
}
