// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Metric payload model.
//!
//! A batch-carried payload is opaque to the stage runtime; stages that
//! inspect records decode it through this crate. The
//! in-tree encoding is `fbmetrics/json/v1`, a JSON document with a resource
//! attribute map and a flat record list. Other encodings stay behind external
//! decoder libraries and are rejected here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The in-tree payload encoding tag.
pub const FORMAT_JSON_V1: &str = "fbmetrics/json/v1";

/// Errors raised by payload decoding/encoding.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The batch `format` names an encoding this codec does not handle.
    #[error("unsupported payload format `{format}`")]
    UnsupportedFormat {
        /// The offending format tag.
        format: String,
    },

    /// The payload bytes do not parse as the named encoding.
    #[error("malformed payload: {details}")]
    Malformed {
        /// A description of the parse failure.
        details: String,
    },
}

/// Originating collector of a record, ordered by dedup priority
/// (`language_agent` highest).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Host-level metrics collector, lowest priority.
    Hostmetrics,
    /// eBPF/edge probe.
    EdgeProbe,
    /// In-process language agent, highest priority.
    LanguageAgent,
}

impl Source {
    /// The wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Hostmetrics => "hostmetrics",
            Source::EdgeProbe => "edge_probe",
            Source::LanguageAgent => "language_agent",
        }
    }
}

impl std::str::FromStr for Source {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hostmetrics" => Ok(Source::Hostmetrics),
            "edge_probe" => Ok(Source::EdgeProbe),
            "language_agent" => Ok(Source::LanguageAgent),
            _ => Err(()),
        }
    }
}

/// One metric datapoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Metric name.
    pub name: String,
    /// Record kind (`counter`, `gauge`, …); drives aggregation merging.
    pub kind: String,
    /// The datapoint value.
    pub value: f64,
    /// Unit, if declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Datapoint attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Originating collector, when the record has process semantics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Host the process runs on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    /// Process id, for process-semantic records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Process start time in nanoseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_start_time_ns: Option<u64>,
    /// Boot-id reference, the fallback identity component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_id_ref: Option<String>,
    /// Observation time in nanoseconds since the epoch.
    pub timestamp_unix_nanos: u64,
}

/// A decoded batch payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    /// Resource-level attributes shared by all records.
    #[serde(default)]
    pub resource: BTreeMap<String, String>,
    /// The records.
    #[serde(default)]
    pub records: Vec<MetricRecord>,
}

impl MetricPayload {
    /// Decodes payload bytes tagged with `format`.
    pub fn decode(format: &str, data: &[u8]) -> Result<Self, Error> {
        if format != FORMAT_JSON_V1 {
            return Err(Error::UnsupportedFormat {
                format: format.to_owned(),
            });
        }
        serde_json::from_slice(data).map_err(|e| Error::Malformed {
            details: e.to_string(),
        })
    }

    /// Encodes back to `fbmetrics/json/v1` bytes.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(|e| Error::Malformed {
            details: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_priority_orders_language_agent_highest() {
        assert!(Source::LanguageAgent > Source::EdgeProbe);
        assert!(Source::EdgeProbe > Source::Hostmetrics);
    }

    #[test]
    fn decode_rejects_unknown_format() {
        let err = MetricPayload::decode("otlp/protobuf", b"{}").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }

    #[test]
    fn decode_accepts_minimal_document() {
        let doc = r#"{
            "resource": { "service.name": "checkout" },
            "records": [
                {
                    "name": "process.cpu.time",
                    "kind": "counter",
                    "value": 12.5,
                    "source": "language_agent",
                    "host_name": "h1",
                    "pid": 42,
                    "process_start_time_ns": 1700000000000000000,
                    "timestamp_unix_nanos": 1700000001000000000
                }
            ]
        }"#;
        let payload = MetricPayload::decode(FORMAT_JSON_V1, doc.as_bytes()).unwrap();
        assert_eq!(payload.records.len(), 1);
        assert_eq!(payload.records[0].source, Some(Source::LanguageAgent));
        let encoded = payload.encode().unwrap();
        let reparsed = MetricPayload::decode(FORMAT_JSON_V1, &encoded).unwrap();
        assert_eq!(reparsed, payload);
    }
}
