// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! W3C trace-context propagation over RPC metadata.
//!
//! Only the `traceparent` header is carried; spans themselves are emitted
//! through `tracing` with the ids as fields, so any collector that joins on
//! trace id can stitch the chain together.

use tonic::metadata::MetadataMap;

/// The `traceparent` metadata key.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// A parsed W3C `traceparent` value (version 00).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceParent {
    /// 16-byte trace id shared by every span in the trace.
    pub trace_id: [u8; 16],
    /// 8-byte id of the current span.
    pub span_id: [u8; 8],
    /// Trace flags; bit 0 is "sampled".
    pub flags: u8,
}

impl TraceParent {
    /// Starts a new trace with random ids.
    pub fn new_root(sampled: bool) -> Self {
        let trace_id = *uuid::Uuid::new_v4().as_bytes();
        let span_uuid = uuid::Uuid::new_v4();
        let mut span_id = [0u8; 8];
        span_id.copy_from_slice(&span_uuid.as_bytes()[..8]);
        Self {
            trace_id,
            span_id,
            flags: u8::from(sampled),
        }
    }

    /// A child context: same trace, fresh span id.
    pub fn child(&self) -> Self {
        let span_uuid = uuid::Uuid::new_v4();
        let mut span_id = [0u8; 8];
        span_id.copy_from_slice(&span_uuid.as_bytes()[..8]);
        Self {
            trace_id: self.trace_id,
            span_id,
            flags: self.flags,
        }
    }

    /// True when the sampled flag is set.
    pub fn is_sampled(&self) -> bool {
        self.flags & 0x01 == 0x01
    }

    /// Hex trace id, for span fields.
    pub fn trace_id_hex(&self) -> String {
        hex::encode(self.trace_id)
    }

    /// Hex span id, for span fields.
    pub fn span_id_hex(&self) -> String {
        hex::encode(self.span_id)
    }

    /// Renders the `traceparent` header value.
    pub fn header_value(&self) -> String {
        format!(
            "00-{}-{}-{:02x}",
            hex::encode(self.trace_id),
            hex::encode(self.span_id),
            self.flags
        )
    }

    /// Parses a `traceparent` header value; unknown versions are rejected.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split('-');
        let version = parts.next()?;
        if version != "00" {
            return None;
        }
        let trace_hex = parts.next()?;
        let span_hex = parts.next()?;
        let flags_hex = parts.next()?;
        if parts.next().is_some() || trace_hex.len() != 32 || span_hex.len() != 16 {
            return None;
        }
        let trace_bytes = hex::decode(trace_hex).ok()?;
        let span_bytes = hex::decode(span_hex).ok()?;
        let flags = u8::from_str_radix(flags_hex, 16).ok()?;
        let mut trace_id = [0u8; 16];
        trace_id.copy_from_slice(&trace_bytes);
        let mut span_id = [0u8; 8];
        span_id.copy_from_slice(&span_bytes);
        if trace_id == [0u8; 16] || span_id == [0u8; 8] {
            return None;
        }
        Some(Self {
            trace_id,
            span_id,
            flags,
        })
    }

    /// Extracts the context from RPC metadata.
    pub fn extract(metadata: &MetadataMap) -> Option<Self> {
        let value = metadata.get(TRACEPARENT_KEY)?.to_str().ok()?;
        Self::parse(value)
    }

    /// Injects the context into RPC metadata.
    pub fn inject(&self, metadata: &mut MetadataMap) {
        if let Ok(value) = self.header_value().parse() {
            let _ = metadata.insert(TRACEPARENT_KEY, value);
        }
    }
}
