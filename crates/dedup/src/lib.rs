// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! FB-DP: the deduplication engine.
//!
//! Overlapping collectors (language agents, edge probes, host metrics) emit
//! records for the same process instance. This crate derives a stable
//! fingerprint per instance, keeps exactly one record per fingerprint within
//! the dedup window, and prefers the highest-priority source
//! (`language_agent > edge_probe > hostmetrics`). Suppression state lives in
//! a TTL'd key-value store that may be persistent, so restarts do not
//! re-admit duplicates.

pub mod engine;
pub mod fingerprint;

pub use engine::DedupEngine;
pub use fingerprint::{Fingerprint, NoStartTimes, ProcessTable, StartTimeSource};
