// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Well-known function-block names.
//!
//! The chain is an ordered sequence of stages; each stage declares its
//! downstream through `next_fb`, so the ordering here is documentation, not
//! wiring. The DLQ service sits outside the chain.

/// Receiver, the chain head.
pub const RX: &str = "fb-rx";
/// Host-metadata enrichment.
pub const EN_HOST: &str = "fb-en-host";
/// Orchestrator-metadata enrichment.
pub const EN_K8S: &str = "fb-en-k8s";
/// PII classifier.
pub const CL: &str = "fb-cl";
/// Deduplication engine.
pub const DP: &str = "fb-dp";
/// Filter/sampler.
pub const FS: &str = "fb-fs";
/// In-batch aggregation.
pub const AGG: &str = "fb-agg";
/// Pre-gateway normalization.
pub const GW_PRE: &str = "fb-gw-pre";
/// Gateway: schema enforcement and export.
pub const GW: &str = "fb-gw";
/// Dead-letter queue service.
pub const DLQ: &str = "fb-dlq";

/// All stage names the control plane accepts in a pipeline spec.
pub const KNOWN: [&str; 10] = [RX, EN_HOST, EN_K8S, CL, DP, FS, AGG, GW_PRE, GW, DLQ];

/// Returns true when `name` is one of the known function blocks.
pub fn is_known(name: &str) -> bool {
    KNOWN.contains(&name)
}

/// Returns true for stages that legitimately have no `next_fb`:
/// the gateway (chain tail) and the DLQ service.
pub fn is_chain_tail(name: &str) -> bool {
    name == GW || name == DLQ
}
