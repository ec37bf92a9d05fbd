// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-replica Prometheus metrics.
//!
//! Every metric carries the constant `fb_name` label. The registry is shared
//! with stage engines so they can attach their own series (e.g. the dedup
//! counters) next to the runtime's.

use crate::circuit_breaker::BreakerState;
use prometheus::{
    Counter, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

/// The stage-runtime metric set.
#[derive(Debug, Clone)]
pub struct StageMetrics {
    registry: Registry,
    /// Batches accepted by the ingress RPC.
    pub batches_received: IntCounter,
    /// Batches that completed stage-specific processing.
    pub batches_processed: IntCounter,
    /// Batches handed to the next stage.
    pub batches_forwarded: IntCounter,
    /// Batches routed to the DLQ.
    pub batches_dlq: IntCounter,
    /// Stage failures by error code.
    pub processing_errors: IntCounterVec,
    /// Envelope/schema rejections.
    pub validation_errors: IntCounter,
    /// 1 while the replica is ready.
    pub is_ready: IntGauge,
    /// Generation currently applied.
    pub config_generation: IntGauge,
    /// Live downstream connections (next stage + DLQ).
    pub active_connections: IntGauge,
    /// Circuit-breaker state (0 closed, 1 open, 2 half-open).
    pub breaker_state: IntGauge,
    /// Circuit-breaker state transitions.
    pub breaker_transitions: IntCounter,
    /// Cumulative seconds the breaker has spent open.
    pub breaker_open_seconds: Counter,
    /// Stage-specific processing latency.
    pub processing_latency: Histogram,
    /// Next-stage forwarding latency.
    pub forwarding_latency: Histogram,
}

impl StageMetrics {
    /// Builds and registers the metric set for one stage replica.
    pub fn new(fb_name: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let opts = |name: &str, help: &str| {
            Opts::new(name, help).const_label("fb_name", fb_name)
        };
        let hist_opts = |name: &str, help: &str| {
            HistogramOpts::new(name, help).const_label("fb_name", fb_name)
        };

        let batches_received = IntCounter::with_opts(opts(
            "fb_batches_received_total",
            "Batches accepted by the ingress RPC",
        ))?;
        let batches_processed = IntCounter::with_opts(opts(
            "fb_batches_processed_total",
            "Batches that completed stage-specific processing",
        ))?;
        let batches_forwarded = IntCounter::with_opts(opts(
            "fb_batches_forwarded_total",
            "Batches handed to the next stage",
        ))?;
        let batches_dlq = IntCounter::with_opts(opts(
            "fb_batches_dlq_total",
            "Batches routed to the DLQ",
        ))?;
        let processing_errors = IntCounterVec::new(
            opts("fb_processing_errors_total", "Stage failures by error code"),
            &["error_code"],
        )?;
        let validation_errors = IntCounter::with_opts(opts(
            "fb_validation_errors_total",
            "Envelope or schema rejections",
        ))?;
        let is_ready = IntGauge::with_opts(opts("fb_is_ready", "1 while the replica is ready"))?;
        let config_generation = IntGauge::with_opts(opts(
            "fb_config_generation",
            "Configuration generation currently applied",
        ))?;
        let active_connections = IntGauge::with_opts(opts(
            "fb_active_connections",
            "Live downstream connections",
        ))?;
        let breaker_state = IntGauge::with_opts(opts(
            "fb_circuit_breaker_state",
            "Circuit-breaker state (0 closed, 1 open, 2 half-open)",
        ))?;
        let breaker_transitions = IntCounter::with_opts(opts(
            "fb_circuit_breaker_transitions_total",
            "Circuit-breaker state transitions",
        ))?;
        let breaker_open_seconds = Counter::with_opts(opts(
            "fb_circuit_breaker_open_seconds_total",
            "Cumulative seconds the circuit breaker has spent open",
        ))?;
        let processing_latency = Histogram::with_opts(hist_opts(
            "fb_processing_latency_seconds",
            "Stage-specific processing latency",
        ))?;
        let forwarding_latency = Histogram::with_opts(hist_opts(
            "fb_forwarding_latency_seconds",
            "Next-stage forwarding latency",
        ))?;

        registry.register(Box::new(batches_received.clone()))?;
        registry.register(Box::new(batches_processed.clone()))?;
        registry.register(Box::new(batches_forwarded.clone()))?;
        registry.register(Box::new(batches_dlq.clone()))?;
        registry.register(Box::new(processing_errors.clone()))?;
        registry.register(Box::new(validation_errors.clone()))?;
        registry.register(Box::new(is_ready.clone()))?;
        registry.register(Box::new(config_generation.clone()))?;
        registry.register(Box::new(active_connections.clone()))?;
        registry.register(Box::new(breaker_state.clone()))?;
        registry.register(Box::new(breaker_transitions.clone()))?;
        registry.register(Box::new(breaker_open_seconds.clone()))?;
        registry.register(Box::new(processing_latency.clone()))?;
        registry.register(Box::new(forwarding_latency.clone()))?;

        Ok(Self {
            registry,
            batches_received,
            batches_processed,
            batches_forwarded,
            batches_dlq,
            processing_errors,
            validation_errors,
            is_ready,
            config_generation,
            active_connections,
            breaker_state,
            breaker_transitions,
            breaker_open_seconds,
            processing_latency,
            forwarding_latency,
        })
    }

    /// The registry stage engines attach their own series to.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Records one failure under its taxonomy code.
    pub fn record_error(&self, code: &str) {
        self.processing_errors.with_label_values(&[code]).inc();
    }

    /// Mirrors the breaker state onto the gauge.
    pub fn set_breaker_state(&self, state: BreakerState) {
        self.breaker_state.set(state.as_gauge());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn metric_set_registers_with_const_label() {
        let metrics = StageMetrics::new("fb-dp").unwrap();
        metrics.batches_received.inc();
        metrics.record_error("FORWARDING_FAILED");
        let mut buf = Vec::new();
        let encoder = prometheus::TextEncoder::new();
        encoder
            .encode(&metrics.registry().gather(), &mut buf)
            .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("fb_batches_received_total{fb_name=\"fb-dp\"} 1"));
        assert!(text.contains(
            "fb_processing_errors_total{error_code=\"FORWARDING_FAILED\",fb_name=\"fb-dp\"} 1"
        ));
    }

    #[test]
    fn duplicate_registration_fails_loudly() {
        let metrics = StageMetrics::new("fb-rx").unwrap();
        let dup = IntCounter::with_opts(
            Opts::new("fb_batches_received_total", "dup").const_label("fb_name", "fb-rx"),
        )
        .unwrap();
        assert!(metrics.registry().register(Box::new(dup)).is_err());
    }
}
