// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Next-stage forwarding behind the circuit breaker.

use crate::batch::Batch;
use crate::circuit_breaker::{BreakerState, CircuitBreaker, Decision};
use crate::error::{ErrorCode, StageError};
use crate::metrics::StageMetrics;
use crate::peer::PeerSlot;
use crate::tracecontext::TraceParent;
use arc_swap::ArcSwap;
use fbc_config::pipeline::CircuitBreakerConfig;
use fbc_proto::proto::chain::v1::{MetricBatch, PushStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Owns the next-stage peer slot and its circuit breaker.
///
/// The breaker is reconstructed (counters reset) whenever new thresholds are
/// applied; in-flight calls finish against the breaker they started with.
pub struct Forwarder {
    slot: Arc<PeerSlot>,
    breaker: ArcSwap<CircuitBreaker>,
    metrics: StageMetrics,
    timeout: Duration,
    last_transitions: AtomicU64,
    last_open_millis: AtomicU64,
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

impl Forwarder {
    /// Builds a forwarder over the given slot with default breaker thresholds.
    pub fn new(slot: Arc<PeerSlot>, metrics: StageMetrics, timeout: Duration) -> Self {
        Self {
            slot,
            breaker: ArcSwap::from_pointee(CircuitBreaker::new(CircuitBreakerConfig::default())),
            metrics,
            timeout,
            last_transitions: AtomicU64::new(0),
            last_open_millis: AtomicU64::new(0),
        }
    }

    /// The peer slot (shared with the reconnect task).
    pub fn slot(&self) -> &Arc<PeerSlot> {
        &self.slot
    }

    /// Replaces the breaker with a fresh one built from `config`.
    pub fn rebuild_breaker(&self, config: CircuitBreakerConfig) {
        let _ = self.breaker.swap(Arc::new(CircuitBreaker::new(config)));
        self.last_transitions.store(0, Ordering::Relaxed);
        self.last_open_millis.store(0, Ordering::Relaxed);
        self.metrics.set_breaker_state(BreakerState::Closed);
    }

    /// Current breaker state, for readiness and tests.
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.load().state()
    }

    /// Forwards one batch to the next stage.
    ///
    /// With the breaker open the batch is not attempted and the caller gets
    /// `CIRCUIT_BREAKER_OPEN`; any non-success peer response or transport
    /// failure maps to `FORWARDING_FAILED`.
    pub async fn forward(&self, batch: &Batch, trace: Option<&TraceParent>) -> Result<(), StageError> {
        let breaker = self.breaker.load_full();
        let result = self.forward_inner(&breaker, batch, trace).await;
        self.publish_breaker_metrics(&breaker);
        result
    }

    async fn forward_inner(
        &self,
        breaker: &CircuitBreaker,
        batch: &Batch,
        trace: Option<&TraceParent>,
    ) -> Result<(), StageError> {
        if breaker.pre_call() == Decision::Rejected {
            return Err(StageError::new(
                ErrorCode::CircuitBreakerOpen,
                "next-stage circuit breaker is open",
            ));
        }
        let Some(conn) = self.slot.client() else {
            breaker.on_failure();
            return Err(StageError::forwarding_failed(
                "no live connection to next stage",
            ));
        };
        let timer = self.metrics.forwarding_latency.start_timer();
        let mut client = conn.client.clone();
        let mut request = tonic::Request::new(MetricBatch::from(batch.clone()));
        request.set_timeout(self.timeout);
        if let Some(trace) = trace {
            trace.inject(request.metadata_mut());
        }
        let outcome = tokio::time::timeout(self.timeout, client.push_batch(request)).await;
        let _ = timer.observe_duration();
        match outcome {
            Err(_elapsed) => {
                breaker.on_failure();
                self.slot.mark_broken(&conn.addr);
                Err(StageError::forwarding_failed("forward deadline exceeded"))
            }
            Ok(Err(status)) => {
                breaker.on_failure();
                if status.code() == tonic::Code::Unavailable {
                    self.slot.mark_broken(&conn.addr);
                }
                Err(StageError::forwarding_failed(format!(
                    "transport error: {status}"
                )))
            }
            Ok(Ok(response)) => {
                let result = response.into_inner();
                if result.status() == PushStatus::Success {
                    breaker.on_success();
                    Ok(())
                } else {
                    breaker.on_failure();
                    Err(StageError::forwarding_failed(format!(
                        "peer rejected batch: {} ({})",
                        result.error_message, result.error_code
                    )))
                }
            }
        }
    }

    fn publish_breaker_metrics(&self, breaker: &CircuitBreaker) {
        let (_requests, _failures, transitions, open_seconds) = breaker.counters();
        self.metrics.set_breaker_state(breaker.state());
        let previous = self.last_transitions.swap(transitions, Ordering::Relaxed);
        if transitions > previous {
            self.metrics
                .breaker_transitions
                .inc_by(transitions - previous);
        }
        let open_millis = (open_seconds * 1000.0) as u64;
        let previous_millis = self.last_open_millis.swap(open_millis, Ordering::Relaxed);
        if open_millis > previous_millis {
            self.metrics
                .breaker_open_seconds
                .inc_by((open_millis - previous_millis) as f64 / 1000.0);
        }
    }
}
