// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The stage runtime: batch processing protocol and hot config application.
//!
//! For every batch, either the downstream receives it or it lands in the DLQ
//! with `fb_sender` set to this stage — a `SUCCESS` response is only returned
//! on the first outcome, and the disjunction is never false.

use crate::batch::Batch;
use crate::dlq_client::DlqClient;
use crate::error::{ErrorCode, StageError};
use crate::forwarder::Forwarder;
use crate::metrics::StageMetrics;
use crate::peer::PeerSlot;
use crate::tracecontext::TraceParent;
use async_trait::async_trait;
use fbc_config::pipeline::{self, StageCommon};
use fbc_config::fb;
use fbc_proto::proto::chain::v1::{MetricBatch, PushResult, PushStatus};
use fbc_proto::proto::control::v1 as control;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::Instrument;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// What the runtime does with a batch after stage-specific processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Hand the batch to the next stage.
    Forward,
    /// The stage consumed the batch (gateway export, DLQ ingestion).
    Consumed,
}

/// Stage-specific logic plugged into the runtime.
#[async_trait]
pub trait StageProcessor: Send + Sync + 'static {
    /// The function-block name, e.g. `fb-dp`.
    fn fb_name(&self) -> &'static str;

    /// Attaches processor-owned metric series to the stage registry.
    fn register_metrics(&self, registry: &prometheus::Registry) -> Result<(), prometheus::Error> {
        let _ = registry;
        Ok(())
    }

    /// Applies the pipeline-wide knobs distributed alongside the stage
    /// parameters.
    fn apply_global(&self, settings: &control::GlobalSettings) -> Result<(), StageError> {
        let _ = settings;
        Ok(())
    }

    /// Parses, validates, and applies the stage parameters for a new
    /// generation. Returning an error keeps the previous parameters.
    fn apply_params(&self, params: &[u8]) -> Result<(), StageError>;

    /// Processes one batch in place. A terminal error routes the batch to
    /// the DLQ without forwarding.
    async fn process(&self, batch: &mut Batch) -> Result<Disposition, StageError>;

    /// Flushes stage state on shutdown.
    async fn flush(&self) -> Result<(), StageError> {
        Ok(())
    }
}

/// Process-level runtime settings (not hot-reconfigurable).
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Replica identity reported to the control plane.
    pub instance_id: String,
    /// Bound of the per-stage work queue — the only backpressure primitive.
    pub queue_capacity: usize,
    /// Deadline for one forward call.
    pub forward_timeout: Duration,
    /// Deadline for one DLQ send.
    pub dlq_timeout: Duration,
    /// Grace period for in-flight batches after the shutdown signal.
    pub drain_window: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            queue_capacity: 256,
            forward_timeout: Duration::from_secs(10),
            dlq_timeout: Duration::from_secs(10),
            drain_window: Duration::from_secs(10),
        }
    }
}

/// Outcome of one config application, reported back as an ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigAck {
    /// Generation the stage now runs (unchanged on failure).
    pub applied_generation: i64,
    /// Whether the generation was applied.
    pub success: bool,
    /// Failure detail when `success` is false.
    pub error: Option<String>,
}

/// The shared runtime hosting one stage processor.
pub struct StageRuntime {
    settings: RuntimeSettings,
    processor: Arc<dyn StageProcessor>,
    metrics: StageMetrics,
    common: RwLock<StageCommon>,
    last_applied: AtomicI64,
    applied_once: AtomicBool,
    ready: AtomicBool,
    admission: Arc<Semaphore>,
    forwarder: Forwarder,
    dlq: DlqClient,
    log_reload: parking_lot::Mutex<Option<LogReloadFn>>,
    cancel: CancellationToken,
    hard_cancel: CancellationToken,
}

/// Callback applying a new log level to the process subscriber.
pub type LogReloadFn = Arc<dyn Fn(&str) + Send + Sync>;

impl std::fmt::Debug for StageRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRuntime")
            .field("fb_name", &self.processor.fb_name())
            .field("instance_id", &self.settings.instance_id)
            .finish_non_exhaustive()
    }
}

impl StageRuntime {
    /// Builds the runtime around a processor.
    pub fn new(
        settings: RuntimeSettings,
        processor: Arc<dyn StageProcessor>,
    ) -> Result<Arc<Self>, prometheus::Error> {
        let metrics = StageMetrics::new(processor.fb_name())?;
        processor.register_metrics(metrics.registry())?;
        let next_slot = Arc::new(PeerSlot::new("next", metrics.active_connections.clone()));
        let dlq_slot = Arc::new(PeerSlot::new("dlq", metrics.active_connections.clone()));
        let forwarder = Forwarder::new(next_slot, metrics.clone(), settings.forward_timeout);
        let dlq = DlqClient::new(
            processor.fb_name().to_owned(),
            dlq_slot,
            settings.dlq_timeout,
        );
        let admission = Arc::new(Semaphore::new(settings.queue_capacity));
        Ok(Arc::new(Self {
            settings,
            processor,
            metrics,
            common: RwLock::new(StageCommon::default()),
            last_applied: AtomicI64::new(0),
            applied_once: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            admission,
            forwarder,
            dlq,
            log_reload: parking_lot::Mutex::new(None),
            cancel: CancellationToken::new(),
            hard_cancel: CancellationToken::new(),
        }))
    }

    /// Installs the callback through which `log_level` changes reach the
    /// process-wide subscriber.
    pub fn set_log_reload(&self, reload: LogReloadFn) {
        let mut guard = self.log_reload.lock();
        *guard = Some(reload);
    }

    /// Spawns the downstream (re)connection tasks.
    pub fn spawn_connection_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            crate::peer::spawn_reconnect(self.forwarder.slot().clone(), self.cancel.child_token()),
            crate::peer::spawn_reconnect(self.dlq.slot().clone(), self.cancel.child_token()),
        ]
    }

    /// The stage's metric set (and registry, for engine-owned series).
    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    /// The runtime settings.
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// The processor's function-block name.
    pub fn fb_name(&self) -> &'static str {
        self.processor.fb_name()
    }

    /// Generation currently applied.
    pub fn applied_generation(&self) -> i64 {
        self.last_applied.load(Ordering::Acquire)
    }

    /// Ready means live and at least one generation applied.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && self.applied_once.load(Ordering::Acquire)
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The forwarder (exposed for readiness probes and tests).
    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    /// The DLQ client (exposed for tests).
    pub fn dlq_client(&self) -> &DlqClient {
        &self.dlq
    }

    /// Flips the replica out of ready, stops accepting work, and arms the
    /// drain deadline after which in-flight batches are failed to the DLQ.
    pub fn begin_shutdown(self: &Arc<Self>) {
        self.ready.store(false, Ordering::Release);
        self.metrics.is_ready.set(0);
        self.cancel.cancel();
        let hard = self.hard_cancel.clone();
        let drain = self.settings.drain_window;
        let _ = tokio::spawn(async move {
            tokio::time::sleep(drain).await;
            hard.cancel();
        });
    }

    /// Waits until all in-flight batches have drained or the deadline passed.
    pub async fn drain(&self) {
        let capacity = self.settings.queue_capacity;
        tokio::select! {
            _ = self.hard_cancel.cancelled() => {}
            permits = self.admission.clone().acquire_many_owned(capacity as u32) => {
                drop(permits);
            }
        }
        if let Err(e) = self.processor.flush().await {
            tracing::warn!(error = %e, "processor flush failed during shutdown");
        }
    }

    /// The full processing protocol for one batch.
    pub async fn handle_push(&self, wire: MetricBatch, trace: Option<TraceParent>) -> PushResult {
        self.metrics.batches_received.inc();
        let mut batch = Batch::from(wire);
        batch.stamp_generation(self.applied_generation());

        // Batches arriving without a trace context start one here, sampled
        // at the configured ratio.
        let trace = trace.or_else(|| {
            let ratio = self.common.read().trace_ratio;
            (ratio > 0.0 && rand::random::<f64>() < ratio).then(|| TraceParent::new_root(true))
        });

        let otel_name = format!("{}-process-batch", self.fb_name());
        let trace_hex = trace
            .as_ref()
            .map(|t| t.trace_id_hex())
            .unwrap_or_default();
        let span = tracing::info_span!(
            "process-batch",
            otel.name = %otel_name,
            batch_id = %batch.batch_id,
            config_generation = batch.config_generation,
            trace_id = %trace_hex,
        );
        self.push_inner(batch, trace).instrument(span).await
    }

    async fn push_inner(&self, mut batch: Batch, trace: Option<TraceParent>) -> PushResult {
        let Ok(_permit) = self.admission.clone().try_acquire_owned() else {
            return self
                .fail_to_dlq(batch, ErrorCode::ProcessingFailed, "work queue full")
                .await;
        };

        let timer = self.metrics.processing_latency.start_timer();
        let processed = {
            let fut = AssertUnwindSafe(self.processor.process(&mut batch)).catch_unwind();
            tokio::select! {
                biased;
                outcome = fut => match outcome {
                    Ok(result) => result,
                    Err(_panic) => Err(StageError::processing_failed(
                        "stage processing panicked",
                    )),
                },
                _ = self.hard_cancel.cancelled() => Err(StageError::new(
                    ErrorCode::ShutdownTimeout,
                    "shutdown drain deadline exceeded",
                )),
            }
        };
        let _ = timer.observe_duration();

        let disposition = match processed {
            Ok(d) => d,
            Err(e) => {
                let code = e.code;
                let message = e.message;
                return self.fail_to_dlq(batch, code, &message).await;
            }
        };
        self.metrics.batches_processed.inc();

        match disposition {
            Disposition::Consumed => PushResult {
                status: PushStatus::Success as i32,
                batch_id: batch.batch_id,
                error_code: String::new(),
                error_message: String::new(),
                sent_to_dlq: false,
            },
            Disposition::Forward => {
                let forward_trace = trace.as_ref().map(TraceParent::child);
                let span = tracing::info_span!(
                    "forward",
                    otel.name = %format!("{}-forward", self.fb_name()),
                    batch_id = %batch.batch_id,
                    config_generation = batch.config_generation,
                );
                match self
                    .forwarder
                    .forward(&batch, forward_trace.as_ref())
                    .instrument(span)
                    .await
                {
                    Ok(()) => {
                        self.metrics.batches_forwarded.inc();
                        PushResult {
                            status: PushStatus::Success as i32,
                            batch_id: batch.batch_id,
                            error_code: String::new(),
                            error_message: String::new(),
                            sent_to_dlq: false,
                        }
                    }
                    Err(e) => {
                        let code = e.code;
                        let message = e.message;
                        self.fail_to_dlq(batch, code, &message).await
                    }
                }
            }
        }
    }

    /// DLQ escalation: preserves the original error code when the DLQ
    /// accepts, degrades to `DLQ_SEND_FAILED` when it does not.
    async fn fail_to_dlq(&self, batch: Batch, code: ErrorCode, message: &str) -> PushResult {
        self.metrics.record_error(code.as_str());
        if code == ErrorCode::InvalidInput {
            self.metrics.validation_errors.inc();
        }
        let batch_id = batch.batch_id.clone();
        tracing::warn!(
            batch_id = %batch_id,
            error_code = code.as_str(),
            error = message,
            "routing batch to DLQ"
        );
        let span = tracing::info_span!(
            "dlq-send",
            otel.name = %format!("{}-dlq-send", self.fb_name()),
            batch_id = %batch_id,
        );
        match self.dlq.send(batch, code, message).instrument(span).await {
            Ok(()) => {
                self.metrics.batches_dlq.inc();
                PushResult {
                    status: PushStatus::Error as i32,
                    batch_id,
                    error_code: code.as_str().to_owned(),
                    error_message: message.to_owned(),
                    sent_to_dlq: true,
                }
            }
            Err(dlq_err) => {
                self.metrics.record_error(ErrorCode::DlqSendFailed.as_str());
                tracing::error!(
                    batch_id = %batch_id,
                    error = %dlq_err,
                    original_error_code = code.as_str(),
                    "DLQ send failed; batch may be lost at this stage"
                );
                PushResult {
                    status: PushStatus::Error as i32,
                    batch_id,
                    error_code: ErrorCode::DlqSendFailed.as_str().to_owned(),
                    error_message: dlq_err.message,
                    sent_to_dlq: false,
                }
            }
        }
    }

    /// Hot-applies one distributed generation.
    ///
    /// Stale generations are a no-op that still acks; `CONFIG_INVALID` never
    /// advances the applied generation.
    pub fn apply_config(&self, config: &control::PipelineConfig) -> ConfigAck {
        let generation = config.generation;
        let last = self.applied_generation();
        if generation <= last {
            tracing::debug!(generation, last_applied = last, "ignoring stale generation");
            return ConfigAck {
                applied_generation: last,
                success: true,
                error: None,
            };
        }

        let fb_name = self.fb_name();
        let Some(fb_config) = pipeline::stage_config(config, fb_name) else {
            return self.reject_config(last, format!("stage `{fb_name}` absent from generation {generation}"));
        };

        let common = StageCommon::from_wire(fb_config.common.as_ref());
        if common.next_fb.is_none() && !fb::is_chain_tail(fb_name) {
            return self.reject_config(last, format!("`next_fb` unset for `{fb_name}`"));
        }
        if common.dlq.is_none() && fb_name != fb::DLQ {
            return self.reject_config(last, format!("`dlq` unset for `{fb_name}`"));
        }
        if let Some(settings) = &config.global_settings {
            if let Err(e) = self.processor.apply_global(settings) {
                return self.reject_config(last, e.message);
            }
        }
        if let Err(e) = self.processor.apply_params(&fb_config.parameters) {
            return self.reject_config(last, e.message);
        }

        {
            let mut guard = self.common.write();
            *guard = common.clone();
        }
        if let Some(reload) = self.log_reload.lock().as_ref() {
            reload(&common.log_level);
        }
        self.forwarder.slot().set_address(common.next_fb.clone());
        self.dlq.slot().set_address(common.dlq.clone());
        self.forwarder.rebuild_breaker(common.circuit_breaker);
        self.last_applied.store(generation, Ordering::Release);
        self.applied_once.store(true, Ordering::Release);
        if !self.cancel.is_cancelled() {
            self.ready.store(true, Ordering::Release);
            self.metrics.is_ready.set(1);
        }
        self.metrics.config_generation.set(generation);
        tracing::info!(generation, "applied configuration generation");
        ConfigAck {
            applied_generation: generation,
            success: true,
            error: None,
        }
    }

    fn reject_config(&self, last: i64, message: String) -> ConfigAck {
        self.metrics.record_error(ErrorCode::ConfigInvalid.as_str());
        tracing::error!(error = %message, "rejecting configuration generation");
        ConfigAck {
            applied_generation: last,
            success: false,
            error: Some(message),
        }
    }

    /// Snapshot of the current common settings (read-locked).
    pub fn common(&self) -> StageCommon {
        self.common.read().clone()
    }
}
