// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! FB-GW: the gateway.
//!
//! The chain tail: validates the export schema, re-runs the PII guard
//! (defence in depth), strips internal labels, applies the allow-lists, and
//! hands the payload to the remote sink through a persistent sending queue.
//! Schema violations are terminal; export failures are transient and retried
//! from the queue; queue overflow is terminal.

pub mod queue;
pub mod schema;
pub mod sink;

use async_trait::async_trait;
use fbc_classify::leak_guard;
use fbc_config::fb;
use fbc_config::params::{GwParams, StageParams};
use fbc_pdata::MetricPayload;
use fbc_runtime::stage::{Disposition, StageProcessor};
use fbc_runtime::{Batch, StageError};
use fbc_store::SledStore;
use parking_lot::{Mutex, RwLock};
use prometheus::{IntCounter, IntGauge, Opts, Registry};
use queue::{EnqueueError, ExportEntry, SendingQueue};
use sink::Sink;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Drain-worker poll interval.
const DRAIN_INTERVAL: Duration = Duration::from_millis(500);

/// Gateway-owned metric series.
#[derive(Debug, Clone)]
pub struct GwMetrics {
    /// Payloads accepted by the remote sink.
    pub exported: IntCounter,
    /// Drain passes that left an entry queued after bounded retry.
    pub export_failures: IntCounter,
    /// Current sending-queue depth.
    pub queue_depth: IntGauge,
}

impl GwMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        let opts = |name: &str, help: &str| Opts::new(name, help).const_label("fb_name", fb::GW);
        Ok(Self {
            exported: IntCounter::with_opts(opts(
                "fb_gw_exported_total",
                "Payloads accepted by the remote sink",
            ))?,
            export_failures: IntCounter::with_opts(opts(
                "fb_gw_export_failures_total",
                "Export submissions that exhausted bounded retry",
            ))?,
            queue_depth: IntGauge::with_opts(opts(
                "fb_gw_sending_queue_depth",
                "Entries in the persistent sending queue",
            ))?,
        })
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.exported.clone()))?;
        registry.register(Box::new(self.export_failures.clone()))?;
        registry.register(Box::new(self.queue_depth.clone()))?;
        Ok(())
    }
}

struct Inner {
    params: RwLock<GwParams>,
    queue: SendingQueue,
    sink: Arc<dyn Sink>,
    metrics: GwMetrics,
}

/// The FB-GW stage processor.
pub struct Gateway {
    inner: Arc<Inner>,
    queue_path: Mutex<Option<PathBuf>>,
    worker: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

impl Gateway {
    /// Builds the gateway over a sink implementation.
    pub fn new(sink: Arc<dyn Sink>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            inner: Arc::new(Inner {
                params: RwLock::new(GwParams::default()),
                queue: SendingQueue::new(),
                sink,
                metrics: GwMetrics::new()?,
            }),
            queue_path: Mutex::new(None),
            worker: Mutex::new(None),
        })
    }

    /// Runs one drain pass immediately; used by shutdown flush and tests.
    pub async fn drain_now(&self) -> u64 {
        let (url, retry) = {
            let params = self.inner.params.read();
            (params.sink_url.clone(), params.retry.clone())
        };
        if url.is_empty() {
            return 0;
        }
        self.inner
            .queue
            .drain_once(&*self.inner.sink, &url, &retry, &self.inner.metrics)
            .await
    }

    fn ensure_worker(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let inner = self.inner.clone();
        let child = token.clone();
        let _ = tokio::spawn(async move {
            let mut tick = tokio::time::interval(DRAIN_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tick.tick() => {
                        let (url, retry) = {
                            let params = inner.params.read();
                            (params.sink_url.clone(), params.retry.clone())
                        };
                        if url.is_empty() {
                            continue;
                        }
                        let _ = inner
                            .queue
                            .drain_once(&*inner.sink, &url, &retry, &inner.metrics)
                            .await;
                    }
                }
            }
        });
        *worker = Some(token);
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(token) = self.worker.lock().take() {
            token.cancel();
        }
    }
}

#[async_trait]
impl StageProcessor for Gateway {
    fn fb_name(&self) -> &'static str {
        fb::GW
    }

    fn register_metrics(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        self.inner.metrics.register(registry)
    }

    fn apply_params(&self, bytes: &[u8]) -> Result<(), StageError> {
        let params = GwParams::parse(bytes).map_err(|e| StageError::config_invalid(e.to_string()))?;
        params
            .validate()
            .map_err(|e| StageError::config_invalid(e.to_string()))?;

        {
            let mut queue_path = self.queue_path.lock();
            if queue_path.as_ref() != Some(&params.sending_queue_path) {
                let store = SledStore::open(&params.sending_queue_path)
                    .map_err(|e| StageError::config_invalid(format!("sending queue: {e}")))?;
                self.inner.queue.install(Arc::new(store));
                *queue_path = Some(params.sending_queue_path.clone());
            }
        }
        {
            let mut guard = self.inner.params.write();
            *guard = params;
        }
        self.ensure_worker();
        Ok(())
    }

    async fn process(&self, batch: &mut Batch) -> Result<Disposition, StageError> {
        let params = self.inner.params.read().clone();
        if params.sink_url.is_empty() {
            return Err(StageError::processing_failed(
                "gateway has no configured sink",
            ));
        }

        let mut payload = MetricPayload::decode(&batch.format, &batch.data)
            .map_err(|e| StageError::invalid_input(e.to_string()))?;
        schema::validate_payload(&payload).map_err(StageError::invalid_input)?;

        // Internal labels never leave the pipeline through the exporter.
        batch.internal_labels.clear();
        schema::apply_allow_list(
            &mut payload,
            &params.allowed_metric_names,
            &params.allowed_attributes,
        );
        let serialized = payload
            .encode()
            .map_err(|e| StageError::processing_failed(e.to_string()))?;

        if let Some(field) = leak_guard(&serialized, &params.pii_fields) {
            return Err(StageError::invalid_input(format!(
                "raw PII `{field}` in export payload"
            )));
        }

        let entry = ExportEntry {
            batch_id: batch.batch_id.clone(),
            metadata: batch.metadata.clone(),
            payload: String::from_utf8(serialized)
                .map_err(|e| StageError::processing_failed(e.to_string()))?,
        };
        match self
            .inner
            .queue
            .enqueue(&entry, params.sending_queue_capacity)
            .await
        {
            Ok(()) => Ok(Disposition::Consumed),
            Err(EnqueueError::Full { capacity }) => Err(StageError::processing_failed(format!(
                "sending queue full ({capacity})"
            ))),
            Err(EnqueueError::Store(e)) => {
                Err(StageError::processing_failed(format!("sending queue: {e}")))
            }
        }
    }

    async fn flush(&self) -> Result<(), StageError> {
        let _ = self.drain_now().await;
        self.inner
            .queue
            .flush()
            .await
            .map_err(|e| StageError::processing_failed(format!("sending queue flush: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbc_pdata::{FORMAT_JSON_V1, MetricRecord};
    use fbc_runtime::ErrorCode;
    use sink::MemorySink;
    use std::collections::BTreeMap;

    fn record(name: &str) -> MetricRecord {
        MetricRecord {
            name: name.to_owned(),
            kind: "counter".to_owned(),
            value: 1.0,
            unit: None,
            attributes: BTreeMap::new(),
            source: None,
            host_name: None,
            pid: None,
            process_start_time_ns: None,
            boot_id_ref: None,
            timestamp_unix_nanos: 1,
        }
    }

    fn batch_of(records: Vec<MetricRecord>) -> Batch {
        let payload = MetricPayload {
            resource: BTreeMap::new(),
            records,
        };
        let mut batch = Batch {
            batch_id: uuid_like(),
            data: payload.encode().unwrap(),
            format: FORMAT_JSON_V1.to_owned(),
            ..Batch::default()
        };
        let _ = batch
            .internal_labels
            .insert("fb_sender".to_owned(), "fb-gw-pre".to_owned());
        batch
    }

    fn uuid_like() -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT: AtomicU64 = AtomicU64::new(0);
        format!("b-{}", NEXT.fetch_add(1, Ordering::Relaxed))
    }

    fn gateway_with(sink: Arc<MemorySink>, dir: &std::path::Path, extra: &str) -> Gateway {
        let gateway = Gateway::new(sink).unwrap();
        let params = format!(
            r#"{{ "sink_url": "http://sink.local/v1/metrics",
                  "sending_queue_path": "{}"{extra} }}"#,
            dir.display()
        );
        gateway.apply_params(params.as_bytes()).unwrap();
        gateway
    }

    #[tokio::test]
    async fn accepted_batch_is_queued_and_exported() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let gateway = gateway_with(sink.clone(), dir.path(), "");

        let mut batch = batch_of(vec![record("http.requests")]);
        let disposition = gateway.process(&mut batch).await.unwrap();
        assert_eq!(disposition, Disposition::Consumed);
        assert!(batch.internal_labels.is_empty());

        let exported = gateway.drain_now().await;
        assert_eq!(exported, 1);
        let payloads = sink.exported();
        assert_eq!(payloads.len(), 1);
        let text = String::from_utf8(payloads[0].clone()).unwrap();
        assert!(text.contains("http.requests"));
        assert!(!text.contains("fb_sender"));
    }

    #[tokio::test]
    async fn schema_violation_is_terminal_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway_with(Arc::new(MemorySink::new()), dir.path(), "");
        let mut bad = record("requests");
        bad.kind = "exotic".to_owned();
        let mut batch = batch_of(vec![bad]);
        let err = gateway.process(&mut batch).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn allow_list_is_enforced_at_export() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let gateway = gateway_with(
            sink.clone(),
            dir.path(),
            r#", "allowed_metric_names": ["http.requests"]"#,
        );
        let mut batch = batch_of(vec![record("http.requests"), record("internal.junk")]);
        let _ = gateway.process(&mut batch).await.unwrap();
        let _ = gateway.drain_now().await;
        let text = String::from_utf8(sink.exported()[0].clone()).unwrap();
        assert!(text.contains("http.requests"));
        assert!(!text.contains("internal.junk"));
    }

    #[tokio::test]
    async fn pii_recheck_rejects_leaking_payload() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway_with(
            Arc::new(MemorySink::new()),
            dir.path(),
            r#", "pii_fields": ["user.email"]"#,
        );
        let mut leaking = record("http.requests");
        let _ = leaking
            .attributes
            .insert("user.email".to_owned(), "alice@example.com".to_owned());
        let mut batch = batch_of(vec![leaking]);
        let err = gateway.process(&mut batch).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn queue_overflow_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway_with(
            Arc::new(MemorySink::new()),
            dir.path(),
            r#", "sending_queue_capacity": 1"#,
        );
        let mut first = batch_of(vec![record("a")]);
        let _ = gateway.process(&mut first).await.unwrap();
        let mut second = batch_of(vec![record("b")]);
        let err = gateway.process(&mut second).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ProcessingFailed);
        assert!(err.message.contains("queue full"));
    }

    #[tokio::test]
    async fn transient_export_failure_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let gateway = gateway_with(sink.clone(), dir.path(), "");
        sink.fail_next(1);
        let mut batch = batch_of(vec![record("http.requests")]);
        let _ = gateway.process(&mut batch).await.unwrap();
        // Default retry allows 3 attempts; the injected failure is absorbed.
        let exported = gateway.drain_now().await;
        assert_eq!(exported, 1);
        assert_eq!(sink.exported().len(), 1);
    }
}
