// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The deduplication engine.
//!
//! Admission happens in two steps. Within a batch, records collapse per
//! fingerprint to the highest-priority source. Across batches, the windowed
//! source-cache short-circuits known decisions and the persistent store is
//! the authority: an entry holds the source that last won the fingerprint,
//! so priority displacement survives restarts on the disk backing.
//!
//! The engine never synthesizes or reorders surviving records, and a store
//! failure fails the whole batch — duplicates must not slip through silently.

use crate::fingerprint::{Fingerprint, StartTimeSource};
use async_trait::async_trait;
use fbc_config::params::{DedupStoreParams, DpParams, StageParams};
use fbc_config::fb;
use fbc_pdata::{MetricPayload, MetricRecord, Source};
use fbc_runtime::stage::{Disposition, StageProcessor};
use fbc_runtime::{Batch, StageError};
use fbc_store::{KvStore, MemoryStore, PutOutcome, SledStore};
use parking_lot::{Mutex, RwLock};
use prometheus::{IntCounter, Opts, Registry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Interval of the persistent store's garbage collection.
const STORE_GC_INTERVAL: Duration = Duration::from_secs(60);

/// Engine-owned metric series.
#[derive(Debug, Clone)]
struct DpMetrics {
    duplicates_dropped: IntCounter,
    no_identity: IntCounter,
    store_failures: IntCounter,
}

impl DpMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        let opts = |name: &str, help: &str| Opts::new(name, help).const_label("fb_name", fb::DP);
        Ok(Self {
            duplicates_dropped: IntCounter::with_opts(opts(
                "fb_dp_duplicates_dropped_total",
                "Datapoints suppressed as duplicates",
            ))?,
            no_identity: IntCounter::with_opts(opts(
                "fb_dp_no_identity_total",
                "Datapoints passed through without a dedup identity",
            ))?,
            store_failures: IntCounter::with_opts(opts(
                "fb_dp_store_failures_total",
                "Dedup store operation failures",
            ))?,
        })
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.duplicates_dropped.clone()))?;
        registry.register(Box::new(self.no_identity.clone()))?;
        registry.register(Box::new(self.store_failures.clone()))?;
        Ok(())
    }
}

/// The FB-DP stage processor.
pub struct DedupEngine {
    params: RwLock<DpParams>,
    store: RwLock<Arc<dyn KvStore>>,
    cache: Mutex<HashMap<Vec<u8>, (Source, Instant)>>,
    start_times: Arc<dyn StartTimeSource>,
    metrics: DpMetrics,
    gc: Mutex<Option<(CancellationToken, tokio::task::JoinHandle<()>)>>,
}

impl std::fmt::Debug for DedupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupEngine").finish_non_exhaustive()
    }
}

impl DedupEngine {
    /// Builds the engine with the in-memory backing until parameters arrive.
    pub fn new(start_times: Arc<dyn StartTimeSource>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            params: RwLock::new(DpParams::default()),
            store: RwLock::new(Arc::new(MemoryStore::new())),
            cache: Mutex::new(HashMap::new()),
            start_times,
            metrics: DpMetrics::new()?,
            gc: Mutex::new(None),
        })
    }

    fn install_store(&self, store: Arc<dyn KvStore>) {
        {
            let mut guard = self.store.write();
            *guard = store.clone();
        }
        let mut gc = self.gc.lock();
        if let Some((token, _handle)) = gc.take() {
            token.cancel();
        }
        let token = CancellationToken::new();
        let handle = fbc_store::spawn_gc(store, STORE_GC_INTERVAL, token.clone());
        *gc = Some((token, handle));
    }

    fn current_store(&self) -> Arc<dyn KvStore> {
        self.store.read().clone()
    }

    fn cache_lookup(&self, key: &[u8], window: Duration, now: Instant) -> Option<Source> {
        let cache = self.cache.lock();
        cache
            .get(key)
            .filter(|(_, at)| now.duration_since(*at) < window)
            .map(|(source, _)| *source)
    }

    fn cache_remember(&self, key: Vec<u8>, source: Source, now: Instant) {
        let _ = self.cache.lock().insert(key, (source, now));
    }

    /// Cross-batch admission of one surviving record.
    async fn admit(
        &self,
        record: &MetricRecord,
        key: Vec<u8>,
        store: &Arc<dyn KvStore>,
        params: &DpParams,
        now: Instant,
    ) -> Result<bool, StageError> {
        let source = record.source.unwrap_or(Source::Hostmetrics);
        let ttl = Some(params.dedup_ttl);

        if let Some(cached) = self.cache_lookup(&key, params.source_cache_window, now) {
            if source < cached {
                self.metrics.duplicates_dropped.inc();
                return Ok(false);
            }
            if source > cached {
                self.cache_remember(key.clone(), source, now);
                self.store_put(store, &key, source, ttl).await?;
                return Ok(true);
            }
            // Same source repeated within the window.
            self.metrics.duplicates_dropped.inc();
            return Ok(false);
        }

        self.cache_remember(key.clone(), source, now);
        match store
            .put_if_absent(&key, source.as_str().as_bytes(), ttl)
            .await
        {
            Ok(PutOutcome::Inserted) => Ok(true),
            Ok(PutOutcome::AlreadyPresent) => {
                let stored = match store.get(&key).await {
                    Ok(value) => value,
                    Err(e) => return Err(self.store_error(e)),
                };
                let stored_source = stored
                    .as_deref()
                    .and_then(|v| std::str::from_utf8(v).ok())
                    .and_then(|s| s.parse::<Source>().ok())
                    .unwrap_or(Source::LanguageAgent);
                if source > stored_source {
                    self.store_put(store, &key, source, ttl).await?;
                    Ok(true)
                } else {
                    self.metrics.duplicates_dropped.inc();
                    Ok(false)
                }
            }
            Err(e) => Err(self.store_error(e)),
        }
    }

    async fn store_put(
        &self,
        store: &Arc<dyn KvStore>,
        key: &[u8],
        source: Source,
        ttl: Option<Duration>,
    ) -> Result<(), StageError> {
        store
            .put(key, source.as_str().as_bytes(), ttl)
            .await
            .map_err(|e| self.store_error(e))
    }

    fn store_error(&self, e: fbc_store::Error) -> StageError {
        self.metrics.store_failures.inc();
        StageError::processing_failed(format!("dedup store: {e}"))
    }
}

impl Drop for DedupEngine {
    fn drop(&mut self) {
        if let Some((token, _handle)) = self.gc.lock().take() {
            token.cancel();
        }
    }
}

fn priority(record: &MetricRecord) -> Source {
    record.source.unwrap_or(Source::Hostmetrics)
}

#[async_trait]
impl StageProcessor for DedupEngine {
    fn fb_name(&self) -> &'static str {
        fb::DP
    }

    fn register_metrics(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        self.metrics.register(registry)
    }

    fn apply_params(&self, bytes: &[u8]) -> Result<(), StageError> {
        let params = DpParams::parse(bytes).map_err(|e| StageError::config_invalid(e.to_string()))?;
        params
            .validate()
            .map_err(|e| StageError::config_invalid(e.to_string()))?;

        let backing_changed = {
            let current = self.params.read();
            current.store != params.store
        };
        if backing_changed {
            let store: Arc<dyn KvStore> = match &params.store {
                DedupStoreParams::Memory => Arc::new(MemoryStore::new()),
                DedupStoreParams::Disk { path } => Arc::new(
                    SledStore::open(path)
                        .map_err(|e| StageError::config_invalid(format!("dedup store: {e}")))?,
                ),
            };
            self.install_store(store);
        }
        let mut guard = self.params.write();
        *guard = params;
        Ok(())
    }

    async fn process(&self, batch: &mut Batch) -> Result<Disposition, StageError> {
        let params = self.params.read().clone();
        let bypass = batch.replay && params.replays_bypass_dedup;
        let mut payload = MetricPayload::decode(&batch.format, &batch.data)
            .map_err(|e| StageError::invalid_input(e.to_string()))?;
        let store = self.current_store();
        let now = Instant::now();

        // Within-batch selection: collapse each fingerprint to its
        // highest-priority record, preserving first-seen positions.
        let mut kept: Vec<(Option<Vec<u8>>, MetricRecord)> = Vec::with_capacity(payload.records.len());
        let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
        for record in payload.records.drain(..) {
            match Fingerprint::from_record(&record, &*self.start_times) {
                None => {
                    self.metrics.no_identity.inc();
                    kept.push((None, record));
                }
                Some(fp) => {
                    let key = fp.store_key();
                    if let Some(&at) = index.get(&key) {
                        if priority(&record) > priority(&kept[at].1) {
                            kept[at].1 = record;
                        }
                        self.metrics.duplicates_dropped.inc();
                    } else {
                        let _ = index.insert(key.clone(), kept.len());
                        kept.push((Some(key), record));
                    }
                }
            }
        }

        // Cross-batch admission against the cache and the persistent store.
        let mut survivors = Vec::with_capacity(kept.len());
        for (key, record) in kept {
            match key {
                None => survivors.push(record),
                Some(key) => {
                    if bypass {
                        self.store_put(
                            &store,
                            &key,
                            priority(&record),
                            Some(params.dedup_ttl),
                        )
                        .await?;
                        survivors.push(record);
                    } else if self.admit(&record, key, &store, &params, now).await? {
                        survivors.push(record);
                    }
                }
            }
        }

        payload.records = survivors;
        batch.data = payload
            .encode()
            .map_err(|e| StageError::processing_failed(e.to_string()))?;
        Ok(Disposition::Forward)
    }

    async fn flush(&self) -> Result<(), StageError> {
        let store = self.current_store();
        store
            .flush()
            .await
            .map_err(|e| StageError::processing_failed(format!("dedup store flush: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::NoStartTimes;
    use fbc_runtime::ErrorCode;
    use fbc_store::{Error as StoreError, KvEntry, ScanRange};
    use std::collections::BTreeMap;

    fn engine() -> DedupEngine {
        DedupEngine::new(Arc::new(NoStartTimes)).unwrap()
    }

    fn record(source: Source, start: u64) -> MetricRecord {
        MetricRecord {
            name: "process.cpu.time".to_owned(),
            kind: "counter".to_owned(),
            value: 1.0,
            unit: None,
            attributes: BTreeMap::new(),
            source: Some(source),
            host_name: Some("h1".to_owned()),
            pid: Some(42),
            process_start_time_ns: Some(start),
            boot_id_ref: None,
            timestamp_unix_nanos: 1,
        }
    }

    fn batch_of(records: Vec<MetricRecord>) -> Batch {
        let payload = MetricPayload {
            resource: BTreeMap::new(),
            records,
        };
        Batch {
            batch_id: "b1".to_owned(),
            data: payload.encode().unwrap(),
            format: fbc_pdata::FORMAT_JSON_V1.to_owned(),
            ..Batch::default()
        }
    }

    fn decode(batch: &Batch) -> MetricPayload {
        MetricPayload::decode(&batch.format, &batch.data).unwrap()
    }

    #[tokio::test]
    async fn within_batch_priority_selection_keeps_language_agent() {
        let engine = engine();
        let mut batch = batch_of(vec![
            record(Source::Hostmetrics, 7),
            record(Source::EdgeProbe, 7),
            record(Source::LanguageAgent, 7),
        ]);
        let disposition = engine.process(&mut batch).await.unwrap();
        assert_eq!(disposition, Disposition::Forward);
        let payload = decode(&batch);
        assert_eq!(payload.records.len(), 1);
        assert_eq!(payload.records[0].source, Some(Source::LanguageAgent));
        assert_eq!(engine.metrics.duplicates_dropped.get(), 2);
    }

    #[tokio::test]
    async fn cross_batch_lower_priority_is_dropped() {
        let engine = engine();
        let mut first = batch_of(vec![record(Source::LanguageAgent, 7)]);
        let _ = engine.process(&mut first).await.unwrap();
        let mut second = batch_of(vec![record(Source::Hostmetrics, 7)]);
        let _ = engine.process(&mut second).await.unwrap();
        assert!(decode(&second).records.is_empty());
        assert_eq!(engine.metrics.duplicates_dropped.get(), 1);
    }

    #[tokio::test]
    async fn cross_batch_higher_priority_displaces() {
        let engine = engine();
        let mut first = batch_of(vec![record(Source::Hostmetrics, 7)]);
        let _ = engine.process(&mut first).await.unwrap();
        let mut second = batch_of(vec![record(Source::LanguageAgent, 7)]);
        let _ = engine.process(&mut second).await.unwrap();
        assert_eq!(decode(&second).records.len(), 1);
    }

    #[tokio::test]
    async fn repeated_same_source_is_dropped() {
        let engine = engine();
        let mut first = batch_of(vec![record(Source::EdgeProbe, 7)]);
        let _ = engine.process(&mut first).await.unwrap();
        let mut second = batch_of(vec![record(Source::EdgeProbe, 7)]);
        let _ = engine.process(&mut second).await.unwrap();
        assert!(decode(&second).records.is_empty());
    }

    #[tokio::test]
    async fn no_identity_records_pass_through_with_counter() {
        let engine = engine();
        let mut anonymous = record(Source::Hostmetrics, 7);
        anonymous.process_start_time_ns = None;
        anonymous.host_name = None;
        let mut batch = batch_of(vec![anonymous]);
        let _ = engine.process(&mut batch).await.unwrap();
        assert_eq!(decode(&batch).records.len(), 1);
        assert_eq!(engine.metrics.no_identity.get(), 1);
    }

    #[tokio::test]
    async fn replays_bypass_the_duplicate_check_by_default() {
        let engine = engine();
        let mut first = batch_of(vec![record(Source::LanguageAgent, 7)]);
        let _ = engine.process(&mut first).await.unwrap();
        let mut replayed = batch_of(vec![record(Source::LanguageAgent, 7)]);
        replayed.replay = true;
        let _ = engine.process(&mut replayed).await.unwrap();
        assert_eq!(decode(&replayed).records.len(), 1);
    }

    #[tokio::test]
    async fn replays_dedup_when_bypass_disabled() {
        let engine = engine();
        engine
            .apply_params(br#"{ "replays_bypass_dedup": false }"#)
            .unwrap();
        let mut first = batch_of(vec![record(Source::LanguageAgent, 7)]);
        let _ = engine.process(&mut first).await.unwrap();
        let mut replayed = batch_of(vec![record(Source::LanguageAgent, 7)]);
        replayed.replay = true;
        let _ = engine.process(&mut replayed).await.unwrap();
        assert!(decode(&replayed).records.is_empty());
    }

    #[tokio::test]
    async fn disk_backing_survives_engine_restart() {
        let dir = tempfile::tempdir().unwrap();
        let params = format!(
            r#"{{ "store": {{ "backing": "disk", "path": "{}" }} }}"#,
            dir.path().display()
        );
        {
            let engine = engine();
            engine.apply_params(params.as_bytes()).unwrap();
            let mut first = batch_of(vec![record(Source::LanguageAgent, 7)]);
            let _ = engine.process(&mut first).await.unwrap();
            engine.flush().await.unwrap();
            engine.current_store().close().await.unwrap();
        }
        // Let the cancelled GC task release its store handle before reopening.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let engine = engine();
        engine.apply_params(params.as_bytes()).unwrap();
        let mut second = batch_of(vec![record(Source::LanguageAgent, 7)]);
        let _ = engine.process(&mut second).await.unwrap();
        assert!(decode(&second).records.is_empty());
    }

    struct FailingStore;

    #[async_trait]
    impl KvStore for FailingStore {
        async fn put_if_absent(
            &self,
            _key: &[u8],
            _value: &[u8],
            _ttl: Option<Duration>,
        ) -> Result<PutOutcome, StoreError> {
            Err(StoreError::Backend {
                details: "disk on fire".to_owned(),
            })
        }

        async fn put(&self, _k: &[u8], _v: &[u8], _t: Option<Duration>) -> Result<(), StoreError> {
            Err(StoreError::Backend {
                details: "disk on fire".to_owned(),
            })
        }

        async fn get(&self, _k: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Backend {
                details: "disk on fire".to_owned(),
            })
        }

        async fn delete(&self, _k: &[u8]) -> Result<(), StoreError> {
            Ok(())
        }

        async fn scan(&self, _r: ScanRange) -> Result<Vec<KvEntry>, StoreError> {
            Ok(Vec::new())
        }

        async fn count(&self) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn sweep(&self) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn flush(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn store_failure_fails_the_batch() {
        let engine = engine();
        engine.install_store(Arc::new(FailingStore));
        let mut batch = batch_of(vec![record(Source::LanguageAgent, 7)]);
        let err = engine.process(&mut batch).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ProcessingFailed);
        assert_eq!(engine.metrics.store_failures.get(), 1);
    }

    #[tokio::test]
    async fn unknown_format_is_invalid_input() {
        let engine = engine();
        let mut batch = Batch {
            format: "otlp/protobuf".to_owned(),
            data: b"{}".to_vec(),
            ..Batch::default()
        };
        let err = engine.process(&mut batch).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }
}
