// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Uniform key-value capability.
//!
//! The dedup store, the DLQ record store, and the gateway sending queue all
//! sit behind the same contract: TTL'd atomic insert, ordered scans, and
//! explicit flush/close. Two backings exist — an in-memory map with periodic
//! sweep and a persistent on-disk store that survives restarts — and they are
//! interchangeable; correctness never depends on the backing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod disk;
pub mod error;
pub mod memory;

pub use disk::SledStore;
pub use error::Error;
pub use memory::MemoryStore;

/// Result of an atomic insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The key was not present (or had expired) and was inserted.
    Inserted,
    /// A live entry already holds the key.
    AlreadyPresent,
}

/// One scanned entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    /// The entry key.
    pub key: Vec<u8>,
    /// The entry value.
    pub value: Vec<u8>,
}

/// Key range for [`KvStore::scan`]; `None` bounds are open.
#[derive(Debug, Clone, Default)]
pub struct ScanRange {
    /// Inclusive lower bound.
    pub start: Option<Vec<u8>>,
    /// Exclusive upper bound.
    pub end: Option<Vec<u8>>,
    /// Maximum number of entries returned.
    pub limit: Option<usize>,
}

impl ScanRange {
    /// A range covering every key under `prefix`.
    pub fn prefix(prefix: &[u8]) -> Self {
        let mut end = prefix.to_vec();
        // The smallest key strictly greater than every prefixed key.
        for i in (0..end.len()).rev() {
            if end[i] < u8::MAX {
                end[i] += 1;
                end.truncate(i + 1);
                return Self {
                    start: Some(prefix.to_vec()),
                    end: Some(end),
                    limit: None,
                };
            }
        }
        Self {
            start: Some(prefix.to_vec()),
            end: None,
            limit: None,
        }
    }

    /// Caps the number of returned entries.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// The store contract shared by all backings.
///
/// Scan ordering is lexicographic by key in every backing; callers that need
/// time-sorted scans encode time into their keys.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomic check-then-set: inserts unless a live entry holds the key.
    async fn put_if_absent(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<PutOutcome, Error>;

    /// Unconditional write.
    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<(), Error>;

    /// Returns the live value for `key`, if any.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

    /// Returns true when a live entry holds the key.
    async fn has(&self, key: &[u8]) -> Result<bool, Error> {
        Ok(self.get(key).await?.is_some())
    }

    /// Removes the key; removing an absent key is not an error.
    async fn delete(&self, key: &[u8]) -> Result<(), Error>;

    /// Ordered scan over live entries.
    async fn scan(&self, range: ScanRange) -> Result<Vec<KvEntry>, Error>;

    /// Number of entries, including not-yet-swept expired ones.
    async fn count(&self) -> Result<u64, Error>;

    /// Removes expired entries; returns how many were dropped.
    async fn sweep(&self) -> Result<u64, Error>;

    /// Persists pending writes (no-op for the in-memory backing).
    async fn flush(&self) -> Result<(), Error>;

    /// Flushes and marks the store closed.
    async fn close(&self) -> Result<(), Error>;
}

/// Spawns the periodic garbage-collection task for a store.
///
/// The task sweeps expired entries at a fixed interval until the token is
/// cancelled, then performs a final flush.
pub fn spawn_gc(
    store: Arc<dyn KvStore>,
    every: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    match store.sweep().await {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!(removed = n, "store sweep dropped expired entries"),
                        Err(e) => tracing::warn!(error = %e, "store sweep failed"),
                    }
                }
            }
        }
        if let Err(e) = store.flush().await {
            tracing::warn!(error = %e, "final store flush failed");
        }
    })
}
