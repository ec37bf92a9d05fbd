// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! In-memory backing: a swept map, suitable for single-replica deployments
//! and tests. Contents do not survive restarts.

use crate::error::Error;
use crate::{KvEntry, KvStore, PutOutcome, ScanRange};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// The in-memory [`KvStore`] backing.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Entry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put_if_absent(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<PutOutcome, Error> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(key) {
            if !existing.is_expired(now) {
                return Ok(PutOutcome::AlreadyPresent);
            }
        }
        let _ = entries.insert(
            key.to_vec(),
            Entry {
                value: value.to_vec(),
                expires_at: ttl.map(|t| now + t),
            },
        );
        Ok(PutOutcome::Inserted)
    }

    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<(), Error> {
        let now = Instant::now();
        let _ = self.entries.write().insert(
            key.to_vec(),
            Entry {
                value: value.to_vec(),
                expires_at: ttl.map(|t| now + t),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &[u8]) -> Result<(), Error> {
        let _ = self.entries.write().remove(key);
        Ok(())
    }

    async fn scan(&self, range: ScanRange) -> Result<Vec<KvEntry>, Error> {
        let now = Instant::now();
        let entries = self.entries.read();
        let start = match &range.start {
            Some(s) => Bound::Included(s.clone()),
            None => Bound::Unbounded,
        };
        let end = match &range.end {
            Some(e) => Bound::Excluded(e.clone()),
            None => Bound::Unbounded,
        };
        let limit = range.limit.unwrap_or(usize::MAX);
        Ok(entries
            .range((start, end))
            .filter(|(_, e)| !e.is_expired(now))
            .take(limit)
            .map(|(k, e)| KvEntry {
                key: k.clone(),
                value: e.value.clone(),
            })
            .collect())
    }

    async fn count(&self) -> Result<u64, Error> {
        Ok(self.entries.read().len() as u64)
    }

    async fn sweep(&self) -> Result<u64, Error> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok((before - entries.len()) as u64)
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}
