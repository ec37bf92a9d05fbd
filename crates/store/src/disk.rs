// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Persistent backing over an embedded ordered key-value store.
//!
//! Entries carry an expiry header so TTLs survive restarts; the periodic
//! sweep doubles as value-log garbage collection.

use crate::error::Error;
use crate::{KvEntry, KvStore, PutOutcome, ScanRange};
use async_trait::async_trait;
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Size of the expiry header prepended to every stored value.
const HEADER_LEN: usize = 8;

/// The persistent [`KvStore`] backing.
pub struct SledStore {
    db: sled::Db,
    closed: AtomicBool,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish_non_exhaustive()
    }
}

impl SledStore {
    /// Opens (or creates) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn encode(value: &[u8], ttl: Option<Duration>) -> Vec<u8> {
    let expires_at = ttl
        .map(|t| now_nanos().saturating_add(t.as_nanos() as u64))
        .unwrap_or(0);
    let mut buf = Vec::with_capacity(HEADER_LEN + value.len());
    buf.extend_from_slice(&expires_at.to_be_bytes());
    buf.extend_from_slice(value);
    buf
}

fn is_expired(raw: &[u8], now: u64) -> bool {
    if raw.len() < HEADER_LEN {
        return true;
    }
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&raw[..HEADER_LEN]);
    let expires_at = u64::from_be_bytes(header);
    expires_at != 0 && expires_at <= now
}

fn payload(raw: &[u8]) -> Vec<u8> {
    raw[HEADER_LEN..].to_vec()
}

#[async_trait]
impl KvStore for SledStore {
    async fn put_if_absent(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<PutOutcome, Error> {
        self.ensure_open()?;
        let encoded = encode(value, ttl);
        let now = now_nanos();
        loop {
            let current = self.db.get(key)?;
            if let Some(raw) = &current {
                if !is_expired(raw, now) {
                    return Ok(PutOutcome::AlreadyPresent);
                }
            }
            let swap = self
                .db
                .compare_and_swap(key, current, Some(encoded.clone()))?;
            if swap.is_ok() {
                return Ok(PutOutcome::Inserted);
            }
            // Lost a race with a concurrent writer; re-read and retry.
        }
    }

    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<(), Error> {
        self.ensure_open()?;
        let _ = self.db.insert(key, encode(value, ttl))?;
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        self.ensure_open()?;
        let now = now_nanos();
        Ok(self
            .db
            .get(key)?
            .filter(|raw| !is_expired(raw, now))
            .map(|raw| payload(&raw)))
    }

    async fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.ensure_open()?;
        let _ = self.db.remove(key)?;
        Ok(())
    }

    async fn scan(&self, range: ScanRange) -> Result<Vec<KvEntry>, Error> {
        self.ensure_open()?;
        let now = now_nanos();
        let start = match &range.start {
            Some(s) => Bound::Included(s.clone()),
            None => Bound::Unbounded,
        };
        let end = match &range.end {
            Some(e) => Bound::Excluded(e.clone()),
            None => Bound::Unbounded,
        };
        let limit = range.limit.unwrap_or(usize::MAX);
        let mut entries = Vec::new();
        for item in self.db.range((start, end)) {
            let (key, raw) = item?;
            if is_expired(&raw, now) {
                continue;
            }
            entries.push(KvEntry {
                key: key.to_vec(),
                value: payload(&raw),
            });
            if entries.len() >= limit {
                break;
            }
        }
        Ok(entries)
    }

    async fn count(&self) -> Result<u64, Error> {
        self.ensure_open()?;
        Ok(self.db.len() as u64)
    }

    async fn sweep(&self) -> Result<u64, Error> {
        self.ensure_open()?;
        let now = now_nanos();
        let mut removed = 0u64;
        for item in self.db.iter() {
            let (key, raw) = item?;
            if is_expired(&raw, now) {
                let _ = self.db.remove(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn flush(&self) -> Result<(), Error> {
        self.ensure_open()?;
        let _ = self.db.flush_async().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.db.flush_async().await?;
        Ok(())
    }
}
