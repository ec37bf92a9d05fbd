// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The durable record store and its iteration contract.
//!
//! Live records sit under their time-sortable `record_id` keys; poison pills
//! are moved under the `poison/` keyspace and skipped by normal scans.

use crate::error::Error;
use crate::record::DlqRecord;
use chrono::{DateTime, Utc};
use fbc_store::{KvStore, MemoryStore, ScanRange, SledStore};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Record keys start with a zero-padded digit; everything at `:` and beyond
/// (including `poison/`) is outside the live keyspace.
const LIVE_KEYSPACE_END: &[u8] = b":";
const POISON_PREFIX: &str = "poison/";

/// Exact-match filter for scans, per the replayer contract.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Only records captured at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only records captured strictly before this instant.
    pub until: Option<DateTime<Utc>>,
    /// Only records with this taxonomy code.
    pub error_code: Option<String>,
    /// Only records routed by this stage.
    pub fb_sender: Option<String>,
}

impl ScanFilter {
    fn matches(&self, record: &DlqRecord) -> bool {
        if let Some(code) = &self.error_code {
            if &record.error_code != code {
                return false;
            }
        }
        if let Some(sender) = &self.fb_sender {
            if &record.fb_sender != sender {
                return false;
            }
        }
        true
    }

    fn key_range(&self) -> ScanRange {
        let bound = |at: &DateTime<Utc>| {
            let nanos = at.timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
            format!("{nanos:020}").into_bytes()
        };
        ScanRange {
            start: self.since.as_ref().map(bound),
            end: Some(
                self.until
                    .as_ref()
                    .map(bound)
                    .unwrap_or_else(|| LIVE_KEYSPACE_END.to_vec()),
            ),
            limit: None,
        }
    }
}

/// Aggregated contents, for the inventory tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    /// Live records.
    pub records: u64,
    /// Quarantined poison pills.
    pub poison: u64,
    /// Live records per taxonomy code.
    pub by_error_code: BTreeMap<String, u64>,
    /// Live records per sending stage.
    pub by_fb_sender: BTreeMap<String, u64>,
}

/// The DLQ record store.
#[derive(Clone)]
pub struct DlqStore {
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for DlqStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DlqStore").finish_non_exhaustive()
    }
}

impl DlqStore {
    /// Opens the persistent store at `path`.
    pub fn open_disk(path: &Path) -> Result<Self, Error> {
        Ok(Self {
            store: Arc::new(SledStore::open(path)?),
        })
    }

    /// An in-memory store for tests and ephemeral deployments.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// Durably appends one record.
    pub async fn append(&self, record: &DlqRecord) -> Result<(), Error> {
        let value = serde_json::to_vec(record)?;
        self.store
            .put(record.record_id.as_bytes(), &value, None)
            .await?;
        Ok(())
    }

    /// Moves a record into the poison keyspace.
    pub async fn quarantine(&self, record: &DlqRecord) -> Result<(), Error> {
        let value = serde_json::to_vec(record)?;
        let key = format!("{POISON_PREFIX}{}", record.record_id);
        self.store.put(key.as_bytes(), &value, None).await?;
        self.store.delete(record.record_id.as_bytes()).await?;
        Ok(())
    }

    /// Scans live records matching the filter, in capture order.
    pub async fn scan(&self, filter: &ScanFilter) -> Result<Vec<DlqRecord>, Error> {
        let entries = self.store.scan(filter.key_range()).await?;
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            let record: DlqRecord = serde_json::from_slice(&entry.value)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Deletes one live record; deleting an absent record is not an error.
    pub async fn delete(&self, record_id: &str) -> Result<(), Error> {
        self.store.delete(record_id.as_bytes()).await?;
        Ok(())
    }

    /// Counts live and poison records and aggregates live ones.
    pub async fn inventory(&self) -> Result<Inventory, Error> {
        let mut inventory = Inventory::default();
        for record in self.scan(&ScanFilter::default()).await? {
            inventory.records += 1;
            *inventory
                .by_error_code
                .entry(record.error_code.clone())
                .or_insert(0) += 1;
            *inventory
                .by_fb_sender
                .entry(record.fb_sender.clone())
                .or_insert(0) += 1;
        }
        let poison = self
            .store
            .scan(ScanRange::prefix(POISON_PREFIX.as_bytes()))
            .await?;
        inventory.poison = poison.len() as u64;
        Ok(inventory)
    }

    /// Flushes the backing store.
    pub async fn flush(&self) -> Result<(), Error> {
        self.store.flush().await?;
        Ok(())
    }

    /// Flushes and closes the backing store.
    pub async fn close(&self) -> Result<(), Error> {
        self.store.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbc_proto::proto::chain::v1::MetricBatch;

    fn record_at(batch_id: &str, at: DateTime<Utc>, code: &str, sender: &str) -> DlqRecord {
        let mut batch = MetricBatch {
            batch_id: batch_id.to_owned(),
            data: b"{}".to_vec(),
            format: "fbmetrics/json/v1".to_owned(),
            ..MetricBatch::default()
        };
        let _ = batch
            .internal_labels
            .insert("error_code".to_owned(), code.to_owned());
        let _ = batch
            .internal_labels
            .insert("fb_sender".to_owned(), sender.to_owned());
        DlqRecord::from_batch(&batch, at)
    }

    #[tokio::test]
    async fn write_then_scan_returns_the_record() {
        let store = DlqStore::in_memory();
        let record = record_at("b1", Utc::now(), "FORWARDING_FAILED", "fb-dp");
        store.append(&record).await.unwrap();
        let scanned = store.scan(&ScanFilter::default()).await.unwrap();
        assert_eq!(scanned, vec![record]);
    }

    #[tokio::test]
    async fn filters_are_exact() {
        let store = DlqStore::in_memory();
        let base = Utc::now();
        let early = record_at("b1", base - chrono::Duration::minutes(10), "FORWARDING_FAILED", "fb-dp");
        let mid = record_at("b2", base, "PII_LEAK", "fb-cl");
        let late = record_at("b3", base + chrono::Duration::minutes(10), "FORWARDING_FAILED", "fb-rx");
        for r in [&early, &mid, &late] {
            store.append(r).await.unwrap();
        }

        let by_code = store
            .scan(&ScanFilter {
                error_code: Some("FORWARDING_FAILED".to_owned()),
                ..ScanFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_code.len(), 2);

        let by_sender = store
            .scan(&ScanFilter {
                fb_sender: Some("fb-cl".to_owned()),
                ..ScanFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_sender.len(), 1);
        assert_eq!(by_sender[0].batch_id, "b2");

        let windowed = store
            .scan(&ScanFilter {
                since: Some(base - chrono::Duration::minutes(1)),
                until: Some(base + chrono::Duration::minutes(1)),
                ..ScanFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].batch_id, "b2");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = DlqStore::in_memory();
        let record = record_at("b1", Utc::now(), "PII_LEAK", "fb-cl");
        store.append(&record).await.unwrap();
        store.delete(&record.record_id).await.unwrap();
        store.delete(&record.record_id).await.unwrap();
        assert!(store.scan(&ScanFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quarantined_records_leave_the_live_keyspace() {
        let store = DlqStore::in_memory();
        let record = record_at("b1", Utc::now(), "INVALID_INPUT", "fb-gw");
        store.append(&record).await.unwrap();
        store.quarantine(&record).await.unwrap();
        assert!(store.scan(&ScanFilter::default()).await.unwrap().is_empty());
        let inventory = store.inventory().await.unwrap();
        assert_eq!(inventory.records, 0);
        assert_eq!(inventory.poison, 1);
    }

    #[tokio::test]
    async fn inventory_aggregates_by_code_and_sender() {
        let store = DlqStore::in_memory();
        let now = Utc::now();
        store
            .append(&record_at("b1", now, "FORWARDING_FAILED", "fb-dp"))
            .await
            .unwrap();
        store
            .append(&record_at("b2", now + chrono::Duration::seconds(1), "FORWARDING_FAILED", "fb-dp"))
            .await
            .unwrap();
        store
            .append(&record_at("b3", now + chrono::Duration::seconds(2), "PII_LEAK", "fb-cl"))
            .await
            .unwrap();
        let inventory = store.inventory().await.unwrap();
        assert_eq!(inventory.records, 3);
        assert_eq!(inventory.by_error_code["FORWARDING_FAILED"], 2);
        assert_eq!(inventory.by_fb_sender["fb-cl"], 1);
    }
}
