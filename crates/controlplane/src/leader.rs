// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Leader election over a lease resource.
//!
//! Only the leader distributes configuration. The lease contract is the
//! seam; the in-tree backend is a file lease acquired by atomic rename. On
//! loss of leadership the process terminates itself to force re-election
//! rather than continuing as a follower.

use crate::error::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Lease parameters, mirroring the orchestrator lease resource shape.
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Lease name.
    pub name: String,
    /// Namespace the lease lives in.
    pub namespace: String,
    /// This candidate's identity.
    pub identity: String,
    /// How long an acquisition is valid without renewal.
    pub lease_duration: Duration,
    /// How often the holder renews.
    pub renew_deadline: Duration,
    /// How long non-holders wait between acquisition attempts.
    pub retry_period: Duration,
}

impl LeaseConfig {
    /// A config with conventional timings for `identity`.
    pub fn new(name: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: "default".to_owned(),
            identity: identity.into(),
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(5),
            retry_period: Duration::from_secs(2),
        }
    }
}

/// The lease contract.
#[async_trait]
pub trait Lease: Send + Sync + 'static {
    /// Attempts to acquire (or re-acquire) the lease. Returns true when this
    /// candidate now holds it.
    async fn try_acquire(&self) -> Result<bool, Error>;

    /// Renews a held lease. Returns false when the lease was lost.
    async fn renew(&self) -> Result<bool, Error>;

    /// This candidate's identity.
    fn identity(&self) -> &str;

    /// The lease timings.
    fn config(&self) -> &LeaseConfig;
}

#[derive(Debug, Serialize, Deserialize)]
struct LeaseDocument {
    name: String,
    namespace: String,
    holder: String,
    acquired_at: DateTime<Utc>,
    renewed_at: DateTime<Utc>,
    lease_duration_secs: u64,
}

/// File-backed lease: acquisition writes a holder document via atomic
/// rename. Suitable for single-host deployments; orchestrator leases
/// implement [`Lease`] externally.
#[derive(Debug)]
pub struct FileLease {
    path: PathBuf,
    config: LeaseConfig,
}

impl FileLease {
    /// A lease stored at `path`.
    pub fn new(path: PathBuf, config: LeaseConfig) -> Self {
        Self { path, config }
    }

    fn read(&self) -> Result<Option<LeaseDocument>, Error> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| Error::Lease {
                details: format!("corrupt lease document: {e}"),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Lease {
                details: e.to_string(),
            }),
        }
    }

    fn write(&self, doc: &LeaseDocument) -> Result<(), Error> {
        let bytes = serde_json::to_vec_pretty(doc).map_err(|e| Error::Lease {
            details: e.to_string(),
        })?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes).map_err(|e| Error::Lease {
            details: e.to_string(),
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| Error::Lease {
            details: e.to_string(),
        })
    }

    fn expired(doc: &LeaseDocument, now: DateTime<Utc>) -> bool {
        let valid_for = chrono::Duration::seconds(doc.lease_duration_secs as i64);
        doc.renewed_at + valid_for < now
    }
}

#[async_trait]
impl Lease for FileLease {
    async fn try_acquire(&self) -> Result<bool, Error> {
        let now = Utc::now();
        if let Some(doc) = self.read()? {
            if doc.holder != self.config.identity && !Self::expired(&doc, now) {
                return Ok(false);
            }
        }
        self.write(&LeaseDocument {
            name: self.config.name.clone(),
            namespace: self.config.namespace.clone(),
            holder: self.config.identity.clone(),
            acquired_at: now,
            renewed_at: now,
            lease_duration_secs: self.config.lease_duration.as_secs(),
        })?;
        Ok(true)
    }

    async fn renew(&self) -> Result<bool, Error> {
        let now = Utc::now();
        let Some(mut doc) = self.read()? else {
            return Ok(false);
        };
        if doc.holder != self.config.identity || Self::expired(&doc, now) {
            return Ok(false);
        }
        doc.renewed_at = now;
        self.write(&doc)?;
        Ok(true)
    }

    fn identity(&self) -> &str {
        &self.config.identity
    }

    fn config(&self) -> &LeaseConfig {
        &self.config
    }
}

/// Blocks until the lease is acquired (or `cancel` fires).
pub async fn acquire_leadership(lease: &dyn Lease, cancel: &CancellationToken) -> Result<(), Error> {
    let timings = lease.config().clone();
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        match lease.try_acquire().await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "lease acquisition failed"),
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(timings.retry_period) => {}
        }
    }
    tracing::info!(identity = lease.identity(), "acquired leadership");
    Ok(())
}

/// Keeps a held lease renewed.
///
/// Returns `Ok(())` when `cancel` fires, `Err(LeadershipLost)` when a
/// renewal fails — the caller must exit the process.
pub async fn renewal_loop(lease: &dyn Lease, cancel: &CancellationToken) -> Result<(), Error> {
    let timings = lease.config().clone();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(timings.renew_deadline) => {
                match lease.renew().await {
                    Ok(true) => {}
                    Ok(false) => {
                        return Err(Error::LeadershipLost {
                            identity: lease.identity().to_owned(),
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "lease renewal failed");
                        return Err(Error::LeadershipLost {
                            identity: lease.identity().to_owned(),
                        });
                    }
                }
            }
        }
    }
}
