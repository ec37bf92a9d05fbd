// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Process-instance identity.
//!
//! The preferred key is `(host_name, pid, process_start_time_ns)`; when the
//! start time is absent the stage tries host-side derivation from the OS
//! process table, and failing that falls back to `(host_name, pid,
//! boot_id_ref)`. Records with neither identity pass through undeduplicated.

use fbc_pdata::MetricRecord;
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// The dedup key of one process instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    /// Preferred identity: start time pins the process instance exactly.
    StartTime {
        /// Host the process runs on.
        host_name: String,
        /// Process id.
        pid: u32,
        /// Start time in nanoseconds since the epoch.
        process_start_time_ns: u64,
    },
    /// Fallback identity: boot id bounds pid reuse to one boot.
    BootId {
        /// Host the process runs on.
        host_name: String,
        /// Process id.
        pid: u32,
        /// Boot-id reference.
        boot_id_ref: String,
    },
}

impl Fingerprint {
    /// Derives the fingerprint for a record, using `start_times` when the
    /// record lacks `process_start_time_ns`. Returns `None` when the record
    /// has no usable identity.
    pub fn from_record(
        record: &MetricRecord,
        start_times: &dyn StartTimeSource,
    ) -> Option<Self> {
        let host_name = record.host_name.clone()?;
        let pid = record.pid?;
        if let Some(start) = record
            .process_start_time_ns
            .or_else(|| start_times.start_time_ns(pid))
        {
            return Some(Fingerprint::StartTime {
                host_name,
                pid,
                process_start_time_ns: start,
            });
        }
        record.boot_id_ref.clone().map(|boot_id_ref| Fingerprint::BootId {
            host_name,
            pid,
            boot_id_ref,
        })
    }

    /// Stable store key for this fingerprint.
    pub fn store_key(&self) -> Vec<u8> {
        match self {
            Fingerprint::StartTime {
                host_name,
                pid,
                process_start_time_ns,
            } => format!("st/{host_name}/{pid}/{process_start_time_ns}").into_bytes(),
            Fingerprint::BootId {
                host_name,
                pid,
                boot_id_ref,
            } => format!("bi/{host_name}/{pid}/{boot_id_ref}").into_bytes(),
        }
    }
}

/// Host-side process start-time lookup.
pub trait StartTimeSource: Send + Sync {
    /// Start time of `pid` in nanoseconds since the epoch, if known.
    fn start_time_ns(&self, pid: u32) -> Option<u64>;
}

/// Looks start times up in the local OS process table. Only useful when the
/// engine is co-located with the emitting processes.
pub struct ProcessTable {
    system: Mutex<System>,
}

impl std::fmt::Debug for ProcessTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTable").finish_non_exhaustive()
    }
}

impl ProcessTable {
    /// Creates an empty table; processes are refreshed on demand.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StartTimeSource for ProcessTable {
    fn start_time_ns(&self, pid: u32) -> Option<u64> {
        let mut system = self.system.lock();
        let target = Pid::from_u32(pid);
        let _ = system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        system
            .process(target)
            .map(|p| p.start_time().saturating_mul(1_000_000_000))
    }
}

/// A source that never resolves; used where derivation is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStartTimes;

impl StartTimeSource for NoStartTimes {
    fn start_time_ns(&self, _pid: u32) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(
        host: Option<&str>,
        pid: Option<u32>,
        start: Option<u64>,
        boot: Option<&str>,
    ) -> MetricRecord {
        MetricRecord {
            name: "process.cpu.time".to_owned(),
            kind: "counter".to_owned(),
            value: 1.0,
            unit: None,
            attributes: BTreeMap::new(),
            source: None,
            host_name: host.map(str::to_owned),
            pid,
            process_start_time_ns: start,
            boot_id_ref: boot.map(str::to_owned),
            timestamp_unix_nanos: 1,
        }
    }

    #[test]
    fn prefers_start_time_identity() {
        let fp = Fingerprint::from_record(
            &record(Some("h1"), Some(42), Some(123), Some("boot-a")),
            &NoStartTimes,
        )
        .expect("fingerprint");
        assert!(matches!(fp, Fingerprint::StartTime { .. }));
        assert_eq!(fp.store_key(), b"st/h1/42/123".to_vec());
    }

    #[test]
    fn falls_back_to_boot_id_only_without_start_time() {
        let fp = Fingerprint::from_record(
            &record(Some("h1"), Some(42), None, Some("boot-a")),
            &NoStartTimes,
        )
        .expect("fingerprint");
        assert_eq!(fp.store_key(), b"bi/h1/42/boot-a".to_vec());
    }

    #[test]
    fn derived_start_time_wins_over_boot_id() {
        struct Fixed;
        impl StartTimeSource for Fixed {
            fn start_time_ns(&self, _pid: u32) -> Option<u64> {
                Some(999)
            }
        }
        let fp = Fingerprint::from_record(
            &record(Some("h1"), Some(42), None, Some("boot-a")),
            &Fixed,
        )
        .expect("fingerprint");
        assert_eq!(fp.store_key(), b"st/h1/42/999".to_vec());
    }

    #[test]
    fn no_identity_yields_none() {
        assert!(Fingerprint::from_record(&record(Some("h1"), Some(42), None, None), &NoStartTimes).is_none());
        assert!(Fingerprint::from_record(&record(None, Some(42), Some(1), None), &NoStartTimes).is_none());
        assert!(Fingerprint::from_record(&record(Some("h1"), None, Some(1), None), &NoStartTimes).is_none());
    }
}
