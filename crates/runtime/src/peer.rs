// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Downstream peer connections.
//!
//! A [`PeerSlot`] holds the desired address and the live client for one
//! downstream (next stage or DLQ). Dialing never happens on the hot path: a
//! background task owns (re)connection with jittered bounded backoff, and the
//! hot path only loads whatever connection is currently installed.

use arc_swap::ArcSwapOption;
use fbc_proto::proto::chain::v1::chain_push_service_client::ChainPushServiceClient;
use prometheus::IntGauge;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

/// A live connection to one peer.
#[derive(Debug, Clone)]
pub struct PeerConn {
    /// The address the connection was dialed against.
    pub addr: String,
    /// The gRPC client; cloning is cheap and per-call.
    pub client: ChainPushServiceClient<Channel>,
}

/// Connection state for one downstream peer.
pub struct PeerSlot {
    role: &'static str,
    desired: ArcSwapOption<String>,
    conn: ArcSwapOption<PeerConn>,
    notify: Notify,
    active_connections: IntGauge,
}

impl std::fmt::Debug for PeerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSlot")
            .field("role", &self.role)
            .field("desired", &self.desired.load())
            .finish_non_exhaustive()
    }
}

impl PeerSlot {
    /// Creates an empty slot; `role` names the peer in logs (`next`, `dlq`).
    pub fn new(role: &'static str, active_connections: IntGauge) -> Self {
        Self {
            role,
            desired: ArcSwapOption::empty(),
            conn: ArcSwapOption::empty(),
            notify: Notify::new(),
            active_connections,
        }
    }

    /// Updates the desired address; the reconnect task picks the change up.
    pub fn set_address(&self, addr: Option<String>) {
        let changed = match (&*self.desired.load(), &addr) {
            (Some(current), Some(next)) => current.as_ref() != next,
            (None, None) => false,
            _ => true,
        };
        self.desired.store(addr.map(Arc::new));
        if changed {
            self.notify.notify_one();
        }
    }

    /// The currently installed connection, if any.
    pub fn client(&self) -> Option<Arc<PeerConn>> {
        self.conn.load_full()
    }

    /// Drops the installed connection if it still points at `addr`, waking
    /// the reconnect task. Called when a call observes a broken transport.
    pub fn mark_broken(&self, addr: &str) {
        let current = self.conn.load_full();
        if let Some(conn) = current {
            if conn.addr == addr {
                self.clear_conn();
                self.notify.notify_one();
            }
        }
    }

    fn install(&self, addr: String, client: ChainPushServiceClient<Channel>) {
        let previous = self.conn.swap(Some(Arc::new(PeerConn { addr, client })));
        if previous.is_none() {
            self.active_connections.inc();
        }
    }

    fn clear_conn(&self) {
        let previous = self.conn.swap(None);
        if previous.is_some() {
            self.active_connections.dec();
        }
    }
}

/// Reconnection backoff: exponential with jitter, bounded by `cap`.
#[derive(Debug)]
struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next(&mut self) -> Duration {
        let exp = self.base.saturating_mul(1u32 << self.attempt.min(16));
        self.attempt = self.attempt.saturating_add(1);
        let capped = exp.min(self.cap);
        let jitter = rand::rng().random_range(0.5..=1.0);
        capped.mul_f64(jitter)
    }
}

/// Spawns the background (re)connection task for a slot.
pub fn spawn_reconnect(slot: Arc<PeerSlot>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(10));
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let desired = slot.desired.load_full();
            let connected = slot.conn.load_full();
            match (desired, connected) {
                (None, Some(_)) => {
                    slot.clear_conn();
                }
                (Some(addr), Some(conn)) if conn.addr == *addr => {
                    // Connected where we want to be; wait for a change.
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = slot.notify.notified() => {}
                    }
                }
                (Some(addr), _) => {
                    match ChainPushServiceClient::connect((*addr).clone()).await {
                        Ok(client) => {
                            tracing::info!(peer = slot.role, addr = %addr, "connected to downstream peer");
                            slot.install((*addr).clone(), client);
                            backoff.reset();
                        }
                        Err(e) => {
                            let delay = backoff.next();
                            tracing::warn!(
                                peer = slot.role,
                                addr = %addr,
                                error = %e,
                                retry_in_ms = delay.as_millis() as u64,
                                "dial failed; retrying"
                            );
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(delay) => {}
                                _ = slot.notify.notified() => {}
                            }
                        }
                    }
                }
                (None, None) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = slot.notify.notified() => {}
                    }
                }
            }
        }
        slot.clear_conn();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Opts;

    fn gauge() -> IntGauge {
        IntGauge::with_opts(Opts::new("fb_active_connections", "test")).unwrap()
    }

    #[test]
    fn set_address_only_notifies_on_change() {
        let slot = PeerSlot::new("next", gauge());
        slot.set_address(Some("http://a:1".to_owned()));
        assert_eq!(slot.desired.load().as_deref().map(String::as_str), Some("http://a:1"));
        slot.set_address(Some("http://a:1".to_owned()));
        slot.set_address(None);
        assert!(slot.desired.load().is_none());
    }

    #[test]
    fn backoff_grows_and_respects_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(10));
        let first = backoff.next();
        assert!(first <= Duration::from_millis(200));
        for _ in 0..10 {
            let _ = backoff.next();
        }
        assert!(backoff.next() <= Duration::from_secs(10));
    }
}
