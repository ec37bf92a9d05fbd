// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The client registry: connected stage replicas and their rollout state.
//!
//! Two locks, no inversion: the outer subscription map is read-locked during
//! broadcast and write-locked on register/unregister; per-replica state has
//! its own lock. Sends never happen while holding the outer lock.

use chrono::{DateTime, Utc};
use fbc_config::spec::{Condition, FbStatusEntry, PipelineStatus};
use fbc_proto::proto::control::v1 as wire;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Key of one stage replica.
pub type ReplicaKey = (String, String);

/// Item type flowing to a subscriber's response stream.
pub type StreamItem = Result<wire::PipelineConfig, tonic::Status>;

/// A connected replica's stream.
#[derive(Debug)]
pub struct Subscription {
    /// Stage name.
    pub stage_name: String,
    /// Replica instance id.
    pub instance_id: String,
    sender: mpsc::Sender<StreamItem>,
    last_gen_sent: Mutex<i64>,
}

impl Subscription {
    /// Sends `config` if this replica has not seen its generation yet.
    /// Returns `Err(())` when the stream is gone.
    pub async fn offer(&self, config: &wire::PipelineConfig) -> Result<bool, ()> {
        let behind = {
            let mut sent = self.last_gen_sent.lock();
            if *sent < config.generation {
                *sent = config.generation;
                true
            } else {
                false
            }
        };
        if !behind {
            return Ok(false);
        }
        self.sender
            .send(Ok(config.clone()))
            .await
            .map(|()| true)
            .map_err(|_| ())
    }
}

/// Rollout state of one replica, fed by registration and ack traffic. A new
/// leader starts empty and rebuilds this lazily.
#[derive(Debug, Clone)]
pub struct ReplicaStatus {
    /// Highest generation the replica acked.
    pub last_gen_acked: i64,
    /// Whether the latest ack reported success.
    pub last_ack_success: bool,
    /// When the replica was last heard from.
    pub last_seen: DateTime<Utc>,
    /// When `last_gen_acked` or the success flag last changed.
    pub last_transition: DateTime<Utc>,
}

/// The registry.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    subscriptions: RwLock<HashMap<ReplicaKey, Arc<Subscription>>>,
    status: RwLock<HashMap<ReplicaKey, ReplicaStatus>>,
}

impl ClientRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a replica's stream, displacing any previous stream for the
    /// same key. Returns the subscription handle (for the initial sync) and
    /// the channel feeding the response stream.
    pub fn register(
        &self,
        stage_name: &str,
        instance_id: &str,
        current_generation: i64,
    ) -> (Arc<Subscription>, mpsc::Receiver<StreamItem>) {
        let (tx, rx) = mpsc::channel(8);
        let subscription = Arc::new(Subscription {
            stage_name: stage_name.to_owned(),
            instance_id: instance_id.to_owned(),
            sender: tx,
            last_gen_sent: Mutex::new(current_generation),
        });
        let key = (stage_name.to_owned(), instance_id.to_owned());
        {
            let mut subscriptions = self.subscriptions.write();
            let _ = subscriptions.insert(key.clone(), subscription.clone());
        }
        let now = Utc::now();
        {
            let mut status = self.status.write();
            let entry = status.entry(key).or_insert(ReplicaStatus {
                last_gen_acked: current_generation,
                last_ack_success: current_generation > 0,
                last_seen: now,
                last_transition: now,
            });
            entry.last_seen = now;
        }
        (subscription, rx)
    }

    /// Removes a replica's stream (its ack history stays).
    pub fn unregister(&self, stage_name: &str, instance_id: &str) {
        let key = (stage_name.to_owned(), instance_id.to_owned());
        let _ = self.subscriptions.write().remove(&key);
    }

    /// Records one ack.
    pub fn record_ack(
        &self,
        stage_name: &str,
        instance_id: &str,
        applied_generation: i64,
        success: bool,
    ) {
        let key = (stage_name.to_owned(), instance_id.to_owned());
        let now = Utc::now();
        let mut status = self.status.write();
        let entry = status.entry(key).or_insert(ReplicaStatus {
            last_gen_acked: 0,
            last_ack_success: false,
            last_seen: now,
            last_transition: now,
        });
        if entry.last_gen_acked != applied_generation || entry.last_ack_success != success {
            entry.last_transition = now;
        }
        entry.last_gen_acked = applied_generation;
        entry.last_ack_success = success;
        entry.last_seen = now;
    }

    /// Sends `config` to every connected replica that has not seen its
    /// generation yet. Failing streams are dropped; their owners re-register.
    pub async fn broadcast(&self, config: &wire::PipelineConfig) {
        let targets: Vec<Arc<Subscription>> =
            self.subscriptions.read().values().cloned().collect();
        for subscription in targets {
            if subscription.offer(config).await.is_err() {
                tracing::info!(
                    stage = %subscription.stage_name,
                    instance = %subscription.instance_id,
                    "dropping disconnected subscriber"
                );
                self.unregister(&subscription.stage_name, &subscription.instance_id);
            }
        }
    }

    /// Number of connected streams.
    pub fn connected(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Aggregates replica state into the pipeline status subresource.
    pub fn rollup(&self, observed_generation: i64) -> PipelineStatus {
        let status = self.status.read();
        let mut per_stage: HashMap<&str, (i64, bool, DateTime<Utc>)> = HashMap::new();
        for ((stage, _instance), replica) in status.iter() {
            let entry = per_stage
                .entry(stage.as_str())
                .or_insert((i64::MAX, true, replica.last_transition));
            entry.0 = entry.0.min(replica.last_gen_acked);
            entry.1 = entry.1 && replica.last_ack_success;
            entry.2 = entry.2.max(replica.last_transition);
        }

        let mut fb_status: Vec<FbStatusEntry> = per_stage
            .iter()
            .map(|(stage, (generation, ok, transition))| FbStatusEntry {
                name: (*stage).to_owned(),
                ready: *ok && *generation > 0,
                config_applied: *ok && *generation >= observed_generation,
                config_generation: if *generation == i64::MAX { 0 } else { *generation },
                last_transition_time: *transition,
            })
            .collect();
        fb_status.sort_by(|a, b| a.name.cmp(&b.name));

        let applied = fb_status
            .iter()
            .map(|s| s.config_generation)
            .min()
            .unwrap_or(0);
        let complete = !fb_status.is_empty()
            && fb_status
                .iter()
                .all(|s| s.config_applied && s.config_generation == observed_generation);
        let conditions = vec![Condition {
            kind: "RolloutComplete".to_owned(),
            status: if complete { "True" } else { "False" }.to_owned(),
            last_transition_time: Utc::now(),
            reason: if complete {
                "AllStagesAcked"
            } else {
                "AwaitingAcks"
            }
            .to_owned(),
            message: format!(
                "{} stage(s) tracked, observed generation {}",
                fb_status.len(),
                observed_generation
            ),
        }];

        PipelineStatus {
            observed_generation,
            config_generation_applied: applied,
            fb_status,
            conditions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(generation: i64) -> wire::PipelineConfig {
        wire::PipelineConfig {
            generation,
            pipeline_version: "v".to_owned(),
            global_settings: None,
            function_blocks: HashMap::new(),
        }
    }

    fn generation_of(item: Option<StreamItem>) -> Option<i64> {
        item.and_then(|r| r.ok()).map(|c| c.generation)
    }

    #[tokio::test]
    async fn broadcast_skips_replicas_already_at_generation() {
        let registry = ClientRegistry::new();
        let (_sub1, mut behind) = registry.register("fb-rx", "i1", 1);
        let (_sub2, mut current) = registry.register("fb-dp", "i2", 5);

        registry.broadcast(&config(5)).await;
        assert_eq!(generation_of(behind.recv().await), Some(5));
        assert!(current.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_is_monotonic_per_client() {
        let registry = ClientRegistry::new();
        let (_sub, mut rx) = registry.register("fb-rx", "i1", 0);
        registry.broadcast(&config(3)).await;
        registry.broadcast(&config(2)).await;
        registry.broadcast(&config(4)).await;
        assert_eq!(generation_of(rx.recv().await), Some(3));
        assert_eq!(generation_of(rx.recv().await), Some(4));
    }

    #[tokio::test]
    async fn dead_subscribers_are_dropped_on_broadcast() {
        let registry = ClientRegistry::new();
        let (_sub, rx) = registry.register("fb-rx", "i1", 0);
        drop(rx);
        registry.broadcast(&config(1)).await;
        assert_eq!(registry.connected(), 0);
    }

    #[test]
    fn rollup_aggregates_min_generation_and_readiness() {
        let registry = ClientRegistry::new();
        registry.record_ack("fb-rx", "i1", 3, true);
        registry.record_ack("fb-rx", "i2", 2, true);
        registry.record_ack("fb-dp", "i3", 3, true);

        let status = registry.rollup(3);
        assert_eq!(status.observed_generation, 3);
        assert_eq!(status.config_generation_applied, 2);
        let rx = status.fb_status.iter().find(|s| s.name == "fb-rx").unwrap();
        assert_eq!(rx.config_generation, 2);
        assert!(!rx.config_applied);
        let dp = status.fb_status.iter().find(|s| s.name == "fb-dp").unwrap();
        assert!(dp.config_applied);
        assert_eq!(status.conditions[0].status, "False");

        registry.record_ack("fb-rx", "i2", 3, true);
        let status = registry.rollup(3);
        assert_eq!(status.config_generation_applied, 3);
        assert_eq!(status.conditions[0].status, "True");
    }

    #[test]
    fn failed_acks_mark_stage_not_ready() {
        let registry = ClientRegistry::new();
        registry.record_ack("fb-cl", "i1", 0, false);
        let status = registry.rollup(1);
        let cl = status.fb_status.iter().find(|s| s.name == "fb-cl").unwrap();
        assert!(!cl.ready);
        assert!(!cl.config_applied);
    }
}
