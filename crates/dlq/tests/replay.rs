// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end replay against a loopback pipeline head.

use chrono::Utc;
use fbc_dlq::record::DlqRecord;
use fbc_dlq::replay::{self, ReplayOptions};
use fbc_dlq::store::{DlqStore, ScanFilter};
use fbc_proto::proto::chain::v1::chain_push_service_server::{
    ChainPushService, ChainPushServiceServer,
};
use fbc_proto::proto::chain::v1::{MetricBatch, PushResult, PushStatus};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

#[derive(Clone, Default)]
struct MockHead {
    received: Arc<Mutex<Vec<MetricBatch>>>,
    reject_code: Option<&'static str>,
}

#[tonic::async_trait]
impl ChainPushService for MockHead {
    async fn push_batch(
        &self,
        request: Request<MetricBatch>,
    ) -> Result<Response<PushResult>, Status> {
        let batch = request.into_inner();
        let batch_id = batch.batch_id.clone();
        self.received.lock().await.push(batch);
        let result = match self.reject_code {
            None => PushResult {
                status: PushStatus::Success as i32,
                batch_id,
                error_code: String::new(),
                error_message: String::new(),
                sent_to_dlq: false,
            },
            Some(code) => PushResult {
                status: PushStatus::Error as i32,
                batch_id,
                error_code: code.to_owned(),
                error_message: "rejected".to_owned(),
                sent_to_dlq: true,
            },
        };
        Ok(Response::new(result))
    }
}

fn spawn_head(head: MockHead) -> SocketAddr {
    let port = portpicker::pick_unused_port().expect("free port");
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("addr");
    let _ = tokio::spawn(async move {
        Server::builder()
            .add_service(ChainPushServiceServer::new(head))
            .serve(addr)
            .await
    });
    addr
}

async fn seed_store(store: &DlqStore, count: usize, code: &str) {
    let base = Utc::now();
    for i in 0..count {
        let mut batch = MetricBatch {
            batch_id: format!("b{i:03}"),
            data: b"{}".to_vec(),
            format: "fbmetrics/json/v1".to_owned(),
            ..MetricBatch::default()
        };
        let _ = batch
            .internal_labels
            .insert("error_code".to_owned(), code.to_owned());
        let _ = batch
            .internal_labels
            .insert("fb_sender".to_owned(), "fb-dp".to_owned());
        let record = DlqRecord::from_batch(&batch, base + chrono::Duration::milliseconds(i as i64));
        store.append(&record).await.unwrap();
    }
}

#[tokio::test]
async fn replay_drains_matching_records_and_deletes_them() {
    let head = MockHead::default();
    let received = head.received.clone();
    let addr = spawn_head(head);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let store = DlqStore::in_memory();
    seed_store(&store, 100, "FORWARDING_FAILED").await;

    let stats = replay::run(
        &store,
        ReplayOptions {
            filter: ScanFilter {
                error_code: Some("FORWARDING_FAILED".to_owned()),
                ..ScanFilter::default()
            },
            concurrency: 5,
            delete_replayed: true,
            target: format!("http://{addr}"),
            ..ReplayOptions::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(stats.scanned, 100);
    assert_eq!(stats.replayed, 100);
    assert_eq!(stats.deleted, 100);
    assert_eq!(stats.errors, 0);

    let batches = received.lock().await;
    assert_eq!(batches.len(), 100);
    assert!(batches.iter().all(|b| b.replay));
    assert!(
        batches
            .iter()
            .all(|b| b.internal_labels.get("replay").map(String::as_str) == Some("true"))
    );
    drop(batches);

    assert!(store.scan(&ScanFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn dry_run_walks_the_filter_without_writing() {
    let store = DlqStore::in_memory();
    seed_store(&store, 10, "PII_LEAK").await;
    let stats = replay::run(
        &store,
        ReplayOptions {
            dry_run: true,
            delete_replayed: true,
            target: "http://127.0.0.1:1".to_owned(),
            ..ReplayOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(stats.scanned, 10);
    assert_eq!(stats.replayed, 0);
    assert_eq!(store.scan(&ScanFilter::default()).await.unwrap().len(), 10);
}

#[tokio::test]
async fn rejections_build_the_failure_histogram() {
    let head = MockHead {
        reject_code: Some("INVALID_INPUT"),
        ..MockHead::default()
    };
    let addr = spawn_head(head);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let store = DlqStore::in_memory();
    seed_store(&store, 5, "FORWARDING_FAILED").await;

    let stats = replay::run(
        &store,
        ReplayOptions {
            concurrency: 2,
            delete_replayed: true,
            target: format!("http://{addr}"),
            ..ReplayOptions::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(stats.replayed, 0);
    assert_eq!(stats.errors, 5);
    assert_eq!(stats.failures_by_code["INVALID_INPUT"], 5);
    // Rejected records stay in custody.
    assert_eq!(store.scan(&ScanFilter::default()).await.unwrap().len(), 5);
}
