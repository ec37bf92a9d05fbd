// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end chain scenarios: RX → CL → GW with a DLQ service on the side,
//! all over real loopback gRPC.

use fbc_classify::Classifier;
use fbc_config::labels;
use fbc_dlq::store::ScanFilter;
use fbc_dlq::DlqService;
use fbc_gateway::Gateway;
use fbc_gateway::sink::MemorySink;
use fbc_pdata::{FORMAT_JSON_V1, MetricPayload, MetricRecord};
use fbc_proto::proto::chain::v1::chain_push_service_client::ChainPushServiceClient;
use fbc_proto::proto::chain::v1::{MetricBatch, PushStatus};
use fbc_proto::proto::control::v1 as control;
use fbc_runtime::server::serve_ingress;
use fbc_runtime::stage::{RuntimeSettings, StageProcessor, StageRuntime};
use fbc_stages::RxStage;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn pick_addr() -> SocketAddr {
    let port = portpicker::pick_unused_port().expect("free port");
    format!("127.0.0.1:{port}").parse().expect("addr")
}

fn stage_config(
    fb_name: &str,
    next_fb: Option<SocketAddr>,
    dlq: Option<SocketAddr>,
    parameters: serde_json::Value,
) -> control::PipelineConfig {
    let mut function_blocks = std::collections::HashMap::new();
    let _ = function_blocks.insert(
        fb_name.to_owned(),
        control::FbConfig {
            enabled: true,
            image_tag: String::new(),
            parameters: if parameters.is_null() {
                Vec::new()
            } else {
                serde_json::to_vec(&parameters).expect("params")
            },
            common: Some(control::CommonConfig {
                next_fb: next_fb.map(|a| format!("http://{a}")).unwrap_or_default(),
                dlq: dlq.map(|a| format!("http://{a}")).unwrap_or_default(),
                log_level: "info".to_owned(),
                trace_ratio: 0.0,
                circuit_breaker: None,
            }),
        },
    );
    control::PipelineConfig {
        generation: 1,
        pipeline_version: "e2e".to_owned(),
        global_settings: None,
        function_blocks,
    }
}

async fn start_stage(
    processor: Arc<dyn StageProcessor>,
    listen: SocketAddr,
    config: control::PipelineConfig,
) -> Arc<StageRuntime> {
    let runtime = StageRuntime::new(RuntimeSettings::default(), processor).expect("runtime");
    let _tasks = runtime.spawn_connection_tasks();
    let ack = runtime.apply_config(&config);
    assert!(ack.success, "stage config rejected: {:?}", ack.error);
    let serve_runtime = runtime.clone();
    let cancel = runtime.shutdown_token();
    let _ = tokio::spawn(serve_ingress(serve_runtime, listen, cancel));
    runtime
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached in time");
}

fn payload_with_email(email_in_value: bool) -> Vec<u8> {
    let mut attributes = BTreeMap::new();
    if email_in_value {
        // Raw marker buried where the scrubber cannot rewrite it.
        let _ = attributes.insert(
            "debug.blob".to_owned(),
            r#"{"user.email":"alice@example.com"}"#.to_owned(),
        );
    } else {
        let _ = attributes.insert("user.email".to_owned(), "alice@example.com".to_owned());
    }
    let _ = attributes.insert("region".to_owned(), "eu".to_owned());
    MetricPayload {
        resource: BTreeMap::new(),
        records: vec![MetricRecord {
            name: "http.requests".to_owned(),
            kind: "counter".to_owned(),
            value: 1.0,
            unit: None,
            attributes,
            source: None,
            host_name: Some("h1".to_owned()),
            pid: None,
            process_start_time_ns: None,
            boot_id_ref: None,
            timestamp_unix_nanos: 1,
        }],
    }
    .encode()
    .expect("payload")
}

struct Chain {
    rx_addr: SocketAddr,
    dlq_service: Arc<DlqService>,
    sink: Arc<MemorySink>,
    gateway: Arc<Gateway>,
}

async fn start_chain(queue_dir: &std::path::Path, dlq_dir: &std::path::Path) -> Chain {
    let rx_addr = pick_addr();
    let cl_addr = pick_addr();
    let gw_addr = pick_addr();
    let dlq_addr = pick_addr();

    let dlq_service = Arc::new(DlqService::new().expect("dlq"));
    let _dlq_runtime = start_stage(
        dlq_service.clone(),
        dlq_addr,
        stage_config(
            "fb-dlq",
            None,
            None,
            serde_json::json!({ "store_path": dlq_dir }),
        ),
    )
    .await;

    let sink = Arc::new(MemorySink::new());
    let gateway = Arc::new(Gateway::new(sink.clone()).expect("gateway"));
    let gw_runtime = start_stage(
        gateway.clone(),
        gw_addr,
        stage_config(
            "fb-gw",
            None,
            Some(dlq_addr),
            serde_json::json!({
                "sink_url": "http://sink.local/v1/metrics",
                "sending_queue_path": queue_dir,
                "pii_fields": ["user.email"],
            }),
        ),
    )
    .await;

    let classifier = Arc::new(Classifier::new().expect("classifier"));
    let cl_runtime = start_stage(
        classifier,
        cl_addr,
        stage_config(
            "fb-cl",
            Some(gw_addr),
            Some(dlq_addr),
            serde_json::json!({ "pii_fields": [ { "field": "user.email" } ] }),
        ),
    )
    .await;

    let rx_runtime = start_stage(
        Arc::new(RxStage::new()),
        rx_addr,
        stage_config("fb-rx", Some(cl_addr), Some(dlq_addr), serde_json::Value::Null),
    )
    .await;

    // Wait until the whole chain is wired.
    wait_until(|| {
        rx_runtime.forwarder().slot().client().is_some()
            && rx_runtime.dlq_client().slot().client().is_some()
            && cl_runtime.forwarder().slot().client().is_some()
            && cl_runtime.dlq_client().slot().client().is_some()
            && gw_runtime.dlq_client().slot().client().is_some()
    })
    .await;

    Chain {
        rx_addr,
        dlq_service,
        sink,
        gateway,
    }
}

#[tokio::test]
async fn healthy_chain_exports_scrubbed_batch_without_dlq() {
    let queue_dir = tempfile::tempdir().unwrap();
    let dlq_dir = tempfile::tempdir().unwrap();
    let chain = start_chain(queue_dir.path(), dlq_dir.path()).await;

    let mut client = ChainPushServiceClient::connect(format!("http://{}", chain.rx_addr))
        .await
        .expect("connect rx");
    let response = client
        .push_batch(MetricBatch {
            batch_id: "b1".to_owned(),
            data: payload_with_email(false),
            format: FORMAT_JSON_V1.to_owned(),
            ..MetricBatch::default()
        })
        .await
        .expect("push")
        .into_inner();
    assert_eq!(response.status(), PushStatus::Success, "{response:?}");

    // The gateway queue drains to the sink.
    let _ = chain.gateway.drain_now().await;
    let mut exported = chain.sink.exported();
    for _ in 0..50 {
        if !exported.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = chain.gateway.drain_now().await;
        exported = chain.sink.exported();
    }
    assert_eq!(exported.len(), 1);
    let text = String::from_utf8(exported[0].clone()).unwrap();
    assert!(text.contains("user.email.hashed"));
    assert!(!text.contains("alice@example.com"));

    let records = chain
        .dlq_service
        .store()
        .scan(&ScanFilter::default())
        .await
        .unwrap();
    assert!(records.is_empty(), "no DLQ entries expected");
}

#[tokio::test]
async fn pii_leak_is_terminal_at_the_classifier() {
    let queue_dir = tempfile::tempdir().unwrap();
    let dlq_dir = tempfile::tempdir().unwrap();
    let chain = start_chain(queue_dir.path(), dlq_dir.path()).await;

    let mut client = ChainPushServiceClient::connect(format!("http://{}", chain.rx_addr))
        .await
        .expect("connect rx");
    let response = client
        .push_batch(MetricBatch {
            batch_id: "b-leak".to_owned(),
            data: payload_with_email(true),
            format: FORMAT_JSON_V1.to_owned(),
            ..MetricBatch::default()
        })
        .await
        .expect("push")
        .into_inner();

    // RX saw its forward fail because CL terminally rejected the batch.
    assert_eq!(response.status(), PushStatus::Error);

    let records = chain
        .dlq_service
        .store()
        .scan(&ScanFilter {
            error_code: Some("PII_LEAK".to_owned()),
            ..ScanFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fb_sender, "fb-cl");
    assert_eq!(records[0].batch_id, "b-leak");
    assert_eq!(
        records[0]
            .internal_labels
            .get(labels::ERROR_CODE)
            .map(String::as_str),
        Some("PII_LEAK")
    );

    // The exporter never saw the value.
    assert!(chain.sink.exported().is_empty());
}
