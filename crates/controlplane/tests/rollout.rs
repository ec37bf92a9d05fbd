// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Rollout integration: streaming fan-out, acks, and status aggregation over
//! a real gRPC loopback.

use fbc_config::spec::PipelineSpecDoc;
use fbc_controlplane::controller::observe_document;
use fbc_controlplane::service::{self, CpState};
use fbc_proto::proto::control::v1::config_service_client::ConfigServiceClient;
use fbc_proto::proto::control::v1::{AckConfigRequest, ConfigRequest};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SPEC_GEN2: &str = r#"
metadata:
  name: default
  generation: 2
spec:
  pipeline_version: "1.1.0"
  function_blocks:
    fb-rx:
      common:
        next_fb: "http://fb-fs:4317"
        dlq: "http://fb-dlq:4317"
    fb-fs:
      parameters:
        sample_rate: 0.5
      common:
        next_fb: "http://fb-gw:4317"
        dlq: "http://fb-dlq:4317"
    fb-gw:
      parameters:
        sink_url: "http://sink:8080/v1/metrics"
      common:
        dlq: "http://fb-dlq:4317"
    fb-dlq:
      common: {}
"#;

async fn start_control_plane() -> (Arc<CpState>, SocketAddr, CancellationToken) {
    let state = Arc::new(CpState::new());
    let port = portpicker::pick_unused_port().expect("free port");
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("addr");
    let cancel = CancellationToken::new();
    let _ = tokio::spawn(service::serve(state.clone(), addr, cancel.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    (state, addr, cancel)
}

#[tokio::test]
async fn rollout_streams_generation_and_aggregates_acks() {
    let (state, addr, _cancel) = start_control_plane().await;
    let endpoint = format!("http://{addr}");

    // Two stages subscribe before any config exists.
    let mut rx_client = ConfigServiceClient::connect(endpoint.clone()).await.unwrap();
    let mut rx_stream = rx_client
        .stream_config(ConfigRequest {
            stage_name: "fb-rx".to_owned(),
            instance_id: "rx-0".to_owned(),
            current_generation: 0,
        })
        .await
        .unwrap()
        .into_inner();
    let mut fs_client = ConfigServiceClient::connect(endpoint.clone()).await.unwrap();
    let mut fs_stream = fs_client
        .stream_config(ConfigRequest {
            stage_name: "fb-fs".to_owned(),
            instance_id: "fs-0".to_owned(),
            current_generation: 0,
        })
        .await
        .unwrap()
        .into_inner();

    // The operator publishes generation 2 (a sample-rate change).
    let doc = PipelineSpecDoc::from_yaml(SPEC_GEN2).unwrap();
    let fingerprint = Mutex::new(None);
    observe_document(&state, &doc, &fingerprint).await;

    let rx_config = tokio::time::timeout(Duration::from_secs(5), rx_stream.message())
        .await
        .unwrap()
        .unwrap()
        .expect("config pushed");
    assert_eq!(rx_config.generation, 2);
    let fs_config = tokio::time::timeout(Duration::from_secs(5), fs_stream.message())
        .await
        .unwrap()
        .unwrap()
        .expect("config pushed");
    assert_eq!(fs_config.generation, 2);
    let fs_params = &fs_config.function_blocks["fb-fs"].parameters;
    assert!(String::from_utf8_lossy(fs_params).contains("0.5"));

    // Both stages ack; the aggregated status converges.
    for (stage, instance) in [("fb-rx", "rx-0"), ("fb-fs", "fs-0")] {
        let mut client = ConfigServiceClient::connect(endpoint.clone()).await.unwrap();
        let response = client
            .ack_config(AckConfigRequest {
                stage_name: stage.to_owned(),
                instance_id: instance.to_owned(),
                applied_generation: 2,
                success: true,
                error: String::new(),
            })
            .await
            .unwrap()
            .into_inner();
        assert!(response.ok);
    }

    let status = state.registry.rollup(2);
    assert_eq!(status.observed_generation, 2);
    assert_eq!(status.config_generation_applied, 2);
    assert!(status.fb_status.iter().all(|s| s.config_applied && s.ready));
    assert_eq!(status.conditions[0].status, "True");
}

#[tokio::test]
async fn late_subscriber_gets_initial_sync() {
    let (state, addr, _cancel) = start_control_plane().await;
    let doc = PipelineSpecDoc::from_yaml(SPEC_GEN2).unwrap();
    let fingerprint = Mutex::new(None);
    observe_document(&state, &doc, &fingerprint).await;

    let mut client = ConfigServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap();
    let mut stream = client
        .stream_config(ConfigRequest {
            stage_name: "fb-gw".to_owned(),
            instance_id: "gw-0".to_owned(),
            current_generation: 0,
        })
        .await
        .unwrap()
        .into_inner();
    let config = tokio::time::timeout(Duration::from_secs(5), stream.message())
        .await
        .unwrap()
        .unwrap()
        .expect("initial sync");
    assert_eq!(config.generation, 2);
}

#[tokio::test]
async fn up_to_date_subscriber_receives_nothing_and_unknown_stage_is_rejected() {
    let (state, addr, _cancel) = start_control_plane().await;
    let doc = PipelineSpecDoc::from_yaml(SPEC_GEN2).unwrap();
    let fingerprint = Mutex::new(None);
    observe_document(&state, &doc, &fingerprint).await;

    let mut client = ConfigServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap();
    let mut stream = client
        .stream_config(ConfigRequest {
            stage_name: "fb-gw".to_owned(),
            instance_id: "gw-1".to_owned(),
            current_generation: 2,
        })
        .await
        .unwrap()
        .into_inner();
    let outcome = tokio::time::timeout(Duration::from_millis(300), stream.message()).await;
    assert!(outcome.is_err(), "no config should be pushed");

    let denied = client
        .stream_config(ConfigRequest {
            stage_name: "fb-mystery".to_owned(),
            instance_id: "x".to_owned(),
            current_generation: 0,
        })
        .await;
    assert!(denied.is_err());
}

#[tokio::test]
async fn unchanged_spec_is_not_redistributed() {
    let (state, _addr, _cancel) = start_control_plane().await;
    let doc = PipelineSpecDoc::from_yaml(SPEC_GEN2).unwrap();
    let fingerprint = Mutex::new(None);
    observe_document(&state, &doc, &fingerprint).await;
    assert_eq!(state.observed_generation.load(std::sync::atomic::Ordering::Acquire), 2);

    // A status write bumps nothing: same spec, same fingerprint.
    let mut touched = doc.clone();
    touched.metadata.generation = 3;
    observe_document(&state, &touched, &fingerprint).await;
    assert_eq!(state.observed_generation.load(std::sync::atomic::Ordering::Acquire), 2);
}

#[tokio::test]
async fn invalid_spec_is_rejected_without_advancing() {
    let (state, _addr, _cancel) = start_control_plane().await;
    let invalid = SPEC_GEN2.replace("sample_rate: 0.5", "sample_rate: 1.5");
    let doc = PipelineSpecDoc::from_yaml(&invalid).unwrap();
    let fingerprint = Mutex::new(None);
    observe_document(&state, &doc, &fingerprint).await;
    assert_eq!(state.observed_generation.load(std::sync::atomic::Ordering::Acquire), 0);
    assert!(state.snapshot().is_none());
}
