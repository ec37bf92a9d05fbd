// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Vendored gRPC surfaces for the fb-chain pipeline.
//!
//! Two services are defined:
//! - `fbchain.chain.v1.ChainPushService` — the batch ingress every stage
//!   (and the DLQ service) exposes.
//! - `fbchain.control.v1.ConfigService` — the control-plane fan-out surface.
//!
//! The stubs are generated from the proto files under `proto/` and committed
//! to the repository (see `build.rs` for the regeneration procedure).

#[allow(missing_docs)]
#[path = ""]
pub mod proto {
    #[path = ""]
    pub mod chain {
        #[allow(unused_qualifications)]
        #[allow(unused_results)]
        #[allow(clippy::enum_variant_names)]
        #[allow(rustdoc::invalid_html_tags)]
        #[path = "fbchain.chain.v1.rs"]
        pub mod v1;
    }

    #[path = ""]
    pub mod control {
        #[allow(unused_qualifications)]
        #[allow(unused_results)]
        #[allow(clippy::enum_variant_names)]
        #[allow(rustdoc::invalid_html_tags)]
        #[path = "fbchain.control.v1.rs"]
        pub mod v1;
    }
}

#[cfg(test)]
mod tests {
    use crate::proto::chain::v1::{MetricBatch, PushResult, PushStatus};
    use prost::Message;

    #[test]
    fn metric_batch_roundtrip_preserves_label_maps() {
        let mut batch = MetricBatch {
            batch_id: "b-1".into(),
            data: b"payload".to_vec(),
            format: "fbmetrics/json/v1".into(),
            replay: false,
            config_generation: 7,
            ..Default::default()
        };
        let _ = batch.metadata.insert("tenant".into(), "acme".into());
        let _ = batch
            .internal_labels
            .insert("fb_sender".into(), "fb-rx".into());

        let bytes = batch.encode_to_vec();
        let decoded = MetricBatch::decode(bytes.as_slice()).expect("decode");
        assert_eq!(decoded.batch_id, "b-1");
        assert_eq!(decoded.metadata.get("tenant").map(String::as_str), Some("acme"));
        assert_eq!(
            decoded.internal_labels.get("fb_sender").map(String::as_str),
            Some("fb-rx")
        );
    }

    #[test]
    fn push_status_maps_to_wire_names() {
        assert_eq!(PushStatus::Success.as_str_name(), "PUSH_STATUS_SUCCESS");
        assert_eq!(
            PushStatus::from_str_name("PUSH_STATUS_ERROR"),
            Some(PushStatus::Error)
        );
        let result = PushResult {
            status: PushStatus::Success as i32,
            batch_id: "b-1".into(),
            ..Default::default()
        };
        assert_eq!(result.status(), PushStatus::Success);
    }
}
