// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Stage shells.
//!
//! Each function block is a thin shell wiring its engine into the shared
//! stage runtime; [`build_processor`] maps a stage name to its processor so
//! one binary can run any stage.

pub mod agg;
pub mod en_host;
pub mod en_k8s;
pub mod fs;
pub mod gw_pre;
pub mod rx;

pub use agg::AggStage;
pub use en_host::EnHostStage;
pub use en_k8s::EnK8sStage;
pub use fs::FsStage;
pub use gw_pre::GwPreStage;
pub use rx::RxStage;

use fbc_classify::Classifier;
use fbc_config::fb;
use fbc_dedup::{DedupEngine, ProcessTable};
use fbc_dlq::DlqService;
use fbc_gateway::Gateway;
use fbc_gateway::sink::HttpSink;
use fbc_runtime::stage::StageProcessor;
use std::sync::Arc;

/// Failure to construct a stage processor.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    /// The name is not one of the known function blocks.
    #[error("unknown function block `{fb_name}`")]
    UnknownStage {
        /// The offending name.
        fb_name: String,
    },

    /// Metric registration failed during construction.
    #[error("metrics setup failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Builds the processor for a function block by name.
pub fn build_processor(fb_name: &str) -> Result<Arc<dyn StageProcessor>, BuildError> {
    match fb_name {
        fb::RX => Ok(Arc::new(RxStage::new())),
        fb::EN_HOST => Ok(Arc::new(EnHostStage::new())),
        fb::EN_K8S => Ok(Arc::new(EnK8sStage::new())),
        fb::CL => Ok(Arc::new(Classifier::new()?)),
        fb::DP => Ok(Arc::new(DedupEngine::new(Arc::new(ProcessTable::new()))?)),
        fb::FS => Ok(Arc::new(FsStage::new())),
        fb::AGG => Ok(Arc::new(AggStage::new())),
        fb::GW_PRE => Ok(Arc::new(GwPreStage::new())),
        fb::GW => Ok(Arc::new(Gateway::new(Arc::new(HttpSink::new()))?)),
        fb::DLQ => Ok(Arc::new(DlqService::new()?)),
        other => Err(BuildError::UnknownStage {
            fb_name: other.to_owned(),
        }),
    }
}
