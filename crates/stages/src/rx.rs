// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! FB-RX: the chain head.
//!
//! Admits batches into the pipeline: envelope basics only, no payload
//! inspection. Everything else happens downstream.

use async_trait::async_trait;
use fbc_config::fb;
use fbc_config::params::{RxParams, StageParams};
use fbc_runtime::stage::{Disposition, StageProcessor};
use fbc_runtime::{Batch, StageError};
use parking_lot::RwLock;

/// The receiver stage.
#[derive(Debug)]
pub struct RxStage {
    params: RwLock<RxParams>,
}

impl RxStage {
    /// A receiver with default parameters.
    pub fn new() -> Self {
        Self {
            params: RwLock::new(RxParams::default()),
        }
    }
}

impl Default for RxStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageProcessor for RxStage {
    fn fb_name(&self) -> &'static str {
        fb::RX
    }

    fn apply_params(&self, bytes: &[u8]) -> Result<(), StageError> {
        let params = RxParams::parse(bytes).map_err(|e| StageError::config_invalid(e.to_string()))?;
        params
            .validate()
            .map_err(|e| StageError::config_invalid(e.to_string()))?;
        let mut guard = self.params.write();
        *guard = params;
        Ok(())
    }

    async fn process(&self, batch: &mut Batch) -> Result<Disposition, StageError> {
        if batch.batch_id.is_empty() {
            return Err(StageError::invalid_input("empty batch_id"));
        }
        let params = self.params.read();
        if !params.accepted_formats.iter().any(|f| f == &batch.format) {
            return Err(StageError::invalid_input(format!(
                "format `{}` not accepted at ingress",
                batch.format
            )));
        }
        Ok(Disposition::Forward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(id: &str, format: &str) -> Batch {
        Batch {
            batch_id: id.to_owned(),
            format: format.to_owned(),
            data: b"{}".to_vec(),
            ..Batch::default()
        }
    }

    #[tokio::test]
    async fn accepts_known_format() {
        let rx = RxStage::new();
        let mut b = batch("b1", "fbmetrics/json/v1");
        assert_eq!(rx.process(&mut b).await.unwrap(), Disposition::Forward);
    }

    #[tokio::test]
    async fn rejects_empty_id_and_unknown_format() {
        let rx = RxStage::new();
        let mut no_id = batch("", "fbmetrics/json/v1");
        assert!(rx.process(&mut no_id).await.is_err());
        let mut bad_format = batch("b1", "mystery/bin");
        assert!(rx.process(&mut bad_format).await.is_err());
    }
}
