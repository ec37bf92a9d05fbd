// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! FB-EN-HOST: host-metadata enrichment.

use async_trait::async_trait;
use fbc_config::fb;
use fbc_config::params::{EnHostParams, StageParams};
use fbc_pdata::MetricPayload;
use fbc_runtime::stage::{Disposition, StageProcessor};
use fbc_runtime::{Batch, StageError};
use parking_lot::RwLock;
use sysinfo::System;

/// The host-enrichment stage.
#[derive(Debug)]
pub struct EnHostStage {
    params: RwLock<EnHostParams>,
    host_name: String,
    os_type: String,
    os_version: String,
}

impl EnHostStage {
    /// Discovers local host metadata once at construction.
    pub fn new() -> Self {
        Self {
            params: RwLock::new(EnHostParams::default()),
            host_name: System::host_name().unwrap_or_else(|| "unknown-host".to_owned()),
            os_type: std::env::consts::OS.to_owned(),
            os_version: System::os_version().unwrap_or_else(|| "unknown".to_owned()),
        }
    }

    fn effective_host_name(&self, params: &EnHostParams) -> String {
        params
            .override_host_name
            .clone()
            .unwrap_or_else(|| self.host_name.clone())
    }
}

impl Default for EnHostStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageProcessor for EnHostStage {
    fn fb_name(&self) -> &'static str {
        fb::EN_HOST
    }

    fn apply_params(&self, bytes: &[u8]) -> Result<(), StageError> {
        let params =
            EnHostParams::parse(bytes).map_err(|e| StageError::config_invalid(e.to_string()))?;
        let mut guard = self.params.write();
        *guard = params;
        Ok(())
    }

    async fn process(&self, batch: &mut Batch) -> Result<Disposition, StageError> {
        let params = self.params.read().clone();
        let mut payload = MetricPayload::decode(&batch.format, &batch.data)
            .map_err(|e| StageError::invalid_input(e.to_string()))?;

        let host_name = self.effective_host_name(&params);
        for record in &mut payload.records {
            if record.host_name.is_none() {
                record.host_name = Some(host_name.clone());
            }
        }
        if params.add_os_attributes {
            let _ = payload
                .resource
                .entry("os.type".to_owned())
                .or_insert_with(|| self.os_type.clone());
            let _ = payload
                .resource
                .entry("os.version".to_owned())
                .or_insert_with(|| self.os_version.clone());
        }

        batch.data = payload
            .encode()
            .map_err(|e| StageError::processing_failed(e.to_string()))?;
        Ok(Disposition::Forward)
    }
}
