// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! DLQ escalation client.
//!
//! The DLQ is the last line: sends ignore the next-stage circuit breaker, and
//! a DLQ failure must never crash the stage — it propagates as
//! `DLQ_SEND_FAILED` so the upstream caller's own DLQ can try.

use crate::batch::Batch;
use crate::error::{ErrorCode, StageError};
use crate::peer::PeerSlot;
use fbc_proto::proto::chain::v1::{MetricBatch, PushStatus};
use std::sync::Arc;
use std::time::Duration;

/// Client for the configured DLQ endpoint.
#[derive(Debug)]
pub struct DlqClient {
    fb_name: String,
    slot: Arc<PeerSlot>,
    timeout: Duration,
}

impl DlqClient {
    /// Builds the client over the given slot.
    pub fn new(fb_name: String, slot: Arc<PeerSlot>, timeout: Duration) -> Self {
        Self {
            fb_name,
            slot,
            timeout,
        }
    }

    /// The peer slot (shared with the reconnect task).
    pub fn slot(&self) -> &Arc<PeerSlot> {
        &self.slot
    }

    /// Routes a failed batch to the DLQ, annotated with the sender and the
    /// original failure.
    pub async fn send(
        &self,
        mut batch: Batch,
        code: ErrorCode,
        message: &str,
    ) -> Result<(), StageError> {
        batch.annotate_failure(&self.fb_name, code, message);
        let Some(conn) = self.slot.client() else {
            return Err(StageError::new(
                ErrorCode::DlqSendFailed,
                "no live connection to DLQ",
            ));
        };
        let mut client = conn.client.clone();
        let mut request = tonic::Request::new(MetricBatch::from(batch));
        request.set_timeout(self.timeout);
        let outcome = tokio::time::timeout(self.timeout, client.push_batch(request)).await;
        match outcome {
            Err(_elapsed) => {
                self.slot.mark_broken(&conn.addr);
                Err(StageError::new(
                    ErrorCode::DlqSendFailed,
                    "DLQ send deadline exceeded",
                ))
            }
            Ok(Err(status)) => {
                if status.code() == tonic::Code::Unavailable {
                    self.slot.mark_broken(&conn.addr);
                }
                Err(StageError::new(
                    ErrorCode::DlqSendFailed,
                    format!("DLQ transport error: {status}"),
                ))
            }
            Ok(Ok(response)) => {
                let result = response.into_inner();
                if result.status() == PushStatus::Success {
                    Ok(())
                } else {
                    Err(StageError::new(
                        ErrorCode::DlqSendFailed,
                        format!(
                            "DLQ rejected batch: {} ({})",
                            result.error_message, result.error_code
                        ),
                    ))
                }
            }
        }
    }
}
