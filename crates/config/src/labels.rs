// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Internal-label keys.
//!
//! Internal labels travel with a batch for pipeline-internal bookkeeping and
//! are stripped by the gateway before export.

/// Name of the stage that routed the batch to the DLQ.
pub const FB_SENDER: &str = "fb_sender";
/// Human-readable error message attached on DLQ routing.
pub const ERROR: &str = "error";
/// Error code from the fixed taxonomy attached on DLQ routing.
pub const ERROR_CODE: &str = "error_code";
/// Present (value `"true"`) on batches re-injected by the DLQ replayer.
pub const REPLAY: &str = "replay";
/// RFC-3339 timestamp of the re-injection.
pub const REPLAY_TIMESTAMP: &str = "replay_timestamp";
/// Number of replay attempts already made for the originating DLQ record.
pub const REPLAY_ATTEMPTS: &str = "replay_attempts";
