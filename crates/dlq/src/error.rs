// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the DLQ subsystem.

/// Errors surfaced by the DLQ store and replayer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The backing store failed.
    #[error("DLQ store error: {0}")]
    Store(#[from] fbc_store::Error),

    /// A record failed to encode or decode.
    #[error("DLQ record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The replay target could not be reached.
    #[error("replay target unreachable: {details}")]
    TargetUnreachable {
        /// A description of the failure.
        details: String,
    },
}
