// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the key-value capability.

/// Errors surfaced by a [`crate::KvStore`] backing.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The backing store failed an I/O or internal operation.
    #[error("store backend error: {details}")]
    Backend {
        /// A description of the failure.
        details: String,
    },

    /// The store was used after `close()`.
    #[error("store is closed")]
    Closed,
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Backend {
            details: e.to_string(),
        }
    }
}
