// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the control plane.

use miette::Diagnostic;

/// Errors raised by the control plane.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The pipeline spec document failed to load or validate.
    #[error("pipeline spec error: {0}")]
    #[diagnostic(code(fb_chain::control_plane::spec), url(docsrs))]
    Spec(#[from] fbc_config::Error),

    /// The spec watcher could not be established.
    #[error("spec watch error: {details}")]
    #[diagnostic(code(fb_chain::control_plane::watch), url(docsrs))]
    Watch {
        /// A description of the failure.
        details: String,
    },

    /// The gRPC listener failed.
    #[error("control-plane transport error: {details}")]
    #[diagnostic(code(fb_chain::control_plane::transport), url(docsrs))]
    Transport {
        /// A description of the failure.
        details: String,
    },

    /// The lease could not be read or written.
    #[error("lease error: {details}")]
    #[diagnostic(code(fb_chain::control_plane::lease), url(docsrs))]
    Lease {
        /// A description of the failure.
        details: String,
    },

    /// Leadership was lost; the process must exit to force re-election.
    #[error("leadership lost (identity {identity})")]
    #[diagnostic(code(fb_chain::control_plane::leadership_lost), url(docsrs))]
    LeadershipLost {
        /// The identity that held the lease.
        identity: String,
    },
}
