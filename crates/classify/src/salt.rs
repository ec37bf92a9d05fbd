// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Hashing-salt lifecycle.
//!
//! The salt is loaded from a named secret file on start and again on every
//! config change that names a different secret. Load failure falls back to
//! the deployment-default salt with an error log — never to unhashed output.

use std::path::{Path, PathBuf};

/// Salt used when no secret is configured or the secret cannot be read.
const DEPLOYMENT_DEFAULT_SALT: &[u8] = b"fbchain-deployment-default-salt";

/// The active salt and the secret identity it came from.
#[derive(Debug, Clone)]
pub struct SaltState {
    value: Vec<u8>,
    secret_path: Option<PathBuf>,
}

impl SaltState {
    /// The deployment-default salt.
    pub fn deployment_default() -> Self {
        Self {
            value: DEPLOYMENT_DEFAULT_SALT.to_vec(),
            secret_path: None,
        }
    }

    /// The active salt bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Reloads the salt when the configured secret identity changed.
    pub fn rotate_if_needed(&mut self, secret_path: Option<&Path>) {
        if self.secret_path.as_deref() == secret_path {
            return;
        }
        match secret_path {
            None => {
                *self = Self::deployment_default();
            }
            Some(path) => {
                match std::fs::read(path) {
                    Ok(bytes) => {
                        let trimmed = trim_trailing_newline(bytes);
                        if trimmed.is_empty() {
                            tracing::error!(
                                path = %path.display(),
                                "salt secret is empty; falling back to deployment-default salt"
                            );
                            self.value = DEPLOYMENT_DEFAULT_SALT.to_vec();
                        } else {
                            tracing::info!(path = %path.display(), "hashing salt rotated");
                            self.value = trimmed;
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            path = %path.display(),
                            error = %e,
                            "failed to load salt secret; falling back to deployment-default salt"
                        );
                        self.value = DEPLOYMENT_DEFAULT_SALT.to_vec();
                    }
                }
                self.secret_path = Some(path.to_path_buf());
            }
        }
    }
}

fn trim_trailing_newline(mut bytes: Vec<u8>) -> Vec<u8> {
    while matches!(bytes.last(), Some(b'\n') | Some(b'\r')) {
        let _ = bytes.pop();
    }
    bytes
}
