// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The remote sink seam.
//!
//! The sink's own wire protocol is external; in-tree there is an HTTP POST
//! implementation and an in-memory sink for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A failed export attempt. All sink failures are treated as transient; the
/// sending queue retries them.
#[derive(thiserror::Error, Debug)]
#[error("sink error: {details}")]
pub struct SinkError {
    /// A description of the failure.
    pub details: String,
}

/// Destination for exported payloads.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Submits one serialized payload with its user-visible metadata.
    async fn send(
        &self,
        url: &str,
        payload: &[u8],
        metadata: &HashMap<String, String>,
    ) -> Result<(), SinkError>;
}

/// HTTP POST sink; metadata crosses the wire as `x-fbchain-meta-*` headers.
#[derive(Debug, Clone, Default)]
pub struct HttpSink {
    client: reqwest::Client,
}

impl HttpSink {
    /// Builds the sink with a default client.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn send(
        &self,
        url: &str,
        payload: &[u8],
        metadata: &HashMap<String, String>,
    ) -> Result<(), SinkError> {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_vec());
        for (key, value) in metadata {
            let name = format!("x-fbchain-meta-{}", key.replace('.', "-"));
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| SinkError {
            details: e.to_string(),
        })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SinkError {
                details: format!("sink returned {}", response.status()),
            })
        }
    }
}

/// Records exported payloads in memory; tests assert on them.
#[derive(Debug, Default)]
pub struct MemorySink {
    exported: Mutex<Vec<Vec<u8>>>,
    fail_next: Mutex<u32>,
}

impl MemorySink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` sends fail (transient).
    pub fn fail_next(&self, n: u32) {
        *self.fail_next.lock() = n;
    }

    /// Payloads exported so far.
    pub fn exported(&self) -> Vec<Vec<u8>> {
        self.exported.lock().clone()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn send(
        &self,
        _url: &str,
        payload: &[u8],
        _metadata: &HashMap<String, String>,
    ) -> Result<(), SinkError> {
        {
            let mut failures = self.fail_next.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(SinkError {
                    details: "injected failure".to_owned(),
                });
            }
        }
        self.exported.lock().push(payload.to_vec());
        Ok(())
    }
}
