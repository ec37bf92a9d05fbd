// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The shared stage runtime.
//!
//! Every function block embeds this library: a `PushBatch` ingress server, a
//! circuit-breaker-guarded forwarder, DLQ escalation, hot configuration
//! application with control-plane acks, Prometheus metrics, admin probes, and
//! graceful lifecycle. Stage-specific behavior plugs in through
//! [`stage::StageProcessor`].

pub mod admin;
pub mod batch;
pub mod circuit_breaker;
pub mod config_client;
pub mod dlq_client;
pub mod error;
pub mod forwarder;
pub mod lifecycle;
pub mod metrics;
pub mod peer;
pub mod runner;
pub mod server;
pub mod stage;
pub mod tracecontext;

pub use batch::Batch;
pub use error::{ErrorCode, StageError};
pub use stage::{ConfigAck, Disposition, RuntimeSettings, StageProcessor, StageRuntime};
