// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The control plane.
//!
//! Leader-elected replicas watch the declarative pipeline spec, build a wire
//! snapshot per observed generation, fan it out over long-lived
//! `StreamConfig` streams with per-client monotonic delivery, collect acks,
//! and write the aggregated rollout status back onto the document. A new
//! leader starts with an empty registry and rebuilds it lazily from
//! re-registrations and ack traffic.

pub mod controller;
pub mod error;
pub mod leader;
pub mod registry;
pub mod service;
pub mod spec_source;

pub use controller::{ControlPlaneOptions, run};
pub use error::Error;
pub use service::CpState;
