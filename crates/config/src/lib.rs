// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration model for the fb-chain pipeline.
//!
//! Data model:
//! - declarative **pipeline spec document** (`spec` + `status`), owned by the
//!   operator and watched by the control plane;
//! - distributed `PipelineConfig` wire snapshots (see [`fbc_proto`]), built
//!   from the spec by the control plane and hot-applied by every stage;
//! - per-stage **parameters** ([`params`]), opaque bytes on the wire, parsed
//!   and validated by the owning stage through the registry in this crate.

pub mod error;
/// Well-known function-block names and chain topology helpers.
pub mod fb;
/// Internal-label keys used for pipeline-internal bookkeeping on batches.
pub mod labels;
pub mod params;
pub mod pipeline;
pub mod spec;

pub use error::Error;
