// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The dead-letter queue subsystem.
//!
//! Durable custody of failed batches: the [`service::DlqService`] stage
//! ingests them over the chain RPC, the [`store::DlqStore`] keeps them under
//! time-sortable keys with exact-match scan filters, and [`replay`]
//! re-injects them at the pipeline head. Records that keep failing replay
//! are quarantined as poison pills rather than looping forever.

pub mod error;
pub mod record;
pub mod replay;
pub mod service;
pub mod store;

pub use error::Error;
pub use record::DlqRecord;
pub use replay::{ReplayOptions, ReplayStats};
pub use service::DlqService;
pub use store::{DlqStore, Inventory, ScanFilter};
