//! Sharded, fixed-capacity experience storage.
//!
//! This module provides:
//! - [`field`] -- the closed registry of typed field descriptors and the
//!   column storage behind them.
//! - [`batch::Batch`] / [`batch::Transition`] -- columnar batches and the
//!   typed per-step record.
//! - [`shard::Shard`] -- one environment's ring buffer.
//! - [`manager::BufferManager`] -- shards behind a flat global index space.
//! - [`store::ExperienceStore`] -- the write seam used by the collector.

pub mod batch;
pub mod error;
pub mod field;
pub mod manager;
pub mod shard;
pub mod store;

pub use batch::{Batch, Transition};
pub use error::BufferError;
pub use field::{Column, Field, FieldDescriptor, FieldKind, FieldRegistry, Info, Value};
pub use manager::BufferManager;
pub use shard::{AddOutcome, Shard};
pub use store::{AnyStore, ExperienceStore};
