//! Trajectory-aware storage and vectorized collection.
//!
//! This module provides:
//! - [`index::TrajectoryIndex`] -- a buffer manager that remembers, per
//!   trajectory identifier, the range it occupies in every shard.
//! - [`collector::VectorizedCollector`] -- the loop that drives N environment
//!   slots with a policy and writes their transitions into a store.
//! - [`types::CollectionStats`] -- what a collection call reports.

pub mod collector;
pub mod index;
pub mod types;

pub use collector::{CollectBudget, CollectError, VectorizedCollector};
pub use index::{TrajectoryId, TrajectoryIndex, TrajectorySegment};
pub use types::{CollectionStats, SequenceSummary};
