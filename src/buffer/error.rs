//! Error taxonomy for the experience store.

use uuid::Uuid;

use super::field::Field;

/// Errors raised by shards, the buffer manager and the trajectory index.
///
/// None of these are retried internally: a failing call leaves every shard in
/// the state it had before the failing row (rows already written stay written).
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// The incoming batch is missing a required field, carries columns of
    /// unequal length, or disagrees with a registered field kind.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// A global/local index or shard id lies outside the addressable range.
    #[error("index {index} out of range (limit {limit})")]
    IndexOutOfRange { index: usize, limit: usize },

    /// The field is not stored and no default was supplied.
    #[error("field `{0}` not found")]
    FieldNotFound(Field),

    /// The trajectory identifier was never observed since the last reset.
    #[error("trajectory {0} not found")]
    KeyNotFound(Uuid),

    /// Zero shards, zero capacity or shards of unequal capacity.
    #[error("invalid buffer layout: {0}")]
    InvalidLayout(String),
}

pub type Result<T> = std::result::Result<T, BufferError>;
