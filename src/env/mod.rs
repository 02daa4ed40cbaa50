//! Vectorized environment abstractions.
//!
//! The collector talks to environments only through the [`VectorEnv`] trait.
//! [`mock::MockVectorEnv`] replays scripted episodes so the whole collection
//! pipeline can be exercised without an external simulator.

pub mod mock;
pub mod traits;

pub use mock::MockVectorEnv;
pub use traits::{ActionSpace, EnvReset, EnvStep, ResetOptions, VectorEnv};
