//! Agent module: the policy contract and a scripted implementation.
//!
//! The collector only depends on the [`Policy`] trait. [`MockPolicy`] is a
//! deterministic recurrent policy used by the CLI demo and the tests.

pub mod mock;
pub mod policy;

pub use mock::MockPolicy;
pub use policy::{HiddenState, ObsBatch, Policy, PolicyOutput};
