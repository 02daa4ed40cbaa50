//! goal-replay: sharded, goal-augmented experience replay for vectorized RL.
//!
//! Experience from N parallel environment slots is written into one ring
//! buffer shard per slot, addressed through a flat global index space. A
//! trajectory index on top of the buffer allows whole episodes to be read back
//! for hindsight relabeling, and the vectorized collector drives the
//! environments and policy under step or episode budgets.

pub mod agent;
pub mod buffer;
pub mod config;
pub mod env;
pub mod trajectory;
