//! Core vectorized environment trait and shared types.
//!
//! A [`VectorEnv`] hosts N environment slots. Both `reset` and `step` act on
//! an arbitrary subset of slot ids, and return one result per requested slot
//! in the same order.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::buffer::field::Info;

/// The set of actions one slot accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpace {
    /// `n` choices, encoded as a single float `0.0..n`.
    Discrete { n: usize },
    /// A box with per-dimension inclusive bounds.
    Box { low: Vec<f32>, high: Vec<f32> },
}

impl ActionSpace {
    /// Width of one action vector.
    pub fn dim(&self) -> usize {
        match self {
            Self::Discrete { .. } => 1,
            Self::Box { low, .. } => low.len(),
        }
    }

    /// Draw one action uniformly.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f32> {
        match self {
            Self::Discrete { n } => vec![rng.gen_range(0..(*n).max(1)) as f32],
            Self::Box { low, high } => low
                .iter()
                .zip(high)
                .map(|(&lo, &hi)| if lo < hi { rng.gen_range(lo..=hi) } else { lo })
                .collect(),
        }
    }

    pub fn contains(&self, action: &[f32]) -> bool {
        match self {
            Self::Discrete { n } => {
                action.len() == 1 && action[0] >= 0.0 && action[0].fract() == 0.0 && (action[0] as usize) < *n
            }
            Self::Box { low, high } => {
                action.len() == low.len()
                    && action
                        .iter()
                        .zip(low.iter().zip(high))
                        .all(|(a, (lo, hi))| lo <= a && a <= hi)
            }
        }
    }
}

/// Options forwarded to every reset call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResetOptions {
    /// Seed for the reset slots (environment-defined semantics).
    #[serde(default)]
    pub seed: Option<u64>,
    /// Free-form environment-specific options.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// What a reset returns for one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvReset {
    pub obs: Vec<f32>,
    pub info: Info,
}

/// What a step returns for one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvStep {
    pub obs_next: Vec<f32>,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: Info,
}

impl EnvStep {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// N environment instances driven in lockstep.
pub trait VectorEnv {
    /// Number of slots N.
    fn num_envs(&self) -> usize;

    /// Action space of `slot`.
    fn action_space(&self, slot: usize) -> &ActionSpace;

    /// Reset the given slots.
    fn reset(&mut self, slots: &[usize], options: &ResetOptions) -> anyhow::Result<Vec<EnvReset>>;

    /// Step the given slots; `actions[i]` goes to `slots[i]`.
    fn step(&mut self, actions: &[Vec<f32>], slots: &[usize]) -> anyhow::Result<Vec<EnvStep>>;
}
