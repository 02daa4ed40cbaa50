//! The policy contract the collector consumes.
//!
//! A policy maps a batch of observations (one row per ready slot) plus the
//! per-slot recurrent state to actions, optional extra columns and the latent
//! observation/goal pair the goal-conditioned store records.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::buffer::field::{Column, Info};

// ---------------------------------------------------------------------------
// Hidden state
// ---------------------------------------------------------------------------

/// Recurrent state owned by one environment slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum HiddenState {
    /// Fresh slot or just finished an episode.
    #[default]
    NoState,
    /// A single state vector (GRU-style).
    Single(Vec<f32>),
    /// A paired state, e.g. LSTM `(h, c)`.
    Paired(Vec<f32>, Vec<f32>),
}

impl HiddenState {
    /// Length of [`HiddenState::to_row`].
    pub fn width(&self) -> usize {
        match self {
            Self::NoState => 0,
            Self::Single(h) => h.len(),
            Self::Paired(h, c) => h.len() + c.len(),
        }
    }

    /// The flat form stored in the `hidden_state` column. `Paired(h, c)`
    /// is `h` followed by `c`; both halves have equal width, so the split
    /// is at the midpoint.
    pub fn to_row(&self) -> Vec<f32> {
        match self {
            Self::NoState => Vec::new(),
            Self::Single(h) => h.clone(),
            Self::Paired(h, c) => h.iter().chain(c).copied().collect(),
        }
    }

    /// Inverse of [`HiddenState::to_row`] for a paired state.
    pub fn paired_from_row(row: &[f32]) -> Self {
        let (h, c) = row.split_at(row.len() / 2);
        Self::Paired(h.to_vec(), c.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Observations of the ready slots, row `i` belonging to `slots[i]`.
#[derive(Debug, Clone, Copy)]
pub struct ObsBatch<'a> {
    pub obs: &'a [Vec<f32>],
    pub info: &'a [Info],
    pub slots: &'a [usize],
}

impl ObsBatch<'_> {
    pub fn len(&self) -> usize {
        self.obs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obs.is_empty()
    }
}

/// Everything one `act` call produces, one row per ready slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyOutput {
    /// Raw actions as the policy sees them; these are what gets stored.
    pub act: Vec<Vec<f32>>,
    /// Extra per-row columns, stored under `policy.<name>`.
    pub extras: BTreeMap<String, Column>,
    /// Next hidden state per row. `None` means the policy is stateless.
    /// Stored under `hidden_state`, see [`HiddenState::to_row`].
    pub hidden: Option<Vec<HiddenState>>,
    pub latent_obs: Option<Vec<Vec<f32>>>,
    pub latent_goal: Option<Vec<Vec<f32>>>,
    /// Per-row intrinsic reward, accumulated separately by the store.
    pub intrinsic_reward: Option<Vec<f32>>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A goal-conditioned, possibly recurrent policy.
pub trait Policy {
    /// Compute actions for the ready slots. `hidden[i]` is the state carried
    /// by `batch.slots[i]`.
    fn act(&mut self, batch: &ObsBatch<'_>, hidden: &[HiddenState]) -> Result<PolicyOutput>;

    /// Raw action to the action the environment receives.
    fn map_action(&self, act: &[f32]) -> Vec<f32> {
        act.to_vec()
    }

    /// Inverse of [`Policy::map_action`]; turns a sampled environment action
    /// back into a raw action for storage.
    fn map_action_inverse(&self, act: &[f32]) -> Vec<f32> {
        act.to_vec()
    }

    /// Perturb raw actions during exploration. Identity by default.
    fn exploration_noise(&mut self, act: Vec<Vec<f32>>, _batch: &ObsBatch<'_>) -> Vec<Vec<f32>> {
        act
    }
}
