//! A deterministic recurrent policy for tests and the CLI demo.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use super::policy::{HiddenState, ObsBatch, Policy, PolicyOutput};
use crate::buffer::field::Column;
use crate::env::traits::ActionSpace;

/// Width of the latent goal the mock policy emits.
pub const MOCK_GOAL_DIM: usize = 2;

/// Acts deterministically and counts steps in its hidden state.
///
/// The hidden state of a slot is `Single([k])` where `k` is the number of
/// steps since the slot's last episode boundary. Every hidden batch it is
/// handed is recorded, so tests can check the collector's carry-over.
#[derive(Debug, Clone)]
pub struct MockPolicy {
    action_space: ActionSpace,
    omit_latents: bool,
    intrinsic_reward: Option<f32>,
    /// Added to every action component by `exploration_noise`.
    noise: f32,
    hidden_seen: Vec<Vec<HiddenState>>,
    calls: usize,
}

impl MockPolicy {
    pub fn new(action_space: ActionSpace) -> Self {
        Self {
            action_space,
            omit_latents: false,
            intrinsic_reward: None,
            noise: 0.0,
            hidden_seen: Vec::new(),
            calls: 0,
        }
    }

    /// Leave out the latent observation and goal.
    pub fn omit_latents(mut self) -> Self {
        self.omit_latents = true;
        self
    }

    pub fn with_intrinsic_reward(mut self, reward: f32) -> Self {
        self.intrinsic_reward = Some(reward);
        self
    }

    pub fn with_noise(mut self, noise: f32) -> Self {
        self.noise = noise;
        self
    }

    /// Hidden batches received by `act`, in call order.
    pub fn hidden_seen(&self) -> &[Vec<HiddenState>] {
        &self.hidden_seen
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    fn counter(state: &HiddenState) -> Result<f32> {
        match state {
            HiddenState::NoState => Ok(0.0),
            HiddenState::Single(v) if v.len() == 1 => Ok(v[0]),
            other => bail!("unexpected hidden state {other:?}"),
        }
    }

    fn action_for(&self, step: f32) -> Vec<f32> {
        match &self.action_space {
            ActionSpace::Discrete { n } => vec![(step as usize % (*n).max(1)) as f32],
            ActionSpace::Box { low, high } => low
                .iter()
                .zip(high)
                .map(|(lo, hi)| (lo + hi) / 2.0)
                .collect(),
        }
    }
}

impl Policy for MockPolicy {
    fn act(&mut self, batch: &ObsBatch<'_>, hidden: &[HiddenState]) -> Result<PolicyOutput> {
        if hidden.len() != batch.len() {
            bail!("{} hidden states for {} observations", hidden.len(), batch.len());
        }
        self.calls += 1;
        self.hidden_seen.push(hidden.to_vec());

        let counters = hidden.iter().map(Self::counter).collect::<Result<Vec<f32>>>()?;
        let act: Vec<Vec<f32>> = counters.iter().map(|&k| self.action_for(k)).collect();
        let next_hidden = counters
            .iter()
            .map(|k| HiddenState::Single(vec![k + 1.0]))
            .collect();

        let mut extras = BTreeMap::new();
        extras.insert("step".to_string(), Column::Scalar(counters.clone()));

        let (latent_obs, latent_goal) = if self.omit_latents {
            (None, None)
        } else {
            let goals = batch
                .slots
                .iter()
                .map(|&slot| vec![slot as f32, 1.0])
                .collect();
            (Some(batch.obs.to_vec()), Some(goals))
        };

        Ok(PolicyOutput {
            act,
            extras,
            hidden: Some(next_hidden),
            latent_obs,
            latent_goal,
            intrinsic_reward: self.intrinsic_reward.map(|r| vec![r; batch.len()]),
        })
    }

    fn exploration_noise(&mut self, act: Vec<Vec<f32>>, _batch: &ObsBatch<'_>) -> Vec<Vec<f32>> {
        if self.noise == 0.0 {
            return act;
        }
        act.into_iter()
            .map(|a| a.into_iter().map(|x| x + self.noise).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::field::Info;

    #[test]
    fn test_counts_steps_in_hidden_state() {
        let mut policy = MockPolicy::new(ActionSpace::Discrete { n: 2 });
        let obs = vec![vec![0.0; 3], vec![1.0; 3]];
        let info = vec![Info::Absent; 2];
        let batch = ObsBatch {
            obs: &obs,
            info: &info,
            slots: &[0, 1],
        };
        let out = policy
            .act(&batch, &[HiddenState::NoState, HiddenState::Single(vec![3.0])])
            .unwrap();
        assert_eq!(out.act, vec![vec![0.0], vec![1.0]]);
        assert_eq!(
            out.hidden.unwrap(),
            vec![HiddenState::Single(vec![1.0]), HiddenState::Single(vec![4.0])]
        );
        assert_eq!(out.latent_goal.unwrap()[1], vec![1.0, 1.0]);
        assert_eq!(policy.hidden_seen().len(), 1);
    }

    #[test]
    fn test_rejects_paired_state() {
        let mut policy = MockPolicy::new(ActionSpace::Discrete { n: 2 });
        let obs = vec![vec![0.0]];
        let info = vec![Info::Absent];
        let batch = ObsBatch {
            obs: &obs,
            info: &info,
            slots: &[0],
        };
        let paired = HiddenState::Paired(vec![0.0], vec![0.0]);
        assert!(policy.act(&batch, &[paired]).is_err());
    }
}
