//! A scripted vector environment for tests and the CLI demo.
//!
//! Slot `i` runs episodes of a fixed length taken from its schedule, paying a
//! reward of 1.0 per step. Observations are `[slot, t, episode]`, so every
//! transition is traceable back to where and when it happened.

use anyhow::{bail, Result};
use tracing::debug;

use super::traits::{ActionSpace, EnvReset, EnvStep, ResetOptions, VectorEnv};
use crate::buffer::field::Info;
use crate::config::EnvConfig;

/// Width of the mock observation vector.
pub const MOCK_OBS_DIM: usize = 3;

#[derive(Debug, Clone)]
struct MockSlot {
    episode_len: usize,
    /// Steps taken in the current episode.
    t: usize,
    /// Completed episodes.
    episodes: usize,
    /// Total actions received.
    actions: usize,
    /// Set after an episode ends and before the next reset.
    needs_reset: bool,
}

/// Deterministic vector environment with per-slot episode lengths.
#[derive(Debug, Clone)]
pub struct MockVectorEnv {
    slots: Vec<MockSlot>,
    action_space: ActionSpace,
    /// Truncate any episode that reaches this many steps.
    max_steps: Option<usize>,
    /// Fail the n-th call to `step` (1-based).
    fail_on_step_call: Option<usize>,
    step_calls: usize,
}

impl MockVectorEnv {
    /// One slot per entry of `episode_lengths`. Slots start un-reset.
    pub fn new(episode_lengths: Vec<usize>) -> Self {
        let slots = episode_lengths
            .into_iter()
            .map(|len| MockSlot {
                episode_len: len.max(1),
                t: 0,
                episodes: 0,
                actions: 0,
                needs_reset: true,
            })
            .collect();
        Self {
            slots,
            action_space: ActionSpace::Discrete { n: 2 },
            max_steps: None,
            fail_on_step_call: None,
            step_calls: 0,
        }
    }

    pub fn from_config(config: &EnvConfig) -> Self {
        let mut env = Self::new(config.episode_lengths.clone());
        env.action_space = config.action_space.clone();
        env.max_steps = config.max_steps;
        env
    }

    pub fn with_action_space(mut self, space: ActionSpace) -> Self {
        self.action_space = space;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Make the `call`-th step call (1-based) return an error.
    pub fn with_failure_on_step(mut self, call: usize) -> Self {
        self.fail_on_step_call = Some(call);
        self
    }

    /// Actions `slot` has received so far.
    pub fn actions_received(&self, slot: usize) -> usize {
        self.slots.get(slot).map_or(0, |s| s.actions)
    }

    /// Episodes `slot` has finished so far.
    pub fn episodes_finished(&self, slot: usize) -> usize {
        self.slots.get(slot).map_or(0, |s| s.episodes)
    }

    pub fn step_calls(&self) -> usize {
        self.step_calls
    }

    fn observe(slot: usize, state: &MockSlot) -> Vec<f32> {
        vec![slot as f32, state.t as f32, state.episodes as f32]
    }
}

impl VectorEnv for MockVectorEnv {
    fn num_envs(&self) -> usize {
        self.slots.len()
    }

    fn action_space(&self, _slot: usize) -> &ActionSpace {
        &self.action_space
    }

    fn reset(&mut self, slots: &[usize], _options: &ResetOptions) -> Result<Vec<EnvReset>> {
        let mut out = Vec::with_capacity(slots.len());
        for &slot in slots {
            let Some(state) = self.slots.get_mut(slot) else {
                bail!("slot {slot} does not exist");
            };
            state.t = 0;
            state.needs_reset = false;

            let mut info = serde_json::Map::new();
            info.insert("episode".into(), state.episodes.into());
            out.push(EnvReset {
                obs: Self::observe(slot, state),
                info: Info::Present(info),
            });
        }
        debug!(?slots, "mock env reset");
        Ok(out)
    }

    fn step(&mut self, actions: &[Vec<f32>], slots: &[usize]) -> Result<Vec<EnvStep>> {
        self.step_calls += 1;
        if self.fail_on_step_call == Some(self.step_calls) {
            bail!("injected failure on step call {}", self.step_calls);
        }
        if actions.len() != slots.len() {
            bail!("{} actions for {} slots", actions.len(), slots.len());
        }
        for (action, &slot) in actions.iter().zip(slots) {
            if !self.action_space.contains(action) {
                bail!("action {action:?} outside the action space of slot {slot}");
            }
        }

        let max_steps = self.max_steps;
        let mut out = Vec::with_capacity(slots.len());
        for &slot in slots {
            let Some(state) = self.slots.get_mut(slot) else {
                bail!("slot {slot} does not exist");
            };
            if state.needs_reset {
                bail!("slot {slot} stepped without a reset");
            }
            state.t += 1;
            state.actions += 1;

            let terminated = state.t >= state.episode_len;
            let truncated = !terminated && max_steps.is_some_and(|m| state.t >= m);
            let info = if terminated || truncated {
                state.needs_reset = true;
                let mut map = serde_json::Map::new();
                map.insert("length".into(), state.t.into());
                Info::Present(map)
            } else {
                Info::Absent
            };
            let obs_next = Self::observe(slot, state);
            if terminated || truncated {
                state.episodes += 1;
            }
            out.push(EnvStep {
                obs_next,
                reward: 1.0,
                terminated,
                truncated,
                info,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_episode() {
        let mut env = MockVectorEnv::new(vec![2, 3]);
        let resets = env.reset(&[0, 1], &ResetOptions::default()).unwrap();
        assert_eq!(resets[1].obs, vec![1.0, 0.0, 0.0]);

        let first = env.step(&[vec![0.0], vec![1.0]], &[0, 1]).unwrap();
        assert!(!first[0].done());
        let second = env.step(&[vec![0.0], vec![1.0]], &[0, 1]).unwrap();
        assert!(second[0].terminated);
        assert!(second[0].info.is_present());
        assert!(!second[1].done());
        assert_eq!(env.episodes_finished(0), 1);

        // Slot 0 must be reset before stepping again.
        assert!(env.step(&[vec![0.0]], &[0]).is_err());
        env.reset(&[0], &ResetOptions::default()).unwrap();
        let again = env.step(&[vec![0.0]], &[0]).unwrap();
        assert_eq!(again[0].obs_next, vec![0.0, 1.0, 1.0]);
        assert_eq!(env.actions_received(0), 3);
    }

    #[test]
    fn test_truncation() {
        let mut env = MockVectorEnv::new(vec![5]).with_max_steps(2);
        env.reset(&[0], &ResetOptions::default()).unwrap();
        env.step(&[vec![0.0]], &[0]).unwrap();
        let out = env.step(&[vec![0.0]], &[0]).unwrap();
        assert!(out[0].truncated && !out[0].terminated);
    }

    #[test]
    fn test_injected_failure() {
        let mut env = MockVectorEnv::new(vec![4]).with_failure_on_step(2);
        env.reset(&[0], &ResetOptions::default()).unwrap();
        assert!(env.step(&[vec![0.0]], &[0]).is_ok());
        assert!(env.step(&[vec![0.0]], &[0]).is_err());
    }

    #[test]
    fn test_rejects_invalid_action() {
        let mut env = MockVectorEnv::new(vec![4]);
        env.reset(&[0], &ResetOptions::default()).unwrap();
        assert!(env.step(&[vec![5.0]], &[0]).is_err());
    }
}
