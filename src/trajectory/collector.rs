//! Vectorized collection: driving N environment slots in lockstep.
//!
//! The [`VectorizedCollector`] repeatedly:
//!   1. asks the policy for an action per ready slot (or samples one),
//!   2. steps the ready slots,
//!   3. writes one transition per ready slot into the store,
//!   4. resets every slot whose episode just ended.
//!
//! A call runs until its [`CollectBudget`] is met. In step mode the per-slot
//! observation, info and hidden state survive into the next call, so episodes
//! may span calls. In episode mode only as many slots as are needed stay
//! active, and every slot is reset when the call ends.

use std::time::Instant;

use anyhow::anyhow;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::policy::{HiddenState, ObsBatch, Policy, PolicyOutput};
use crate::buffer::batch::Batch;
use crate::buffer::error::BufferError;
use crate::buffer::field::{Column, Field, Info};
use crate::buffer::store::ExperienceStore;
use crate::config::CollectorConfig;
use crate::env::traits::{EnvReset, VectorEnv};
use crate::trajectory::index::TrajectoryId;
use crate::trajectory::types::CollectionStats;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// Neither or both of the step and episode budgets were given, or the
    /// one given is zero.
    #[error("invalid collection budget: {0}")]
    InvalidCollectionBudget(String),

    /// The policy left out a latent field outside random mode.
    #[error("policy did not produce `{0}`")]
    MissingLatentState(&'static str),

    #[error("environment step failed: {0:#}")]
    EnvironmentStepFailure(anyhow::Error),

    #[error("environment reset failed: {0:#}")]
    EnvironmentResetFailure(anyhow::Error),

    #[error("policy failed: {0:#}")]
    PolicyFailure(anyhow::Error),

    /// `collect` was called before `reset_env`, or after a failed call.
    #[error("environments have not been reset")]
    NotReset,

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

pub type Result<T> = std::result::Result<T, CollectError>;

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// When a collection call stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectBudget {
    /// Until at least this many transitions have been written.
    Steps(usize),
    /// Until at least this many episodes have finished.
    Episodes(usize),
}

impl CollectBudget {
    /// Exactly one of the two counts must be given, and it must be positive.
    pub fn from_counts(n_step: Option<usize>, n_episode: Option<usize>) -> Result<Self> {
        match (n_step, n_episode) {
            (Some(0), None) | (None, Some(0)) => Err(CollectError::InvalidCollectionBudget(
                "the budget must be at least 1".into(),
            )),
            (Some(n), None) => Ok(Self::Steps(n)),
            (None, Some(n)) => Ok(Self::Episodes(n)),
            (Some(_), Some(_)) => Err(CollectError::InvalidCollectionBudget(
                "only one of n_step and n_episode may be given".into(),
            )),
            (None, None) => Err(CollectError::InvalidCollectionBudget(
                "one of n_step and n_episode is required".into(),
            )),
        }
    }

    fn validate(self) -> Result<Self> {
        match self {
            Self::Steps(0) | Self::Episodes(0) => Err(CollectError::InvalidCollectionBudget(
                "the budget must be at least 1".into(),
            )),
            ok => Ok(ok),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-slot state
// ---------------------------------------------------------------------------

/// Last observation, info and hidden state of every slot, indexed by slot.
#[derive(Debug, Clone)]
struct SlotState {
    obs: Vec<Vec<f32>>,
    info: Vec<Info>,
    hidden: Vec<HiddenState>,
}

/// Actions for one iteration plus whatever else the policy produced.
struct ActionStep {
    /// Stored in the buffer.
    raw: Vec<Vec<f32>>,
    /// Sent to the environments.
    mapped: Vec<Vec<f32>>,
    /// Policy-produced columns, already checked against the row count.
    columns: Vec<(Field, Column)>,
    /// Next hidden state per row; `None` for a stateless step.
    hidden: Option<Vec<HiddenState>>,
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Drives a [`VectorEnv`] with a [`Policy`] and writes into an
/// [`ExperienceStore`] with one shard per slot.
pub struct VectorizedCollector<P, E, S> {
    policy: P,
    env: E,
    store: S,
    config: CollectorConfig,
    rng: StdRng,
    state: Option<SlotState>,
    traj_ids: Vec<TrajectoryId>,
    collect_step: usize,
    collect_episode: usize,
    collect_time: f64,
}

impl<P, E, S> VectorizedCollector<P, E, S>
where
    P: Policy,
    E: VectorEnv,
    S: ExperienceStore,
{
    /// The store must have exactly one shard per environment slot.
    pub fn new(policy: P, env: E, store: S, config: CollectorConfig) -> Result<Self> {
        if store.shard_count() != env.num_envs() {
            return Err(BufferError::InvalidLayout(format!(
                "{} environment slots need as many shards, the store has {}",
                env.num_envs(),
                store.shard_count()
            ))
            .into());
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            policy,
            env,
            store,
            config,
            rng,
            state: None,
            traj_ids: Vec::new(),
            collect_step: 0,
            collect_episode: 0,
            collect_time: 0.0,
        })
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_parts(self) -> (P, E, S) {
        (self.policy, self.env, self.store)
    }

    /// Whether `collect` can run without a prior `reset_env`.
    pub fn is_reset(&self) -> bool {
        self.state.is_some()
    }

    /// Transitions written over the collector's lifetime.
    pub fn collect_step(&self) -> usize {
        self.collect_step
    }

    /// Episodes finished over the collector's lifetime.
    pub fn collect_episode(&self) -> usize {
        self.collect_episode
    }

    /// Seconds spent collecting over the collector's lifetime.
    pub fn collect_time(&self) -> f64 {
        self.collect_time
    }

    /// Reset every slot, clear hidden states and start fresh trajectories.
    pub fn reset_env(&mut self) -> Result<()> {
        self.state = None;
        let slots: Vec<usize> = (0..self.env.num_envs()).collect();
        let resets = self.reset_slots(&slots)?;

        for &slot in &slots {
            self.store.restart_episode(slot)?;
        }

        let (obs, info) = resets.into_iter().map(|r| (r.obs, r.info)).unzip();
        self.state = Some(SlotState {
            obs,
            info,
            hidden: vec![HiddenState::NoState; slots.len()],
        });
        self.traj_ids = slots.iter().map(|_| Uuid::new_v4()).collect();
        debug!(slots = slots.len(), "environments reset");
        Ok(())
    }

    /// Clear the lifetime counters and, if asked, the store; then reset
    /// every slot.
    pub fn reset(&mut self, reset_store: bool) -> Result<()> {
        self.collect_step = 0;
        self.collect_episode = 0;
        self.collect_time = 0.0;
        if reset_store {
            self.store.reset(false);
        }
        self.reset_env()
    }

    fn reset_slots(&mut self, slots: &[usize]) -> Result<Vec<EnvReset>> {
        let resets = self
            .env
            .reset(slots, &self.config.reset_options)
            .map_err(CollectError::EnvironmentResetFailure)?;
        if resets.len() != slots.len() {
            return Err(CollectError::EnvironmentResetFailure(anyhow!(
                "reset of {} slots returned {} results",
                slots.len(),
                resets.len()
            )));
        }
        Ok(resets)
    }

    /// Run one collection call.
    ///
    /// A failed call is not retried. Transitions written before the failure
    /// stay in the store, and the collector must be reset with
    /// [`reset_env`](Self::reset_env) before collecting again.
    pub fn collect(&mut self, budget: CollectBudget, random: bool) -> Result<CollectionStats> {
        let budget = budget.validate()?;
        let mut state = self.state.take().ok_or(CollectError::NotReset)?;
        let started = Instant::now();
        let num_envs = self.env.num_envs();

        let mut ready: Vec<usize> = match budget {
            CollectBudget::Steps(_) => (0..num_envs).collect(),
            CollectBudget::Episodes(n) => (0..num_envs.min(n)).collect(),
        };
        let mut stats = CollectionStats::default();

        while !ready.is_empty() {
            let obs: Vec<Vec<f32>> = ready.iter().map(|&s| state.obs[s].clone()).collect();
            let info: Vec<Info> = ready.iter().map(|&s| state.info[s].clone()).collect();
            let hidden: Vec<HiddenState> = ready.iter().map(|&s| state.hidden[s].clone()).collect();
            let obs_batch = ObsBatch {
                obs: &obs,
                info: &info,
                slots: &ready,
            };

            let action = if random {
                self.sample_actions(&ready)
            } else {
                self.policy_actions(&obs_batch, &hidden)?
            };

            let steps = self
                .env
                .step(&action.mapped, &ready)
                .map_err(CollectError::EnvironmentStepFailure)?;
            if steps.len() != ready.len() {
                return Err(CollectError::EnvironmentStepFailure(anyhow!(
                    "step of {} slots returned {} results",
                    ready.len(),
                    steps.len()
                )));
            }

            let obs_next: Vec<Vec<f32>> = steps.iter().map(|s| s.obs_next.clone()).collect();
            let mut batch = Batch::new()
                .with(Field::Obs, rows_column(&obs)?)?
                .with(Field::Act, rows_column(&action.raw)?)?
                .with(Field::ObsNext, rows_column(&obs_next)?)?
                .with(Field::Rew, Column::Scalar(steps.iter().map(|s| s.reward).collect()))?
                .with(
                    Field::Terminated,
                    Column::Flag(steps.iter().map(|s| s.terminated).collect()),
                )?
                .with(
                    Field::Truncated,
                    Column::Flag(steps.iter().map(|s| s.truncated).collect()),
                )?
                .with(Field::Info, Column::Info(steps.iter().map(|s| s.info.clone()).collect()))?
                .with(
                    Field::TrajId,
                    Column::Trajectory(ready.iter().map(|&s| self.traj_ids[s]).collect()),
                )?;

            for (field, column) in action.columns {
                batch.insert(field, column)?;
            }

            let outcomes = self.store.add(&batch, &ready)?;

            let next_hidden = action.hidden;
            for (i, (&slot, step)) in ready.iter().zip(steps).enumerate() {
                state.obs[slot] = step.obs_next;
                state.info[slot] = step.info;
                state.hidden[slot] = next_hidden
                    .as_ref()
                    .map_or(HiddenState::NoState, |h| h[i].clone());
            }
            stats.n_collected_steps += ready.len();

            let finished: Vec<usize> = outcomes
                .iter()
                .enumerate()
                .filter(|(_, o)| o.done)
                .map(|(i, _)| i)
                .collect();
            if !finished.is_empty() {
                let done_slots: Vec<usize> = finished.iter().map(|&i| ready[i]).collect();
                for &i in &finished {
                    let outcome = &outcomes[i];
                    stats.returns.push(outcome.episode_return);
                    stats.intrinsic_returns.push(outcome.episode_intrinsic_return);
                    stats.lens.push(outcome.episode_length);
                    stats.episode_starts.push(outcome.episode_start);
                    debug!(
                        slot = ready[i],
                        episode_return = outcome.episode_return,
                        episode_length = outcome.episode_length,
                        episode_start = outcome.episode_start,
                        "episode finished"
                    );
                }
                stats.n_collected_episodes += finished.len();

                let resets = self.reset_slots(&done_slots)?;
                for (&slot, reset) in done_slots.iter().zip(resets) {
                    state.obs[slot] = reset.obs;
                    state.info[slot] = reset.info;
                    state.hidden[slot] = HiddenState::NoState;
                    self.traj_ids[slot] = Uuid::new_v4();
                }

                if let CollectBudget::Episodes(n) = budget {
                    let remaining = n.saturating_sub(stats.n_collected_episodes);
                    let surplus = ready.len().saturating_sub(remaining).min(done_slots.len());
                    if surplus > 0 {
                        let dropped = &done_slots[..surplus];
                        debug!(?dropped, remaining, "trimming surplus environments");
                        ready.retain(|slot| !dropped.contains(slot));
                    }
                }
            }

            let finished_budget = match budget {
                CollectBudget::Steps(n) => stats.n_collected_steps >= n,
                CollectBudget::Episodes(n) => stats.n_collected_episodes >= n,
            };
            if finished_budget {
                break;
            }
        }

        match budget {
            CollectBudget::Steps(_) => self.state = Some(state),
            CollectBudget::Episodes(_) => self.reset_env()?,
        }

        stats.collect_time = started.elapsed().as_secs_f64();
        stats.collect_speed = if stats.collect_time > 0.0 {
            stats.n_collected_steps as f64 / stats.collect_time
        } else {
            0.0
        };
        self.collect_step += stats.n_collected_steps;
        self.collect_episode += stats.n_collected_episodes;
        self.collect_time += stats.collect_time;

        info!(
            steps = stats.n_collected_steps,
            episodes = stats.n_collected_episodes,
            speed = stats.collect_speed,
            random,
            "collection finished"
        );
        Ok(stats)
    }

    /// Uniform samples from each slot's action space. The sample is what the
    /// environment receives; its inverse mapping is what gets stored.
    fn sample_actions(&mut self, ready: &[usize]) -> ActionStep {
        let mapped: Vec<Vec<f32>> = ready
            .iter()
            .map(|&slot| self.env.action_space(slot).sample(&mut self.rng))
            .collect();
        let raw = mapped
            .iter()
            .map(|a| self.policy.map_action_inverse(a))
            .collect();
        ActionStep {
            raw,
            mapped,
            columns: Vec::new(),
            hidden: None,
        }
    }

    /// Run the policy and turn everything it produced into columns, so a
    /// malformed output fails before any environment is stepped.
    fn policy_actions(&mut self, batch: &ObsBatch<'_>, hidden: &[HiddenState]) -> Result<ActionStep> {
        let PolicyOutput {
            act,
            extras,
            hidden: next_hidden,
            latent_obs,
            latent_goal,
            intrinsic_reward,
        } = self
            .policy
            .act(batch, hidden)
            .map_err(CollectError::PolicyFailure)?;

        let rows = batch.len();
        check_rows("actions", act.len(), rows)?;
        if let Some(next) = &next_hidden {
            check_rows("hidden states", next.len(), rows)?;
        }
        let latent_obs = latent_obs.ok_or(CollectError::MissingLatentState("latent_obs"))?;
        let latent_goal = latent_goal.ok_or(CollectError::MissingLatentState("latent_goal"))?;
        check_rows("latent observations", latent_obs.len(), rows)?;
        check_rows("latent goals", latent_goal.len(), rows)?;

        let goal = rows_column(&latent_goal)?;
        let mut columns = vec![
            (Field::LatentObs, rows_column(&latent_obs)?),
            (Field::LatentGoalNext, goal.clone()),
            (Field::LatentGoal, goal),
        ];
        if let Some(int_rew) = intrinsic_reward {
            check_rows("intrinsic rewards", int_rew.len(), rows)?;
            columns.push((Field::IntRew, Column::Scalar(int_rew)));
        }
        for (name, column) in extras {
            check_rows(&format!("`policy.{name}` rows"), column.len(), rows)?;
            columns.push((Field::policy(name), column));
        }
        if let Some(column) = next_hidden.as_deref().map(hidden_column).transpose()?.flatten() {
            columns.push((Field::HiddenState, column));
        }

        let mut raw = act;
        if self.config.exploration_noise {
            raw = self.policy.exploration_noise(raw, batch);
        }
        let mapped = raw.iter().map(|a| self.policy.map_action(a)).collect();
        Ok(ActionStep {
            raw,
            mapped,
            columns,
            hidden: next_hidden,
        })
    }
}

fn check_rows(what: &str, got: usize, rows: usize) -> Result<()> {
    if got != rows {
        return Err(CollectError::PolicyFailure(anyhow!(
            "policy returned {got} {what} for {rows} observations"
        )));
    }
    Ok(())
}

/// Flatten hidden states into one vector column. `NoState` rows are zero
/// filled; `None` when no row carries a state.
fn hidden_column(states: &[HiddenState]) -> Result<Option<Column>> {
    let Some(dim) = states.iter().map(HiddenState::width).find(|&w| w > 0) else {
        return Ok(None);
    };
    let mut rows = Vec::with_capacity(states.len());
    for state in states {
        if let HiddenState::Paired(h, c) = state {
            if h.len() != c.len() {
                return Err(CollectError::PolicyFailure(anyhow!(
                    "paired hidden state halves differ in width ({} vs {})",
                    h.len(),
                    c.len()
                )));
            }
        }
        rows.push(match state {
            HiddenState::NoState => vec![0.0; dim],
            other => other.to_row(),
        });
    }
    Ok(Some(Column::from_rows(dim, &rows)?))
}

/// Stack equally wide rows into a vector column.
fn rows_column(rows: &[Vec<f32>]) -> Result<Column> {
    let dim = rows.first().map_or(0, Vec::len);
    Ok(Column::from_rows(dim, rows)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::MockPolicy;
    use crate::buffer::manager::BufferManager;
    use crate::env::mock::MockVectorEnv;
    use crate::env::traits::ActionSpace;

    type Collector = VectorizedCollector<MockPolicy, MockVectorEnv, BufferManager>;

    fn collector(lengths: Vec<usize>, capacity_per_shard: usize) -> Collector {
        let n = lengths.len();
        let env = MockVectorEnv::new(lengths);
        let policy = MockPolicy::new(ActionSpace::Discrete { n: 2 });
        let store = BufferManager::new(capacity_per_shard * n, n).unwrap();
        let config = CollectorConfig {
            seed: Some(11),
            ..Default::default()
        };
        let mut collector = VectorizedCollector::new(policy, env, store, config).unwrap();
        collector.reset_env().unwrap();
        collector
    }

    #[test]
    fn test_budget_validation() {
        assert!(matches!(
            CollectBudget::from_counts(None, None),
            Err(CollectError::InvalidCollectionBudget(_))
        ));
        assert!(matches!(
            CollectBudget::from_counts(Some(1), Some(1)),
            Err(CollectError::InvalidCollectionBudget(_))
        ));
        assert!(CollectBudget::from_counts(Some(0), None).is_err());
        assert_eq!(
            CollectBudget::from_counts(Some(3), None).unwrap(),
            CollectBudget::Steps(3)
        );

        let mut c = collector(vec![2], 8);
        assert!(matches!(
            c.collect(CollectBudget::Episodes(0), false),
            Err(CollectError::InvalidCollectionBudget(_))
        ));
    }

    #[test]
    fn test_requires_reset() {
        let env = MockVectorEnv::new(vec![2]);
        let policy = MockPolicy::new(ActionSpace::Discrete { n: 2 });
        let store = BufferManager::new(4, 1).unwrap();
        let mut c = VectorizedCollector::new(policy, env, store, CollectorConfig::default()).unwrap();
        assert!(matches!(
            c.collect(CollectBudget::Steps(1), false),
            Err(CollectError::NotReset)
        ));
    }

    #[test]
    fn test_store_must_match_slots() {
        let env = MockVectorEnv::new(vec![2, 2]);
        let policy = MockPolicy::new(ActionSpace::Discrete { n: 2 });
        let store = BufferManager::new(8, 4).unwrap();
        let result = VectorizedCollector::new(policy, env, store, CollectorConfig::default());
        assert!(matches!(
            result,
            Err(CollectError::Buffer(BufferError::InvalidLayout(_)))
        ));
    }

    #[test]
    fn test_hidden_state_resets_on_episode_end() {
        let mut c = collector(vec![2, 3], 8);
        c.collect(CollectBudget::Steps(6), false).unwrap();

        let seen = c.policy().hidden_seen();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], vec![HiddenState::NoState, HiddenState::NoState]);
        assert_eq!(
            seen[1],
            vec![HiddenState::Single(vec![1.0]), HiddenState::Single(vec![1.0])]
        );
        // Slot 0 finished its 2-step episode on the previous iteration.
        assert_eq!(
            seen[2],
            vec![HiddenState::NoState, HiddenState::Single(vec![2.0])]
        );
    }

    #[test]
    fn test_episode_stats_use_global_starts() {
        let mut c = collector(vec![2, 3], 8);
        let stats = c.collect(CollectBudget::Steps(6), false).unwrap();

        assert_eq!(stats.n_collected_steps, 6);
        assert_eq!(stats.n_collected_episodes, 2);
        assert_eq!(stats.lens, vec![2, 3]);
        assert_eq!(stats.returns, vec![2.0, 3.0]);
        assert_eq!(stats.episode_starts, vec![0, 8]);
        assert_eq!(stats.intrinsic_returns, vec![0.0, 0.0]);
        assert_eq!(c.collect_step(), 6);
        assert_eq!(c.collect_episode(), 2);
    }

    #[test]
    fn test_surplus_slots_are_trimmed() {
        let mut c = collector(vec![2, 2, 2, 2], 16);
        let stats = c.collect(CollectBudget::Episodes(5), false).unwrap();

        assert_eq!(stats.n_collected_episodes, 5);
        // After the first round only one more episode was needed, so slots
        // 0..=2 were dropped and slot 3 ran alone.
        for slot in 0..3 {
            assert_eq!(c.env().actions_received(slot), 2);
        }
        assert_eq!(c.env().actions_received(3), 4);
        assert_eq!(stats.n_collected_steps, 10);
    }

    #[test]
    fn test_episode_mode_resets_all_slots() {
        let mut c = collector(vec![2, 5], 16);
        c.collect(CollectBudget::Episodes(1), false).unwrap();

        // Only slot 0 was active; the next call starts every slot afresh.
        assert_eq!(c.env().actions_received(1), 0);
        c.collect(CollectBudget::Steps(2), false).unwrap();
        let last = c.policy().hidden_seen().last().unwrap();
        assert_eq!(last, &vec![HiddenState::NoState, HiddenState::NoState]);
    }

    #[test]
    fn test_missing_latents_write_nothing() {
        let env = MockVectorEnv::new(vec![3, 3]);
        let policy = MockPolicy::new(ActionSpace::Discrete { n: 2 }).omit_latents();
        let store = BufferManager::new(8, 2).unwrap();
        let mut c = VectorizedCollector::new(policy, env, store, CollectorConfig::default()).unwrap();
        c.reset_env().unwrap();

        let err = c.collect(CollectBudget::Steps(2), false).unwrap_err();
        assert!(matches!(err, CollectError::MissingLatentState("latent_obs")));
        assert!(c.store().is_empty());
    }

    #[test]
    fn test_random_mode_skips_policy() {
        let env = MockVectorEnv::new(vec![3, 3]);
        let policy = MockPolicy::new(ActionSpace::Discrete { n: 2 }).omit_latents();
        let store = BufferManager::new(8, 2).unwrap();
        let config = CollectorConfig {
            seed: Some(5),
            ..Default::default()
        };
        let mut c = VectorizedCollector::new(policy, env, store, config).unwrap();
        c.reset_env().unwrap();

        let stats = c.collect(CollectBudget::Steps(4), true).unwrap();
        assert_eq!(stats.n_collected_steps, 4);
        assert_eq!(c.policy().calls(), 0);
        assert!(!c.store().registry().contains(&Field::LatentGoal));
        assert!(!c.store().registry().contains(&Field::HiddenState));
    }

    #[test]
    fn test_step_failure_keeps_written_rows() {
        let env = MockVectorEnv::new(vec![5, 5]).with_failure_on_step(3);
        let policy = MockPolicy::new(ActionSpace::Discrete { n: 2 });
        let store = BufferManager::new(16, 2).unwrap();
        let mut c = VectorizedCollector::new(policy, env, store, CollectorConfig::default()).unwrap();
        c.reset_env().unwrap();

        let err = c.collect(CollectBudget::Steps(10), false).unwrap_err();
        assert!(matches!(err, CollectError::EnvironmentStepFailure(_)));
        assert_eq!(c.store().len(), 4);
        assert!(!c.is_reset());
    }

    #[test]
    fn test_exploration_noise_is_stored() {
        let space = ActionSpace::Box {
            low: vec![-1.0],
            high: vec![1.0],
        };
        let env = MockVectorEnv::new(vec![4]).with_action_space(space.clone());
        let policy = MockPolicy::new(space).with_noise(0.5);
        let store = BufferManager::new(4, 1).unwrap();
        let config = CollectorConfig {
            exploration_noise: true,
            ..Default::default()
        };
        let mut c = VectorizedCollector::new(policy, env, store, config).unwrap();
        c.reset_env().unwrap();
        c.collect(CollectBudget::Steps(1), false).unwrap();

        let batch = c.store().get(&[0]).unwrap();
        assert_eq!(batch.vector(&Field::Act, 0).unwrap(), &[0.5]);
    }

    #[test]
    fn test_policy_columns_are_stored() {
        let env = MockVectorEnv::new(vec![2]);
        let policy = MockPolicy::new(ActionSpace::Discrete { n: 2 }).with_intrinsic_reward(0.5);
        let store = BufferManager::new(4, 1).unwrap();
        let mut c = VectorizedCollector::new(policy, env, store, CollectorConfig::default()).unwrap();
        c.reset_env().unwrap();

        let stats = c.collect(CollectBudget::Episodes(1), false).unwrap();
        assert_eq!(stats.intrinsic_returns, vec![1.0]);

        let batch = c.store().get(&[0, 1]).unwrap();
        assert_eq!(batch.scalars(&Field::policy("step")).unwrap(), &[0.0, 1.0]);
        assert_eq!(batch.vector(&Field::LatentGoal, 1).unwrap(), &[0.0, 1.0]);
        assert_eq!(batch.flags(&Field::Done).unwrap(), &[false, true]);
        assert!(batch.get(&Field::TrajId).is_some());
    }

    #[test]
    fn test_reset_clears_counters_and_store() {
        let mut c = collector(vec![2], 8);
        c.collect(CollectBudget::Steps(3), false).unwrap();
        c.reset(true).unwrap();
        assert_eq!(c.collect_step(), 0);
        assert_eq!(c.collect_episode(), 0);
        assert!(c.store().is_empty());
        assert!(c.is_reset());
    }

    #[test]
    fn test_reset_env_closes_unfinished_episodes() {
        let mut c = collector(vec![3, 5], 32);
        // Slot 1 is one step into its episode when the episode-mode call
        // ends and resets every slot.
        c.collect(CollectBudget::Steps(2), false).unwrap();
        c.collect(CollectBudget::Episodes(1), false).unwrap();

        let stats = c.collect(CollectBudget::Steps(10), false).unwrap();
        assert_eq!(stats.lens, vec![3, 5]);
        assert_eq!(stats.returns, vec![3.0, 5.0]);
        assert_eq!(stats.episode_starts, vec![3, 33]);

        // Navigation stops at the end of the abandoned step.
        assert_eq!(c.store().next(32).unwrap(), 32);
        assert_eq!(c.store().prev(33).unwrap(), 33);
    }

    #[test]
    fn test_collector_reset_without_store_clear_restarts_episodes() {
        let mut c = collector(vec![4], 16);
        c.collect(CollectBudget::Steps(2), false).unwrap();
        c.reset(false).unwrap();
        let stats = c.collect(CollectBudget::Episodes(1), false).unwrap();
        assert_eq!(stats.lens, vec![4]);
        assert_eq!(stats.episode_starts, vec![2]);
    }

    #[test]
    fn test_next_hidden_state_is_stored() {
        let mut c = collector(vec![2, 3], 8);
        c.collect(CollectBudget::Steps(4), false).unwrap();

        let batch = c.store().get(&[0, 1, 8, 9]).unwrap();
        let rows: Vec<Vec<f32>> = (0..4)
            .map(|r| batch.vector(&Field::HiddenState, r).unwrap().to_vec())
            .collect();
        assert_eq!(rows, vec![vec![1.0], vec![2.0], vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_hidden_column_flattens_states() {
        let states = vec![
            HiddenState::NoState,
            HiddenState::Paired(vec![1.0, 2.0], vec![3.0, 4.0]),
        ];
        let column = hidden_column(&states).unwrap().unwrap();
        assert_eq!(column.vector_row(0).unwrap(), &[0.0; 4]);
        assert_eq!(column.vector_row(1).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(
            HiddenState::paired_from_row(column.vector_row(1).unwrap()),
            states[1]
        );

        assert!(hidden_column(&[HiddenState::NoState]).unwrap().is_none());
        let uneven = [HiddenState::Paired(vec![1.0], vec![2.0, 3.0])];
        assert!(matches!(
            hidden_column(&uneven),
            Err(CollectError::PolicyFailure(_))
        ));
    }

    /// Returns one row too few in a policy extra column.
    struct ShortExtras(MockPolicy);

    impl Policy for ShortExtras {
        fn act(&mut self, batch: &ObsBatch<'_>, hidden: &[HiddenState]) -> anyhow::Result<PolicyOutput> {
            let mut out = self.0.act(batch, hidden)?;
            out.extras.insert("value".into(), Column::Scalar(vec![0.0; batch.len() - 1]));
            Ok(out)
        }
    }

    #[test]
    fn test_malformed_policy_output_fails_before_stepping() {
        let env = MockVectorEnv::new(vec![3, 3]);
        let policy = ShortExtras(MockPolicy::new(ActionSpace::Discrete { n: 2 }));
        let store = BufferManager::new(8, 2).unwrap();
        let mut c = VectorizedCollector::new(policy, env, store, CollectorConfig::default()).unwrap();
        c.reset_env().unwrap();

        let err = c.collect(CollectBudget::Steps(2), false).unwrap_err();
        assert!(matches!(err, CollectError::PolicyFailure(_)));
        assert_eq!(c.env().step_calls(), 0);
        assert!(c.store().is_empty());
    }
}
