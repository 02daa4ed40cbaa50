use serde::{Deserialize, Serialize};

use crate::env::traits::{ActionSpace, ResetOptions};

/// Complete configuration for a collection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub buffer: BufferConfig,
    pub collector: CollectorConfig,
    pub env: EnvConfig,
}

/// Experience store layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Total capacity across all shards, rounded up to a multiple of the
    /// shard count (default: 1024).
    pub total_size: usize,
    /// Number of shards, one per environment slot (default: 4).
    pub shard_count: usize,
    /// Index trajectories for whole-episode retrieval (default: true).
    pub track_trajectories: bool,
}

/// Collector behaviour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Seed for random-mode action sampling (default: none, seeded from entropy).
    pub seed: Option<u64>,
    /// Apply the policy's exploration noise to its actions (default: false).
    pub exploration_noise: bool,
    /// Options forwarded to every environment reset.
    pub reset_options: ResetOptions,
}

/// Scripted mock environment used by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Episode length per slot; its length is the number of slots
    /// (default: [3, 5, 4, 6]).
    pub episode_lengths: Vec<usize>,
    /// Truncate episodes after this many steps (default: none).
    pub max_steps: Option<usize>,
    /// Action space shared by every slot (default: discrete with 2 actions).
    pub action_space: ActionSpace,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            total_size: 1024,
            shard_count: 4,
            track_trajectories: true,
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            episode_lengths: vec![3, 5, 4, 6],
            max_steps: None,
            action_space: ActionSpace::Discrete { n: 2 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ReplayConfig =
            serde_json::from_str(r#"{"buffer":{"shard_count":2},"collector":{"seed":7}}"#).unwrap();
        assert_eq!(config.buffer.shard_count, 2);
        assert_eq!(config.buffer.total_size, 1024);
        assert_eq!(config.collector.seed, Some(7));
        assert_eq!(config.env, EnvConfig::default());
    }

    #[test]
    fn test_default_layout_matches_env() {
        let config = ReplayConfig::default();
        assert_eq!(config.buffer.shard_count, config.env.episode_lengths.len());
    }
}
