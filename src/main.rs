//! goal-replay: drive the mock environments into a sharded replay buffer.
//!
//! Provides subcommands:
//!
//! - `collect`     -- Run collection rounds and print their statistics
//! - `trajectory`  -- Collect episodes and show where each trajectory lives

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use goal_replay::agent::MockPolicy;
use goal_replay::buffer::{AnyStore, BufferManager};
use goal_replay::config::{BufferConfig, ReplayConfig};
use goal_replay::env::MockVectorEnv;
use goal_replay::trajectory::{CollectBudget, TrajectoryIndex, VectorizedCollector};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Sharded goal-augmented experience replay
#[derive(Parser)]
#[command(name = "goal-replay", version, about)]
struct Cli {
    /// Path to a JSON configuration file (uses defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect experience and print one JSON stats record per round.
    Collect {
        /// Transitions per round.
        #[arg(long)]
        steps: Option<usize>,

        /// Finished episodes per round.
        #[arg(long)]
        episodes: Option<usize>,

        /// Sample actions from the action space instead of the policy.
        #[arg(long)]
        random: bool,

        /// Number of collection calls on the same collector.
        #[arg(long, default_value_t = 1)]
        rounds: usize,
    },

    /// Collect episodes into a trajectory index and print segment coverage.
    Trajectory {
        /// Episodes to collect.
        #[arg(long, default_value_t = 8)]
        episodes: usize,
    },
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // Initialise tracing (reads RUST_LOG env var, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str::<ReplayConfig>(&text)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        }
        None => ReplayConfig::default(),
    };

    match cli.command {
        Commands::Collect {
            steps,
            episodes,
            random,
            rounds,
        } => cmd_collect(&config, steps, episodes, random, rounds),
        Commands::Trajectory { episodes } => cmd_trajectory(&config, episodes),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_collect(
    config: &ReplayConfig,
    steps: Option<usize>,
    episodes: Option<usize>,
    random: bool,
    rounds: usize,
) -> Result<()> {
    let budget = CollectBudget::from_counts(steps, episodes)?;
    let store = create_store(&config.buffer)?;
    let mut collector = create_collector(config, store)?;

    for round in 0..rounds {
        let stats = collector
            .collect(budget, random)
            .with_context(|| format!("collection round {round} failed"))?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    let store = collector.store();
    tracing::info!(
        stored = store.manager().len(),
        capacity = store.manager().capacity(),
        total_steps = collector.collect_step(),
        total_episodes = collector.collect_episode(),
        "Collection finished"
    );
    if let Some(index) = store.as_trajectories() {
        tracing::info!(trajectories = index.trajectory_count(), "Trajectories indexed");
    }
    Ok(())
}

fn cmd_trajectory(config: &ReplayConfig, episodes: usize) -> Result<()> {
    let budget = CollectBudget::from_counts(None, Some(episodes))?;
    let index = TrajectoryIndex::from_config(&config.buffer)?;
    let mut collector = create_collector(config, AnyStore::Trajectories(index))?;

    let stats = collector.collect(budget, false)?;
    tracing::info!(
        episodes = stats.n_collected_episodes,
        mean_len = stats.lens_stat().mean,
        "Episodes collected"
    );

    let Some(index) = collector.store().as_trajectories() else {
        anyhow::bail!("store is not trajectory-aware");
    };
    let mut ids: Vec<_> = index.trajectory_ids().copied().collect();
    ids.sort();

    println!("Trajectories: {}", ids.len());
    for id in ids {
        println!("  {id}");
        for (shard, segment) in index.live_segments(&id)?.iter().enumerate() {
            match segment {
                Some(s) => println!(
                    "    shard {shard}: [{}..={}] ({} entries)",
                    s.first,
                    s.last,
                    s.span()
                ),
                None => println!("    shard {shard}: -"),
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

fn create_store(config: &BufferConfig) -> Result<AnyStore> {
    let store = if config.track_trajectories {
        tracing::info!("Using trajectory-aware store");
        AnyStore::Trajectories(TrajectoryIndex::from_config(config)?)
    } else {
        tracing::info!("Using plain buffer store");
        AnyStore::Plain(BufferManager::from_config(config)?)
    };
    Ok(store)
}

fn create_collector(
    config: &ReplayConfig,
    store: AnyStore,
) -> Result<VectorizedCollector<MockPolicy, MockVectorEnv, AnyStore>> {
    let env = MockVectorEnv::from_config(&config.env);
    let policy = MockPolicy::new(config.env.action_space.clone());
    let mut collector = VectorizedCollector::new(policy, env, store, config.collector.clone())
        .context("Failed to build collector (shard_count must equal the number of env slots)")?;
    collector.reset_env()?;
    Ok(collector)
}
