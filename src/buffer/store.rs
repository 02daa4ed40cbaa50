//! The write seam the collector drives.

use super::batch::Batch;
use super::error::Result;
use super::manager::BufferManager;
use super::shard::AddOutcome;
use crate::trajectory::index::TrajectoryIndex;

/// Anything the collector can write transitions into.
///
/// Row `i` of every batch belongs to environment slot `shard_ids[i]`, and
/// rows for the same slot arrive in the order they were produced.
pub trait ExperienceStore {
    fn add(&mut self, batch: &Batch, shard_ids: &[usize]) -> Result<Vec<AddOutcome>>;

    fn shard_count(&self) -> usize;

    /// Valid entries across all shards.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the episode running in `shard` because its environment was
    /// reset before the episode ended.
    fn restart_episode(&mut self, shard: usize) -> Result<bool>;

    fn reset(&mut self, keep_statistics: bool);
}

impl ExperienceStore for BufferManager {
    fn add(&mut self, batch: &Batch, shard_ids: &[usize]) -> Result<Vec<AddOutcome>> {
        BufferManager::add(self, batch, shard_ids)
    }

    fn shard_count(&self) -> usize {
        BufferManager::shard_count(self)
    }

    fn len(&self) -> usize {
        BufferManager::len(self)
    }

    fn restart_episode(&mut self, shard: usize) -> Result<bool> {
        BufferManager::restart_episode(self, shard)
    }

    fn reset(&mut self, keep_statistics: bool) {
        BufferManager::reset(self, keep_statistics)
    }
}

impl ExperienceStore for TrajectoryIndex {
    fn add(&mut self, batch: &Batch, shard_ids: &[usize]) -> Result<Vec<AddOutcome>> {
        TrajectoryIndex::add(self, batch, shard_ids)
    }

    fn shard_count(&self) -> usize {
        self.manager().shard_count()
    }

    fn len(&self) -> usize {
        self.manager().len()
    }

    fn restart_episode(&mut self, shard: usize) -> Result<bool> {
        TrajectoryIndex::restart_episode(self, shard)
    }

    fn reset(&mut self, keep_statistics: bool) {
        TrajectoryIndex::reset(self, keep_statistics)
    }
}

// ---------------------------------------------------------------------------
// AnyStore: enum dispatch for runtime store selection
// ---------------------------------------------------------------------------

/// Either store flavour, chosen at runtime from configuration.
#[derive(Debug, Clone)]
pub enum AnyStore {
    Plain(BufferManager),
    Trajectories(TrajectoryIndex),
}

impl AnyStore {
    /// The underlying buffer manager, whichever flavour this is.
    pub fn manager(&self) -> &BufferManager {
        match self {
            Self::Plain(m) => m,
            Self::Trajectories(t) => t.manager(),
        }
    }

    pub fn as_trajectories(&self) -> Option<&TrajectoryIndex> {
        match self {
            Self::Plain(_) => None,
            Self::Trajectories(t) => Some(t),
        }
    }
}

impl ExperienceStore for AnyStore {
    fn add(&mut self, batch: &Batch, shard_ids: &[usize]) -> Result<Vec<AddOutcome>> {
        match self {
            Self::Plain(s) => s.add(batch, shard_ids),
            Self::Trajectories(s) => s.add(batch, shard_ids),
        }
    }

    fn shard_count(&self) -> usize {
        self.manager().shard_count()
    }

    fn len(&self) -> usize {
        self.manager().len()
    }

    fn restart_episode(&mut self, shard: usize) -> Result<bool> {
        match self {
            Self::Plain(s) => s.restart_episode(shard),
            Self::Trajectories(s) => s.restart_episode(shard),
        }
    }

    fn reset(&mut self, keep_statistics: bool) {
        match self {
            Self::Plain(s) => s.reset(keep_statistics),
            Self::Trajectories(s) => s.reset(keep_statistics),
        }
    }
}
