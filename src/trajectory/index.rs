//! Whole-trajectory retrieval on top of a [`BufferManager`].
//!
//! Every add records, per trajectory identifier and shard, the first and last
//! global index that identifier was written to. Ranges are contiguous within a
//! shard only; an identifier reused across environments owns one independent
//! segment per shard it touched.
//!
//! Ring overwrites are tracked through each shard's write counter: a segment
//! is clipped to the entries still live in its shard, and reads as absent once
//! all of them have been overwritten.

use std::collections::HashMap;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::buffer::batch::Batch;
use crate::buffer::error::{BufferError, Result};
use crate::buffer::field::{Column, Field};
use crate::buffer::manager::BufferManager;
use crate::buffer::shard::AddOutcome;
use crate::config::BufferConfig;

/// Externally supplied tag grouping the transitions of one logical episode.
pub type TrajectoryId = Uuid;

/// Inclusive range one trajectory occupies in one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrajectorySegment {
    /// Global index of the first entry.
    pub first: usize,
    /// Global index of the last entry.
    pub last: usize,
    /// Shard write sequence number of the first entry.
    pub first_seq: u64,
    /// Shard write sequence number of the last entry.
    pub last_seq: u64,
}

impl TrajectorySegment {
    fn starting_at(outcome: &AddOutcome) -> Self {
        Self {
            first: outcome.ptr,
            last: outcome.ptr,
            first_seq: outcome.seq,
            last_seq: outcome.seq,
        }
    }

    /// Number of entries the segment spans (never zero).
    pub fn span(&self) -> u64 {
        self.last_seq - self.first_seq + 1
    }
}

/// A buffer manager that also remembers where each trajectory lives.
#[derive(Debug, Clone)]
pub struct TrajectoryIndex {
    manager: BufferManager,
    records: HashMap<TrajectoryId, Vec<Option<TrajectorySegment>>>,
}

impl TrajectoryIndex {
    pub fn new(manager: BufferManager) -> Self {
        Self {
            manager,
            records: HashMap::new(),
        }
    }

    pub fn from_config(config: &BufferConfig) -> Result<Self> {
        Ok(Self::new(BufferManager::from_config(config)?))
    }

    pub fn manager(&self) -> &BufferManager {
        &self.manager
    }

    pub fn into_manager(self) -> BufferManager {
        self.manager
    }

    /// Number of distinct identifiers recorded since the last reset.
    pub fn trajectory_count(&self) -> usize {
        self.records.len()
    }

    pub fn contains(&self, id: &TrajectoryId) -> bool {
        self.records.contains_key(id)
    }

    pub fn trajectory_ids(&self) -> impl Iterator<Item = &TrajectoryId> {
        self.records.keys()
    }

    /// Recorded segments, one slot per shard, without overwrite clipping.
    pub fn segments(&self, id: &TrajectoryId) -> Option<&[Option<TrajectorySegment>]> {
        self.records.get(id).map(Vec::as_slice)
    }

    /// Write through the manager, then extend the per-shard ranges.
    ///
    /// The batch must carry a `traj_id` column. Rows tagged with the nil id
    /// are stored but not indexed.
    pub fn add(&mut self, batch: &Batch, shard_ids: &[usize]) -> Result<Vec<AddOutcome>> {
        let ids = batch
            .get(&Field::TrajId)
            .and_then(Column::as_trajectories)
            .ok_or_else(|| {
                BufferError::SchemaViolation("batch is missing the `traj_id` column".into())
            })?
            .to_vec();

        let outcomes = self.manager.add(batch, shard_ids)?;

        let shard_count = self.manager.shard_count();
        for ((id, &shard), outcome) in ids.iter().zip(shard_ids).zip(&outcomes) {
            if id.is_nil() {
                continue;
            }
            let segments = self
                .records
                .entry(*id)
                .or_insert_with(|| vec![None; shard_count]);
            match &mut segments[shard] {
                Some(segment) => {
                    segment.last = outcome.ptr;
                    segment.last_seq = outcome.seq;
                }
                empty => *empty = Some(TrajectorySegment::starting_at(outcome)),
            }
        }
        Ok(outcomes)
    }

    /// Segments clipped to the entries that have not been overwritten yet.
    ///
    /// Fails with `KeyNotFound` if the identifier was never observed.
    pub fn live_segments(&self, id: &TrajectoryId) -> Result<Vec<Option<TrajectorySegment>>> {
        let segments = self.records.get(id).ok_or(BufferError::KeyNotFound(*id))?;
        let capacity = self.manager.shard_capacity() as u64;

        let live = segments
            .iter()
            .enumerate()
            .map(|(shard, segment)| {
                let segment = segment.as_ref()?;
                let writes = self.manager.shard(shard)?.writes();
                let oldest_live = writes.saturating_sub(capacity);
                if segment.last_seq < oldest_live {
                    debug!(trajectory = %id, shard, "trajectory segment fully overwritten");
                    return None;
                }
                let first_seq = segment.first_seq.max(oldest_live);
                if first_seq > segment.first_seq {
                    debug!(
                        trajectory = %id,
                        shard,
                        lost = first_seq - segment.first_seq,
                        "trajectory segment clipped by overwrite"
                    );
                }
                let offset = self.manager.offsets()[shard];
                Some(TrajectorySegment {
                    first: offset + (first_seq % capacity) as usize,
                    last: segment.last,
                    first_seq,
                    last_seq: segment.last_seq,
                })
            })
            .collect();
        Ok(live)
    }

    /// One entry per shard: the live part of the trajectory's range in that
    /// shard (inclusive, in write order), or `None` where it has no data.
    pub fn get_trajectory(&self, id: &TrajectoryId) -> Result<Vec<Option<Batch>>> {
        let capacity = self.manager.shard_capacity() as u64;
        let segments = self.live_segments(id)?;

        let mut out = Vec::with_capacity(segments.len());
        for (shard, segment) in segments.iter().enumerate() {
            let Some(segment) = segment else {
                out.push(None);
                continue;
            };
            let locals: Vec<usize> = (segment.first_seq..=segment.last_seq)
                .map(|seq| (seq % capacity) as usize)
                .collect();
            out.push(Some(self.manager.shard_batch(shard, &locals)?));
        }

        if out.iter().all(Option::is_none) {
            warn!(trajectory = %id, "every segment of the trajectory has been overwritten");
        }
        Ok(out)
    }

    pub fn restart_episode(&mut self, shard: usize) -> Result<bool> {
        self.manager.restart_episode(shard)
    }

    /// Clear the buffer and forget every recorded trajectory.
    pub fn reset(&mut self, keep_statistics: bool) {
        self.manager.reset(keep_statistics);
        self.records.clear();
        debug!("trajectory index reset");
    }
}
