//! A set of equally sized shards behind one flat global index space.
//!
//! Global index `g = offset[shard] + local`, with `offset[i]` the summed
//! capacity of the shards before `i`. Offsets are fixed at construction.

use rand::Rng;
use tracing::{debug, info};

use crate::config::BufferConfig;

use super::batch::Batch;
use super::error::{BufferError, Result};
use super::field::{Column, Field, FieldDescriptor, FieldRegistry, Value};
use super::shard::{AddOutcome, Shard};

/// Fans batched writes out to per-environment shards and reassembles reads.
#[derive(Debug, Clone)]
pub struct BufferManager {
    shards: Vec<Shard>,
    offsets: Vec<usize>,
    registry: FieldRegistry,
}

impl BufferManager {
    /// `shard_count` shards of `ceil(total_size / shard_count)` entries each.
    pub fn new(total_size: usize, shard_count: usize) -> Result<Self> {
        if shard_count == 0 {
            return Err(BufferError::InvalidLayout("at least one shard is required".into()));
        }
        if total_size == 0 {
            return Err(BufferError::InvalidLayout("total size must be at least 1".into()));
        }
        let size = total_size.div_ceil(shard_count);
        let shards = (0..shard_count)
            .map(|_| Shard::new(size))
            .collect::<Result<Vec<_>>>()?;
        Self::from_shards(shards)
    }

    pub fn from_config(config: &BufferConfig) -> Result<Self> {
        Self::new(config.total_size, config.shard_count)
    }

    /// Adopt existing shards. They must share one capacity and agree on the
    /// kinds of any fields they already store.
    pub fn from_shards(mut shards: Vec<Shard>) -> Result<Self> {
        let Some(capacity) = shards.first().map(Shard::capacity) else {
            return Err(BufferError::InvalidLayout("at least one shard is required".into()));
        };
        if let Some(odd) = shards.iter().position(|s| s.capacity() != capacity) {
            return Err(BufferError::InvalidLayout(format!(
                "shard {odd} has capacity {}, expected {capacity}",
                shards[odd].capacity()
            )));
        }

        let mut registry = FieldRegistry::new();
        for shard in &shards {
            for field in shard.fields() {
                if let Some(kind) = shard.kind_of(field) {
                    registry.register(FieldDescriptor::new(field.clone(), kind))?;
                }
            }
        }
        for shard in &mut shards {
            for descriptor in registry.iter() {
                shard.allocate(descriptor)?;
            }
        }

        let offsets = (0..shards.len()).map(|i| i * capacity).collect();
        info!(
            shards = shards.len(),
            shard_capacity = capacity,
            total_capacity = capacity * shards.len(),
            "buffer manager ready"
        );
        Ok(Self {
            shards,
            offsets,
            registry,
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_capacity(&self) -> usize {
        self.shards[0].capacity()
    }

    /// Total capacity across all shards.
    pub fn capacity(&self) -> usize {
        self.shard_capacity() * self.shards.len()
    }

    /// Valid entries across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn shard(&self, id: usize) -> Option<&Shard> {
        self.shards.get(id)
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// Split a global index into `(shard, local)`.
    pub fn locate(&self, global: usize) -> Result<(usize, usize)> {
        if global >= self.capacity() {
            return Err(BufferError::IndexOutOfRange {
                index: global,
                limit: self.capacity(),
            });
        }
        let shard = self.offsets.partition_point(|&offset| offset <= global) - 1;
        Ok((shard, global - self.offsets[shard]))
    }

    fn check_shard(&self, shard: usize) -> Result<()> {
        if shard >= self.shards.len() {
            return Err(BufferError::IndexOutOfRange {
                index: shard,
                limit: self.shards.len(),
            });
        }
        Ok(())
    }

    /// Register one more field across every shard, backfilling neutral
    /// values. Returns `true` if the schema grew.
    ///
    /// Takes `&mut self`, so no write can interleave with the growth.
    pub fn register_field(&mut self, descriptor: FieldDescriptor) -> Result<bool> {
        if !self.registry.check(&descriptor)? {
            return Ok(false);
        }
        for shard in &mut self.shards {
            shard.allocate(&descriptor)?;
        }
        info!(field = %descriptor.field, kind = ?descriptor.kind, "buffer schema grew");
        self.registry.register(descriptor)
    }

    /// Write row `i` of `batch` into shard `shard_ids[i]`, in row order.
    ///
    /// Returned pointers and episode starts are global indices.
    pub fn add(&mut self, batch: &Batch, shard_ids: &[usize]) -> Result<Vec<AddOutcome>> {
        if batch.len() != shard_ids.len() {
            return Err(BufferError::SchemaViolation(format!(
                "batch has {} rows but {} shard ids were given",
                batch.len(),
                shard_ids.len()
            )));
        }
        let missing = batch.missing_required();
        if !missing.is_empty() {
            return Err(BufferError::SchemaViolation(format!(
                "batch is missing required fields {missing:?}"
            )));
        }
        for &shard in shard_ids {
            self.check_shard(shard)?;
        }

        let mut growth = Vec::new();
        for descriptor in batch.descriptors().filter(|d| d.field != Field::Done) {
            if self.registry.check(&descriptor)? {
                growth.push(descriptor);
            }
        }
        for descriptor in growth {
            self.register_field(descriptor)?;
        }

        let mut outcomes = Vec::with_capacity(shard_ids.len());
        for (row, &shard) in shard_ids.iter().enumerate() {
            let mut outcome = self.shards[shard].add_row(batch, row)?;
            outcome.ptr += self.offsets[shard];
            outcome.episode_start += self.offsets[shard];
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Read every registered field at `global_indices`, in the given order.
    pub fn get(&self, global_indices: &[usize]) -> Result<Batch> {
        let mut positions = vec![Vec::new(); self.shards.len()];
        let mut locals = vec![Vec::new(); self.shards.len()];
        for (pos, &global) in global_indices.iter().enumerate() {
            let (shard, local) = self.locate(global)?;
            positions[shard].push(pos);
            locals[shard].push(local);
        }

        let mut batch = Batch::new();
        for descriptor in self.registry.iter() {
            let mut column = Column::filled(descriptor.kind, global_indices.len());
            for (shard, rows) in positions.iter().enumerate() {
                if rows.is_empty() {
                    continue;
                }
                let part = self.shards[shard].get(
                    &locals[shard],
                    &descriptor.field,
                    Some(Value::neutral(descriptor.kind)),
                )?;
                for (k, &pos) in rows.iter().enumerate() {
                    column.copy_row(pos, &part, k)?;
                }
            }
            batch.insert(descriptor.field.clone(), column)?;
        }
        Ok(batch)
    }

    /// Read every stored field of one shard at local `indices`.
    pub fn shard_batch(&self, shard: usize, indices: &[usize]) -> Result<Batch> {
        self.check_shard(shard)?;
        self.shards[shard].batch(indices)
    }

    /// `n == 0`: every valid global index, shard by shard, oldest first.
    /// `n > 0`: `n` global indices drawn uniformly with replacement.
    pub fn sample_indices(&self, n: usize) -> Vec<usize> {
        self.sample_indices_with(n, &mut rand::thread_rng())
    }

    pub fn sample_indices_with<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        if n == 0 {
            return self
                .shards
                .iter()
                .zip(&self.offsets)
                .flat_map(|(shard, &offset)| shard.valid_indices().into_iter().map(move |i| i + offset))
                .collect();
        }
        let total = self.len();
        if total == 0 {
            return Vec::new();
        }
        (0..n)
            .map(|_| {
                let mut r = rng.gen_range(0..total);
                let mut shard = 0;
                while r >= self.shards[shard].len() {
                    r -= self.shards[shard].len();
                    shard += 1;
                }
                self.offsets[shard] + r
            })
            .collect()
    }

    /// Draw `batch_size` transitions (all of them for 0).
    pub fn sample(&self, batch_size: usize) -> Result<(Batch, Vec<usize>)> {
        self.sample_with(batch_size, &mut rand::thread_rng())
    }

    pub fn sample_with<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Result<(Batch, Vec<usize>)> {
        let indices = self.sample_indices_with(batch_size, rng);
        let batch = self.get(&indices)?;
        Ok((batch, indices))
    }

    /// Global form of [`Shard::next`].
    pub fn next(&self, global: usize) -> Result<usize> {
        let (shard, local) = self.locate(global)?;
        Ok(self.offsets[shard] + self.shards[shard].next(local)?)
    }

    /// Global form of [`Shard::prev`].
    pub fn prev(&self, global: usize) -> Result<usize> {
        let (shard, local) = self.locate(global)?;
        Ok(self.offsets[shard] + self.shards[shard].prev(local)?)
    }

    /// Close the unfinished episode of `shard`, see [`Shard::restart_episode`].
    pub fn restart_episode(&mut self, shard: usize) -> Result<bool> {
        self.check_shard(shard)?;
        let closed = self.shards[shard].restart_episode();
        if closed {
            debug!(shard, "unfinished episode closed");
        }
        Ok(closed)
    }

    /// Forget every entry in every shard. The schema is kept.
    pub fn reset(&mut self, keep_statistics: bool) {
        for shard in &mut self.shards {
            shard.reset(keep_statistics);
        }
        debug!(keep_statistics, "buffer manager reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::batch::Transition;
    use crate::buffer::field::{FieldKind, Value};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn transition(tag: f32) -> Transition {
        Transition::new(vec![tag], vec![0.0], vec![tag + 0.5], 1.0)
    }

    fn batch_of(tags: &[f32]) -> Batch {
        let rows: Vec<Transition> = tags.iter().map(|&t| transition(t)).collect();
        Batch::from_transitions(&rows).unwrap()
    }

    fn obs_tags(batch: &Batch) -> Vec<f32> {
        (0..batch.len())
            .map(|r| batch.vector(&Field::Obs, r).unwrap()[0])
            .collect()
    }

    #[test]
    fn test_layout() {
        let manager = BufferManager::new(10, 3).unwrap();
        assert_eq!(manager.shard_capacity(), 4);
        assert_eq!(manager.capacity(), 12);
        assert_eq!(manager.offsets(), &[0, 4, 8]);
        assert_eq!(manager.locate(9).unwrap(), (2, 1));
        assert!(BufferManager::new(10, 0).is_err());
        assert!(BufferManager::new(0, 2).is_err());
    }

    #[test]
    fn test_unequal_shards_rejected() {
        let shards = vec![Shard::new(2).unwrap(), Shard::new(3).unwrap()];
        assert!(matches!(
            BufferManager::from_shards(shards),
            Err(BufferError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_round_robin_overwrite() {
        let mut manager = BufferManager::new(8, 2).unwrap();
        for i in 0..10 {
            manager.add(&batch_of(&[i as f32]), &[i % 2]).unwrap();
        }
        let shard0 = manager.shard(0).unwrap();
        assert_eq!(shard0.len(), 4);

        let stored = manager.get(&manager.shard(0).unwrap().valid_indices()).unwrap();
        assert_eq!(obs_tags(&stored), vec![2.0, 4.0, 6.0, 8.0]);

        // The slot of the very first write now silently holds write 8.
        let first = manager.get(&[0]).unwrap();
        assert_eq!(obs_tags(&first), vec![8.0]);

        let err = manager.get(&[8]).unwrap_err();
        assert!(matches!(err, BufferError::IndexOutOfRange { index: 8, limit: 8 }));
    }

    #[test]
    fn test_global_pointers_stay_in_shard_range() {
        let mut manager = BufferManager::new(9, 3).unwrap();
        for step in 0..7 {
            let outcomes = manager
                .add(&batch_of(&[step as f32; 3]), &[0, 1, 2])
                .unwrap();
            for (shard, outcome) in outcomes.iter().enumerate() {
                let offset = manager.offsets()[shard];
                assert!(offset <= outcome.ptr && outcome.ptr < offset + 3);
            }
        }
    }

    #[test]
    fn test_get_preserves_order_and_is_idempotent() {
        let mut manager = BufferManager::new(6, 2).unwrap();
        manager.add(&batch_of(&[10.0, 20.0]), &[0, 1]).unwrap();
        manager.add(&batch_of(&[11.0, 21.0]), &[0, 1]).unwrap();

        let indices = [4, 0, 3, 1];
        let first = manager.get(&indices).unwrap();
        assert_eq!(obs_tags(&first), vec![21.0, 10.0, 20.0, 11.0]);
        assert_eq!(manager.get(&indices).unwrap(), first);
    }

    #[test]
    fn test_schema_growth_preserves_existing_values() {
        let mut manager = BufferManager::new(8, 2).unwrap();
        manager.add(&batch_of(&[1.0, 2.0]), &[0, 1]).unwrap();
        let before = manager.get(&[0, 4]).unwrap();
        assert!(!manager.registry().contains(&Field::LatentGoal));

        let rows = vec![
            transition(3.0).with(Field::LatentGoal, Value::Vector(vec![7.0, 7.0])),
            transition(4.0).with(Field::LatentGoal, Value::Vector(vec![8.0, 8.0])),
        ];
        manager
            .add(&Batch::from_transitions(&rows).unwrap(), &[0, 1])
            .unwrap();
        assert_eq!(
            manager.registry().get(&Field::LatentGoal).map(|d| d.kind),
            Some(FieldKind::Vector(2))
        );

        let after = manager.get(&[0, 4]).unwrap();
        assert_eq!(after.get(&Field::Obs), before.get(&Field::Obs));
        assert_eq!(after.get(&Field::Rew), before.get(&Field::Rew));
        assert_eq!(after.vector(&Field::LatentGoal, 0), Some(&[0.0, 0.0][..]));

        let grown = manager.get(&[1, 5]).unwrap();
        assert_eq!(grown.vector(&Field::LatentGoal, 1), Some(&[8.0, 8.0][..]));
    }

    #[test]
    fn test_add_validation() {
        let mut manager = BufferManager::new(4, 2).unwrap();

        let no_act = Batch::new()
            .with(Field::Rew, Column::Scalar(vec![1.0]))
            .unwrap()
            .with(Field::Terminated, Column::Flag(vec![false]))
            .unwrap()
            .with(Field::Truncated, Column::Flag(vec![false]))
            .unwrap();
        let err = manager.add(&no_act, &[0]).unwrap_err();
        assert!(matches!(err, BufferError::SchemaViolation(_)));

        let err = manager.add(&batch_of(&[1.0]), &[2]).unwrap_err();
        assert!(matches!(err, BufferError::IndexOutOfRange { index: 2, limit: 2 }));

        let err = manager.add(&batch_of(&[1.0, 2.0]), &[0]).unwrap_err();
        assert!(matches!(err, BufferError::SchemaViolation(_)));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_episode_start_is_global() {
        let mut manager = BufferManager::new(8, 2).unwrap();
        manager.add(&batch_of(&[0.0]), &[1]).unwrap();
        let rows = vec![transition(1.0).terminated(true)];
        let outcomes = manager
            .add(&Batch::from_transitions(&rows).unwrap(), &[1])
            .unwrap();
        assert_eq!(outcomes[0].episode_start, 4);
        assert_eq!(outcomes[0].ptr, 5);
        assert_eq!(outcomes[0].episode_length, 2);
        assert_eq!(manager.next(4).unwrap(), 5);
        assert_eq!(manager.prev(5).unwrap(), 4);
    }

    #[test]
    fn test_sampling() {
        let mut manager = BufferManager::new(8, 2).unwrap();
        assert!(manager.sample_indices(3).is_empty());

        manager.add(&batch_of(&[1.0, 2.0]), &[0, 1]).unwrap();
        manager.add(&batch_of(&[3.0]), &[1]).unwrap();
        assert_eq!(manager.sample_indices(0), vec![0, 4, 5]);

        let mut rng = StdRng::seed_from_u64(11);
        let (batch, indices) = manager.sample_with(32, &mut rng).unwrap();
        assert_eq!(batch.len(), 32);
        assert!(indices.iter().all(|i| [0, 4, 5].contains(i)));
    }

    #[test]
    fn test_reset_keeps_schema() {
        let mut manager = BufferManager::new(4, 2).unwrap();
        manager.add(&batch_of(&[1.0]), &[0]).unwrap();
        manager.reset(false);
        assert!(manager.is_empty());
        assert!(manager.registry().contains(&Field::Obs));
    }
}
