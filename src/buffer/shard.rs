//! A single environment's fixed-capacity ring buffer.

use std::collections::BTreeMap;

use rand::Rng;

use super::batch::{Batch, Transition};
use super::error::{BufferError, Result};
use super::field::{Column, Field, FieldDescriptor, FieldKind, Value};

/// What a single write produced.
///
/// The episode totals are only authoritative when `done` is set; otherwise
/// they describe the episode still in progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddOutcome {
    /// Index the transition was written to (local for a shard, global when
    /// returned by the manager).
    pub ptr: usize,
    pub episode_return: f32,
    pub episode_intrinsic_return: f32,
    pub episode_length: usize,
    /// Index of the episode's first transition (same index space as `ptr`).
    pub episode_start: usize,
    pub done: bool,
    /// Number of writes this shard had seen before this one.
    pub seq: u64,
}

/// Structure-of-arrays ring buffer for one environment slot.
#[derive(Debug, Clone)]
pub struct Shard {
    capacity: usize,
    columns: BTreeMap<Field, Column>,
    /// Write pointer.
    index: usize,
    /// Valid entries, saturating at `capacity`.
    len: usize,
    /// Writes since the last reset.
    writes: u64,
    ep_return: f32,
    ep_int_return: f32,
    ep_len: usize,
    ep_start: usize,
}

impl Shard {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BufferError::InvalidLayout(
                "shard capacity must be at least 1".into(),
            ));
        }
        Ok(Self {
            capacity,
            columns: BTreeMap::new(),
            index: 0,
            len: 0,
            writes: 0,
            ep_return: 0.0,
            ep_int_return: 0.0,
            ep_len: 0,
            ep_start: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// The slot the next write goes to.
    pub fn cursor(&self) -> usize {
        self.index
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.columns.keys()
    }

    pub fn kind_of(&self, field: &Field) -> Option<FieldKind> {
        self.columns.get(field).map(Column::kind)
    }

    /// Running (return, intrinsic return, length) of the unfinished episode.
    pub fn episode_progress(&self) -> (f32, f32, usize) {
        (self.ep_return, self.ep_int_return, self.ep_len)
    }

    /// Allocate storage for `descriptor`, backfilled with neutral values.
    /// Returns `true` if a new column was created.
    pub fn allocate(&mut self, descriptor: &FieldDescriptor) -> Result<bool> {
        match self.kind_of(&descriptor.field) {
            Some(kind) if kind == descriptor.kind => Ok(false),
            Some(kind) => Err(BufferError::SchemaViolation(format!(
                "field `{}` is stored as {kind:?}, got {:?}",
                descriptor.field, descriptor.kind
            ))),
            None => {
                self.columns.insert(
                    descriptor.field.clone(),
                    Column::filled(descriptor.kind, self.capacity),
                );
                Ok(true)
            }
        }
    }

    /// Write one transition.
    pub fn add(&mut self, transition: &Transition) -> Result<AddOutcome> {
        let batch = Batch::from_transitions(std::slice::from_ref(transition))?;
        self.add_row(&batch, 0)
    }

    /// Write row `row` of `batch` at the write pointer.
    ///
    /// Columns the shard stores but the batch lacks are overwritten with
    /// neutral values; `done` is always derived from `terminated`/`truncated`.
    pub fn add_row(&mut self, batch: &Batch, row: usize) -> Result<AddOutcome> {
        if row >= batch.len() {
            return Err(BufferError::IndexOutOfRange {
                index: row,
                limit: batch.len(),
            });
        }
        let missing = batch.missing_required();
        if !missing.is_empty() {
            return Err(BufferError::SchemaViolation(format!(
                "batch is missing required fields {missing:?}"
            )));
        }

        let rew = scalar_at(batch, &Field::Rew, row)?;
        let int_rew = if batch.contains(&Field::IntRew) {
            scalar_at(batch, &Field::IntRew, row)?
        } else {
            0.0
        };
        let done = flag_at(batch, &Field::Terminated, row)? || flag_at(batch, &Field::Truncated, row)?;

        // Validate every incoming kind before anything is mutated.
        let incoming: Vec<FieldDescriptor> = batch
            .descriptors()
            .filter(|d| d.field != Field::Done)
            .collect();
        for descriptor in &incoming {
            if descriptor.kind == FieldKind::Vector(0) {
                return Err(BufferError::SchemaViolation(format!(
                    "field `{}` has zero width",
                    descriptor.field
                )));
            }
            if let Some(kind) = self.kind_of(&descriptor.field) {
                if kind != descriptor.kind {
                    return Err(BufferError::SchemaViolation(format!(
                        "field `{}` is stored as {kind:?}, got {:?}",
                        descriptor.field, descriptor.kind
                    )));
                }
            }
        }
        for descriptor in &incoming {
            self.allocate(descriptor)?;
        }
        self.allocate(&FieldDescriptor::new(Field::Done, FieldKind::Flag))?;

        let ptr = self.index;
        for (field, column) in self.columns.iter_mut() {
            if *field == Field::Done {
                column.set(ptr, &Value::Flag(done))?;
                continue;
            }
            match batch.get(field) {
                Some(source) => column.copy_row(ptr, source, row)?,
                None => column.set(ptr, &Value::neutral(column.kind()))?,
            }
        }

        self.index = (ptr + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
        self.writes += 1;
        self.ep_return += rew;
        self.ep_int_return += int_rew;
        self.ep_len += 1;

        let outcome = AddOutcome {
            ptr,
            episode_return: self.ep_return,
            episode_intrinsic_return: self.ep_int_return,
            episode_length: self.ep_len,
            episode_start: self.ep_start,
            done,
            seq: self.writes - 1,
        };
        if done {
            self.ep_return = 0.0;
            self.ep_int_return = 0.0;
            self.ep_len = 0;
            self.ep_start = self.index;
        }
        Ok(outcome)
    }

    fn check_indices(&self, indices: &[usize]) -> Result<()> {
        match indices.iter().find(|&&i| i >= self.capacity) {
            Some(&index) => Err(BufferError::IndexOutOfRange {
                index,
                limit: self.capacity,
            }),
            None => Ok(()),
        }
    }

    /// Read `field` at local `indices`, in the given order.
    ///
    /// An unknown field yields `default` repeated, or `FieldNotFound` when no
    /// default is given.
    pub fn get(&self, indices: &[usize], field: &Field, default: Option<Value>) -> Result<Column> {
        self.check_indices(indices)?;
        match (self.columns.get(field), default) {
            (Some(column), _) => Ok(column.gather(indices)),
            (None, Some(value)) => Ok(Column::repeated(&value, indices.len())),
            (None, None) => Err(BufferError::FieldNotFound(field.clone())),
        }
    }

    /// Read every stored field at local `indices`.
    pub fn batch(&self, indices: &[usize]) -> Result<Batch> {
        self.check_indices(indices)?;
        let mut batch = Batch::new();
        for (field, column) in &self.columns {
            batch.insert(field.clone(), column.gather(indices))?;
        }
        Ok(batch)
    }

    /// All valid indices, oldest first.
    pub fn valid_indices(&self) -> Vec<usize> {
        if self.len < self.capacity {
            (0..self.len).collect()
        } else {
            (self.index..self.capacity).chain(0..self.index).collect()
        }
    }

    /// `n == 0`: every valid index in storage order. `n > 0`: `n` indices
    /// drawn uniformly with replacement from the valid range.
    pub fn sample_indices(&self, n: usize) -> Vec<usize> {
        self.sample_indices_with(n, &mut rand::thread_rng())
    }

    pub fn sample_indices_with<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        if n == 0 {
            return self.valid_indices();
        }
        if self.len == 0 {
            return Vec::new();
        }
        (0..n).map(|_| rng.gen_range(0..self.len)).collect()
    }

    /// Index of the most recent write.
    pub fn last_index(&self) -> Option<usize> {
        (self.len > 0).then(|| (self.index + self.capacity - 1) % self.capacity)
    }

    fn done_at(&self, index: usize) -> bool {
        self.columns
            .get(&Field::Done)
            .and_then(Column::as_flags)
            .map_or(false, |flags| flags[index])
    }

    /// The following index within the same episode; stays put at an episode
    /// end or at the newest entry.
    pub fn next(&self, index: usize) -> Result<usize> {
        self.check_indices(&[index])?;
        if self.len == 0 || self.done_at(index) || Some(index) == self.last_index() {
            return Ok(index);
        }
        Ok((index + 1) % self.capacity)
    }

    /// The preceding index within the same episode; stays put at an episode
    /// start or at the oldest entry.
    pub fn prev(&self, index: usize) -> Result<usize> {
        self.check_indices(&[index])?;
        let oldest = if self.len < self.capacity { 0 } else { self.index };
        if self.len == 0 || index == oldest {
            return Ok(index);
        }
        let before = (index + self.capacity - 1) % self.capacity;
        if self.done_at(before) {
            Ok(index)
        } else {
            Ok(before)
        }
    }

    /// Close the episode in progress without a terminal transition, e.g.
    /// when its environment is reset early. The last stored entry is marked
    /// `done` so ring navigation stops there; the next write starts a new
    /// episode. Returns `true` if an unfinished episode was closed.
    pub fn restart_episode(&mut self) -> bool {
        if self.ep_len == 0 {
            return false;
        }
        if let Some(last) = self.last_index() {
            if let Some(Column::Flag(flags)) = self.columns.get_mut(&Field::Done) {
                flags[last] = true;
            }
        }
        self.ep_return = 0.0;
        self.ep_int_return = 0.0;
        self.ep_len = 0;
        self.ep_start = self.index;
        true
    }

    /// Forget every entry. With `keep_statistics` the running episode
    /// return/length survive; the episode start always returns to 0.
    pub fn reset(&mut self, keep_statistics: bool) {
        self.index = 0;
        self.len = 0;
        self.writes = 0;
        self.ep_start = 0;
        if !keep_statistics {
            self.ep_return = 0.0;
            self.ep_int_return = 0.0;
            self.ep_len = 0;
        }
    }
}

fn scalar_at(batch: &Batch, field: &Field, row: usize) -> Result<f32> {
    match batch.value(field, row) {
        Some(Value::Scalar(x)) => Ok(x),
        _ => Err(BufferError::SchemaViolation(format!("`{field}` must be a scalar column"))),
    }
}

fn flag_at(batch: &Batch, field: &Field, row: usize) -> Result<bool> {
    match batch.value(field, row) {
        Some(Value::Flag(b)) => Ok(b),
        _ => Err(BufferError::SchemaViolation(format!("`{field}` must be a flag column"))),
    }
}
