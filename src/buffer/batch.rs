//! Columnar batches and the typed per-step transition record.

use std::collections::BTreeMap;

use uuid::Uuid;

use super::error::{BufferError, Result};
use super::field::{Column, Field, FieldDescriptor, Info, Value};

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// One step of experience for a single environment slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub obs: Vec<f32>,
    pub act: Vec<f32>,
    pub obs_next: Vec<f32>,
    pub rew: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: Info,
    /// Optional fields: latent observation/goal, intrinsic reward, policy
    /// outputs, trajectory id.
    pub extras: BTreeMap<Field, Value>,
}

impl Transition {
    pub fn new(obs: Vec<f32>, act: Vec<f32>, obs_next: Vec<f32>, rew: f32) -> Self {
        Self {
            obs,
            act,
            obs_next,
            rew,
            terminated: false,
            truncated: false,
            info: Info::Absent,
            extras: BTreeMap::new(),
        }
    }

    pub fn terminated(mut self, terminated: bool) -> Self {
        self.terminated = terminated;
        self
    }

    pub fn truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    pub fn with(mut self, field: Field, value: Value) -> Self {
        self.extras.insert(field, value);
        self
    }

    pub fn with_trajectory(self, id: Uuid) -> Self {
        self.with(Field::TrajId, Value::Trajectory(id))
    }

    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }

    /// Every field of this transition, core fields first.
    fn values(&self) -> Vec<(Field, Value)> {
        let mut values = vec![
            (Field::Obs, Value::Vector(self.obs.clone())),
            (Field::Act, Value::Vector(self.act.clone())),
            (Field::ObsNext, Value::Vector(self.obs_next.clone())),
            (Field::Rew, Value::Scalar(self.rew)),
            (Field::Terminated, Value::Flag(self.terminated)),
            (Field::Truncated, Value::Flag(self.truncated)),
            (Field::Info, Value::Info(self.info.clone())),
        ];
        values.extend(self.extras.iter().map(|(f, v)| (f.clone(), v.clone())));
        values
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// A set of equally long columns keyed by field.
///
/// Used both as the input of `add` (one row per environment slot) and as the
/// result of every read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    len: usize,
    columns: BTreeMap<Field, Column>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack transitions row by row. All rows must carry the same extras
    /// with the same shapes.
    pub fn from_transitions(transitions: &[Transition]) -> Result<Self> {
        let mut batch = Self::new();
        let Some(first) = transitions.first() else {
            return Ok(batch);
        };

        for (field, value) in first.values() {
            let column = Column::filled(value.kind(), transitions.len());
            batch.insert(field, column)?;
        }

        for (row, transition) in transitions.iter().enumerate() {
            let values = transition.values();
            if values.len() != batch.columns.len() {
                return Err(BufferError::SchemaViolation(format!(
                    "transition {row} carries {} fields, expected {}",
                    values.len(),
                    batch.columns.len()
                )));
            }
            for (field, value) in values {
                let column = batch.columns.get_mut(&field).ok_or_else(|| {
                    BufferError::SchemaViolation(format!(
                        "transition {row} carries unexpected field `{field}`"
                    ))
                })?;
                column.set(row, &value)?;
            }
        }
        Ok(batch)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Add or replace a column. Its length must match the batch length
    /// unless the batch has no columns yet.
    pub fn insert(&mut self, field: Field, column: Column) -> Result<()> {
        let is_first = self.columns.is_empty()
            || (self.columns.len() == 1 && self.columns.contains_key(&field));
        if !is_first && column.len() != self.len {
            return Err(BufferError::SchemaViolation(format!(
                "column `{field}` has {} rows, batch has {}",
                column.len(),
                self.len
            )));
        }
        self.len = column.len();
        self.columns.insert(field, column);
        Ok(())
    }

    /// Builder form of [`Batch::insert`].
    pub fn with(mut self, field: Field, column: Column) -> Result<Self> {
        self.insert(field, column)?;
        Ok(self)
    }

    pub fn get(&self, field: &Field) -> Option<&Column> {
        self.columns.get(field)
    }

    pub fn contains(&self, field: &Field) -> bool {
        self.columns.contains_key(field)
    }

    pub fn remove(&mut self, field: &Field) -> Option<Column> {
        let removed = self.columns.remove(field);
        if self.columns.is_empty() {
            self.len = 0;
        }
        removed
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.columns.keys()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&Field, &Column)> {
        self.columns.iter()
    }

    /// Descriptors of every column in the batch.
    pub fn descriptors(&self) -> impl Iterator<Item = FieldDescriptor> + '_ {
        self.columns
            .iter()
            .map(|(field, column)| FieldDescriptor::new(field.clone(), column.kind()))
    }

    /// Required fields the batch lacks.
    pub fn missing_required(&self) -> Vec<Field> {
        Field::REQUIRED
            .iter()
            .filter(|f| !self.columns.contains_key(*f))
            .cloned()
            .collect()
    }

    /// Scalar column shortcut (`rew`, `int_rew`, ...).
    pub fn scalars(&self, field: &Field) -> Option<&[f32]> {
        self.get(field).and_then(Column::as_scalars)
    }

    /// Flag column shortcut (`terminated`, `done`, ...).
    pub fn flags(&self, field: &Field) -> Option<&[bool]> {
        self.get(field).and_then(Column::as_flags)
    }

    /// One row of a vector column.
    pub fn vector(&self, field: &Field, row: usize) -> Option<&[f32]> {
        self.get(field).and_then(|c| c.vector_row(row))
    }

    /// The value of `field` at `row`.
    pub fn value(&self, field: &Field, row: usize) -> Option<Value> {
        self.get(field).and_then(|c| c.value(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(step: f32) -> Transition {
        Transition::new(vec![step, 0.0], vec![1.0], vec![step + 1.0, 0.0], step)
    }

    #[test]
    fn test_from_transitions() {
        let rows = vec![transition(0.0), transition(1.0).terminated(true)];
        let batch = Batch::from_transitions(&rows).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.scalars(&Field::Rew), Some(&[0.0, 1.0][..]));
        assert_eq!(batch.flags(&Field::Terminated), Some(&[false, true][..]));
        assert_eq!(batch.vector(&Field::ObsNext, 1), Some(&[2.0, 0.0][..]));
        assert!(batch.missing_required().is_empty());
    }

    #[test]
    fn test_from_transitions_rejects_ragged_extras() {
        let rows = vec![
            transition(0.0).with(Field::IntRew, Value::Scalar(0.5)),
            transition(1.0),
        ];
        let err = Batch::from_transitions(&rows).unwrap_err();
        assert!(matches!(err, BufferError::SchemaViolation(_)));
    }

    #[test]
    fn test_insert_length_mismatch() {
        let batch = Batch::new()
            .with(Field::Rew, Column::Scalar(vec![1.0, 2.0]))
            .unwrap();
        let err = batch
            .with(Field::Terminated, Column::Flag(vec![true]))
            .unwrap_err();
        assert!(matches!(err, BufferError::SchemaViolation(_)));
    }

    #[test]
    fn test_missing_required() {
        let batch = Batch::new()
            .with(Field::Rew, Column::Scalar(vec![1.0]))
            .unwrap();
        let missing = batch.missing_required();
        assert_eq!(missing, vec![Field::Act, Field::Terminated, Field::Truncated]);
    }
}
