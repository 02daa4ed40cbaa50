//! Typed field descriptors and the column storage backing them.
//!
//! The set of storable fields is closed: every column is named by a [`Field`]
//! and shaped by a [`FieldKind`]. The only open-ended variant is
//! [`Field::Policy`], which carries auxiliary policy outputs under a name of
//! the policy's choosing. Schema growth is the act of adding one more
//! [`FieldDescriptor`] to a [`FieldRegistry`].

use std::fmt;

use uuid::Uuid;

use super::error::{BufferError, Result};

// ---------------------------------------------------------------------------
// Field names
// ---------------------------------------------------------------------------

/// Name of a stored field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Obs,
    LatentObs,
    LatentGoal,
    Act,
    ObsNext,
    LatentGoalNext,
    Rew,
    /// Intrinsic reward; accumulated per episode when present.
    IntRew,
    Terminated,
    Truncated,
    /// Always derived as `terminated || truncated` on write.
    Done,
    Info,
    TrajId,
    /// The policy's next recurrent state, flattened.
    HiddenState,
    /// Auxiliary policy output, e.g. `Policy("log_prob".into())`.
    Policy(String),
}

impl Field {
    /// Fields every added batch must carry.
    pub const REQUIRED: [Field; 4] = [Field::Act, Field::Rew, Field::Terminated, Field::Truncated];

    /// Convenience constructor for a policy extra.
    pub fn policy(name: impl Into<String>) -> Self {
        Self::Policy(name.into())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Obs => "obs",
            Self::LatentObs => "latent_obs",
            Self::LatentGoal => "latent_goal",
            Self::Act => "act",
            Self::ObsNext => "obs_next",
            Self::LatentGoalNext => "latent_goal_next",
            Self::Rew => "rew",
            Self::IntRew => "int_rew",
            Self::Terminated => "terminated",
            Self::Truncated => "truncated",
            Self::Done => "done",
            Self::Info => "info",
            Self::TrajId => "traj_id",
            Self::HiddenState => "hidden_state",
            Self::Policy(name) => return write!(f, "policy.{name}"),
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Kinds and descriptors
// ---------------------------------------------------------------------------

/// Shape of one row of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    Flag,
    /// Fixed-width float vector; the width never changes once registered.
    Vector(usize),
    Info,
    Trajectory,
}

/// A field together with its row shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub field: Field,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub fn new(field: Field, kind: FieldKind) -> Self {
        Self { field, kind }
    }
}

// ---------------------------------------------------------------------------
// Auxiliary info
// ---------------------------------------------------------------------------

/// Per-slot auxiliary environment info, explicitly present or absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Info {
    #[default]
    Absent,
    Present(serde_json::Map<String, serde_json::Value>),
}

impl Info {
    /// Convert an arbitrary JSON value. `null` is absent, objects are kept as
    /// is, any other value is stored under the key `"value"`.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Absent,
            serde_json::Value::Object(map) => Self::Present(map),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".into(), other);
                Self::Present(map)
            }
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        match self {
            Self::Absent => None,
            Self::Present(map) => map.get(key),
        }
    }
}

// ---------------------------------------------------------------------------
// Single values
// ---------------------------------------------------------------------------

/// One row's value of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f32),
    Flag(bool),
    Vector(Vec<f32>),
    Info(Info),
    Trajectory(Uuid),
}

impl Value {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Scalar(_) => FieldKind::Scalar,
            Self::Flag(_) => FieldKind::Flag,
            Self::Vector(v) => FieldKind::Vector(v.len()),
            Self::Info(_) => FieldKind::Info,
            Self::Trajectory(_) => FieldKind::Trajectory,
        }
    }

    /// The value unwritten slots hold.
    pub fn neutral(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Scalar => Self::Scalar(0.0),
            FieldKind::Flag => Self::Flag(false),
            FieldKind::Vector(dim) => Self::Vector(vec![0.0; dim]),
            FieldKind::Info => Self::Info(Info::Absent),
            FieldKind::Trajectory => Self::Trajectory(Uuid::nil()),
        }
    }
}

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// Dense structure-of-arrays storage for one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Scalar(Vec<f32>),
    Flag(Vec<bool>),
    /// Row-major `rows * dim` floats.
    Vector { dim: usize, data: Vec<f32> },
    Info(Vec<Info>),
    Trajectory(Vec<Uuid>),
}

impl Column {
    /// A column of `len` neutral values.
    pub fn filled(kind: FieldKind, len: usize) -> Self {
        match kind {
            FieldKind::Scalar => Self::Scalar(vec![0.0; len]),
            FieldKind::Flag => Self::Flag(vec![false; len]),
            FieldKind::Vector(dim) => Self::Vector {
                dim,
                data: vec![0.0; dim * len],
            },
            FieldKind::Info => Self::Info(vec![Info::Absent; len]),
            FieldKind::Trajectory => Self::Trajectory(vec![Uuid::nil(); len]),
        }
    }

    /// A column of `len` copies of `value`.
    pub fn repeated(value: &Value, len: usize) -> Self {
        match value {
            Value::Scalar(x) => Self::Scalar(vec![*x; len]),
            Value::Flag(b) => Self::Flag(vec![*b; len]),
            Value::Vector(v) => Self::Vector {
                dim: v.len(),
                data: v.iter().copied().cycle().take(v.len() * len).collect(),
            },
            Value::Info(info) => Self::Info(vec![info.clone(); len]),
            Value::Trajectory(id) => Self::Trajectory(vec![*id; len]),
        }
    }

    /// Build a vector column from rows of width `dim`.
    pub fn from_rows(dim: usize, rows: &[Vec<f32>]) -> Result<Self> {
        let mut data = Vec::with_capacity(dim * rows.len());
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(BufferError::SchemaViolation(format!(
                    "row {i} has width {} but the column expects {dim}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self::Vector { dim, data })
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Scalar(_) => FieldKind::Scalar,
            Self::Flag(_) => FieldKind::Flag,
            Self::Vector { dim, .. } => FieldKind::Vector(*dim),
            Self::Info(_) => FieldKind::Info,
            Self::Trajectory(_) => FieldKind::Trajectory,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Scalar(v) => v.len(),
            Self::Flag(v) => v.len(),
            Self::Vector { dim, data } => {
                if *dim == 0 {
                    0
                } else {
                    data.len() / dim
                }
            }
            Self::Info(v) => v.len(),
            Self::Trajectory(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The value at `row`, or `None` past the end.
    pub fn value(&self, row: usize) -> Option<Value> {
        if row >= self.len() {
            return None;
        }
        Some(match self {
            Self::Scalar(v) => Value::Scalar(v[row]),
            Self::Flag(v) => Value::Flag(v[row]),
            Self::Vector { dim, data } => Value::Vector(data[row * dim..(row + 1) * dim].to_vec()),
            Self::Info(v) => Value::Info(v[row].clone()),
            Self::Trajectory(v) => Value::Trajectory(v[row]),
        })
    }

    /// Overwrite `row` with `value`. The value must match the column kind.
    pub fn set(&mut self, row: usize, value: &Value) -> Result<()> {
        let len = self.len();
        if row >= len {
            return Err(BufferError::IndexOutOfRange {
                index: row,
                limit: len,
            });
        }
        match (self, value) {
            (Self::Scalar(v), Value::Scalar(x)) => v[row] = *x,
            (Self::Flag(v), Value::Flag(b)) => v[row] = *b,
            (Self::Vector { dim, data }, Value::Vector(x)) if x.len() == *dim => {
                data[row * *dim..(row + 1) * *dim].copy_from_slice(x);
            }
            (Self::Info(v), Value::Info(info)) => v[row] = info.clone(),
            (Self::Trajectory(v), Value::Trajectory(id)) => v[row] = *id,
            (column, value) => {
                return Err(BufferError::SchemaViolation(format!(
                    "cannot store a {:?} value in a {:?} column",
                    value.kind(),
                    column.kind()
                )));
            }
        }
        Ok(())
    }

    /// Copy row `from` of `source` into row `row` of `self`.
    pub fn copy_row(&mut self, row: usize, source: &Column, from: usize) -> Result<()> {
        let value = source.value(from).ok_or(BufferError::IndexOutOfRange {
            index: from,
            limit: source.len(),
        })?;
        self.set(row, &value)
    }

    /// Gather `rows` into a new column, in the given order.
    ///
    /// Every row must be in bounds; callers validate indices first.
    pub fn gather(&self, rows: &[usize]) -> Column {
        match self {
            Self::Scalar(v) => Self::Scalar(rows.iter().map(|&r| v[r]).collect()),
            Self::Flag(v) => Self::Flag(rows.iter().map(|&r| v[r]).collect()),
            Self::Vector { dim, data } => {
                let mut out = Vec::with_capacity(rows.len() * dim);
                for &r in rows {
                    out.extend_from_slice(&data[r * dim..(r + 1) * dim]);
                }
                Self::Vector { dim: *dim, data: out }
            }
            Self::Info(v) => Self::Info(rows.iter().map(|&r| v[r].clone()).collect()),
            Self::Trajectory(v) => Self::Trajectory(rows.iter().map(|&r| v[r]).collect()),
        }
    }

    pub fn as_scalars(&self) -> Option<&[f32]> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_flags(&self) -> Option<&[bool]> {
        match self {
            Self::Flag(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_infos(&self) -> Option<&[Info]> {
        match self {
            Self::Info(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_trajectories(&self) -> Option<&[Uuid]> {
        match self {
            Self::Trajectory(v) => Some(v),
            _ => None,
        }
    }

    /// Row `row` of a vector column.
    pub fn vector_row(&self, row: usize) -> Option<&[f32]> {
        match self {
            Self::Vector { dim, data } if row < self.len() => Some(&data[row * dim..(row + 1) * dim]),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The closed, monotonically growing set of fields a buffer stores.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRegistry {
    descriptors: Vec<FieldDescriptor>,
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldRegistry {
    /// A registry holding the required fields whose shape is known up front.
    ///
    /// `act` is required on every add but only registered once its width is
    /// seen.
    pub fn new() -> Self {
        Self {
            descriptors: vec![
                FieldDescriptor::new(Field::Rew, FieldKind::Scalar),
                FieldDescriptor::new(Field::Terminated, FieldKind::Flag),
                FieldDescriptor::new(Field::Truncated, FieldKind::Flag),
                FieldDescriptor::new(Field::Done, FieldKind::Flag),
            ],
        }
    }

    pub fn get(&self, field: &Field) -> Option<&FieldDescriptor> {
        self.descriptors.iter().find(|d| &d.field == field)
    }

    pub fn contains(&self, field: &Field) -> bool {
        self.get(field).is_some()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.descriptors.iter()
    }

    /// Whether `descriptor` would be new. Errors if the field is registered
    /// with a different kind or is a zero-width vector.
    pub fn check(&self, descriptor: &FieldDescriptor) -> Result<bool> {
        if descriptor.kind == FieldKind::Vector(0) {
            return Err(BufferError::SchemaViolation(format!(
                "field `{}` has zero width",
                descriptor.field
            )));
        }
        match self.get(&descriptor.field) {
            None => Ok(true),
            Some(known) if known.kind == descriptor.kind => Ok(false),
            Some(known) => Err(BufferError::SchemaViolation(format!(
                "field `{}` is registered as {:?}, got {:?}",
                descriptor.field, known.kind, descriptor.kind
            ))),
        }
    }

    /// Add `descriptor`; returns `true` if the registry grew.
    pub fn register(&mut self, descriptor: FieldDescriptor) -> Result<bool> {
        let is_new = self.check(&descriptor)?;
        if is_new {
            self.descriptors.push(descriptor);
        }
        Ok(is_new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_display() {
        assert_eq!(Field::LatentGoalNext.to_string(), "latent_goal_next");
        assert_eq!(Field::policy("log_prob").to_string(), "policy.log_prob");
    }

    #[test]
    fn test_column_set_and_gather() {
        let mut col = Column::filled(FieldKind::Vector(2), 3);
        col.set(1, &Value::Vector(vec![1.0, 2.0])).unwrap();
        col.set(2, &Value::Vector(vec![3.0, 4.0])).unwrap();

        let gathered = col.gather(&[2, 1, 2]);
        assert_eq!(gathered.len(), 3);
        assert_eq!(gathered.vector_row(0), Some(&[3.0, 4.0][..]));
        assert_eq!(gathered.vector_row(1), Some(&[1.0, 2.0][..]));
        assert_eq!(col.value(0), Some(Value::Vector(vec![0.0, 0.0])));
    }

    #[test]
    fn test_column_rejects_wrong_kind() {
        let mut col = Column::filled(FieldKind::Scalar, 2);
        let err = col.set(0, &Value::Flag(true)).unwrap_err();
        assert!(matches!(err, BufferError::SchemaViolation(_)));

        let mut vec_col = Column::filled(FieldKind::Vector(3), 1);
        assert!(vec_col.set(0, &Value::Vector(vec![1.0])).is_err());
    }

    #[test]
    fn test_repeated_vector() {
        let col = Column::repeated(&Value::Vector(vec![1.0, 2.0]), 3);
        assert_eq!(col.len(), 3);
        assert_eq!(col.vector_row(2), Some(&[1.0, 2.0][..]));
    }

    #[test]
    fn test_registry_growth_and_conflicts() {
        let mut registry = FieldRegistry::new();
        assert!(registry.contains(&Field::Done));
        assert!(!registry.contains(&Field::Act));

        let act = FieldDescriptor::new(Field::Act, FieldKind::Vector(2));
        assert!(registry.register(act.clone()).unwrap());
        assert!(!registry.register(act).unwrap());

        let conflicting = FieldDescriptor::new(Field::Act, FieldKind::Vector(3));
        assert!(registry.register(conflicting).is_err());
        assert!(registry
            .check(&FieldDescriptor::new(Field::Obs, FieldKind::Vector(0)))
            .is_err());
    }

    #[test]
    fn test_info_from_json() {
        assert_eq!(Info::from_json(serde_json::Value::Null), Info::Absent);
        let info = Info::from_json(serde_json::json!({"lives": 3}));
        assert!(info.is_present());
        assert_eq!(info.get("lives"), Some(&serde_json::json!(3)));
        let wrapped = Info::from_json(serde_json::json!(7));
        assert_eq!(wrapped.get("value"), Some(&serde_json::json!(7)));
    }
}
