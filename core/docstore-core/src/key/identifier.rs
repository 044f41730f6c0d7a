//! Identifier: ordered, typed composite primary key.

use crate::error::DocResult;
use crate::key::types::{ScalarType, ScalarValue};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Ordered tuple of scalar values.
///
/// Equality and ordering are component-wise. Size and element order must
/// match the `KeyDefinition` the identifier is used with; see
/// [`KeyDefinition::validate`](crate::key::KeyDefinition::validate).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier {
    values: SmallVec<[ScalarValue; 4]>,
}

impl Identifier {
    pub fn new(values: impl IntoIterator<Item = ScalarValue>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    /// Single-component identifier.
    pub fn of(value: impl Into<ScalarValue>) -> Self {
        Self::new([value.into()])
    }

    pub fn values(&self) -> &[ScalarValue] {
        &self.values
    }

    /// Owned copy of the components.
    pub fn to_vec(&self) -> Vec<ScalarValue> {
        self.values.to_vec()
    }

    pub fn get(&self, index: usize) -> Option<&ScalarValue> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First `n` components (a partition or clustering prefix).
    pub fn prefix(&self, n: usize) -> Identifier {
        Self::new(self.values.iter().take(n).cloned())
    }

    /// New identifier with `value` appended.
    pub fn with(&self, value: ScalarValue) -> Identifier {
        let mut values = self.values.clone();
        values.push(value);
        Self { values }
    }

    pub fn scalar_types(&self) -> Vec<ScalarType> {
        self.values.iter().map(ScalarValue::scalar_type).collect()
    }

    /// Compact binary form for storing an identifier inside another row.
    pub fn to_bytes(&self) -> DocResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> DocResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

impl From<ScalarValue> for Identifier {
    fn from(value: ScalarValue) -> Self {
        Identifier::of(value)
    }
}

impl FromIterator<ScalarValue> for Identifier {
    fn from_iter<T: IntoIterator<Item = ScalarValue>>(iter: T) -> Self {
        Identifier::new(iter)
    }
}
