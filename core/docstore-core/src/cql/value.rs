//! Bound values, result rows and result sets of the statement dialect.

use crate::error::{DocError, DocResult};
use crate::key::ScalarValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A column value: a key scalar, a blob, a boolean, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CqlValue {
    Null,
    Boolean(bool),
    Blob(Vec<u8>),
    Scalar(ScalarValue),
}

impl CqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CqlValue::Null)
    }

    pub fn blob(bytes: Option<Vec<u8>>) -> Self {
        bytes.map_or(CqlValue::Null, CqlValue::Blob)
    }

    pub fn timestamp(ts: Option<DateTime<Utc>>) -> Self {
        ts.map_or(CqlValue::Null, |t| CqlValue::Scalar(ScalarValue::Timestamp(t)))
    }
}

impl From<ScalarValue> for CqlValue {
    fn from(value: ScalarValue) -> Self {
        CqlValue::Scalar(value)
    }
}

impl From<bool> for CqlValue {
    fn from(value: bool) -> Self {
        CqlValue::Boolean(value)
    }
}

/// One result row, columns by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: BTreeMap<String, CqlValue>,
}

impl Row {
    pub fn new(columns: BTreeMap<String, CqlValue>) -> Self {
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<&CqlValue> {
        self.columns.get(name)
    }

    pub fn columns(&self) -> &BTreeMap<String, CqlValue> {
        &self.columns
    }

    pub fn into_columns(self) -> BTreeMap<String, CqlValue> {
        self.columns
    }

    /// Non-null scalar column.
    pub fn scalar(&self, name: &str) -> DocResult<&ScalarValue> {
        match self.columns.get(name) {
            Some(CqlValue::Scalar(value)) => Ok(value),
            other => Err(unexpected(name, "scalar", other)),
        }
    }

    /// Nullable blob column.
    pub fn blob(&self, name: &str) -> DocResult<Option<&[u8]>> {
        match self.columns.get(name) {
            None | Some(CqlValue::Null) => Ok(None),
            Some(CqlValue::Blob(bytes)) => Ok(Some(bytes)),
            other => Err(unexpected(name, "blob", other)),
        }
    }

    /// Nullable timestamp column.
    pub fn timestamp(&self, name: &str) -> DocResult<Option<DateTime<Utc>>> {
        match self.columns.get(name) {
            None | Some(CqlValue::Null) => Ok(None),
            Some(CqlValue::Scalar(ScalarValue::Timestamp(ts))) => Ok(Some(*ts)),
            other => Err(unexpected(name, "timestamp", other)),
        }
    }

    /// Boolean column; null reads as `false`.
    pub fn boolean(&self, name: &str) -> DocResult<bool> {
        match self.columns.get(name) {
            None | Some(CqlValue::Null) => Ok(false),
            Some(CqlValue::Boolean(b)) => Ok(*b),
            other => Err(unexpected(name, "boolean", other)),
        }
    }
}

fn unexpected(name: &str, wanted: &str, got: Option<&CqlValue>) -> DocError {
    DocError::Storage(format!(
        "column '{name}': expected {wanted}, got {}",
        match got {
            None => "nothing".to_string(),
            Some(v) => format!("{v:?}"),
        }
    ))
}

/// Rows returned by a statement, plus the conditional-apply flag.
///
/// `applied` is `true` for unconditional writes and for reads. A
/// conditional write that was not applied carries the existing row, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub rows: Vec<Row>,
    pub applied: bool,
}

impl ResultSet {
    pub fn applied() -> Self {
        Self {
            rows: Vec::new(),
            applied: true,
        }
    }

    pub fn not_applied(existing: Option<Row>) -> Self {
        Self {
            rows: existing.into_iter().collect(),
            applied: false,
        }
    }

    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            applied: true,
        }
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}
