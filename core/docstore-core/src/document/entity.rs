//! Document entities.

use crate::document::codec::PayloadCodec;
use crate::error::DocResult;
use crate::key::Identifier;
use chrono::{DateTime, Timelike, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Identifier, opaque encoded payload and repository-managed timestamps.
///
/// View rows are `Document`s too: the same payload stored under the view's
/// identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub identifier: Identifier,
    pub payload: Option<Vec<u8>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(identifier: Identifier, payload: Option<Vec<u8>>) -> Self {
        Self {
            identifier,
            payload,
            created_at: None,
            updated_at: None,
        }
    }

    /// Document whose payload is `content` encoded with [`PayloadCodec`].
    pub fn from_json(identifier: Identifier, content: &Value) -> DocResult<Self> {
        Ok(Self::new(identifier, Some(PayloadCodec::encode(content)?)))
    }

    /// Decoded payload, `None` when the payload is null.
    pub fn content(&self) -> DocResult<Option<Value>> {
        self.payload
            .as_deref()
            .map(PayloadCodec::decode)
            .transpose()
    }

    /// Same payload and timestamps under another identifier.
    pub fn with_identifier(&self, identifier: Identifier) -> Self {
        Self {
            identifier,
            payload: self.payload.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// One version of a document in an append-only table.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalDocument {
    pub document: Document,
    /// Time-ordered UUID of the write that produced this version.
    pub written_at: Uuid,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Current time at the store's millisecond precision.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(now.nanosecond() / 1_000_000 * 1_000_000)
        .unwrap_or(now)
}
