//! Payload codec and field access.
//!
//! Payloads are MessagePack-encoded JSON values. The repository treats them
//! as opaque bytes; only view-key extraction, index binding and validation
//! look inside.

use crate::document::entity::Document;
use crate::error::{DocError, DocResult};
use crate::key::{FieldSource, FieldValue, Identifier, KeyDefinition};
use serde_json::Value;

pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode(value: &Value) -> DocResult<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    pub fn decode(bytes: &[u8]) -> DocResult<Value> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Field by dotted path (`"address.city"`).
    pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
        path.split('.').try_fold(value, |current, segment| current.get(segment))
    }
}

/// Fields of a document: payload first, then the components of the
/// identifier it is stored under.
pub struct DocumentFields<'a> {
    content: Option<Value>,
    identifier: &'a Identifier,
    key: &'a KeyDefinition,
}

impl<'a> DocumentFields<'a> {
    pub fn new(document: &'a Document, key: &'a KeyDefinition) -> DocResult<Self> {
        Ok(Self {
            content: document.content()?,
            identifier: &document.identifier,
            key,
        })
    }

    pub fn content(&self) -> Option<&Value> {
        self.content.as_ref()
    }
}

impl FieldSource for DocumentFields<'_> {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        if let Some(value) = self
            .content
            .as_ref()
            .and_then(|c| PayloadCodec::lookup(c, name))
        {
            return Some(FieldValue::Json(value));
        }
        let position = self.key.components().position(|c| c.name == name)?;
        self.identifier.get(position).map(FieldValue::Scalar)
    }
}

/// Validate-and-throw step run before any write reaches the store.
pub trait Validator: Send + Sync {
    fn validate(&self, table: &str, document: &Document) -> DocResult<()>;
}

/// Accepts everything.
pub struct NoopValidator;

impl Validator for NoopValidator {
    fn validate(&self, _table: &str, _document: &Document) -> DocResult<()> {
        Ok(())
    }
}

/// A present payload must decode to an object.
pub struct PayloadValidator;

impl Validator for PayloadValidator {
    fn validate(&self, table: &str, document: &Document) -> DocResult<()> {
        let Some(bytes) = document.payload.as_deref() else {
            return Ok(());
        };
        match PayloadCodec::decode(bytes) {
            Ok(Value::Object(_)) => Ok(()),
            Ok(other) => Err(DocError::Validation(format!(
                "payload for {} in '{table}' must be an object, got {}",
                document.identifier,
                json_kind(&other)
            ))),
            Err(e) => Err(DocError::Validation(format!(
                "payload for {} in '{table}' is not decodable: {e}",
                document.identifier
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
