//! Scalar key types and values.
//!
//! Every key component of a table, view or index is one of the nine scalar
//! kinds below. Values are totally ordered (floats by `total_cmp`) so they
//! can sit inside `Identifier`s, sort clustering rows and feed hashing.

use bigdecimal::BigDecimal;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use uuid::Uuid;

/// Scalar kind of a key component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScalarType {
    Text,
    Uuid,
    TimeUuid,
    Timestamp,
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
}

impl ScalarType {
    /// Parse a DSL type name. `integer` and `int` are the same 32-bit kind.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "text" | "varchar" => Some(ScalarType::Text),
            "uuid" => Some(ScalarType::Uuid),
            "timeuuid" => Some(ScalarType::TimeUuid),
            "timestamp" => Some(ScalarType::Timestamp),
            "integer" | "int" => Some(ScalarType::Int),
            "bigint" => Some(ScalarType::BigInt),
            "float" => Some(ScalarType::Float),
            "double" => Some(ScalarType::Double),
            "decimal" => Some(ScalarType::Decimal),
            _ => None,
        }
    }

    /// Column type name in the statement dialect.
    pub fn cql_name(&self) -> &'static str {
        match self {
            ScalarType::Text => "text",
            ScalarType::Uuid => "uuid",
            ScalarType::TimeUuid => "timeuuid",
            ScalarType::Timestamp => "timestamp",
            ScalarType::Int => "int",
            ScalarType::BigInt => "bigint",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
            ScalarType::Decimal => "decimal",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            ScalarType::Text => 1,
            ScalarType::Uuid => 2,
            ScalarType::TimeUuid => 3,
            ScalarType::Timestamp => 4,
            ScalarType::Int => 5,
            ScalarType::BigInt => 6,
            ScalarType::Float => 7,
            ScalarType::Double => 8,
            ScalarType::Decimal => 9,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cql_name())
    }
}

/// A typed scalar value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Text(String),
    Uuid(Uuid),
    TimeUuid(Uuid),
    Timestamp(DateTime<Utc>),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Decimal(#[serde(with = "decimal_text")] BigDecimal),
}

/// Decimals travel as their string form; the binary row codec cannot drive
/// a self-describing deserializer.
mod decimal_text {
    use bigdecimal::BigDecimal;
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(value: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigDecimal, D::Error> {
        let text = String::deserialize(deserializer)?;
        BigDecimal::from_str(&text).map_err(de::Error::custom)
    }
}

impl ScalarValue {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            ScalarValue::Text(_) => ScalarType::Text,
            ScalarValue::Uuid(_) => ScalarType::Uuid,
            ScalarValue::TimeUuid(_) => ScalarType::TimeUuid,
            ScalarValue::Timestamp(_) => ScalarType::Timestamp,
            ScalarValue::Int(_) => ScalarType::Int,
            ScalarValue::BigInt(_) => ScalarType::BigInt,
            ScalarValue::Float(_) => ScalarType::Float,
            ScalarValue::Double(_) => ScalarType::Double,
            ScalarValue::Decimal(_) => ScalarType::Decimal,
        }
    }

    /// Timestamp truncated to the store's millisecond precision.
    pub fn timestamp_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(ScalarValue::Timestamp)
    }

    /// Canonical byte encoding, used for bucket hashing and row keys.
    ///
    /// Numbers are big-endian, timestamps are epoch milliseconds, decimals
    /// are their normalized string form.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            ScalarValue::Text(s) => s.as_bytes().to_vec(),
            ScalarValue::Uuid(u) | ScalarValue::TimeUuid(u) => u.as_bytes().to_vec(),
            ScalarValue::Timestamp(ts) => ts.timestamp_millis().to_be_bytes().to_vec(),
            ScalarValue::Int(v) => v.to_be_bytes().to_vec(),
            ScalarValue::BigInt(v) => v.to_be_bytes().to_vec(),
            ScalarValue::Float(v) => v.to_bits().to_be_bytes().to_vec(),
            ScalarValue::Double(v) => v.to_bits().to_be_bytes().to_vec(),
            ScalarValue::Decimal(d) => d.normalized().to_string().into_bytes(),
        }
    }

    /// Self-delimiting encoding: `[tag][len u32 BE][canonical bytes]`.
    ///
    /// Concatenations of these are prefix-free, so a partition's encoding is
    /// a byte prefix of every row key in that partition.
    pub fn encode_tagged(&self, out: &mut Vec<u8>) {
        let bytes = self.canonical_bytes();
        out.push(self.scalar_type().tag());
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&bytes);
    }

    /// Coerce a JSON field value into the requested scalar kind.
    ///
    /// Timestamps accept epoch milliseconds or RFC 3339 strings; UUIDs and
    /// decimals accept their string forms. Returns `None` when the value
    /// cannot represent the kind.
    pub fn from_json(ty: ScalarType, value: &Value) -> Option<Self> {
        match (ty, value) {
            (ScalarType::Text, Value::String(s)) => Some(ScalarValue::Text(s.clone())),
            (ScalarType::Text, Value::Number(n)) => Some(ScalarValue::Text(n.to_string())),
            (ScalarType::Text, Value::Bool(b)) => Some(ScalarValue::Text(b.to_string())),
            (ScalarType::Uuid, Value::String(s)) => Uuid::parse_str(s).ok().map(ScalarValue::Uuid),
            (ScalarType::TimeUuid, Value::String(s)) => Uuid::parse_str(s)
                .ok()
                .filter(|u| u.get_version_num() == 1)
                .map(ScalarValue::TimeUuid),
            (ScalarType::Timestamp, Value::Number(n)) => {
                n.as_i64().and_then(ScalarValue::timestamp_millis)
            }
            (ScalarType::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .and_then(|dt| ScalarValue::timestamp_millis(dt.timestamp_millis())),
            (ScalarType::Int, Value::Number(n)) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(ScalarValue::Int),
            (ScalarType::BigInt, Value::Number(n)) => n.as_i64().map(ScalarValue::BigInt),
            (ScalarType::Float, Value::Number(n)) => {
                n.as_f64().map(|v| ScalarValue::Float(v as f32))
            }
            (ScalarType::Double, Value::Number(n)) => n.as_f64().map(ScalarValue::Double),
            (ScalarType::Decimal, Value::String(s)) => {
                BigDecimal::from_str(s).ok().map(ScalarValue::Decimal)
            }
            (ScalarType::Decimal, Value::Number(n)) => BigDecimal::from_str(&n.to_string())
                .ok()
                .map(ScalarValue::Decimal),
            _ => None,
        }
    }

    /// Convert to another scalar kind where the conversion is lossless.
    pub fn coerce_to(&self, ty: ScalarType) -> Option<Self> {
        if self.scalar_type() == ty {
            return Some(self.clone());
        }
        match (self, ty) {
            (ScalarValue::Uuid(u), ScalarType::TimeUuid) if u.get_version_num() == 1 => {
                Some(ScalarValue::TimeUuid(*u))
            }
            (ScalarValue::TimeUuid(u), ScalarType::Uuid) => Some(ScalarValue::Uuid(*u)),
            (ScalarValue::Int(v), ScalarType::BigInt) => Some(ScalarValue::BigInt(i64::from(*v))),
            (ScalarValue::BigInt(v), ScalarType::Int) => {
                i32::try_from(*v).ok().map(ScalarValue::Int)
            }
            (ScalarValue::Int(v), ScalarType::Double) => Some(ScalarValue::Double(f64::from(*v))),
            (ScalarValue::Float(v), ScalarType::Double) => {
                Some(ScalarValue::Double(f64::from(*v)))
            }
            (ScalarValue::Int(v), ScalarType::Decimal) => {
                Some(ScalarValue::Decimal(BigDecimal::from(*v)))
            }
            (ScalarValue::BigInt(v), ScalarType::Decimal) => {
                Some(ScalarValue::Decimal(BigDecimal::from(*v)))
            }
            (ScalarValue::Text(s), _) => ScalarValue::from_json(ty, &Value::String(s.clone())),
            _ => None,
        }
    }

    /// Lowercased copy for case-insensitive indexes; non-text values are unchanged.
    pub fn case_folded(&self) -> Self {
        match self {
            ScalarValue::Text(s) => ScalarValue::Text(s.to_lowercase()),
            other => other.clone(),
        }
    }
}

/// Gregorian ticks (100ns since 1582-10-15) of a version-1 UUID.
pub(crate) fn timeuuid_ticks(uuid: &Uuid) -> u64 {
    let (time_low, time_mid, time_hi_and_version, _) = uuid.as_fields();
    (u64::from(time_hi_and_version & 0x0FFF) << 48)
        | (u64::from(time_mid) << 32)
        | u64::from(time_low)
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScalarValue {}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScalarValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ScalarValue::Text(a), ScalarValue::Text(b)) => a.cmp(b),
            (ScalarValue::Uuid(a), ScalarValue::Uuid(b)) => a.cmp(b),
            // timeuuids sort by embedded time first, like the wide-column store does
            (ScalarValue::TimeUuid(a), ScalarValue::TimeUuid(b)) => timeuuid_ticks(a)
                .cmp(&timeuuid_ticks(b))
                .then_with(|| a.cmp(b)),
            (ScalarValue::Timestamp(a), ScalarValue::Timestamp(b)) => a.cmp(b),
            (ScalarValue::Int(a), ScalarValue::Int(b)) => a.cmp(b),
            (ScalarValue::BigInt(a), ScalarValue::BigInt(b)) => a.cmp(b),
            (ScalarValue::Float(a), ScalarValue::Float(b)) => a.total_cmp(b),
            (ScalarValue::Double(a), ScalarValue::Double(b)) => a.total_cmp(b),
            (ScalarValue::Decimal(a), ScalarValue::Decimal(b)) => a.cmp(b),
            (a, b) => a.scalar_type().cmp(&b.scalar_type()),
        }
    }
}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scalar_type().hash(state);
        self.canonical_bytes().hash(state);
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            ScalarValue::Uuid(u) | ScalarValue::TimeUuid(u) => write!(f, "{u}"),
            ScalarValue::Timestamp(ts) => {
                write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::BigInt(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::Double(v) => write!(f, "{v}"),
            ScalarValue::Decimal(d) => write!(f, "{d}"),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Text(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Text(value)
    }
}

impl From<Uuid> for ScalarValue {
    fn from(value: Uuid) -> Self {
        ScalarValue::Uuid(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::BigInt(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Double(value)
    }
}

impl From<DateTime<Utc>> for ScalarValue {
    fn from(value: DateTime<Utc>) -> Self {
        ScalarValue::Timestamp(value)
    }
}

impl From<BigDecimal> for ScalarValue {
    fn from(value: BigDecimal) -> Self {
        ScalarValue::Decimal(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_type_names() {
        assert_eq!(ScalarType::parse("uuid"), Some(ScalarType::Uuid));
        assert_eq!(ScalarType::parse("integer"), Some(ScalarType::Int));
        assert_eq!(ScalarType::parse("int"), Some(ScalarType::Int));
        assert_eq!(ScalarType::parse(" BIGINT "), Some(ScalarType::BigInt));
        assert_eq!(ScalarType::parse("blob"), None);
        assert_eq!(ScalarType::Int.cql_name(), "int");
    }

    #[test]
    fn test_timestamp_from_json() {
        let from_millis = ScalarValue::from_json(ScalarType::Timestamp, &json!(1_700_000_000_123i64));
        let from_text =
            ScalarValue::from_json(ScalarType::Timestamp, &json!("2023-11-14T22:13:20.123Z"));
        assert_eq!(from_millis, from_text);
        assert!(ScalarValue::from_json(ScalarType::Timestamp, &json!(true)).is_none());
    }

    #[test]
    fn test_int_range_is_checked() {
        assert_eq!(
            ScalarValue::from_json(ScalarType::Int, &json!(12)),
            Some(ScalarValue::Int(12))
        );
        assert!(ScalarValue::from_json(ScalarType::Int, &json!(i64::MAX)).is_none());
    }

    #[test]
    fn test_decimal_equality_ignores_scale() {
        let a = ScalarValue::from_json(ScalarType::Decimal, &json!("1.50")).unwrap();
        let b = ScalarValue::from_json(ScalarType::Decimal, &json!("1.5")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn test_ordering_within_kind() {
        assert!(ScalarValue::Int(-3) < ScalarValue::Int(2));
        assert!(ScalarValue::Double(f64::NEG_INFINITY) < ScalarValue::Double(0.0));
        assert!(ScalarValue::from("a") < ScalarValue::from("b"));
    }

    #[test]
    fn test_timeuuid_requires_version_one() {
        let v4 = Uuid::new_v4();
        assert!(ScalarValue::from_json(ScalarType::TimeUuid, &json!(v4.to_string())).is_none());
        assert!(ScalarValue::Uuid(v4).coerce_to(ScalarType::TimeUuid).is_none());
    }

    #[test]
    fn test_coerce_widening() {
        assert_eq!(
            ScalarValue::Int(7).coerce_to(ScalarType::BigInt),
            Some(ScalarValue::BigInt(7))
        );
        assert_eq!(ScalarValue::BigInt(i64::MAX).coerce_to(ScalarType::Int), None);
        let id = Uuid::new_v4();
        assert_eq!(
            ScalarValue::Text(id.to_string()).coerce_to(ScalarType::Uuid),
            Some(ScalarValue::Uuid(id))
        );
    }

    #[test]
    fn test_tagged_encoding_is_prefix_free() {
        let mut ab = Vec::new();
        ScalarValue::from("ab").encode_tagged(&mut ab);
        let mut a = Vec::new();
        ScalarValue::from("a").encode_tagged(&mut a);
        assert!(!ab.starts_with(&a));
    }
}
