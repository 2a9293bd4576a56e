//! Records - the typed entities kept in the local store.
//!
//! A record is identified by its `id` alone; everything else is plain data.
//! Decoding from a remote payload is explicit and field by field, normally
//! generated with `#[derive(Record)]`:
//!
//! ```ignore
//! use data_access::Record;
//!
//! #[derive(Clone, Debug, Default, Serialize, Deserialize, Record)]
//! #[record(collection = "rooms")]
//! pub struct Room {
//!     pub id: String,
//!     pub name: String,
//!     #[record(rename = "isLive")]
//!     pub live: bool,
//! }
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Untyped remote payload for a single record: a JSON object.
pub type Payload = serde_json::Map<String, Value>;

/// Trait for types that can be stored in the local store.
pub trait Record: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static {
    /// The collection name for this record type. Acts as the record's type tag.
    const COLLECTION: &'static str;

    /// Returns the unique identifier for this record instance.
    fn id(&self) -> &str;

    /// Replaces the identifier. Used when allocating new records.
    fn set_id(&mut self, id: String);

    /// Typed access to a field by name, used by predicates and sorting.
    fn field(&self, name: &str) -> Option<FieldValue>;

    /// Decode a record from an untyped payload.
    fn decode(payload: &Payload) -> Result<Self, DecodeError>;

    /// Decode from any JSON value, rejecting non-objects.
    fn decode_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Object(payload) => Self::decode(payload),
            _ => Err(DecodeError::NotAnObject {
                collection: Self::COLLECTION,
            }),
        }
    }
}

/// A scalar field value, as seen by predicates and sort keys.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    fn rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Bool(_) => 1,
            FieldValue::Int(_) | FieldValue::Float(_) => 2,
            FieldValue::Text(_) => 3,
        }
    }

    /// Total order: `Null` < bools < numbers < text. Ints and floats compare numerically.
    pub fn total_cmp(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
            (FieldValue::Int(a), FieldValue::Int(b)) => a.cmp(b),
            (FieldValue::Int(a), FieldValue::Float(b)) => (*a as f64).total_cmp(b),
            (FieldValue::Float(a), FieldValue::Int(b)) => a.total_cmp(&(*b as f64)),
            (FieldValue::Float(a), FieldValue::Float(b)) => a.total_cmp(b),
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Equality used by predicates: numeric variants compare by value.
    pub fn matches(&self, other: &FieldValue) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value.into())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// A single offending field found while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldProblem {
    Missing { field: &'static str },
    Mistyped { field: &'static str, expected: &'static str },
}

impl FieldProblem {
    pub fn field(&self) -> &'static str {
        match self {
            FieldProblem::Missing { field } | FieldProblem::Mistyped { field, .. } => field,
        }
    }
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldProblem::Missing { field } => write!(f, "`{}` is missing", field),
            FieldProblem::Mistyped { field, expected } => {
                write!(f, "`{}` is not a {}", field, expected)
            }
        }
    }
}

/// A payload element could not be converted to a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{collection} payload is not a JSON object")]
    NotAnObject { collection: &'static str },
    #[error("cannot decode {collection}: {}", join_problems(.problems))]
    Fields {
        collection: &'static str,
        problems: Vec<FieldProblem>,
    },
}

impl DecodeError {
    /// Every offending field name, in declaration order.
    pub fn fields(&self) -> Vec<&'static str> {
        match self {
            DecodeError::NotAnObject { .. } => Vec::new(),
            DecodeError::Fields { problems, .. } => problems.iter().map(|p| p.field()).collect(),
        }
    }
}

fn join_problems(problems: &[FieldProblem]) -> String {
    problems
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Conversion between a Rust field type and its payload/predicate forms.
///
/// Implemented for the scalar types a record may hold. Used by `#[derive(Record)]`.
pub trait RecordField: Sized + Default {
    /// Human-readable type name for `FieldProblem::Mistyped`.
    const EXPECTED: &'static str;

    /// `None` means the value has the wrong shape.
    fn from_payload(value: &Value) -> Option<Self>;

    fn to_field_value(&self) -> FieldValue;

    /// Value used when the payload key is absent. `None` reports the field as missing.
    fn when_absent() -> Option<Self> {
        None
    }
}

impl RecordField for String {
    const EXPECTED: &'static str = "string";

    fn from_payload(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Text(self.clone())
    }
}

impl RecordField for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_payload(value: &Value) -> Option<Self> {
        value.as_bool()
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Bool(*self)
    }
}

impl RecordField for i64 {
    const EXPECTED: &'static str = "integer";

    fn from_payload(value: &Value) -> Option<Self> {
        value.as_i64()
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Int(*self)
    }
}

impl RecordField for i32 {
    const EXPECTED: &'static str = "32-bit integer";

    fn from_payload(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Int((*self).into())
    }
}

impl RecordField for u32 {
    const EXPECTED: &'static str = "unsigned 32-bit integer";

    fn from_payload(value: &Value) -> Option<Self> {
        value.as_u64().and_then(|v| u32::try_from(v).ok())
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Int((*self).into())
    }
}

impl RecordField for f64 {
    const EXPECTED: &'static str = "number";

    fn from_payload(value: &Value) -> Option<Self> {
        value.as_f64()
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Float(*self)
    }
}

impl<T: RecordField> RecordField for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn from_payload(value: &Value) -> Option<Self> {
        if value.is_null() {
            Some(None)
        } else {
            T::from_payload(value).map(Some)
        }
    }

    fn to_field_value(&self) -> FieldValue {
        match self {
            Some(inner) => inner.to_field_value(),
            None => FieldValue::Null,
        }
    }

    fn when_absent() -> Option<Self> {
        Some(None)
    }
}

/// Read one field from a payload, recording a problem when it is absent or mistyped.
#[doc(hidden)]
pub fn decode_field<T: RecordField>(
    payload: &Payload,
    key: &'static str,
    optional: bool,
    problems: &mut Vec<FieldProblem>,
) -> Option<T> {
    match payload.get(key) {
        Some(value) => {
            let decoded = T::from_payload(value);
            if decoded.is_none() {
                problems.push(FieldProblem::Mistyped {
                    field: key,
                    expected: T::EXPECTED,
                });
            }
            decoded
        }
        None if optional => Some(T::default()),
        None => {
            let absent = T::when_absent();
            if absent.is_none() {
                problems.push(FieldProblem::Missing { field: key });
            }
            absent
        }
    }
}
