//! Records, query terms and JSON binding.
//!
//! A [`Record`] is an untyped JSON object. Typed values enter the store
//! through [`to_record`] and leave it through [`bind`]; both go through the
//! neutral `serde_json::Value` representation, so anything that is not
//! JSON-representable is rejected as [`StoreError::InvalidData`].

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// A schema-less record: field names mapped to JSON values.
pub type Record = Map<String, Value>;

/// Serialize `input` into a [`Record`].
///
/// `null` becomes an empty record.
///
/// # Errors
///
/// Returns `StoreError::InvalidData` if `input` cannot be serialized to JSON
/// or does not serialize to an object.
pub fn to_record<T: Serialize + ?Sized>(input: &T) -> Result<Record> {
    let value = serde_json::to_value(input).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialize record");
        StoreError::InvalidData
    })?;

    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Record::new()),
        other => {
            tracing::error!(kind = value_kind(&other), "Record is not a JSON object");
            Err(StoreError::InvalidData)
        }
    }
}

/// Re-serialize `src` into the target type `D` through JSON.
///
/// Typically used to project a [`Record`] onto an application struct.
///
/// # Errors
///
/// Returns `StoreError::InvalidData` if either direction fails.
pub fn bind<D, S>(src: &S) -> Result<D>
where
    D: DeserializeOwned,
    S: Serialize + ?Sized,
{
    let value = serde_json::to_value(src).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialize bind source");
        StoreError::InvalidData
    })?;
    serde_json::from_value(value).map_err(|e| {
        tracing::error!(error = %e, "Failed to bind into target type");
        StoreError::InvalidData
    })
}

/// Short name of a JSON value's kind, for logging.
#[must_use]
pub const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Comparison operator of a query [`Term`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `array-contains`
    ArrayContains,
    /// `array-contains-any`
    ArrayContainsAny,
    /// `in`
    In,
    /// `not-in`
    NotIn,
}

impl Op {
    /// The string token for this operator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::ArrayContains => "array-contains",
            Self::ArrayContainsAny => "array-contains-any",
            Self::In => "in",
            Self::NotIn => "not-in",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Op {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        let op = match s {
            "==" => Self::Eq,
            "!=" => Self::NotEq,
            "<" => Self::Lt,
            "<=" => Self::Lte,
            ">" => Self::Gt,
            ">=" => Self::Gte,
            "array-contains" => Self::ArrayContains,
            "array-contains-any" => Self::ArrayContainsAny,
            "in" => Self::In,
            "not-in" => Self::NotIn,
            _ => return Err(StoreError::InvalidData),
        };
        Ok(op)
    }
}

/// A single query predicate: `field op value`.
///
/// `field` is a dotted path into nested objects (`address.city`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    /// Field path the predicate applies to.
    pub field: String,
    /// Operator token, e.g. `"=="` or `"array-contains"`.
    pub op: String,
    /// Value compared against.
    pub value: Value,
}

impl Term {
    /// Create a new term.
    pub fn new(field: impl Into<String>, op: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: op.into(),
            value: value.into(),
        }
    }

    /// Parse the operator token.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidData` for an unknown token.
    pub fn operator(&self) -> Result<Op> {
        self.op.parse().inspect_err(|_| {
            tracing::error!(op = %self.op, field = %self.field, "unknown query operator");
        })
    }
}
