//! Firestore value encoding.
//!
//! Firestore's REST API wraps every field in a typed value object
//! (`{"stringValue": "x"}`, `{"mapValue": {"fields": {...}}}`, ...). This
//! module converts between those objects and plain JSON, and renders the
//! field paths used in update masks and query filters.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use ksstore_core::{Record, Result, StoreError, ID_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// A Firestore typed value, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldValue {
    /// `null`.
    NullValue(()),
    /// A boolean.
    BooleanValue(bool),
    /// A 64-bit integer, carried as a decimal string.
    IntegerValue(#[serde(with = "int64")] i64),
    /// A double; non-finite values arrive as `"NaN"`, `"Infinity"`, ...
    DoubleValue(Double),
    /// An RFC 3339 timestamp.
    TimestampValue(String),
    /// A UTF-8 string.
    StringValue(String),
    /// Base64-encoded bytes.
    BytesValue(String),
    /// A document resource name.
    ReferenceValue(String),
    /// A latitude/longitude pair.
    GeoPointValue(LatLng),
    /// An array of values.
    ArrayValue(ArrayValue),
    /// A nested map of values.
    MapValue(MapValue),
}

/// Wire form of a double.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Double {
    /// A finite number.
    Finite(f64),
    /// `NaN`, `Infinity` or `-Infinity`.
    Special(String),
}

/// Wire form of a geo point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    /// Degrees latitude.
    #[serde(default)]
    pub latitude: f64,
    /// Degrees longitude.
    #[serde(default)]
    pub longitude: f64,
}

/// Wire form of an array value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    /// Elements; omitted on the wire when empty.
    #[serde(default)]
    pub values: Vec<FieldValue>,
}

/// Wire form of a map value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    /// Entries; omitted on the wire when empty.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

/// int64 fields travel as strings but are accepted as numbers too.
mod int64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(i64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => s.parse().map_err(de::Error::custom),
            Repr::Number(n) => Ok(n),
        }
    }
}

/// A stored document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name, ending in `/{collection}/{id}`.
    pub name: String,
    /// Document fields.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    /// The document id: the last segment of its resource name.
    #[must_use]
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }

    /// Decode the fields into a record carrying `id`.
    ///
    /// A stored `id` field wins over the resource name.
    #[must_use]
    pub fn into_record(self) -> Record {
        let id = self.id().to_string();
        let mut record = decode_fields(self.fields);
        record
            .entry(ID_FIELD.to_string())
            .or_insert(Value::String(id));
        record
    }
}

/// Encode a JSON value.
#[must_use]
pub fn encode(value: &Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::NullValue(()),
        Value::Bool(b) => FieldValue::BooleanValue(*b),
        Value::Number(n) => encode_number(n),
        Value::String(s) => FieldValue::StringValue(s.clone()),
        Value::Array(items) => FieldValue::ArrayValue(ArrayValue {
            values: items.iter().map(encode).collect(),
        }),
        Value::Object(map) => FieldValue::MapValue(MapValue {
            fields: encode_fields(map),
        }),
    }
}

#[allow(clippy::cast_precision_loss)]
fn encode_number(n: &Number) -> FieldValue {
    if let Some(i) = n.as_i64() {
        FieldValue::IntegerValue(i)
    } else if let Some(u) = n.as_u64() {
        // Beyond i64::MAX; Firestore has no unsigned integers.
        tracing::warn!(value = u, "integer exceeds i64, storing as double");
        FieldValue::DoubleValue(Double::Finite(u as f64))
    } else {
        FieldValue::DoubleValue(Double::Finite(n.as_f64().unwrap_or_default()))
    }
}

/// Encode every entry of a record.
#[must_use]
pub fn encode_fields(record: &Record) -> BTreeMap<String, FieldValue> {
    record.iter().map(|(k, v)| (k.clone(), encode(v))).collect()
}

/// Decode a wire value into JSON.
#[must_use]
pub fn decode(value: FieldValue) -> Value {
    match value {
        FieldValue::NullValue(()) => Value::Null,
        FieldValue::BooleanValue(b) => Value::Bool(b),
        FieldValue::IntegerValue(i) => Value::Number(i.into()),
        FieldValue::DoubleValue(Double::Finite(f)) => {
            Number::from_f64(f).map_or(Value::Null, Value::Number)
        }
        // JSON has no NaN or infinities.
        FieldValue::DoubleValue(Double::Special(_)) => Value::Null,
        FieldValue::TimestampValue(ts) => Value::String(normalize_timestamp(ts)),
        FieldValue::StringValue(s) | FieldValue::BytesValue(s) | FieldValue::ReferenceValue(s) => {
            Value::String(s)
        }
        FieldValue::GeoPointValue(point) => serde_json::json!({
            "latitude": point.latitude,
            "longitude": point.longitude,
        }),
        FieldValue::ArrayValue(array) => {
            Value::Array(array.values.into_iter().map(decode).collect())
        }
        FieldValue::MapValue(map) => Value::Object(decode_fields(map.fields)),
    }
}

/// Decode a field map into a record.
#[must_use]
pub fn decode_fields(fields: BTreeMap<String, FieldValue>) -> Record {
    fields.into_iter().map(|(k, v)| (k, decode(v))).collect()
}

fn normalize_timestamp(raw: String) -> String {
    DateTime::parse_from_rfc3339(&raw).map_or(raw, |ts| {
        ts.with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::AutoSi, true)
    })
}

/// Leaf field paths of a record, for a merge update mask.
///
/// Non-empty objects are descended into so that sibling fields already
/// stored under the same parent survive the merge.
#[must_use]
pub fn field_paths(record: &Record) -> Vec<String> {
    let mut paths = Vec::new();
    collect_paths(record, &mut Vec::new(), &mut paths);
    paths
}

fn collect_paths<'a>(record: &'a Record, prefix: &mut Vec<&'a str>, out: &mut Vec<String>) {
    for (key, value) in record {
        prefix.push(key);
        match value {
            Value::Object(nested) if !nested.is_empty() => collect_paths(nested, prefix, out),
            _ => out.push(join_segments(prefix)),
        }
        prefix.pop();
    }
}

/// Convert a dotted field path (`address.city`) into Firestore's quoted form.
///
/// # Errors
///
/// Returns `StoreError::InvalidData` for empty segments or the reserved
/// characters `~ * / [ ]`.
pub fn parse_dotted_path(path: &str) -> Result<String> {
    let segments: Vec<&str> = path.split('.').collect();
    let valid = segments
        .iter()
        .all(|s| !s.is_empty() && !s.contains(['~', '*', '/', '[', ']']));
    if !valid {
        tracing::error!(path = %path, "invalid field path");
        return Err(StoreError::InvalidData);
    }
    Ok(join_segments(&segments))
}

fn join_segments(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| quote_segment(s))
        .collect::<Vec<_>>()
        .join(".")
}

fn quote_segment(segment: &str) -> String {
    let mut chars = segment.chars();
    let simple = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        return segment.to_string();
    }

    let mut quoted = String::with_capacity(segment.len() + 2);
    quoted.push('`');
    for c in segment.chars() {
        if c == '`' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('`');
    quoted
}
