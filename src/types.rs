//! Common types used throughout unidb
//!
//! SQL values, rows and column descriptions shared by every engine, plus the
//! DB-API style constructors for dates, times, timestamps and binaries.

use base64::Engine as _;
use chrono::{DateTime, Local, TimeZone};
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::fmt;

// ============================================================================
// Value
// ============================================================================

/// A single SQL value bound as a parameter or read back from a row
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Construct a date value from a count of seconds since the epoch
    pub fn date_from_ticks(ticks: i64) -> Self {
        Self::from_ticks(ticks, "%Y-%m-%d")
    }

    /// Construct a time value from a count of seconds since the epoch
    pub fn time_from_ticks(ticks: i64) -> Self {
        Self::from_ticks(ticks, "%H:%M:%S")
    }

    /// Construct a timestamp value from a count of seconds since the epoch
    pub fn timestamp_from_ticks(ticks: i64) -> Self {
        Self::from_ticks(ticks, "%Y-%m-%d %H:%M:%S")
    }

    /// Construct a binary value
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Blob(bytes.into())
    }

    fn from_ticks(ticks: i64, format: &str) -> Self {
        let local: Option<DateTime<Local>> = Local.timestamp_opt(ticks, 0).single();
        local.map_or(Self::Null, |dt| Self::Text(dt.format(format).to_string()))
    }

    /// Render as JSON (blobs are base64 encoded)
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Boolean(b) => JsonValue::Bool(*b),
            Self::Integer(i) => JsonValue::Number((*i).into()),
            Self::Real(f) => serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::Blob(b) => {
                JsonValue::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => write!(f, "'{s}'"),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::Integer(i64::from(v))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Real(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Build a positional parameter list for `?` placeholders
///
/// ```rust
/// use unidb::{params, Value};
///
/// let params = params![1, "ian"];
/// assert_eq!(params, vec![Value::Integer(1), Value::Text("ian".into())]);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ($($param:expr),+ $(,)?) => {
        vec![$($crate::Value::from($param)),+]
    };
}

// ============================================================================
// Rows and Columns
// ============================================================================

/// Column description of a result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    /// Column name as reported by the backend
    pub name: String,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// One row of a result set, values in column order
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    /// Render as a JSON object keyed by column name
    pub fn to_json_object(&self, columns: &[Column]) -> JsonValue {
        let map = columns
            .iter()
            .zip(&self.0)
            .map(|(column, value)| (column.name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        JsonValue::Object(map)
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.0[index]
    }
}

/// Materialized outcome of one statement on a raw connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column descriptions; empty for statements that return no rows
    pub columns: Vec<Column>,
    /// Rows in backend order
    pub rows: Vec<Row>,
    /// Rows changed by DML, when the backend reports it
    pub rows_affected: Option<usize>,
}

impl ResultSet {
    /// Result of a statement that produced no rows
    pub fn affected(rows_affected: usize) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: Some(rows_affected),
        }
    }

    pub fn has_rows(&self) -> bool {
        !self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_macro() {
        let params = params![1, "ian", 2.5, None::<i64>, true];
        assert_eq!(
            params,
            vec![
                Value::Integer(1),
                Value::Text("ian".to_string()),
                Value::Real(2.5),
                Value::Null,
                Value::Boolean(true),
            ]
        );
        assert!(params![].is_empty());
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Integer(7).as_i64(), Some(7));
        assert_eq!(Value::Integer(7).as_f64(), Some(7.0));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::binary(vec![1, 2]).as_bytes(), Some(&[1u8, 2][..]));
        assert!(Value::Null.is_null());
        assert!(Value::Text("x".to_string()).as_i64().is_none());
    }

    #[test]
    fn test_value_to_json() {
        assert_eq!(Value::Null.to_json(), JsonValue::Null);
        assert_eq!(Value::Integer(42).to_json(), json!(42));
        assert_eq!(Value::Text("hello".to_string()).to_json(), json!("hello"));
        assert_eq!(Value::Blob(b"hi".to_vec()).to_json(), json!("aGk="));
        assert_eq!(Value::Real(f64::NAN).to_json(), JsonValue::Null);
    }

    #[test]
    fn test_ticks_constructors() {
        let date = Value::date_from_ticks(0);
        let text = date.as_str().unwrap();
        assert_eq!(text.len(), 10);
        assert!(text.starts_with("19"));

        let ts = Value::timestamp_from_ticks(86_400 * 365);
        assert_eq!(ts.as_str().unwrap().len(), 19);

        let time = Value::time_from_ticks(0);
        assert_eq!(time.as_str().unwrap().len(), 8);
    }

    #[test]
    fn test_row_to_json_object() {
        let row = Row::new(params![1, "ian"]);
        let columns = vec![Column::new("id"), Column::new("name")];
        assert_eq!(row.to_json_object(&columns), json!({"id": 1, "name": "ian"}));
        assert_eq!(row[1], Value::from("ian"));
        assert_eq!(serde_json::to_value(&row).unwrap(), json!([1, "ian"]));
    }
}
