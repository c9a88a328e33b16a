//! Query-related data models.
//!
//! This module defines bound values, result rows and fetch modes.

use crate::error::{DbError, DbResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// A scalar parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Textual form used when a value is spliced into a pattern (`LIKE`).
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::String(v) => v.clone(),
            Self::Bytes(v) => String::from_utf8_lossy(v).into_owned(),
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A bound value: a scalar, or an ordered fixed-size sequence used by
/// `IN` / `BETWEEN` style operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoundValue {
    Scalar(QueryParam),
    List(Vec<QueryParam>),
}

impl BoundValue {
    /// Build a list value from anything convertible to scalars.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<QueryParam>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    pub fn as_scalar(&self) -> Option<&QueryParam> {
        match self {
            Self::Scalar(v) => Some(v),
            Self::List(_) => None,
        }
    }

    /// Coerce into tuple semantics: scalars become a one-element list,
    /// lists keep their order.
    pub fn into_list(self) -> Vec<QueryParam> {
        match self {
            Self::Scalar(v) => vec![v],
            Self::List(items) => items,
        }
    }
}

/// Ordered mapping from binding key to bound value.
pub type Bindings = IndexMap<String, BoundValue>;

macro_rules! impl_scalar_from {
    ($($ty:ty => |$v:ident| $body:expr),+ $(,)?) => {
        $(
            impl From<$ty> for QueryParam {
                fn from($v: $ty) -> Self {
                    $body
                }
            }

            impl From<$ty> for BoundValue {
                fn from(v: $ty) -> Self {
                    BoundValue::Scalar(QueryParam::from(v))
                }
            }
        )+
    };
}

impl_scalar_from! {
    bool => |v| QueryParam::Bool(v),
    i32 => |v| QueryParam::Int(v as i64),
    i64 => |v| QueryParam::Int(v),
    u32 => |v| QueryParam::Int(v as i64),
    f32 => |v| QueryParam::Float(v as f64),
    f64 => |v| QueryParam::Float(v),
    String => |v| QueryParam::String(v),
    &str => |v| QueryParam::String(v.to_string()),
    &String => |v| QueryParam::String(v.clone()),
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(QueryParam::Null)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for BoundValue {
    fn from(v: Option<T>) -> Self {
        BoundValue::Scalar(QueryParam::from(v))
    }
}

impl From<QueryParam> for BoundValue {
    fn from(v: QueryParam) -> Self {
        BoundValue::Scalar(v)
    }
}

impl<T: Into<QueryParam>> From<Vec<T>> for BoundValue {
    fn from(items: Vec<T>) -> Self {
        BoundValue::list(items)
    }
}

impl<T: Into<QueryParam>, const N: usize> From<[T; N]> for BoundValue {
    fn from(items: [T; N]) -> Self {
        BoundValue::list(items)
    }
}

/// Convert a JSON value (CLI and config input) into a bound value.
impl From<JsonValue> for BoundValue {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Array(items) => {
                BoundValue::List(items.into_iter().map(json_scalar).collect())
            }
            other => BoundValue::Scalar(json_scalar(other)),
        }
    }
}

fn json_scalar(v: JsonValue) -> QueryParam {
    match v {
        JsonValue::Null => QueryParam::Null,
        JsonValue::Bool(b) => QueryParam::Bool(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => QueryParam::Int(i),
            None => QueryParam::Float(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => QueryParam::String(s),
        other => QueryParam::String(other.to_string()),
    }
}

/// One result row.
///
/// SELECT statements produce labeled rows (column name → value, in column
/// order); everything else produces positional rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Row {
    Labeled(serde_json::Map<String, JsonValue>),
    Positional(Vec<JsonValue>),
}

static NULL: JsonValue = JsonValue::Null;

impl Row {
    /// Look up a column by name (labeled rows only).
    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        match self {
            Self::Labeled(map) => map.get(column),
            Self::Positional(_) => None,
        }
    }

    /// Look up a column by position.
    pub fn get_index(&self, idx: usize) -> Option<&JsonValue> {
        match self {
            Self::Labeled(map) => map.values().nth(idx),
            Self::Positional(values) => values.get(idx),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Labeled(map) => map.len(),
            Self::Positional(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::ops::Index<&str> for Row {
    type Output = JsonValue;

    fn index(&self, column: &str) -> &JsonValue {
        self.get(column).unwrap_or(&NULL)
    }
}

impl std::ops::Index<usize> for Row {
    type Output = JsonValue;

    fn index(&self, idx: usize) -> &JsonValue {
        self.get_index(idx).unwrap_or(&NULL)
    }
}

/// Result extraction mode for `fetch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Every remaining row
    All,
    /// A single row or none
    One,
    /// Up to `size` rows
    Many,
    /// Row count only
    Count,
    /// Engine-assigned identity of the most recent insert
    LastInsertId,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::One => "one",
            Self::Many => "many",
            Self::Count => "count",
            Self::LastInsertId => "last_insert_id",
        }
    }
}

impl FromStr for FetchMode {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "all" => Ok(Self::All),
            "one" => Ok(Self::One),
            "many" => Ok(Self::Many),
            "count" | "rowcount" => Ok(Self::Count),
            "lastinsertid" | "lastinsertedid" => Ok(Self::LastInsertId),
            _ => Err(DbError::invalid_fetch_mode(s)),
        }
    }
}

impl std::fmt::Display for FetchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a fetch.
///
/// `Failed` is returned when the implicit execution failed; the driver error
/// is available from the executor's `last_error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Fetched {
    Rows(Vec<Row>),
    Row(Option<Row>),
    Count(u64),
    LastInsertId(Option<i64>),
    Failed,
}

impl Fetched {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    pub fn into_rows(self) -> Option<Vec<Row>> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn into_row(self) -> Option<Row> {
        match self {
            Self::Row(row) => row,
            _ => None,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            Self::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        match self {
            Self::LastInsertId(id) => *id,
            _ => None,
        }
    }
}
