//! Query state: SQL text plus named bindings.
//!
//! [`QueryBuilder`] is the mutable accumulator behind `set_query` /
//! `set_binding`; [`QueryBuilder::build`] freezes it into a [`Query`] that
//! can be executed any number of times.

use crate::error::{DbError, DbResult};
use crate::models::{Bindings, BoundValue, QueryParam};
use serde::{Deserialize, Serialize};

/// Binding keys whose values are always coerced to integers.
const INTEGER_KEYS: [&str; 2] = ["limit", "offset"];

/// An immutable query: SQL text and its bindings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    sql: String,
    #[serde(default)]
    bindings: Bindings,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bindings: Bindings::new(),
        }
    }

    pub fn with_bindings(sql: impl Into<String>, bindings: Bindings) -> Self {
        Self {
            sql: sql.into(),
            bindings,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Whether the statement is a `SELECT` (labeled rows).
    pub fn is_select(&self) -> bool {
        is_select(&self.sql)
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

/// `true` if `sql`, after leading whitespace, starts with `SELECT`.
pub fn is_select(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"))
}

/// Mutable SQL text and bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryBuilder {
    sql: String,
    bindings: Bindings,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_query(&mut self, sql: impl Into<String>) -> &mut Self {
        self.sql = sql.into();
        self
    }

    pub fn reset_query(&mut self) -> &mut Self {
        self.sql.clear();
        self
    }

    pub fn query(&self) -> &str {
        &self.sql
    }

    /// Bind one scalar value under `field`.
    ///
    /// The field and string values are trimmed. `limit` and `offset` are
    /// coerced to integers. Lists must go through [`QueryBuilder::set_bindings`].
    pub fn set_binding(
        &mut self,
        field: &str,
        value: impl Into<BoundValue>,
    ) -> DbResult<&mut Self> {
        let (field, value) = normalize_binding(field, value.into())?;
        if value.is_list() {
            return Err(DbError::invalid_binding(format!(
                "'{}' is a list; lists must be bound with set_bindings",
                field
            )));
        }
        self.bindings.insert(field, value);
        Ok(self)
    }

    /// Merge several bindings, lists included.
    ///
    /// Every entry is validated before any is stored.
    pub fn set_bindings<I, K, V>(&mut self, items: I) -> DbResult<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<BoundValue>,
    {
        let normalized = items
            .into_iter()
            .map(|(k, v)| normalize_binding(k.as_ref(), v.into()))
            .collect::<DbResult<Vec<_>>>()?;
        self.bindings.extend(normalized);
        Ok(self)
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn reset_bindings(&mut self) -> &mut Self {
        self.bindings.clear();
        self
    }

    /// Snapshot the current state.
    pub fn build(&self) -> Query {
        Query::with_bindings(self.sql.clone(), self.bindings.clone())
    }

    /// Replace the whole state with `query`.
    pub fn load(&mut self, query: &Query) -> &mut Self {
        self.sql = query.sql.clone();
        self.bindings = query.bindings.clone();
        self
    }
}

fn normalize_binding(field: &str, value: BoundValue) -> DbResult<(String, BoundValue)> {
    let field = field.trim();
    if field.is_empty() {
        return Err(DbError::invalid_field("binding field cannot be empty"));
    }

    let value = match value {
        BoundValue::Scalar(v) => BoundValue::Scalar(trim_param(v)),
        BoundValue::List(items) => BoundValue::List(items.into_iter().map(trim_param).collect()),
    };

    let value = if INTEGER_KEYS
        .iter()
        .any(|key| field.eq_ignore_ascii_case(key))
    {
        BoundValue::Scalar(QueryParam::Int(coerce_integer(field, &value)?))
    } else {
        value
    };

    Ok((field.to_string(), value))
}

fn trim_param(param: QueryParam) -> QueryParam {
    match param {
        QueryParam::String(s) => QueryParam::String(s.trim().to_string()),
        other => other,
    }
}

fn coerce_integer(field: &str, value: &BoundValue) -> DbResult<i64> {
    let invalid = || {
        DbError::invalid_binding(format!("'{}' must be an integer, got {:?}", field, value))
    };
    match value.as_scalar().ok_or_else(invalid)? {
        QueryParam::Int(v) => Ok(*v),
        QueryParam::Float(v) if v.is_finite() => Ok(v.trunc() as i64),
        QueryParam::String(s) => s.parse::<i64>().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}
