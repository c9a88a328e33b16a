//! Binder: one `(field, value, operator)` triple to an SQL fragment.
//!
//! The fragment always has the shape `<field> <OPERATOR> <placeholder>`, with
//! the placeholder spelled in the engine's named-parameter syntax. The only
//! exception is `IS NULL` / `IS NOT NULL`, which take no operand.

use crate::error::{DbError, DbResult};
use crate::models::{BoundValue, Engine, QueryParam};

/// Output of [`Binder::format`].
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    /// Trimmed, lowercased field name
    pub field: String,
    /// Key the value is bound under
    pub key: String,
    /// `None` for operators without an operand
    pub placeholder: Option<String>,
    pub fragment: String,
    pub value: BoundValue,
}

impl Bound {
    /// `(normalized field, fragment, bound value)`.
    pub fn into_parts(self) -> (String, String, BoundValue) {
        (self.field, self.fragment, self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binder {
    engine: Engine,
}

impl Binder {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Binder for an engine identifier such as `"mysql"`.
    pub fn for_engine(engine: &str) -> DbResult<Self> {
        Ok(Self::new(engine.parse()?))
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Format one condition or assignment.
    ///
    /// An empty operator means `=`.
    pub fn format(
        &self,
        field: &str,
        value: impl Into<BoundValue>,
        operator: &str,
    ) -> DbResult<Bound> {
        self.format_keyed("", field, value, operator)
    }

    /// Like [`Binder::format`], with `prefix` prepended to the binding key.
    pub fn format_keyed(
        &self,
        prefix: &str,
        field: &str,
        value: impl Into<BoundValue>,
        operator: &str,
    ) -> DbResult<Bound> {
        let normalized = normalize_field(field)?;
        let key = format!("{}{}", prefix, placeholder_key(&normalized));
        self.format_as(key, field, value, operator)
    }

    /// Format under an explicit binding key.
    pub(crate) fn format_as(
        &self,
        key: String,
        field: &str,
        value: impl Into<BoundValue>,
        operator: &str,
    ) -> DbResult<Bound> {
        let field = normalize_field(field)?;
        let operator = normalize_operator(operator);
        let value = value.into();

        let (placeholder, value) = match operator.as_str() {
            "LIKE" | "NOT LIKE" => (
                Some(self.engine.placeholder(&key)),
                BoundValue::Scalar(QueryParam::String(format!("%{}%", like_text(&value)))),
            ),
            "IN" | "NOT IN" | "BETWEEN" | "NOT BETWEEN" => (
                Some(self.engine.placeholder(&key)),
                BoundValue::List(value.into_list()),
            ),
            "IS NULL" | "IS NOT NULL" => (None, BoundValue::Scalar(QueryParam::Null)),
            _ => (Some(self.engine.placeholder(&key)), value),
        };

        let fragment = match &placeholder {
            Some(ph) => format!("{} {} {}", field, operator, ph),
            None => format!("{} {}", field, operator),
        };

        Ok(Bound {
            field,
            key,
            placeholder,
            fragment,
            value,
        })
    }
}

/// Trim and lowercase a field name.
pub fn normalize_field(field: &str) -> DbResult<String> {
    let field = field.trim().to_lowercase();
    if field.is_empty() {
        return Err(DbError::invalid_field("field name cannot be empty"));
    }
    Ok(field)
}

/// Upper-case an operator and collapse inner whitespace (`not  like` → `NOT LIKE`).
pub fn normalize_operator(operator: &str) -> String {
    let operator = operator.split_whitespace().collect::<Vec<_>>().join(" ");
    if operator.is_empty() {
        "=".to_string()
    } else {
        operator.to_uppercase()
    }
}

/// Binding key for a normalized field: anything outside `[a-z0-9_]` becomes `_`.
///
/// A key starting with a digit gets a leading `_` so it still reads as a
/// named placeholder (`2fa` binds as `_2fa`).
pub fn placeholder_key(field: &str) -> String {
    let lead = if field.starts_with(|c: char| c.is_ascii_digit()) {
        "_"
    } else {
        ""
    };
    let key: String = field
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{}", lead, key)
}

fn like_text(value: &BoundValue) -> String {
    match value {
        BoundValue::Scalar(v) => v.to_text(),
        BoundValue::List(items) => items
            .iter()
            .map(QueryParam::to_text)
            .collect::<Vec<_>>()
            .join(","),
    }
}
