//! Binding sets: many conditions or assignments at once.
//!
//! A [`BindingSet`] is what the CRUD helpers turn into `WHERE` and `SET`
//! clauses. Entries keep their input order so generated SQL is stable.

use super::binder::{Binder, Bound, normalize_field, placeholder_key};
use crate::error::DbResult;
use crate::models::{Bindings, BoundValue, QueryParam};
use indexmap::IndexMap;

/// Delimiter used by [`BindingSet::membership_clause`] when none is given.
pub const DEFAULT_DELIMITER: &str = "|";

/// One `(field, value, operator)` input item.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub value: BoundValue,
    pub operator: String,
}

impl Condition {
    pub fn new(
        field: impl Into<String>,
        value: impl Into<BoundValue>,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            operator: operator.into(),
        }
    }

    /// Equality condition.
    pub fn eq(field: impl Into<String>, value: impl Into<BoundValue>) -> Self {
        Self::new(field, value, "=")
    }
}

/// A value paired with an explicit operator, for map-shaped input:
/// `[("name", op("ric", "LIKE"))]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub value: BoundValue,
    pub operator: String,
}

/// Shorthand for building an [`Operand`].
pub fn op(value: impl Into<BoundValue>, operator: impl Into<String>) -> Operand {
    Operand {
        value: value.into(),
        operator: operator.into(),
    }
}

impl<F: Into<String>, V: Into<BoundValue>> From<(F, V)> for Condition {
    fn from((field, value): (F, V)) -> Self {
        Condition::eq(field, value)
    }
}

impl<F: Into<String>> From<(F, Operand)> for Condition {
    fn from((field, operand): (F, Operand)) -> Self {
        Condition::new(field, operand.value, operand.operator)
    }
}

impl<F: Into<String>, V: Into<BoundValue>, O: Into<String>> From<(F, V, O)> for Condition {
    fn from((field, value, operator): (F, V, O)) -> Self {
        Condition::new(field, value, operator)
    }
}

/// Source for [`BindingSet::membership_clause`].
#[derive(Debug, Clone, PartialEq)]
pub enum Membership {
    /// A single string split on a delimiter, e.g. `"a, b, c"`
    Delimited(String),
    List(Vec<QueryParam>),
}

impl From<&str> for Membership {
    fn from(s: &str) -> Self {
        Membership::Delimited(s.to_string())
    }
}

impl From<String> for Membership {
    fn from(s: String) -> Self {
        Membership::Delimited(s)
    }
}

impl<T: Into<QueryParam>> From<Vec<T>> for Membership {
    fn from(items: Vec<T>) -> Self {
        Membership::List(items.into_iter().map(Into::into).collect())
    }
}

/// Ordered set of bound fragments, keyed by binding key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingSet {
    entries: Vec<Bound>,
}

impl BindingSet {
    /// Format every item with `binder`.
    ///
    /// Items may be `(field, value)`, `(field, op(value, operator))` or
    /// `(field, value, operator)`; a map of field to value works too.
    pub fn build<I, C>(binder: &Binder, data: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = C>,
        C: Into<Condition>,
    {
        Self::build_prefixed(binder, "", data)
    }

    /// Like [`BindingSet::build`], with every binding key prefixed.
    pub fn build_prefixed<I, C>(binder: &Binder, prefix: &str, data: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = C>,
        C: Into<Condition>,
    {
        let mut set = Self::default();
        for item in data {
            let condition = item.into();
            let field = normalize_field(&condition.field)?;
            let key = set.unique_key(&format!("{}{}", prefix, placeholder_key(&field)));
            let bound =
                binder.format_as(key, &field, condition.value, &condition.operator)?;
            set.entries.push(bound);
        }
        Ok(set)
    }

    /// Repeated fields get a numeric suffix so `age >= x AND age < y` binds
    /// two distinct keys.
    fn unique_key(&self, base: &str) -> String {
        let taken = |key: &str| self.entries.iter().any(|e| e.key == key);
        if !taken(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{}_{}", base, n))
            .find(|key| !taken(key))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn entries(&self) -> &[Bound] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binding key to SQL fragment.
    pub fn fragments(&self) -> IndexMap<String, String> {
        self.entries
            .iter()
            .map(|e| (e.key.clone(), e.fragment.clone()))
            .collect()
    }

    /// Binding key to value, skipping operand-less fragments.
    pub fn values(&self) -> Bindings {
        self.entries
            .iter()
            .filter(|e| e.placeholder.is_some())
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect()
    }

    /// Join all fragments with `separator`.
    pub fn join(&self, separator: &str) -> String {
        self.entries
            .iter()
            .map(|e| e.fragment.as_str())
            .collect::<Vec<_>>()
            .join(separator)
    }

    pub fn where_clause(&self) -> String {
        self.join(" AND ")
    }

    pub fn set_clause(&self) -> String {
        self.join(", ")
    }

    /// `(normalized field, placeholder)` pairs for INSERT column lists.
    pub fn columns(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|e| {
                let placeholder = e
                    .placeholder
                    .clone()
                    .unwrap_or_else(|| "NULL".to_string());
                (e.field.clone(), placeholder)
            })
            .collect()
    }

    /// Build `IN (<ph_0>, <ph_1>, ...)` for the items of `data`.
    ///
    /// A string is split on `delimiter` (`|` when empty) and blank items are
    /// dropped.
    ///
    /// Keys are `<tag>_0`, `<tag>_1`, ... Returns `None` when there is
    /// nothing to match against.
    pub fn membership_clause(
        binder: &Binder,
        tag: &str,
        data: impl Into<Membership>,
        delimiter: &str,
    ) -> Option<(String, Bindings)> {
        let items: Vec<QueryParam> = match data.into() {
            Membership::Delimited(s) => {
                let delimiter = if delimiter.is_empty() {
                    DEFAULT_DELIMITER
                } else {
                    delimiter
                };
                s.split(delimiter)
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(QueryParam::from)
                    .collect()
            }
            Membership::List(items) => items,
        };

        if items.is_empty() {
            return None;
        }

        let tag = placeholder_key(tag.trim());
        let mut placeholders = Vec::with_capacity(items.len());
        let mut bindings = Bindings::new();
        for (idx, item) in items.into_iter().enumerate() {
            let key = format!("{}_{}", tag, idx);
            placeholders.push(binder.engine().placeholder(&key));
            bindings.insert(key, BoundValue::Scalar(item));
        }

        Some((format!("IN ({})", placeholders.join(", ")), bindings))
    }
}
