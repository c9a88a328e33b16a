//! Named catalog of stored queries.

use super::builder::Query;
use crate::error::{DbError, DbResult};
use indexmap::IndexMap;
use tracing::debug;

/// Stored queries, keyed by name.
///
/// Adding under an existing key replaces the previous query.
#[derive(Debug, Clone, Default)]
pub struct QueryCatalog {
    queries: IndexMap<String, Query>,
}

impl QueryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, query: Query) {
        let key = key.into();
        debug!(key = %key, bindings = query.bindings().len(), "Stored query");
        self.queries.insert(key, query);
    }

    pub fn get(&self, key: &str) -> DbResult<&Query> {
        self.queries
            .get(key)
            .ok_or_else(|| DbError::query_not_found(key))
    }

    pub fn remove(&mut self, key: &str) -> Option<Query> {
        self.queries.shift_remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.queries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
