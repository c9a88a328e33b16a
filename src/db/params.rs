//! Binding compiled positional parameters onto sqlx queries.
//!
//! One generic binder serves every engine; the where-clause lists exactly
//! the Rust types a [`QueryParam`] can carry.

use crate::models::QueryParam;
use sqlx::query::Query;
use sqlx::{Database, Encode, Type};

type EngineQuery<'q, DB> = Query<'q, DB, <DB as Database>::Arguments<'q>>;

/// Build a prepared query for `sql` with `params` bound in order.
///
/// NULL is sent as a text-typed NULL; every engine coerces it from context.
pub(crate) fn prepare<'q, DB>(sql: &'q str, params: &'q [QueryParam]) -> EngineQuery<'q, DB>
where
    DB: Database,
    Option<String>: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    &'q [u8]: Encode<'q, DB> + Type<DB>,
{
    params
        .iter()
        .fold(sqlx::query::<DB>(sql), |query, param| match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::String(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
        })
}
