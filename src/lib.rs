//! SorcererDB
//!
//! Named connections to MySQL, PostgreSQL and SQLite with a single
//! query/bind/fetch interface, CRUD helpers, transactions and a catalog of
//! stored queries.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod query;

pub use config::{Config, DsnConfig};
pub use db::{ConnectionRegistry, QueryExecutor};
pub use error::{DbError, DbResult};
pub use models::{Engine, FetchMode, Fetched, QueryParam, Row};
pub use query::{Binder, BindingSet, Query};
