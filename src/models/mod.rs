//! Data models for SorcererDB.

pub mod connection;
pub mod query;

pub use connection::Engine;
pub use query::{Bindings, BoundValue, FetchMode, Fetched, QueryParam, Row};
