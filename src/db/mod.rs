//! Database layer.
//!
//! - DSN and connection registries
//! - Statement execution and cursors
//! - Parameter binding and row decoding
//! - Engine dispatch macro

pub mod connection;
pub mod cursor;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod params;
pub mod registry;
pub mod types;

pub use connection::{ConnectionRegistry, DbConnection};
pub use cursor::{Cursor, CursorMode};
pub use executor::{ExecutionState, QueryExecutor};
pub use registry::{AUTO_NAME_PREFIX, DsnRegistry};
