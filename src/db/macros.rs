//! Engine dispatch macro.
//!
//! Expands one match arm per [`DbConnection`](crate::db::DbConnection)
//! variant so per-engine code paths stay side by side.

/// Match on a `DbConnection`, binding the inner driver connection.
///
/// ```ignore
/// impl_db_dispatch!(conn, {
///     MySql(c) => mysql::run(c, query).await,
///     Postgres(c) => postgres::run(c, query).await,
///     SQLite(c) => sqlite::run(c, query).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::connection::DbConnection::$variant($c) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
