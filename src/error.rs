//! Error types for SorcererDB.
//!
//! This module defines all error types using `thiserror`. Programmer errors
//! (unknown DSN, malformed input, bad configuration) are returned as `Err`;
//! driver failures during statement execution are captured by the executor
//! instead and surfaced through its `last_error`.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Unknown DSN: {name}")]
    UnknownDsn { name: String },

    #[error("DSN name already registered: {name}")]
    DuplicateName { name: String },

    #[error("Unsupported database engine: {engine}")]
    UnsupportedEngine { engine: String },

    #[error("Connection failed: {message}")]
    Connection {
        message: String,
        suggestion: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Invalid field: {message}")]
    InvalidField { message: String },

    #[error("Invalid binding: {message}")]
    InvalidBinding { message: String },

    #[error("No data supplied for {operation} on '{table}'")]
    EmptyData { operation: String, table: String },

    #[error("No conditions supplied for {operation} on '{table}'")]
    EmptyConditions { operation: String, table: String },

    #[error("Invalid fetch mode: {mode}")]
    InvalidFetchMode { mode: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Stored query not found: {key}")]
    QueryNotFound { key: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an unknown DSN error.
    pub fn unknown_dsn(name: impl Into<String>) -> Self {
        Self::UnknownDsn { name: name.into() }
    }

    /// Create a duplicate DSN name error.
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    /// Create an unsupported engine error.
    pub fn unsupported_engine(engine: impl Into<String>) -> Self {
        Self::UnsupportedEngine {
            engine: engine.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
            source: None,
        }
    }

    /// Create a connection error wrapping the underlying driver failure.
    pub fn connection_with_source(
        message: impl Into<String>,
        suggestion: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
            source: Some(source.into()),
        }
    }

    pub fn invalid_field(message: impl Into<String>) -> Self {
        Self::InvalidField {
            message: message.into(),
        }
    }

    pub fn invalid_binding(message: impl Into<String>) -> Self {
        Self::InvalidBinding {
            message: message.into(),
        }
    }

    pub fn empty_data(operation: impl Into<String>, table: impl Into<String>) -> Self {
        Self::EmptyData {
            operation: operation.into(),
            table: table.into(),
        }
    }

    pub fn empty_conditions(operation: impl Into<String>, table: impl Into<String>) -> Self {
        Self::EmptyConditions {
            operation: operation.into(),
            table: table.into(),
        }
    }

    pub fn invalid_fetch_mode(mode: impl Into<String>) -> Self {
        Self::InvalidFetchMode { mode: mode.into() }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn query_not_found(key: impl Into<String>) -> Self {
        Self::QueryNotFound { key: key.into() }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::EmptyConditions { .. } => {
                Some("Supply at least one condition; full-table deletes must be written as raw SQL")
            }
            Self::InvalidBinding { .. } => {
                Some("Use set_bindings for list values and check placeholder names")
            }
            _ => None,
        }
    }

    /// Get the SQLSTATE code for driver errors.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors raised while executing statements.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the DSN host, port and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::database(
                format!("Column not found: {}", col),
                None,
                "Check the selected column names",
            ),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
