//! Live connections and the connection registry.
//!
//! Each registered DSN maps to at most one open driver connection. One of
//! them is the *active* connection that statements run against. The
//! registry is a cheap, cloneable handle; clones share the same state.

use crate::config::DsnConfig;
use crate::db::cursor::{CursorMode, Outcome};
use crate::db::registry::DsnRegistry;
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::Engine;
use crate::query::CompiledQuery;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::PgConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection, Executor, MySqlConnection, PgConnection, SqliteConnection};
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// An open driver connection (one variant per engine).
pub enum DbConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DbConnection").field(&self.engine()).finish()
    }
}

impl DbConnection {
    /// Open a connection, bounded by the configured timeout.
    pub async fn connect(config: &DsnConfig) -> DbResult<Self> {
        match timeout(config.timeout_duration(), Self::establish(config)).await {
            Ok(result) => result,
            Err(_) => Err(connect_timeout_error(config)),
        }
    }

    async fn establish(config: &DsnConfig) -> DbResult<Self> {
        match config.engine {
            Engine::MySql => {
                let options = MySqlConnectOptions::new()
                    .host(&config.host)
                    .port(config.port)
                    .username(&config.user)
                    .password(&config.password)
                    .database(&config.database)
                    .charset(&config.charset);
                let conn = options
                    .connect()
                    .await
                    .map_err(|e| connect_error(config, e))?;
                Ok(DbConnection::MySql(conn))
            }
            Engine::Postgres => {
                let options = PgConnectOptions::new()
                    .host(&config.host)
                    .port(config.port)
                    .username(&config.user)
                    .password(&config.password)
                    .database(&config.database)
                    .options([("client_encoding", pg_client_encoding(&config.charset))]);
                let conn = options
                    .connect()
                    .await
                    .map_err(|e| connect_error(config, e))?;
                Ok(DbConnection::Postgres(conn))
            }
            Engine::Sqlite => {
                let options = if config.is_memory() {
                    SqliteConnectOptions::from_str("sqlite::memory:")
                        .map_err(|e| connect_error(config, e))?
                } else {
                    SqliteConnectOptions::new()
                        .filename(&config.database)
                        .create_if_missing(true)
                };
                let conn = options
                    .connect()
                    .await
                    .map_err(|e| connect_error(config, e))?;
                Ok(DbConnection::SQLite(conn))
            }
        }
    }

    pub fn engine(&self) -> Engine {
        match self {
            DbConnection::MySql(_) => Engine::MySql,
            DbConnection::Postgres(_) => Engine::Postgres,
            DbConnection::SQLite(_) => Engine::Sqlite,
        }
    }

    /// Run a parameterless statement, ignoring any result rows.
    pub async fn execute_raw(&mut self, sql: &str) -> DbResult<()> {
        impl_db_dispatch!(self, {
            MySql(c) => c.execute(sql).await.map(|_| ()),
            Postgres(c) => c.execute(sql).await.map(|_| ()),
            SQLite(c) => c.execute(sql).await.map(|_| ()),
        })
        .map_err(DbError::from)
    }

    pub async fn ping(&mut self) -> DbResult<()> {
        impl_db_dispatch!(self, {
            MySql(c) => c.ping().await,
            Postgres(c) => c.ping().await,
            SQLite(c) => c.ping().await,
        })
        .map_err(DbError::from)
    }

    /// Gracefully close the connection.
    pub async fn close(self) -> DbResult<()> {
        impl_db_dispatch!(self, {
            MySql(c) => c.close().await,
            Postgres(c) => c.close().await,
            SQLite(c) => c.close().await,
        })
        .map_err(DbError::from)
    }
}

fn connect_error(config: &DsnConfig, error: sqlx::Error) -> DbError {
    let suggestion = connection_suggestion(config.engine, &error);
    DbError::connection_with_source(
        format!(
            "Failed to connect to '{}' ({}): {}",
            config.name,
            config.masked_url(),
            error
        ),
        suggestion,
        error,
    )
}

/// PostgreSQL spells MySQL's `utf8mb4` / `utf8mb3` simply `UTF8`.
fn pg_client_encoding(charset: &str) -> &str {
    if charset.to_ascii_lowercase().starts_with("utf8") {
        "UTF8"
    } else {
        charset
    }
}

fn connect_timeout_error(config: &DsnConfig) -> DbError {
    DbError::connection_with_source(
        format!(
            "Timed out connecting to '{}' ({})",
            config.name,
            config.masked_url()
        ),
        "Check that the server is reachable or raise the DSN timeout",
        DbError::timeout(format!("connecting to '{}'", config.name), config.timeout),
    )
}

/// Session setup after the driver connected (autocommit mode, implicit
/// transaction) failing still counts as a failed connect.
fn session_setup_error(config: &DsnConfig, error: DbError) -> DbError {
    if matches!(error, DbError::Connection { .. }) {
        return error;
    }
    let suggestion = error
        .suggestion()
        .filter(|s| !s.is_empty())
        .unwrap_or("Check that the DSN user may change session settings")
        .to_string();
    DbError::connection_with_source(
        format!(
            "Failed to set up session for '{}' ({}): {}",
            config.name,
            config.masked_url(),
            error
        ),
        suggestion,
        error,
    )
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(engine: Engine, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!("Check that the {} server is running and accessible", engine);
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the user and password of the DSN".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match engine {
        Engine::Postgres => "Verify host, port and database of the PostgreSQL DSN".to_string(),
        Engine::MySql => "Verify host, port and database of the MySQL DSN".to_string(),
        Engine::Sqlite => "Verify the database file path is writable".to_string(),
    }
}

#[derive(Debug)]
struct ConnectionEntry {
    connection: DbConnection,
    config: DsnConfig,
    in_transaction: bool,
}

impl ConnectionEntry {
    /// With autocommit off, SQLite and PostgreSQL sessions are kept inside
    /// an open transaction at all times; MySQL handles this server-side.
    fn implicit_transactions(&self) -> bool {
        !self.config.autocommit && self.config.engine != Engine::MySql
    }

    async fn apply_autocommit(&mut self) -> DbResult<()> {
        match self.config.engine {
            Engine::MySql => {
                let sql = if self.config.autocommit {
                    "SET autocommit = 1"
                } else {
                    "SET autocommit = 0"
                };
                self.connection.execute_raw(sql).await
            }
            Engine::Postgres | Engine::Sqlite => self.reopen_implicit_transaction().await,
        }
    }

    async fn reopen_implicit_transaction(&mut self) -> DbResult<()> {
        if self.implicit_transactions() {
            self.connection.execute_raw("BEGIN").await?;
            self.in_transaction = true;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    dsns: DsnRegistry,
    connections: HashMap<String, ConnectionEntry>,
    active: Option<String>,
}

impl RegistryState {
    fn entry_mut(&mut self, name: &str) -> DbResult<&mut ConnectionEntry> {
        if !self.dsns.exists(name) {
            return Err(DbError::unknown_dsn(name));
        }
        self.connections
            .get_mut(name)
            .ok_or_else(|| not_connected(name))
    }
}

fn not_connected(name: &str) -> DbError {
    DbError::connection(
        format!("DSN '{}' is not connected", name),
        "Call connect(name) first",
    )
}

/// Named connections over a DSN registry, with one active connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the given DSNs already registered.
    pub async fn with_dsns(configs: impl IntoIterator<Item = DsnConfig>) -> DbResult<Self> {
        let registry = Self::new();
        for config in configs {
            registry.register(config).await?;
        }
        Ok(registry)
    }

    /// Register a DSN without connecting. Returns the (possibly generated) name.
    pub async fn register(&self, config: DsnConfig) -> DbResult<String> {
        self.state.lock().await.dsns.register(config)
    }

    pub async fn dsn_exists(&self, name: &str) -> bool {
        self.state.lock().await.dsns.exists(name)
    }

    pub async fn lookup(&self, name: &str) -> DbResult<DsnConfig> {
        self.state.lock().await.dsns.lookup(name).cloned()
    }

    pub async fn dsn_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.dsns.names().map(str::to_string).collect()
    }

    /// Open a connection for `name` and make it active.
    ///
    /// Connecting an already-connected name only makes it active.
    pub async fn connect(&self, name: &str) -> DbResult<()> {
        // Early check for existing connection
        let config = {
            let mut state = self.state.lock().await;
            let config = state.dsns.lookup(name)?.clone();
            if state.connections.contains_key(name) {
                debug!(dsn = %name, "Already connected, switching active connection");
                state.active = Some(name.to_string());
                return Ok(());
            }
            config
        };

        info!(
            dsn = %name,
            engine = %config.engine,
            target = %config.masked_url(),
            autocommit = config.autocommit,
            "Connecting to database"
        );

        let connection = DbConnection::connect(&config).await?;
        let mut entry = ConnectionEntry {
            connection,
            config,
            in_transaction: false,
        };
        if let Err(e) = entry.apply_autocommit().await {
            let error = session_setup_error(&entry.config, e);
            if let Err(close_err) = entry.connection.close().await {
                warn!(dsn = %name, error = %close_err, "Failed to close connection");
            }
            return Err(error);
        }

        // Re-check after async work; a concurrent connect may have won
        let duplicate = {
            let mut state = self.state.lock().await;
            let duplicate = if state.connections.contains_key(name) {
                Some(entry)
            } else {
                state.connections.insert(name.to_string(), entry);
                None
            };
            state.active = Some(name.to_string());
            duplicate
        };

        if let Some(entry) = duplicate {
            debug!(dsn = %name, "Discarding duplicate connection");
            if let Err(e) = entry.connection.close().await {
                warn!(dsn = %name, error = %e, "Failed to close duplicate connection");
            }
        }

        info!(dsn = %name, "Connected successfully");
        Ok(())
    }

    /// Close and forget the connection for `name`.
    ///
    /// Clears the active connection if it was `name`. A name with no open
    /// connection is ignored.
    pub async fn disconnect(&self, name: &str) -> DbResult<()> {
        let entry = {
            let mut state = self.state.lock().await;
            if state.active.as_deref() == Some(name) {
                state.active = None;
            }
            state.connections.remove(name)
        };

        match entry {
            Some(entry) => {
                info!(dsn = %name, "Closing connection");
                entry.connection.close().await
            }
            None => {
                debug!(dsn = %name, "Disconnect on a name that is not connected");
                Ok(())
            }
        }
    }

    /// Make `name` the active connection, connecting it first if needed.
    pub async fn set_active(&self, name: &str) -> DbResult<()> {
        {
            let mut state = self.state.lock().await;
            if state.connections.contains_key(name) {
                state.active = Some(name.to_string());
                debug!(dsn = %name, "Active connection changed");
                return Ok(());
            }
            if !state.dsns.exists(name) {
                return Err(DbError::unknown_dsn(name));
            }
        }
        self.connect(name).await
    }

    pub async fn active_name(&self) -> Option<String> {
        self.state.lock().await.active.clone()
    }

    pub async fn is_connected(&self, name: &str) -> bool {
        self.state.lock().await.connections.contains_key(name)
    }

    pub async fn connected_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.connections.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Engine of a connected DSN.
    pub async fn engine_of(&self, name: &str) -> DbResult<Engine> {
        let mut state = self.state.lock().await;
        Ok(state.entry_mut(name)?.config.engine)
    }

    /// Round-trip to the server on a connected DSN.
    pub async fn ping(&self, name: &str) -> DbResult<()> {
        let mut state = self.state.lock().await;
        state.entry_mut(name)?.connection.ping().await
    }

    /// Execute a compiled statement on the connection for `name`.
    pub(crate) async fn run(
        &self,
        name: &str,
        query: &CompiledQuery,
        mode: CursorMode,
    ) -> DbResult<Outcome> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(name)?;
        let in_transaction = entry.in_transaction;
        entry.connection.run(query, mode, in_transaction).await
    }

    pub async fn begin(&self, name: &str) -> DbResult<()> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(name)?;
        if entry.implicit_transactions() {
            debug!(dsn = %name, "Autocommit is off, transaction already open");
            return Ok(());
        }
        let sql = entry.config.engine.begin_statement();
        entry.connection.execute_raw(sql).await?;
        entry.in_transaction = true;
        debug!(dsn = %name, "Transaction started");
        Ok(())
    }

    pub async fn commit(&self, name: &str) -> DbResult<()> {
        self.finish_transaction(name, "COMMIT").await
    }

    pub async fn rollback(&self, name: &str) -> DbResult<()> {
        self.finish_transaction(name, "ROLLBACK").await
    }

    async fn finish_transaction(&self, name: &str, sql: &str) -> DbResult<()> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(name)?;
        entry.connection.execute_raw(sql).await?;
        entry.in_transaction = false;
        debug!(dsn = %name, statement = sql, "Transaction finished");
        entry.reopen_implicit_transaction().await
    }

    /// Close every open connection.
    ///
    /// Failures are logged and do not stop the remaining closes.
    pub async fn close_all(&self) {
        let entries: Vec<(String, ConnectionEntry)> = {
            let mut state = self.state.lock().await;
            state.active = None;
            state.connections.drain().collect()
        };

        for (name, entry) in entries {
            info!(dsn = %name, "Closing connection");
            if let Err(e) = entry.connection.close().await {
                warn!(dsn = %name, error = %e, "Failed to close connection");
            }
        }
        info!("All connections closed");
    }

    /// Run `f` with this registry, then close every connection.
    ///
    /// Connections are closed whether `f` succeeds or fails.
    pub async fn scoped<T, F, Fut>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(ConnectionRegistry) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let result = f(self.clone()).await;
        self.close_all().await;
        result
    }
}
