//! Statement execution and result fetching.
//!
//! [`QueryExecutor`] owns the per-session query state (SQL text, bindings,
//! stored queries) and the cursor of the most recent execution. Statements
//! always run on the registry's active connection.
//!
//! Driver failures while running a statement do not surface as `Err`:
//! they are recorded in [`QueryExecutor::last_error`] and the call reports
//! `Ok(false)` (or [`Fetched::Failed`]). Caller mistakes such as a missing
//! binding, an unknown stored query or no active connection are returned
//! as `Err`.
//!
//! # Architecture
//!
//! Engine-specific execution lives in the `mysql`, `postgres` and `sqlite`
//! submodules at the bottom of this file. Each drains the driver stream into
//! an [`Outcome`] the cursor is then loaded from.

use crate::db::connection::{ConnectionRegistry, DbConnection};
use crate::db::cursor::{Cursor, CursorMode, Outcome};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{Bindings, BoundValue, Engine, FetchMode, Fetched, QueryParam, Row};
use crate::query::{
    Binder, BindingSet, CompiledQuery, Condition, Query, QueryBuilder, QueryCatalog, compile,
};
use futures_util::TryStreamExt;
use futures_util::stream::Stream;
use sqlx::Either;
use tracing::{debug, warn};

/// Binding-key prefixes for `update`; assignments and conditions each get
/// their own key space.
const SET_PREFIX: &str = "set_";
const WHERE_PREFIX: &str = "where_";

/// Where the executor is in its execute/fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// No cursor
    Idle,
    /// Cursor opened, statement not run yet
    CursorOpen,
    /// Last statement ran; results are buffered in the cursor
    Executed,
    /// Last statement failed; see `last_error`
    Failed,
}

/// Executes statements against the active connection of a
/// [`ConnectionRegistry`].
#[derive(Debug)]
pub struct QueryExecutor {
    registry: ConnectionRegistry,
    state: QueryBuilder,
    catalog: QueryCatalog,
    cursor: Option<Cursor>,
    status: ExecutionState,
    last_error: Option<DbError>,
    log_queries: bool,
}

impl QueryExecutor {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            state: QueryBuilder::new(),
            catalog: QueryCatalog::new(),
            cursor: None,
            status: ExecutionState::Idle,
            last_error: None,
            log_queries: false,
        }
    }

    /// Include SQL text in execution logs.
    pub fn with_log_queries(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    // -------------------------------------------------------------------------
    // Connections
    // -------------------------------------------------------------------------

    pub async fn connect(&mut self, name: &str) -> DbResult<()> {
        self.registry.connect(name).await
    }

    /// Close the connection for `name`, dropping the cursor if it was
    /// opened on that connection.
    pub async fn disconnect(&mut self, name: &str) -> DbResult<()> {
        if self
            .cursor
            .as_ref()
            .is_some_and(|cursor| cursor.connection() == name)
        {
            self.close_cursor();
        }
        self.registry.disconnect(name).await
    }

    pub async fn set_active(&self, name: &str) -> DbResult<()> {
        self.registry.set_active(name).await
    }

    pub async fn active_name(&self) -> Option<String> {
        self.registry.active_name().await
    }

    // -------------------------------------------------------------------------
    // Query state
    // -------------------------------------------------------------------------

    pub fn set_query(&mut self, sql: impl Into<String>) -> &mut Self {
        self.state.set_query(sql);
        self
    }

    pub fn reset_query(&mut self) -> &mut Self {
        self.state.reset_query();
        self
    }

    pub fn query(&self) -> &str {
        self.state.query()
    }

    pub fn set_binding(
        &mut self,
        field: &str,
        value: impl Into<BoundValue>,
    ) -> DbResult<&mut Self> {
        self.state.set_binding(field, value)?;
        Ok(self)
    }

    /// Set several bindings. Nothing is applied if any of them is invalid.
    pub fn set_bindings<I, K, V>(&mut self, items: I) -> DbResult<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<BoundValue>,
    {
        self.state.set_bindings(items)?;
        Ok(self)
    }

    pub fn bindings(&self) -> &Bindings {
        self.state.bindings()
    }

    pub fn reset_bindings(&mut self) -> &mut Self {
        self.state.reset_bindings();
        self
    }

    // -------------------------------------------------------------------------
    // Stored queries
    // -------------------------------------------------------------------------

    /// Store a query under `key`, replacing any previous one.
    pub fn store_query(&mut self, key: impl Into<String>, query: impl Into<Query>) {
        self.catalog.add(key, query.into());
    }

    /// Make the stored query `key` the current query state.
    pub fn use_stored_query(&mut self, key: &str) -> DbResult<&mut Self> {
        let query = self.catalog.get(key)?;
        self.state.load(query);
        Ok(self)
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut QueryCatalog {
        &mut self.catalog
    }

    // -------------------------------------------------------------------------
    // Cursor
    // -------------------------------------------------------------------------

    /// Open a fresh cursor on the active connection for the current query.
    pub async fn open_cursor(&mut self) -> DbResult<()> {
        let sql = self.state.query().to_string();
        self.open_cursor_for(&sql).await.map(|_| ())
    }

    async fn open_cursor_for(&mut self, sql: &str) -> DbResult<(String, Engine)> {
        self.close_cursor();
        let name = self.require_active().await?;
        let engine = self.registry.engine_of(&name).await?;

        let mode = CursorMode::for_sql(sql);
        debug!(dsn = %name, ?mode, "Cursor opened");
        self.cursor = Some(Cursor::open(name.clone(), mode));
        self.status = ExecutionState::CursorOpen;
        Ok((name, engine))
    }

    /// Drop the current cursor, if any.
    pub fn close_cursor(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            debug!(dsn = %cursor.connection(), "Cursor closed");
        }
        self.status = ExecutionState::Idle;
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn cursor_mut(&mut self) -> Option<&mut Cursor> {
        self.cursor.as_mut()
    }

    pub fn state(&self) -> ExecutionState {
        self.status
    }

    /// The driver error of the most recent failed execution.
    pub fn last_error(&self) -> Option<&DbError> {
        self.last_error.as_ref()
    }

    pub fn clear_error(&mut self) -> Option<DbError> {
        self.last_error.take()
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    /// Run the current query state on the active connection.
    ///
    /// Returns `Ok(false)` when the driver rejected the statement.
    pub async fn execute(&mut self) -> DbResult<bool> {
        let query = self.state.build();
        self.execute_query(&query).await
    }

    /// Run `query` on the active connection, leaving the query state alone.
    pub async fn execute_query(&mut self, query: &Query) -> DbResult<bool> {
        let (name, engine) = self.open_cursor_for(query.sql()).await?;
        let compiled = compile(engine, query.sql(), query.bindings())?;
        Ok(self.run_compiled(&name, compiled).await)
    }

    async fn run_compiled(&mut self, name: &str, compiled: CompiledQuery) -> bool {
        let mode = self
            .cursor
            .as_ref()
            .map_or(CursorMode::Positional, Cursor::mode);

        if self.log_queries {
            debug!(dsn = %name, sql = %compiled.sql, params = compiled.params.len(), "Executing statement");
        } else {
            debug!(dsn = %name, params = compiled.params.len(), "Executing statement");
        }

        match self.registry.run(name, &compiled, mode).await {
            Ok(outcome) => {
                debug!(
                    dsn = %name,
                    rows = outcome.rows.len(),
                    rows_affected = outcome.rows_affected,
                    "Statement executed"
                );
                if let Some(cursor) = self.cursor.as_mut() {
                    cursor.load(outcome);
                }
                self.status = ExecutionState::Executed;
                self.last_error = None;
                true
            }
            Err(e) => {
                warn!(dsn = %name, error = %e, "Statement failed");
                self.capture(e);
                false
            }
        }
    }

    fn capture(&mut self, error: DbError) {
        self.last_error = Some(error);
        self.status = ExecutionState::Failed;
    }

    /// Execute the current query state and extract results per `mode`.
    ///
    /// `size` applies to [`FetchMode::Many`] and defaults to 1.
    pub async fn fetch(&mut self, mode: FetchMode, size: Option<usize>) -> DbResult<Fetched> {
        let query = self.state.build();
        self.fetch_query(&query, mode, size).await
    }

    /// [`fetch`](Self::fetch) with the mode given by name, e.g. `"all"`.
    pub async fn fetch_by_name(&mut self, mode: &str, size: Option<usize>) -> DbResult<Fetched> {
        let mode: FetchMode = mode.parse()?;
        self.fetch(mode, size).await
    }

    /// Execute `query` and extract results per `mode`.
    pub async fn fetch_query(
        &mut self,
        query: &Query,
        mode: FetchMode,
        size: Option<usize>,
    ) -> DbResult<Fetched> {
        if !self.execute_query(query).await? {
            return Ok(Fetched::Failed);
        }
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| DbError::internal("cursor missing after execution"))?;

        Ok(match mode {
            FetchMode::All => Fetched::Rows(cursor.fetch_all()),
            FetchMode::One => Fetched::Row(cursor.fetch_one()),
            FetchMode::Many => Fetched::Rows(cursor.fetch_many(size.unwrap_or(1))),
            FetchMode::Count => Fetched::Count(cursor.row_count()),
            FetchMode::LastInsertId => Fetched::LastInsertId(cursor.last_insert_id()),
        })
    }

    /// Every row, or `None` if execution failed.
    pub async fn fetch_all(&mut self) -> DbResult<Option<Vec<Row>>> {
        Ok(self.fetch(FetchMode::All, None).await?.into_rows())
    }

    pub async fn fetch_one(&mut self) -> DbResult<Option<Row>> {
        Ok(self.fetch(FetchMode::One, None).await?.into_row())
    }

    pub async fn fetch_many(&mut self, size: usize) -> DbResult<Option<Vec<Row>>> {
        Ok(self.fetch(FetchMode::Many, Some(size)).await?.into_rows())
    }

    pub async fn fetch_count(&mut self) -> DbResult<Option<u64>> {
        Ok(self.fetch(FetchMode::Count, None).await?.count())
    }

    pub async fn fetch_last_insert_id(&mut self) -> DbResult<Option<i64>> {
        Ok(self.fetch(FetchMode::LastInsertId, None).await?.last_insert_id())
    }

    /// Call a stored procedure with positional arguments.
    ///
    /// SQLite has no stored procedures; the call fails like a rejected
    /// statement.
    pub async fn call_procedure<I, P>(&mut self, name: &str, params: I) -> DbResult<bool>
    where
        I: IntoIterator<Item = P>,
        P: Into<QueryParam>,
    {
        validate_identifier(name, "procedure")?;
        let params: Vec<QueryParam> = params.into_iter().map(Into::into).collect();
        let (dsn, engine) = self.open_cursor_for("CALL").await?;

        match engine.call_statement(name, params.len()) {
            Some(sql) => Ok(self.run_compiled(&dsn, CompiledQuery { sql, params }).await),
            None => {
                let error = DbError::database(
                    format!("{} does not support stored procedures", engine.display_name()),
                    None,
                    "Run the routine's statements directly",
                );
                warn!(dsn = %dsn, procedure = name, error = %error, "Procedure call failed");
                self.capture(error);
                Ok(false)
            }
        }
    }

    // -------------------------------------------------------------------------
    // CRUD
    // -------------------------------------------------------------------------

    /// Insert one row and return the engine-assigned id, if any.
    ///
    /// `data` maps column names to values. `Ok(None)` covers both a rejected
    /// statement and a row without an engine-assigned id; [`state`](Self::state)
    /// is [`ExecutionState::Failed`] only in the first case.
    pub async fn insert<I, C>(&mut self, table: &str, data: I) -> DbResult<Option<i64>>
    where
        I: IntoIterator<Item = C>,
        C: Into<Condition>,
    {
        validate_identifier(table, "table")?;
        let data = collect_conditions(data);
        if data.is_empty() {
            return Err(DbError::empty_data("insert", table));
        }

        let binder = Binder::new(self.active_engine().await?);
        let set = BindingSet::build(&binder, data)?;
        let sql = binder.engine().insert_statement(table, &set.columns());
        let query = Query::with_bindings(sql, set.values());

        Ok(self
            .fetch_query(&query, FetchMode::LastInsertId, None)
            .await?
            .last_insert_id())
    }

    /// Update rows matching `conditions` and return the affected row count.
    ///
    /// Empty `conditions` updates every row in the table.
    pub async fn update<D, DC, W, WC>(
        &mut self,
        table: &str,
        data: D,
        conditions: W,
    ) -> DbResult<Option<u64>>
    where
        D: IntoIterator<Item = DC>,
        DC: Into<Condition>,
        W: IntoIterator<Item = WC>,
        WC: Into<Condition>,
    {
        validate_identifier(table, "table")?;
        let data = collect_conditions(data);
        if data.is_empty() {
            return Err(DbError::empty_data("update", table));
        }

        let binder = Binder::new(self.active_engine().await?);
        let set = BindingSet::build_prefixed(&binder, SET_PREFIX, data)?;
        let filter = BindingSet::build_prefixed(&binder, WHERE_PREFIX, conditions)?;

        let mut sql = format!("UPDATE {} SET {}", table, set.set_clause());
        if filter.is_empty() {
            warn!(table = table, "UPDATE without conditions affects every row");
        } else {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.where_clause());
        }

        let bindings = merge_bindings(set.values(), filter.values())?;
        let query = Query::with_bindings(sql, bindings);

        Ok(self.fetch_query(&query, FetchMode::Count, None).await?.count())
    }

    /// Delete rows matching `conditions` and return the affected row count.
    ///
    /// Empty `conditions` is rejected before anything runs.
    pub async fn delete<I, C>(
        &mut self,
        table: &str,
        conditions: I,
        limit: Option<u64>,
    ) -> DbResult<Option<u64>>
    where
        I: IntoIterator<Item = C>,
        C: Into<Condition>,
    {
        validate_identifier(table, "table")?;
        let conditions = collect_conditions(conditions);
        if conditions.is_empty() {
            return Err(DbError::empty_conditions("delete", table));
        }

        let binder = Binder::new(self.active_engine().await?);
        let filter = BindingSet::build(&binder, conditions)?;
        let sql = binder
            .engine()
            .delete_statement(table, &filter.where_clause(), limit);
        let query = Query::with_bindings(sql, filter.values());

        Ok(self.fetch_query(&query, FetchMode::Count, None).await?.count())
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    pub async fn begin_transaction(&self) -> DbResult<()> {
        let name = self.require_active().await?;
        self.registry.begin(&name).await
    }

    pub async fn commit(&self) -> DbResult<()> {
        let name = self.require_active().await?;
        self.registry.commit(&name).await
    }

    pub async fn rollback(&self) -> DbResult<()> {
        let name = self.require_active().await?;
        self.registry.rollback(&name).await
    }

    async fn require_active(&self) -> DbResult<String> {
        self.registry.active_name().await.ok_or_else(|| {
            DbError::connection(
                "No active connection",
                "Connect to a registered DSN or call set_active first",
            )
        })
    }

    async fn active_engine(&self) -> DbResult<Engine> {
        let name = self.require_active().await?;
        self.registry.engine_of(&name).await
    }
}

fn collect_conditions<I, C>(items: I) -> Vec<Condition>
where
    I: IntoIterator<Item = C>,
    C: Into<Condition>,
{
    items.into_iter().map(Into::into).collect()
}

/// Join two binding maps, refusing to let one overwrite the other.
fn merge_bindings(mut into: Bindings, from: Bindings) -> DbResult<Bindings> {
    for (key, value) in from {
        if into.contains_key(&key) {
            return Err(DbError::invalid_binding(format!(
                "binding key '{}' is used twice in one statement",
                key
            )));
        }
        into.insert(key, value);
    }
    Ok(into)
}

/// Table and procedure names are spliced into SQL, so only plain
/// (optionally schema-qualified) identifiers are accepted.
fn validate_identifier(name: &str, kind: &str) -> DbResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$');
    if valid {
        Ok(())
    } else {
        Err(DbError::invalid_field(format!(
            "invalid {} name '{}'",
            kind, name
        )))
    }
}

/// `INSERT` or `REPLACE` statement.
fn is_insert(sql: &str) -> bool {
    let head = sql.trim_start();
    ["insert", "replace"].iter().any(|kw| {
        head.get(..kw.len())
            .is_some_and(|word| word.eq_ignore_ascii_case(kw))
    })
}

// =============================================================================
// Engine dispatch
// =============================================================================

impl DbConnection {
    /// Run a compiled statement, buffering every row it produces.
    pub(crate) async fn run(
        &mut self,
        query: &CompiledQuery,
        mode: CursorMode,
        in_transaction: bool,
    ) -> DbResult<Outcome> {
        impl_db_dispatch!(self, {
            MySql(c) => mysql::run(c, query, mode).await,
            Postgres(c) => postgres::run(c, query, mode, in_transaction).await,
            SQLite(c) => sqlite::run(c, query, mode).await,
        })
    }
}

/// Collect a `fetch_many` stream: statement results feed `on_result`,
/// rows are decoded per `mode`.
async fn drain<S, Q, R>(
    mut stream: S,
    mode: CursorMode,
    mut on_result: impl FnMut(Q, &mut Outcome),
) -> DbResult<Outcome>
where
    S: Stream<Item = Result<Either<Q, R>, sqlx::Error>> + Unpin,
    R: RowToJson,
{
    let mut outcome = Outcome::default();
    while let Some(step) = stream.try_next().await? {
        match step {
            Either::Left(result) => on_result(result, &mut outcome),
            Either::Right(row) => outcome.rows.push(mode.decode(&row)),
        }
    }
    Ok(outcome)
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Statements without parameters go through the raw (unprepared) protocol so
// that multi-statement scripts and DDL such as CREATE PROCEDURE work.

mod mysql {
    use super::*;
    use crate::db::params::prepare;
    use sqlx::mysql::MySqlQueryResult;
    use sqlx::{Executor, MySqlConnection};

    pub async fn run(
        conn: &mut MySqlConnection,
        query: &CompiledQuery,
        mode: CursorMode,
    ) -> DbResult<Outcome> {
        let on_result = |result: MySqlQueryResult, outcome: &mut Outcome| {
            outcome.rows_affected += result.rows_affected();
            if result.last_insert_id() > 0 {
                outcome.last_insert_id = i64::try_from(result.last_insert_id()).ok();
            }
        };

        if query.params.is_empty() {
            drain(conn.fetch_many(query.sql.as_str()), mode, on_result).await
        } else {
            let q = prepare::<sqlx::MySql>(&query.sql, &query.params);
            drain(conn.fetch_many(q), mode, on_result).await
        }
    }
}

mod postgres {
    use super::*;
    use crate::db::params::prepare;
    use sqlx::postgres::PgQueryResult;
    use sqlx::{Executor, PgConnection};

    const LASTVAL_SAVEPOINT: &str = "sorcerer_lastval";

    pub async fn run(
        conn: &mut PgConnection,
        query: &CompiledQuery,
        mode: CursorMode,
        in_transaction: bool,
    ) -> DbResult<Outcome> {
        let on_result = |result: PgQueryResult, outcome: &mut Outcome| {
            outcome.rows_affected += result.rows_affected();
        };

        let mut outcome = if query.params.is_empty() {
            drain((&mut *conn).fetch_many(query.sql.as_str()), mode, on_result).await?
        } else {
            let q = prepare::<sqlx::Postgres>(&query.sql, &query.params);
            drain((&mut *conn).fetch_many(q), mode, on_result).await?
        };

        if is_insert(&query.sql) && outcome.rows_affected > 0 {
            outcome.last_insert_id = lastval(conn, in_transaction).await;
        }
        Ok(outcome)
    }

    /// Current session's most recent sequence value.
    ///
    /// Fails when the insert touched no sequence. Inside a transaction the
    /// lookup runs under a savepoint so that failure does not abort it.
    async fn lastval(conn: &mut PgConnection, in_transaction: bool) -> Option<i64> {
        if in_transaction
            && (&mut *conn)
                .execute(format!("SAVEPOINT {}", LASTVAL_SAVEPOINT).as_str())
                .await
                .is_err()
        {
            return None;
        }

        let value = sqlx::query_scalar::<_, i64>("SELECT lastval()")
            .fetch_one(&mut *conn)
            .await;

        if in_transaction {
            let cleanup = if value.is_ok() {
                format!("RELEASE SAVEPOINT {}", LASTVAL_SAVEPOINT)
            } else {
                format!(
                    "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}",
                    LASTVAL_SAVEPOINT
                )
            };
            if let Err(e) = (&mut *conn).execute(cleanup.as_str()).await {
                warn!(error = %e, "Failed to release lastval savepoint");
            }
        }

        match value {
            Ok(id) => Some(id),
            Err(e) => {
                debug!(error = %e, "No sequence value for insert");
                None
            }
        }
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::prepare;
    use sqlx::sqlite::SqliteQueryResult;
    use sqlx::{Executor, SqliteConnection};

    pub async fn run(
        conn: &mut SqliteConnection,
        query: &CompiledQuery,
        mode: CursorMode,
    ) -> DbResult<Outcome> {
        let inserting = is_insert(&query.sql);
        let on_result = move |result: SqliteQueryResult, outcome: &mut Outcome| {
            outcome.rows_affected += result.rows_affected();
            if inserting && result.rows_affected() > 0 {
                outcome.last_insert_id = Some(result.last_insert_rowid());
            }
        };

        if query.params.is_empty() {
            drain(conn.fetch_many(query.sql.as_str()), mode, on_result).await
        } else {
            let q = prepare::<sqlx::Sqlite>(&query.sql, &query.params);
            drain(conn.fetch_many(q), mode, on_result).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DsnConfig;
    use crate::query::op;
    use serde_json::json;

    async fn executor() -> QueryExecutor {
        let registry = ConnectionRegistry::new();
        registry
            .register(DsnConfig::sqlite_memory("default"))
            .await
            .unwrap();
        registry.connect("default").await.unwrap();

        let mut executor = QueryExecutor::new(registry);
        executor.set_query(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, age INTEGER)",
        );
        assert!(executor.execute().await.unwrap());
        executor
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("users", "table").is_ok());
        assert!(validate_identifier("app.users", "table").is_ok());
        assert!(validate_identifier("", "table").is_err());
        assert!(validate_identifier("users; DROP TABLE x", "table").is_err());
        assert!(validate_identifier("users.", "table").is_err());
    }

    #[test]
    fn test_is_insert() {
        assert!(is_insert("  INSERT INTO t VALUES (1)"));
        assert!(is_insert("replace into t values (1)"));
        assert!(!is_insert("UPDATE t SET a = 1"));
        assert!(!is_insert("ins"));
    }

    #[tokio::test]
    async fn test_execute_without_active_connection() {
        let mut executor = QueryExecutor::new(ConnectionRegistry::new());
        executor.set_query("SELECT 1");
        let err = executor.execute().await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
        assert_eq!(executor.state(), ExecutionState::Idle);
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let mut executor = executor().await;
        let id = executor
            .insert("users", [("name", json!("Eric")), ("age", json!(30))])
            .await
            .unwrap();
        assert_eq!(id, Some(1));

        executor
            .set_query("SELECT * FROM users WHERE name = @name")
            .set_binding("name", "Eric")
            .unwrap();
        let row = executor.fetch_one().await.unwrap().unwrap();
        assert_eq!(row["name"], json!("Eric"));
        assert_eq!(row["age"], json!(30));
        assert_eq!(executor.state(), ExecutionState::Executed);
    }

    #[tokio::test]
    async fn test_driver_error_is_captured() {
        let mut executor = executor().await;
        executor.set_query("SELECT * FROM missing_table");

        assert!(!executor.execute().await.unwrap());
        assert_eq!(executor.state(), ExecutionState::Failed);
        assert!(matches!(
            executor.last_error(),
            Some(DbError::Database { .. })
        ));

        let fetched = executor.fetch(FetchMode::All, None).await.unwrap();
        assert!(fetched.is_failed());

        executor.set_query("SELECT 1 AS one");
        assert!(executor.execute().await.unwrap());
        assert!(executor.last_error().is_none());
    }

    #[tokio::test]
    async fn test_insert_failure_is_told_apart_by_state() {
        let mut executor = executor().await;
        executor.set_query("CREATE TABLE tags (label TEXT NOT NULL)");
        assert!(executor.execute().await.unwrap());

        let id = executor.insert("tags", [("label", None::<String>)]).await.unwrap();
        assert_eq!(id, None);
        assert_eq!(executor.state(), ExecutionState::Failed);
        assert!(executor.last_error().is_some());

        let id = executor.insert("tags", [("label", "red")]).await.unwrap();
        assert_eq!(id, Some(1));
        assert_eq!(executor.state(), ExecutionState::Executed);
    }

    #[tokio::test]
    async fn test_missing_binding_is_an_error() {
        let mut executor = executor().await;
        executor.set_query("SELECT * FROM users WHERE id = @id");
        let err = executor.execute().await.unwrap_err();
        assert!(matches!(err, DbError::InvalidBinding { .. }));
    }

    #[tokio::test]
    async fn test_fetch_modes() {
        let mut executor = executor().await;
        for name in ["a", "b", "c"] {
            executor.insert("users", [("name", name)]).await.unwrap();
        }

        executor.set_query("SELECT name FROM users ORDER BY id");
        assert_eq!(executor.fetch_count().await.unwrap(), Some(3));
        assert_eq!(executor.fetch_all().await.unwrap().unwrap().len(), 3);
        assert_eq!(executor.fetch_many(2).await.unwrap().unwrap().len(), 2);

        let one = executor.fetch(FetchMode::Many, None).await.unwrap();
        assert_eq!(one.into_rows().unwrap().len(), 1);

        let err = executor.fetch_by_name("sideways", None).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidFetchMode { .. }));
    }

    #[tokio::test]
    async fn test_positional_rows_for_non_select() {
        let mut executor = executor().await;
        executor.insert("users", [("name", "a")]).await.unwrap();

        executor.set_query("WITH t AS (SELECT id, name FROM users) SELECT * FROM t");
        let rows = executor.fetch_all().await.unwrap().unwrap();
        assert_eq!(rows[0], Row::Positional(vec![json!(1), json!("a")]));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let mut executor = executor().await;
        executor
            .insert("users", [("name", json!("Eric")), ("age", json!(30))])
            .await
            .unwrap();
        executor
            .insert("users", [("name", json!("Ann")), ("age", json!(40))])
            .await
            .unwrap();

        let updated = executor
            .update("users", [("age", 31)], [("name", "Eric")])
            .await
            .unwrap();
        assert_eq!(updated, Some(1));

        let deleted = executor
            .delete("users", [("age", op(35, ">"))], None)
            .await
            .unwrap();
        assert_eq!(deleted, Some(1));

        executor.set_query("SELECT age FROM users");
        let rows = executor.fetch_all().await.unwrap().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["age"], json!(31));
    }

    #[tokio::test]
    async fn test_update_same_column_in_data_and_conditions() {
        let mut executor = executor().await;
        executor.insert("users", [("name", "old")]).await.unwrap();

        let updated = executor
            .update("users", [("name", "new")], [("name", "old")])
            .await
            .unwrap();
        assert_eq!(updated, Some(1));
    }

    #[tokio::test]
    async fn test_update_column_named_like_condition_key() {
        let mut executor = executor().await;
        executor.set_query("CREATE TABLE t (id INTEGER, where_id INTEGER)");
        assert!(executor.execute().await.unwrap());
        executor
            .insert("t", [("id", 1), ("where_id", 1)])
            .await
            .unwrap();

        let updated = executor
            .update("t", [("where_id", 5)], [("id", 1)])
            .await
            .unwrap();
        assert_eq!(updated, Some(1));

        executor.set_query("SELECT id, where_id FROM t");
        let row = executor.fetch_one().await.unwrap().unwrap();
        assert_eq!(row["id"], json!(1));
        assert_eq!(row["where_id"], json!(5));
    }

    #[test]
    fn test_merge_bindings_rejects_shared_key() {
        let mut left = Bindings::new();
        left.insert("k".to_string(), BoundValue::from(1));
        let mut right = Bindings::new();
        right.insert("k".to_string(), BoundValue::from(2));

        assert!(matches!(
            merge_bindings(left.clone(), right),
            Err(DbError::InvalidBinding { .. })
        ));
        assert_eq!(merge_bindings(left, Bindings::new()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_crud_rejects_empty_input() {
        let mut executor = executor().await;
        let empty: [(&str, i64); 0] = [];

        assert!(matches!(
            executor.insert("users", empty).await,
            Err(DbError::EmptyData { .. })
        ));
        assert!(matches!(
            executor.update("users", empty, [("id", 1)]).await,
            Err(DbError::EmptyData { .. })
        ));
        assert!(matches!(
            executor.delete("users", empty, None).await,
            Err(DbError::EmptyConditions { .. })
        ));
        assert!(matches!(
            executor.insert("bad name", [("name", "x")]).await,
            Err(DbError::InvalidField { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_with_limit() {
        let mut executor = executor().await;
        for _ in 0..3 {
            executor.insert("users", [("name", "dup")]).await.unwrap();
        }
        let deleted = executor
            .delete("users", [("name", "dup")], Some(2))
            .await
            .unwrap();
        assert_eq!(deleted, Some(2));
    }

    #[tokio::test]
    async fn test_stored_queries() {
        let mut executor = executor().await;
        executor.insert("users", [("name", "Eric")]).await.unwrap();

        let mut bindings = Bindings::new();
        bindings.insert("name".to_string(), BoundValue::from("Eric"));
        executor.store_query(
            "by_name",
            Query::with_bindings("SELECT id FROM users WHERE name = @name", bindings),
        );

        executor.use_stored_query("by_name").unwrap();
        assert_eq!(executor.query(), "SELECT id FROM users WHERE name = @name");
        assert_eq!(executor.fetch_count().await.unwrap(), Some(1));

        assert!(matches!(
            executor.use_stored_query("nope"),
            Err(DbError::QueryNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_call_procedure_unsupported_on_sqlite() {
        let mut executor = executor().await;
        let ok = executor
            .call_procedure("do_things", [QueryParam::Int(1)])
            .await
            .unwrap();
        assert!(!ok);
        assert_eq!(executor.state(), ExecutionState::Failed);
        assert!(executor.last_error().is_some());

        assert!(matches!(
            executor.call_procedure("x; DROP", Vec::<QueryParam>::new()).await,
            Err(DbError::InvalidField { .. })
        ));
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let mut executor = executor().await;
        executor.begin_transaction().await.unwrap();
        executor.insert("users", [("name", "temp")]).await.unwrap();
        executor.rollback().await.unwrap();

        executor.set_query("SELECT * FROM users");
        assert_eq!(executor.fetch_count().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_disconnect_closes_cursor() {
        let mut executor = executor().await;
        executor.set_query("SELECT 1");
        executor.open_cursor().await.unwrap();
        assert_eq!(executor.state(), ExecutionState::CursorOpen);

        executor.disconnect("default").await.unwrap();
        assert!(executor.cursor().is_none());
        assert_eq!(executor.state(), ExecutionState::Idle);

        executor.close_cursor();
        assert!(executor.active_name().await.is_none());
    }
}
