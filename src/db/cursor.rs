//! Buffered statement results.
//!
//! Every execution drains the driver stream to completion, so a [`Cursor`]
//! owns its rows outright and never holds a borrow on the connection.

use crate::db::types::RowToJson;
use crate::models::Row;
use std::collections::VecDeque;

/// How result rows are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// Column name to value (`SELECT` statements)
    Labeled,
    /// Values in column order (everything else)
    Positional,
}

impl CursorMode {
    /// Labeled for `SELECT`, positional otherwise.
    pub fn for_sql(sql: &str) -> Self {
        if crate::query::is_select(sql) {
            CursorMode::Labeled
        } else {
            CursorMode::Positional
        }
    }

    pub(crate) fn decode<R: RowToJson>(&self, row: &R) -> Row {
        match self {
            CursorMode::Labeled => Row::Labeled(row.to_json_map()),
            CursorMode::Positional => Row::Positional(row.to_json_values()),
        }
    }
}

/// What one execution produced.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// Results of the most recent execution on a connection.
#[derive(Debug)]
pub struct Cursor {
    connection: String,
    mode: CursorMode,
    rows: VecDeque<Row>,
    row_count: u64,
    last_insert_id: Option<i64>,
    executed: bool,
}

impl Cursor {
    pub(crate) fn open(connection: impl Into<String>, mode: CursorMode) -> Self {
        Self {
            connection: connection.into(),
            mode,
            rows: VecDeque::new(),
            row_count: 0,
            last_insert_id: None,
            executed: false,
        }
    }

    pub(crate) fn load(&mut self, outcome: Outcome) {
        self.row_count = match self.mode {
            CursorMode::Labeled => outcome.rows.len() as u64,
            CursorMode::Positional if outcome.rows_affected == 0 => outcome.rows.len() as u64,
            CursorMode::Positional => outcome.rows_affected,
        };
        self.rows = outcome.rows.into();
        self.last_insert_id = outcome.last_insert_id;
        self.executed = true;
    }

    /// Name of the connection this cursor was opened on.
    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn mode(&self) -> CursorMode {
        self.mode
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Rows returned by a `SELECT`, or rows affected by anything else.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    /// Rows not yet fetched.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    pub fn fetch_one(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    pub fn fetch_many(&mut self, size: usize) -> Vec<Row> {
        let size = size.min(self.rows.len());
        self.rows.drain(..size).collect()
    }

    pub fn fetch_all(&mut self) -> Vec<Row> {
        self.rows.drain(..).collect()
    }
}
