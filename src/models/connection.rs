//! Engine capability set.
//!
//! Every engine-specific decision (placeholder syntax, statement shapes,
//! default ports) is answered by [`Engine`], so callers never branch on the
//! engine themselves.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Engine {
    /// Includes MariaDB
    MySql,
    Sqlite,
    Postgres,
}

impl Engine {
    /// Canonical identifier used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgresql",
        }
    }

    /// Get the display name for this engine.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::Sqlite => "SQLite",
            Self::Postgres => "PostgreSQL",
        }
    }

    /// Get the default port for this engine.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::MySql => Some(3306),
            Self::Postgres => Some(5432),
            Self::Sqlite => None,
        }
    }

    /// Named-parameter token for `key`, exactly as the engine's placeholder
    /// syntax spells it.
    pub fn placeholder(&self, key: &str) -> String {
        match self {
            Self::MySql => format!("%({})s", key),
            Self::Sqlite => format!("@{}", key),
            Self::Postgres => format!("${}", key),
        }
    }

    /// Positional parameter token understood by the driver (1-based index).
    pub fn positional(&self, index: usize) -> String {
        match self {
            Self::MySql | Self::Sqlite => "?".to_string(),
            Self::Postgres => format!("${}", index),
        }
    }

    pub fn begin_statement(&self) -> &'static str {
        match self {
            Self::MySql => "START TRANSACTION",
            Self::Sqlite | Self::Postgres => "BEGIN",
        }
    }

    /// Build an INSERT for `(column, placeholder)` pairs.
    ///
    /// MySQL gets the `INSERT ... SET` form; SQLite and PostgreSQL have no such
    /// syntax and get a column list instead.
    pub fn insert_statement(&self, table: &str, columns: &[(String, String)]) -> String {
        match self {
            Self::MySql => {
                let assignments: Vec<String> = columns
                    .iter()
                    .map(|(column, placeholder)| format!("{} = {}", column, placeholder))
                    .collect();
                format!("INSERT INTO {} SET {}", table, assignments.join(", "))
            }
            Self::Sqlite | Self::Postgres => {
                let names: Vec<&str> = columns.iter().map(|(c, _)| c.as_str()).collect();
                let placeholders: Vec<&str> = columns.iter().map(|(_, p)| p.as_str()).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    names.join(", "),
                    placeholders.join(", ")
                )
            }
        }
    }

    /// Build a DELETE with an optional row limit.
    pub fn delete_statement(&self, table: &str, where_clause: &str, limit: Option<u64>) -> String {
        match (self, limit) {
            (_, None) => format!("DELETE FROM {} WHERE {}", table, where_clause),
            (Self::MySql, Some(n)) => {
                format!("DELETE FROM {} WHERE {} LIMIT {}", table, where_clause, n)
            }
            (Self::Sqlite, Some(n)) => format!(
                "DELETE FROM {t} WHERE rowid IN (SELECT rowid FROM {t} WHERE {w} LIMIT {n})",
                t = table,
                w = where_clause,
                n = n
            ),
            (Self::Postgres, Some(n)) => format!(
                "DELETE FROM {t} WHERE ctid IN (SELECT ctid FROM {t} WHERE {w} LIMIT {n})",
                t = table,
                w = where_clause,
                n = n
            ),
        }
    }

    /// Build a stored routine invocation with `arity` positional arguments.
    ///
    /// Returns `None` for engines without stored routines.
    pub fn call_statement(&self, name: &str, arity: usize) -> Option<String> {
        match self {
            Self::Sqlite => None,
            Self::MySql | Self::Postgres => {
                let args: Vec<String> = (1..=arity).map(|i| self.positional(i)).collect();
                Some(format!("CALL {}({})", name, args.join(", ")))
            }
        }
    }
}

impl FromStr for Engine {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgresql" | "postgres" => Ok(Self::Postgres),
            _ => Err(DbError::unsupported_engine(s)),
        }
    }
}

impl TryFrom<String> for Engine {
    type Error = DbError;

    fn try_from(value: String) -> DbResult<Self> {
        value.parse()
    }
}

impl From<Engine> for String {
    fn from(engine: Engine) -> Self {
        engine.as_str().to_string()
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_from_str() {
        assert_eq!("mysql".parse::<Engine>().unwrap(), Engine::MySql);
        assert_eq!(" SQLite ".parse::<Engine>().unwrap(), Engine::Sqlite);
        assert_eq!("postgresql".parse::<Engine>().unwrap(), Engine::Postgres);
        assert_eq!("postgres".parse::<Engine>().unwrap(), Engine::Postgres);
        assert!(matches!(
            "oracle".parse::<Engine>(),
            Err(DbError::UnsupportedEngine { .. })
        ));
    }

    #[test]
    fn test_placeholder_syntax() {
        assert_eq!(Engine::MySql.placeholder("name"), "%(name)s");
        assert_eq!(Engine::Sqlite.placeholder("name"), "@name");
        assert_eq!(Engine::Postgres.placeholder("name"), "$name");
    }

    #[test]
    fn test_insert_statement_shapes() {
        let cols = vec![
            ("name".to_string(), "%(name)s".to_string()),
            ("age".to_string(), "%(age)s".to_string()),
        ];
        assert_eq!(
            Engine::MySql.insert_statement("users", &cols),
            "INSERT INTO users SET name = %(name)s, age = %(age)s"
        );

        let cols = vec![
            ("name".to_string(), "@name".to_string()),
            ("age".to_string(), "@age".to_string()),
        ];
        assert_eq!(
            Engine::Sqlite.insert_statement("users", &cols),
            "INSERT INTO users (name, age) VALUES (@name, @age)"
        );
    }

    #[test]
    fn test_delete_statement_limit() {
        assert_eq!(
            Engine::MySql.delete_statement("users", "id = %(id)s", Some(1)),
            "DELETE FROM users WHERE id = %(id)s LIMIT 1"
        );
        assert_eq!(
            Engine::Sqlite.delete_statement("users", "id = @id", None),
            "DELETE FROM users WHERE id = @id"
        );
        assert!(
            Engine::Sqlite
                .delete_statement("users", "id = @id", Some(2))
                .contains("rowid IN (SELECT rowid FROM users WHERE id = @id LIMIT 2)")
        );
    }

    #[test]
    fn test_call_statement() {
        assert_eq!(
            Engine::MySql.call_statement("refresh", 2).as_deref(),
            Some("CALL refresh(?, ?)")
        );
        assert_eq!(
            Engine::Postgres.call_statement("refresh", 2).as_deref(),
            Some("CALL refresh($1, $2)")
        );
        assert!(Engine::Sqlite.call_statement("refresh", 0).is_none());
    }

    #[test]
    fn test_engine_serde_roundtrip_name() {
        let json = serde_json::to_string(&Engine::Postgres).unwrap();
        assert_eq!(json, "\"postgresql\"");
        let parsed: Engine = serde_json::from_str("\"mysql\"").unwrap();
        assert_eq!(parsed, Engine::MySql);
    }
}
