//! Named-placeholder compilation.
//!
//! Queries are written with the engine's named placeholders (`%(k)s`, `@k`,
//! `$k`), but the sqlx drivers only understand positional parameters. This
//! module rewrites a named query into the driver's positional form and
//! collects the parameters in the order they appear.
//!
//! String literals, quoted identifiers and comments are copied verbatim.

use crate::error::{DbError, DbResult};
use crate::models::{Bindings, BoundValue, Engine, QueryParam};

/// A query ready for the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl CompiledQuery {
    /// A query with no parameters, sent to the driver as-is.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Rewrite `sql` for `engine`, pulling parameter values from `bindings`.
///
/// List values expand to `(?, ?, ...)`, or to `? AND ?` right after
/// `BETWEEN`. An empty list expands to `(NULL)`. Bindings that no
/// placeholder references are ignored.
pub fn compile(engine: Engine, sql: &str, bindings: &Bindings) -> DbResult<CompiledQuery> {
    let mut compiler = Compiler {
        engine,
        bindings,
        out: String::with_capacity(sql.len()),
        params: Vec::new(),
    };
    compiler.run(sql)?;
    Ok(CompiledQuery {
        sql: compiler.out,
        params: compiler.params,
    })
}

struct Compiler<'a> {
    engine: Engine,
    bindings: &'a Bindings,
    out: String,
    params: Vec<QueryParam>,
}

impl Compiler<'_> {
    fn run(&mut self, sql: &str) -> DbResult<()> {
        let bytes = sql.as_bytes();
        let mut last = 0;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'\'' | b'"' | b'`' => {
                    i = skip_quoted(bytes, i, self.engine == Engine::MySql);
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => {
                    i = skip_line_comment(bytes, i);
                }
                b'#' if self.engine == Engine::MySql => {
                    i = skip_line_comment(bytes, i);
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i = skip_block_comment(bytes, i);
                }
                _ => match self.placeholder_at(sql, i) {
                    Some(Token::Named { name, end }) => {
                        self.out.push_str(&sql[last..i]);
                        self.substitute(name)?;
                        last = end;
                        i = end;
                    }
                    Some(Token::Verbatim { end }) => i = end,
                    None => i += 1,
                },
            }
        }

        self.out.push_str(&sql[last..]);
        Ok(())
    }

    fn placeholder_at<'s>(&self, sql: &'s str, i: usize) -> Option<Token<'s>> {
        let bytes = sql.as_bytes();
        match (self.engine, bytes[i]) {
            (Engine::MySql, b'%') if bytes.get(i + 1) == Some(&b'(') => {
                let close = sql[i + 2..].find(")s")? + i + 2;
                let name = &sql[i + 2..close];
                is_identifier(name).then_some(Token::Named {
                    name,
                    end: close + 2,
                })
            }
            (Engine::Sqlite, b'@') => {
                let end = identifier_end(bytes, i + 1)?;
                Some(Token::Named {
                    name: &sql[i + 1..end],
                    end,
                })
            }
            (Engine::Postgres, b'$') => {
                let end = identifier_end(bytes, i + 1)?;
                if bytes.get(end) == Some(&b'$') {
                    // $tag$ ... $tag$ dollar-quoted body
                    let tag = &sql[i..=end];
                    let close = sql[end + 1..]
                        .find(tag)
                        .map(|pos| end + 1 + pos + tag.len())
                        .unwrap_or(bytes.len());
                    return Some(Token::Verbatim { end: close });
                }
                Some(Token::Named {
                    name: &sql[i + 1..end],
                    end,
                })
            }
            _ => None,
        }
    }

    fn substitute(&mut self, name: &str) -> DbResult<()> {
        let bindings = self.bindings;
        let value = bindings.get(name).ok_or_else(|| {
            DbError::invalid_binding(format!("No value bound for placeholder '{}'", name))
        })?;

        match value {
            BoundValue::Scalar(param) => {
                let token = self.next_positional(param.clone());
                self.out.push_str(&token);
            }
            BoundValue::List(items) if items.is_empty() => {
                self.out.push_str("(NULL)");
            }
            BoundValue::List(items) => {
                let between = follows_between(&self.out);
                let tokens: Vec<String> = items
                    .iter()
                    .map(|item| self.next_positional(item.clone()))
                    .collect();
                if between {
                    self.out.push_str(&tokens.join(" AND "));
                } else {
                    self.out.push('(');
                    self.out.push_str(&tokens.join(", "));
                    self.out.push(')');
                }
            }
        }
        Ok(())
    }

    fn next_positional(&mut self, param: QueryParam) -> String {
        self.params.push(param);
        self.engine.positional(self.params.len())
    }
}

enum Token<'s> {
    Named { name: &'s str, end: usize },
    Verbatim { end: usize },
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// End of an identifier starting at `start`, or `None` if none starts there.
fn identifier_end(bytes: &[u8], start: usize) -> Option<usize> {
    let first = *bytes.get(start)?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let len = bytes[start..]
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
        .count();
    Some(start + len)
}

fn skip_quoted(bytes: &[u8], start: usize, backslash_escapes: bool) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
            continue;
        }
        if b == quote {
            // doubled quote is an escaped quote
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|b| *b == b'\n')
        .map(|pos| start + pos + 1)
        .unwrap_or(bytes.len())
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start + 2..]
        .windows(2)
        .position(|w| w == b"*/")
        .map(|pos| start + 2 + pos + 2)
        .unwrap_or(bytes.len())
}

fn follows_between(out: &str) -> bool {
    let trimmed = out.trim_end();
    let len = trimmed.len();
    if len < 7 || !trimmed.is_char_boundary(len - 7) {
        return false;
    }
    let (head, tail) = trimmed.split_at(len - 7);
    tail.eq_ignore_ascii_case("between")
        && !head
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, BoundValue)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_mysql_named_to_positional() {
        let b = bindings(&[("name", "Eric".into()), ("id", 3.into())]);
        let q = compile(
            Engine::MySql,
            "SELECT * FROM users WHERE name = %(name)s AND id = %(id)s",
            &b,
        )
        .unwrap();

        assert_eq!(q.sql, "SELECT * FROM users WHERE name = ? AND id = ?");
        assert_eq!(
            q.params,
            vec![QueryParam::from("Eric"), QueryParam::Int(3)]
        );
    }

    #[test]
    fn test_digit_leading_column_is_substituted() {
        let bound = crate::query::Binder::new(Engine::MySql)
            .format("2fa", 1, "=")
            .unwrap();
        let b = bindings(&[(bound.key.as_str(), bound.value.clone())]);
        let q = compile(
            Engine::MySql,
            &format!("UPDATE u SET {}", bound.fragment),
            &b,
        )
        .unwrap();

        assert_eq!(q.sql, "UPDATE u SET 2fa = ?");
        assert_eq!(q.params, vec![QueryParam::Int(1)]);
    }

    #[test]
    fn test_sqlite_named_to_positional() {
        let b = bindings(&[("name", "Eric".into())]);
        let q = compile(Engine::Sqlite, "SELECT * FROM users WHERE name = @name", &b).unwrap();
        assert_eq!(q.sql, "SELECT * FROM users WHERE name = ?");
        assert_eq!(q.params.len(), 1);
    }

    #[test]
    fn test_postgres_numbers_in_order() {
        let b = bindings(&[("a", 1.into()), ("b", 2.into())]);
        let q = compile(Engine::Postgres, "SELECT $b, $a, $b", &b).unwrap();
        assert_eq!(q.sql, "SELECT $1, $2, $3");
        assert_eq!(
            q.params,
            vec![QueryParam::Int(2), QueryParam::Int(1), QueryParam::Int(2)]
        );
    }

    #[test]
    fn test_postgres_leaves_positional_and_casts() {
        let b = Bindings::new();
        let q = compile(Engine::Postgres, "SELECT $1::int, 'x'::text", &b).unwrap();
        assert_eq!(q.sql, "SELECT $1::int, 'x'::text");
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_postgres_dollar_quoted_body_untouched() {
        let b = Bindings::new();
        let sql = "CREATE FUNCTION f() RETURNS int AS $body$ SELECT $x $body$ LANGUAGE sql";
        let q = compile(Engine::Postgres, sql, &b).unwrap();
        assert_eq!(q.sql, sql);
    }

    #[test]
    fn test_list_expansion() {
        let b = bindings(&[("ids", BoundValue::list([1, 2, 3]))]);
        let q = compile(Engine::Sqlite, "SELECT * FROM t WHERE id IN @ids", &b).unwrap();
        assert_eq!(q.sql, "SELECT * FROM t WHERE id IN (?, ?, ?)");
        assert_eq!(q.params.len(), 3);

        let q = compile(Engine::Postgres, "SELECT * FROM t WHERE id NOT IN $ids", &b).unwrap();
        assert_eq!(q.sql, "SELECT * FROM t WHERE id NOT IN ($1, $2, $3)");
    }

    #[test]
    fn test_between_expansion() {
        let b = bindings(&[("age", BoundValue::list([18, 65]))]);
        let q = compile(Engine::MySql, "SELECT 1 WHERE age BETWEEN %(age)s", &b).unwrap();
        assert_eq!(q.sql, "SELECT 1 WHERE age BETWEEN ? AND ?");
    }

    #[test]
    fn test_empty_list_is_null_group() {
        let b = bindings(&[("ids", BoundValue::List(vec![]))]);
        let q = compile(Engine::Sqlite, "SELECT 1 WHERE id IN @ids", &b).unwrap();
        assert_eq!(q.sql, "SELECT 1 WHERE id IN (NULL)");
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_literals_and_comments_skipped() {
        let b = bindings(&[("x", 1.into())]);
        let q = compile(
            Engine::Sqlite,
            "SELECT '@x', \"@x\" -- @x\n, @x /* @x */",
            &b,
        )
        .unwrap();
        assert_eq!(q.sql, "SELECT '@x', \"@x\" -- @x\n, ? /* @x */");
        assert_eq!(q.params.len(), 1);
    }

    #[test]
    fn test_mysql_escaped_quote_and_modulo() {
        let b = bindings(&[("n", 2.into())]);
        let q = compile(
            Engine::MySql,
            "SELECT 'it\\'s %(n)s', 10 % 3, %(n)s",
            &b,
        )
        .unwrap();
        assert_eq!(q.sql, "SELECT 'it\\'s %(n)s', 10 % 3, ?");
    }

    #[test]
    fn test_missing_binding_is_error() {
        let q = compile(Engine::Sqlite, "SELECT @missing", &Bindings::new());
        assert!(matches!(q, Err(DbError::InvalidBinding { .. })));
    }

    #[test]
    fn test_unused_bindings_ignored() {
        let b = bindings(&[("unused", 1.into())]);
        let q = compile(Engine::MySql, "SELECT 1", &b).unwrap();
        assert_eq!(q, CompiledQuery::raw("SELECT 1"));
    }

    #[test]
    fn test_email_like_text_not_a_placeholder() {
        let b = Bindings::new();
        let q = compile(Engine::Sqlite, "SELECT 1 @ 2", &b).unwrap();
        assert_eq!(q.sql, "SELECT 1 @ 2");
    }
}
