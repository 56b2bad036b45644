//! Static statement classification for restricted databases.
//!
//! This layer is advisory. The read-only transaction opened by
//! [`super::session`] is what the database enforces; the classifier only
//! rejects recognizable writes early, before a connection is taken, and gives
//! the caller a precise error. A statement it lets through can still be refused
//! by PostgreSQL.
//!
//! Comments, string literals, dollar-quoted bodies and quoted identifiers are
//! blanked out before keywords are inspected, so `SELECT 'drop table'` or a
//! column called `"delete"` are not mistaken for writes.

use std::fmt;

/// Longest summary echoed back in errors.
const SUMMARY_LEN: usize = 80;

/// Leading keywords of statements that only read.
const READ_LEADERS: &[&str] = &["SELECT", "VALUES", "TABLE", "SHOW", "WITH", "EXPLAIN"];

/// Keywords that make a `WITH` query data-modifying.
const CTE_WRITES: &[&str] = &["INSERT", "UPDATE", "DELETE", "MERGE"];

/// Functions that change session or lock state from inside a read.
const SESSION_FUNCTIONS: &[&str] = &["SET_CONFIG", "DBLINK_EXEC", "PG_TERMINATE_BACKEND", "PG_CANCEL_BACKEND"];

/// Function name prefixes with the same effect as [`SESSION_FUNCTIONS`].
const SESSION_FUNCTION_PREFIXES: &[&str] = &["PG_ADVISORY", "PG_TRY_ADVISORY"];

/// Leading keywords whose effect outlives the statement on a pooled connection.
const SESSION_LEADERS: &[&str] = &[
    "BEGIN", "START", "COMMIT", "END", "ROLLBACK", "ABORT", "SAVEPOINT", "RELEASE", "PREPARE",
    "SET", "RESET", "LISTEN", "DECLARE", "LOCK", "DISCARD", "DEALLOCATE",
];

/// Option words that may follow `EXPLAIN` before the explained statement.
const EXPLAIN_OPTIONS: &[&str] = &[
    "ANALYZE", "ANALYSE", "VERBOSE", "COSTS", "SETTINGS", "BUFFERS", "WAL", "TIMING",
    "SUMMARY", "MEMORY", "SERIALIZE", "GENERIC_PLAN", "FORMAT", "TEXT", "XML", "JSON", "YAML",
    "TRUE", "FALSE", "ON", "OFF", "NONE", "BINARY",
];

/// A statement the classifier refuses in restricted mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// The construct that triggered the rejection, e.g. `DELETE` or `SELECT INTO`.
    pub construct: String,
    pub statement_summary: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is not allowed on a restricted database",
            self.construct
        )
    }
}

/// Check every statement in `sql`; the first rejected one wins.
pub fn check_read_only(sql: &str) -> Result<(), Rejection> {
    let normalized = normalize(sql);
    let statements: Vec<&str> = normalized
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if statements.is_empty() {
        return Ok(());
    }

    for statement in statements {
        let tokens = tokenize(statement);
        if let Some(construct) = check_tokens(&tokens) {
            return Err(Rejection {
                construct,
                statement_summary: summarize(sql),
            });
        }
    }
    Ok(())
}

/// Whether `sql` may leave transaction or session state behind on its
/// connection: an open transaction, a changed setting, a held lock or cursor.
pub fn leaves_session_state(sql: &str) -> bool {
    normalize(sql).split(';').any(|statement| {
        let tokens = tokenize(statement);
        tokens
            .first()
            .is_some_and(|first| SESSION_LEADERS.contains(&first.as_str()))
            || session_function(&tokens).is_some()
    })
}

/// Whitespace-collapsed, truncated rendering of a statement for error payloads.
pub fn summarize(sql: &str) -> String {
    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SUMMARY_LEN {
        collapsed
    } else {
        let mut cut: String = collapsed.chars().take(SUMMARY_LEN).collect();
        cut.push_str("...");
        cut
    }
}

fn check_tokens(tokens: &[String]) -> Option<String> {
    let first = tokens.first()?;
    if !READ_LEADERS.contains(&first.as_str()) {
        return Some(first.clone());
    }
    if let Some(function) = session_function(tokens) {
        return Some(function.to_string());
    }

    match first.as_str() {
        "EXPLAIN" => {
            let mut rest = &tokens[1..];
            let mut analyze = false;
            while let Some(word) = rest.first() {
                if !EXPLAIN_OPTIONS.contains(&word.as_str()) {
                    break;
                }
                analyze |= word == "ANALYZE" || word == "ANALYSE";
                rest = &rest[1..];
            }
            if analyze {
                check_tokens(rest).map(|inner| format!("EXPLAIN ANALYZE {inner}"))
            } else {
                None
            }
        }
        "WITH" => tokens
            .iter()
            .enumerate()
            .find(|(i, t)| CTE_WRITES.contains(&t.as_str()) && !is_row_lock(tokens, *i))
            .map(|(_, t)| format!("WITH ... {t}"))
            .or_else(|| check_select_body(tokens)),
        _ => check_select_body(tokens),
    }
}

fn check_select_body(tokens: &[String]) -> Option<String> {
    if tokens.iter().any(|t| t == "INTO") {
        return Some("SELECT INTO".to_string());
    }
    for pair in tokens.windows(2) {
        if pair[0] == "FOR" && matches!(pair[1].as_str(), "UPDATE" | "SHARE" | "NO" | "KEY") {
            return Some("SELECT FOR UPDATE/SHARE".to_string());
        }
    }
    None
}

fn session_function(tokens: &[String]) -> Option<&str> {
    tokens
        .iter()
        .map(String::as_str)
        .find(|t| {
            SESSION_FUNCTIONS.contains(t) || SESSION_FUNCTION_PREFIXES.iter().any(|p| t.starts_with(p))
        })
}

/// `UPDATE` as part of `FOR UPDATE` / `FOR NO KEY UPDATE` is a row lock,
/// reported by [`check_select_body`].
fn is_row_lock(tokens: &[String], index: usize) -> bool {
    tokens[index] == "UPDATE"
        && index > 0
        && matches!(tokens[index - 1].as_str(), "FOR" | "KEY")
}

fn tokenize(statement: &str) -> Vec<String> {
    statement
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Uppercase the statement with comments and quoted text blanked out.
fn normalize(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                out.push(' ');
            }
            '/' if next == Some('*') => {
                let mut depth = 0usize;
                while i < chars.len() {
                    if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
                        depth += 1;
                        i += 2;
                    } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        depth -= 1;
                        i += 2;
                        if depth == 0 {
                            break;
                        }
                    } else {
                        i += 1;
                    }
                }
                out.push(' ');
            }
            '\'' => {
                let backslash_escapes = i > 0
                    && matches!(chars[i - 1], 'e' | 'E')
                    && (i < 2 || !is_ident_char(chars[i - 2]));
                i = skip_quoted(&chars, i, '\'', backslash_escapes);
                out.push_str(" '' ");
            }
            '"' => {
                i = skip_quoted(&chars, i, '"', false);
                out.push_str(" IDENT ");
            }
            '$' => match dollar_tag(&chars, i) {
                Some(tag) => {
                    i = skip_dollar(&chars, i + tag.len(), &tag);
                    out.push_str(" '' ");
                }
                None => {
                    out.push('$');
                    i += 1;
                }
            },
            _ => {
                out.extend(c.to_uppercase());
                i += 1;
            }
        }
    }
    out
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Index just past the closing quote (or end of input).
fn skip_quoted(chars: &[char], start: usize, quote: char, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if backslash_escapes && chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// `$tag$` or `$$` starting at `start`, if any. Positional `$1` is not a tag.
fn dollar_tag(chars: &[char], start: usize) -> Option<Vec<char>> {
    let mut i = start + 1;
    if let Some(c) = chars.get(i) {
        if c.is_ascii_digit() {
            return None;
        }
    }
    while let Some(&c) = chars.get(i) {
        if c == '$' {
            return Some(chars[start..=i].to_vec());
        }
        if !(c.is_alphanumeric() || c == '_') {
            return None;
        }
        i += 1;
    }
    None
}

fn skip_dollar(chars: &[char], body_start: usize, tag: &[char]) -> usize {
    let mut i = body_start;
    while i + tag.len() <= chars.len() {
        if chars[i..i + tag.len()] == *tag {
            return i + tag.len();
        }
        i += 1;
    }
    chars.len()
}
