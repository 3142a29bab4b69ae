//! Read-only guard for generated SQL.

use crate::error::{ConciergeError, ConciergeResult};
use crate::llm::strip_code_fence;

/// Keywords that never appear in an accepted query.
const FORBIDDEN: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "attach", "detach", "pragma",
    "vacuum", "reindex", "truncate", "grant", "savepoint", "release",
];

/// Tables that hold buyer details or internal state. Generated SQL only
/// reads `projects`; the database enforces the same rule when preparing.
const PRIVATE_TABLES: &[&str] = &[
    "leads",
    "visit_bookings",
    "sql_memory",
    "rag_documents",
    "sqlite_master",
    "sqlite_schema",
    "sqlite_temp_master",
    "sqlite_sequence",
];

/// Pull the SQL statement out of a model reply (fenced or inline).
pub fn extract_sql(reply: &str) -> Option<String> {
    let body = strip_code_fence(reply);
    let lower = body.to_ascii_lowercase();

    let start = ["select", "with"]
        .iter()
        .filter_map(|kw| {
            lower
                .match_indices(kw)
                .find(|(idx, _)| *idx == 0 || !is_ident_char(lower.as_bytes()[idx - 1]))
                .map(|(idx, _)| idx)
        })
        .min()?;

    let sql = body[start..].trim();
    // Drop trailing prose after a closing fence or blank line.
    let sql = sql.split("```").next().unwrap_or(sql);
    let sql = sql.split("\n\n").next().unwrap_or(sql);
    let sql = sql.trim().trim_end_matches(';').trim();

    if sql.is_empty() {
        None
    } else {
        Some(sql.to_string())
    }
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Replace the contents of string literals so keywords inside them are ignored.
fn mask_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    for ch in sql.chars() {
        match quote {
            Some(q) if ch == q => {
                quote = None;
                out.push(ch);
            }
            Some(_) => out.push(' '),
            None => {
                if ch == '\'' || ch == '"' {
                    quote = Some(ch);
                }
                out.push(ch);
            }
        }
    }
    out
}

/// Accept a single `SELECT`/`WITH` statement with no write keywords.
pub fn validate(sql: &str) -> ConciergeResult<String> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(ConciergeError::UnsafeSql("empty statement".to_string()));
    }

    let masked = mask_literals(trimmed).to_lowercase();
    if !(masked.starts_with("select") || masked.starts_with("with")) {
        return Err(ConciergeError::UnsafeSql(
            "only SELECT queries are allowed".to_string(),
        ));
    }
    if masked.contains(';') {
        return Err(ConciergeError::UnsafeSql(
            "multiple statements are not allowed".to_string(),
        ));
    }
    if masked.contains("--") || masked.contains("/*") {
        return Err(ConciergeError::UnsafeSql("comments are not allowed".to_string()));
    }

    let words: Vec<&str> = masked
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect();
    if let Some(word) = words.iter().find(|w| FORBIDDEN.contains(w)) {
        return Err(ConciergeError::UnsafeSql(format!(
            "keyword '{}' is not allowed",
            word
        )));
    }
    if let Some(table) = words.iter().find(|w| PRIVATE_TABLES.contains(w)) {
        return Err(ConciergeError::UnsafeSql(format!(
            "table '{}' is not readable",
            table
        )));
    }

    Ok(trimmed.to_string())
}

/// Cap the number of rows any accepted query can return.
pub fn with_row_limit(sql: &str, limit: usize) -> String {
    format!("SELECT * FROM ({}) LIMIT {}", sql, limit)
}
