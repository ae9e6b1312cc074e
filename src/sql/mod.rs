//! SQL Text Utilities
//!
//! Lexical helpers for raw SQL and script execution:
//! - Comment stripping (`--` line comments, `/* */` block comments)
//! - Script splitting on `;` outside string literals
//! - Bind placeholder counting (`?`, `?N`, `:name`, `:N`)
//!
//! All scanners treat single-quoted literals (with `''` escapes) and
//! double-quoted identifiers as opaque.

use crate::error::{ProcVaultError, Result};

/// Remove comments, leaving literals untouched
///
/// Line comments keep their newline; block comments become a single space.
#[must_use]
pub fn strip_comments(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' => {
                result.push(ch);
                for inner in chars.by_ref() {
                    result.push(inner);
                    if inner == ch {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                chars.next();
                for ch in chars.by_ref() {
                    if ch == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for ch in chars.by_ref() {
                    if prev == '*' && ch == '/' {
                        break;
                    }
                    prev = ch;
                }
                result.push(' ');
            }
            _ => result.push(ch),
        }
    }

    result
}

/// Split a script into trimmed, non-empty statements
///
/// Comments are stripped first. Semicolons inside literals do not split.
#[must_use]
pub fn split_statements(script: &str) -> Vec<String> {
    let stripped = strip_comments(script);
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in stripped.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(ch);
                current.push(ch);
            }
            (None, ';') => {
                push_statement(&mut statements, &current);
                current.clear();
            }
            (None, c) => current.push(c),
        }
    }
    push_statement(&mut statements, &current);

    statements
}

fn push_statement(statements: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}

/// Count bind placeholders outside literals and comments
///
/// `?`, `?1`, `:name` and `:1` each count once. `::` casts and `:=`
/// assignments are not placeholders.
#[must_use]
pub fn count_placeholders(sql: &str) -> usize {
    let stripped = strip_comments(sql);
    let mut chars = stripped.chars().peekable();
    let mut count = 0;
    let mut prev = ' ';

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' => {
                for inner in chars.by_ref() {
                    if inner == ch {
                        break;
                    }
                }
                prev = ch;
                continue;
            }
            '?' => {
                while chars.peek().is_some_and(char::is_ascii_digit) {
                    chars.next();
                }
                count += 1;
            }
            ':' if prev != ':' => {
                if chars.peek().is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_') {
                    while chars.peek().is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_') {
                        chars.next();
                    }
                    count += 1;
                }
            }
            _ => {}
        }
        prev = ch;
    }

    count
}

/// Check that `sql` has exactly `expected` placeholders
pub fn check_placeholders(sql: &str, expected: usize) -> Result<()> {
    let found = count_placeholders(sql);
    if found != expected {
        return Err(ProcVaultError::invalid_input(format!(
            "SQL has {found} placeholder(s) but {expected} parameter(s) were supplied"
        )));
    }
    Ok(())
}
