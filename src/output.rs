//! Execution Results and Output Envelopes
//!
//! Every command ends in an [`ExecutionResult`]: exit code, optional message
//! and a result map (OUT parameter name to value, or a single scalar entry).
//! Failures carry `{"error": message}` and a non-zero exit code.
//!
//! # Output Contract
//! - Text: message line (if any), then the result map; a single entry prints
//!   its bare value, several entries print `key: value` lines
//! - JSON success: `{"ok": true, "command": "...", "database": "...", "data": {...}, "meta": {...}}`
//! - JSON error: `{"ok": false, "command": "...", "database": "...", "error": {"code": "...", "message": "..."}}`

use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProcVaultError;

/// Message returned when only the password was resolved
pub const PASSWORD_ONLY_MESSAGE: &str = "=== VAULT PASSWORD DECRYPTION ===\nSuccess: true";

/// Key holding the failure message in the result map
pub const ERROR_KEY: &str = "error";

/// Terminal outcome of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: Map<String, Value>,
    /// Stable error code for failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ExecutionResult {
    /// Successful result carrying `data`
    #[must_use]
    pub fn success(data: Map<String, Value>) -> Self {
        Self { exit_code: 0, message: None, data, error_code: None }
    }

    /// Successful result with a message and no data
    #[must_use]
    pub fn success_message(message: impl Into<String>) -> Self {
        Self { exit_code: 0, message: Some(message.into()), data: Map::new(), error_code: None }
    }

    /// Successful result with both a message and data
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Password resolved, nothing executed
    #[must_use]
    pub fn password_only() -> Self {
        Self::success_message(PASSWORD_ONLY_MESSAGE)
    }

    /// Failure with an explicit exit code (coerced to non-zero)
    #[must_use]
    pub fn failure(exit_code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut data = Map::new();
        data.insert(ERROR_KEY.to_string(), Value::String(message.clone()));
        Self {
            exit_code: if exit_code == 0 { 1 } else { exit_code },
            message: Some(message),
            data,
            error_code: None,
        }
    }

    /// Failure derived from a library error
    #[must_use]
    pub fn from_error(err: &ProcVaultError) -> Self {
        let mut result = Self::failure(err.exit_code(), err.message());
        result.error_code = Some(err.error_code().to_string());
        result
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Render in text form
    ///
    /// Failures write `[ERROR] message` to `err`; successes write to `out`.
    pub fn write_text(&self, out: &mut impl Write, err: &mut impl Write) -> io::Result<()> {
        if !self.is_success() {
            let message = self.message.as_deref().unwrap_or("unknown error");
            return writeln!(err, "[ERROR] {message}");
        }

        if let Some(message) = &self.message {
            writeln!(out, "{message}")?;
        }
        if self.data.len() == 1 {
            if let Some(value) = self.data.values().next() {
                writeln!(out, "{}", display_value(value))?;
            }
        } else {
            for (key, value) in &self.data {
                writeln!(out, "{key}: {}", display_value(value))?;
            }
        }
        Ok(())
    }

    /// Convert to a JSON envelope
    #[must_use]
    pub fn to_envelope(&self, command: &str, database: &str, execution_ms: u64) -> Value {
        if self.is_success() {
            let envelope = SuccessEnvelope::new(command, database, &self.data, self.message.clone(), Metadata::new(execution_ms));
            serde_json::to_value(envelope).unwrap_or(Value::Null)
        } else {
            let info = ErrorInfo::new(
                self.error_code.as_deref().unwrap_or("EXECUTION_FAILED"),
                self.message.as_deref().unwrap_or("unknown error"),
            );
            serde_json::to_value(ErrorEnvelope::new(command, database, info)).unwrap_or(Value::Null)
        }
    }
}

/// Text form of a value: strings bare, everything else as JSON
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Render a result set as a `col | col` table with a dashed separator
#[must_use]
pub fn format_table(columns: &[String], rows: &[Vec<Value>]) -> String {
    if rows.is_empty() {
        return "No rows returned".to_string();
    }

    let header = columns.join(" | ");
    let mut lines = vec![header.clone(), "-".repeat(header.len())];
    for row in rows {
        lines.push(row.iter().map(display_value).collect::<Vec<_>>().join(" | "));
    }
    lines.join("\n")
}

/// Success envelope for operation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Command that was executed (proc, sql, vault)
    pub command: String,

    /// Logical database id
    pub database: String,

    /// Operation-specific data
    pub data: T,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Execution metadata
    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(
        command: impl Into<String>,
        database: impl Into<String>,
        data: T,
        message: Option<String>,
        meta: Metadata,
    ) -> Self {
        Self { ok: true, command: command.into(), database: database.into(), data, message, meta }
    }
}

/// Error envelope for operation failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    pub command: String,

    pub database: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(command: impl Into<String>, database: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, command: command.into(), database: database.into(), error }
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "INVALID_INPUT", "VAULT_TRANSPORT")
    pub code: String,

    /// Human-readable error message (no secrets)
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Execution time in milliseconds
    pub execution_ms: u64,
}

impl Metadata {
    #[must_use]
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms }
    }
}
