//! `SQLite` Engine Implementation
//!
//! In-process engine used for local runs and end-to-end tests.
//!
//! # Features
//! - File-based connections and shared in-memory databases (`file:` URIs)
//! - Procedure calls against application-defined scalar functions
//! - Raw SQL with positional parameters
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver, no async needed)
//! - `SQLite` has no stored procedures: a call renders as
//!   `SELECT name(?1, ?2, ...)` and the scalar result is assigned to the single
//!   OUT parameter, or returned as the call's return value when none is declared
//! - User and password from the descriptor are not used by `SQLite`
//! - BLOB data is Base64-encoded for JSON safety

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, Row};
use serde_json::Value;
use tracing::debug;

use crate::connection::{ConnectionDescriptor, DbType};
use crate::engine::{CallOutcome, CallableConnection, ProcedureCall, SqlOutcome};
use crate::error::{ProcVaultError, Result};
use crate::procedure::{ParamType, TypedValue};

/// An open `SQLite` connection
pub struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    /// Open the database named by the descriptor URL (read-write, created if missing)
    pub fn open(descriptor: &ConnectionDescriptor) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_URI;
        debug!(url = %descriptor.url, "opening SQLite database");

        let conn = Connection::open_with_flags(&descriptor.url, flags).map_err(|e| {
            ProcVaultError::connection_failed(&descriptor.database, format!("Failed to open SQLite database: {e}"))
        })?;
        Ok(Self { conn })
    }

    /// Wrap an already open connection (custom functions registered by the caller)
    #[must_use]
    pub const fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Underlying driver connection
    #[must_use]
    pub const fn inner(&self) -> &Connection {
        &self.conn
    }
}

impl CallableConnection for SqliteConnection {
    fn engine(&self) -> DbType {
        DbType::Sqlite
    }

    fn call_procedure(&mut self, call: &ProcedureCall) -> Result<CallOutcome> {
        if call.outputs.len() > 1 {
            return Err(ProcVaultError::invalid_input(format!(
                "SQLite functions return a single value; {} OUT parameters declared for '{}'",
                call.outputs.len(),
                call.procedure
            )));
        }

        let placeholders: Vec<String> = (1..=call.inputs.len()).map(|i| format!("?{i}")).collect();
        let sql = format!("SELECT {}({})", call.procedure, placeholders.join(", "));
        let params: Vec<SqlValue> = call.inputs.iter().map(|(_, value)| to_sql_value(value)).collect();

        let value = self
            .conn
            .query_row(&sql, rusqlite::params_from_iter(params), |row| sqlite_value_to_json(row, 0))
            .map_err(|e| ProcVaultError::execution_failed(&call.procedure, e.to_string()))?;

        Ok(match call.outputs.first() {
            Some(out) => CallOutcome { outputs: vec![coerce_out(value, out.param_type)], return_value: None },
            None => CallOutcome { outputs: Vec::new(), return_value: Some(value) },
        })
    }

    fn execute_sql(&mut self, sql: &str, params: &[TypedValue]) -> Result<SqlOutcome> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| ProcVaultError::execution_failed(sql, format!("Failed to prepare query: {e}")))?;

        let column_names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
        let params = rusqlite::params_from_iter(params.iter().map(to_sql_value));

        if column_names.is_empty() {
            // Non-SELECT statement (INSERT, UPDATE, DELETE, DDL)
            let affected = stmt
                .execute(params)
                .map_err(|e| ProcVaultError::execution_failed(sql, format!("Failed to execute query: {e}")))?;
            return Ok(SqlOutcome::RowsAffected(affected as u64));
        }

        let rows = stmt
            .query(params)
            .map_err(|e| ProcVaultError::execution_failed(sql, format!("Failed to execute query: {e}")))?;
        let rows = rows
            .mapped(|row| row_to_json(&column_names, row))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ProcVaultError::execution_failed(sql, format!("Failed to fetch row: {e}")))?;

        Ok(SqlOutcome::Rows { columns: column_names, rows })
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| ProcVaultError::execution_failed("close", format!("Failed to close SQLite database: {e}")))
    }
}

fn to_sql_value(value: &TypedValue) -> SqlValue {
    match value {
        TypedValue::Text(s) => SqlValue::Text(s.clone()),
        TypedValue::Integer(i) => SqlValue::Integer(*i),
        TypedValue::Decimal(f) => SqlValue::Real(*f),
        TypedValue::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
        TypedValue::Timestamp(ts) => SqlValue::Text(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        TypedValue::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        TypedValue::Null => SqlValue::Null,
    }
}

/// Shape a returned value to the declared OUT type where `SQLite`'s storage
/// class differs from it
fn coerce_out(value: Value, declared: ParamType) -> Value {
    match (declared, &value) {
        (ParamType::Boolean, Value::Number(n)) => Value::Bool(n.as_i64().is_some_and(|i| i != 0)),
        (ParamType::Varchar, Value::Number(n)) => Value::String(n.to_string()),
        (ParamType::Integer, Value::Number(n)) if n.is_f64() => n
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map_or(value.clone(), |f| Value::from(f as i64)),
        _ => value,
    }
}

/// Convert a `SQLite` row to a JSON-safe `Vec`
fn row_to_json(column_names: &[String], row: &Row) -> std::result::Result<Vec<Value>, rusqlite::Error> {
    let mut values = Vec::with_capacity(column_names.len());

    for idx in 0..column_names.len() {
        values.push(sqlite_value_to_json(row, idx)?);
    }

    Ok(values)
}

/// Convert one `SQLite` cell to JSON
fn sqlite_value_to_json(row: &Row, idx: usize) -> std::result::Result<Value, rusqlite::Error> {
    use rusqlite::types::ValueRef;

    let value_ref = row.get_ref(idx)?;

    Ok(match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number), // NaN/Infinity as null
        ValueRef::Text(s) => {
            let text = std::str::from_utf8(s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Value::String(text.to_string())
        }
        ValueRef::Blob(b) => {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::ProcedureParam;
    use rusqlite::functions::FunctionFlags;
    use secrecy::SecretString;
    use serde_json::json;

    fn with_add_two() -> SqliteConnection {
        let conn = Connection::open_in_memory().unwrap();
        conn.create_scalar_function("ADD_TWO", 2, FunctionFlags::SQLITE_DETERMINISTIC, |ctx| {
            Ok(ctx.get::<i64>(0)? + ctx.get::<i64>(1)?)
        })
        .unwrap();
        SqliteConnection::from_connection(conn)
    }

    fn int_param(name: &str, value: Option<i64>) -> ProcedureParam {
        ProcedureParam { name: name.into(), param_type: ParamType::Integer, raw: value.map(|v| v.to_string()) }
    }

    fn add_two_call(outputs: Vec<ProcedureParam>) -> ProcedureCall {
        ProcedureCall {
            procedure: "ADD_TWO".into(),
            inputs: vec![
                (int_param("a", Some(2)), TypedValue::Integer(2)),
                (int_param("b", Some(3)), TypedValue::Integer(3)),
            ],
            outputs,
        }
    }

    #[test]
    fn test_call_function_return_value() {
        let mut conn = with_add_two();
        let outcome = conn.call_procedure(&add_two_call(vec![])).unwrap();
        assert_eq!(outcome.return_value, Some(json!(5)));
        assert!(outcome.outputs.is_empty());
    }

    #[test]
    fn test_call_function_single_out() {
        let mut conn = with_add_two();
        let outcome = conn.call_procedure(&add_two_call(vec![int_param("total", None)])).unwrap();
        assert_eq!(outcome.outputs, vec![json!(5)]);
        assert_eq!(outcome.return_value, None);
    }

    #[test]
    fn test_call_rejects_multiple_outs() {
        let mut conn = with_add_two();
        let err = conn
            .call_procedure(&add_two_call(vec![int_param("x", None), int_param("y", None)]))
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_call_unknown_function() {
        let mut conn = with_add_two();
        let call = ProcedureCall { procedure: "NO_SUCH_FN".into(), inputs: vec![], outputs: vec![] };
        let err = conn.call_procedure(&call).unwrap_err();
        assert!(matches!(err, ProcVaultError::ExecutionFailed { .. }));
    }

    #[test]
    fn test_execute_sql_rows_and_changes() {
        let mut conn = with_add_two();
        conn.execute_sql("CREATE TABLE t (id INTEGER, name TEXT, data BLOB)", &[]).unwrap();
        let outcome = conn
            .execute_sql(
                "INSERT INTO t VALUES (?1, ?2, x'48656C6C6F')",
                &[TypedValue::Integer(1), TypedValue::Text("alice".into())],
            )
            .unwrap();
        assert_eq!(outcome, SqlOutcome::RowsAffected(1));

        let outcome = conn.execute_sql("SELECT id, name, data FROM t", &[]).unwrap();
        assert_eq!(
            outcome,
            SqlOutcome::Rows {
                columns: vec!["id".into(), "name".into(), "data".into()],
                rows: vec![vec![json!(1), json!("alice"), json!("SGVsbG8=")]],
            }
        );
    }

    #[test]
    fn test_open_shared_memory_descriptor() {
        let descriptor = ConnectionDescriptor {
            db_type: DbType::Sqlite,
            database: "memdb".into(),
            url: "file:procvault_sqlite_engine_test?mode=memory&cache=shared".into(),
            user: "app".into(),
            password: SecretString::new(String::new()),
        };
        let mut conn = SqliteConnection::open(&descriptor).unwrap();
        let outcome = conn.execute_sql("SELECT 2 + 3 AS total", &[]).unwrap();
        assert_eq!(outcome, SqlOutcome::Rows { columns: vec!["total".into()], rows: vec![vec![json!(5)]] });
        Box::new(conn).close().unwrap();
    }

    #[test]
    fn test_coerce_out() {
        assert_eq!(coerce_out(json!(1), ParamType::Boolean), json!(true));
        assert_eq!(coerce_out(json!(42), ParamType::Varchar), json!("42"));
        assert_eq!(coerce_out(json!(4.0), ParamType::Integer), json!(4));
        assert_eq!(coerce_out(json!(4.5), ParamType::Decimal), json!(4.5));
    }
}
