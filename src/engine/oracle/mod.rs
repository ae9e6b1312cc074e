//! Oracle Engine Implementation
//!
//! Native Oracle access through the `oracle` crate (ODPI-C, needs an Oracle
//! client library at run time).
//!
//! # Connect strings
//! Descriptor URLs are JDBC-style. They are translated for OCI:
//! - `jdbc:oracle:thin:@host:port:sid` becomes a full TNS descriptor
//! - `jdbc:oracle:thin:@ldap://... ldap://...` keeps the LDAP URL list;
//!   the client resolves the service through the first reachable server
//! - anything else after the prefix is passed through (EZConnect, TNS alias)
//!
//! # Calls
//! A procedure call renders as `BEGIN name(:1, :2, ...); END;`. IN values are
//! bound by type, OUT slots are bound as typed placeholders and read back with
//! `bind_value` after execution. Nothing is retried.

use ::oracle::sql_type::{OracleType, ToSql};
use ::oracle::{Connection, Row, Statement};
use chrono::{NaiveDate, NaiveDateTime};
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, info};

use crate::connection::{ConnectionDescriptor, DbType};
use crate::engine::{CallOutcome, CallableConnection, ProcedureCall, SqlOutcome};
use crate::error::{ProcVaultError, Result};
use crate::procedure::{ParamType, ProcedureParam, TypedValue};

const JDBC_THIN_PREFIX: &str = "jdbc:oracle:thin:@";

/// An open Oracle session
pub struct OracleConnection {
    conn: Connection,
}

impl OracleConnection {
    /// Connect with the descriptor's user and password
    pub fn open(descriptor: &ConnectionDescriptor) -> Result<Self> {
        let connect_string = oracle_connect_string(&descriptor.url);
        debug!(database = %descriptor.database, user = %descriptor.user, "connecting to Oracle");

        let conn = Connection::connect(&descriptor.user, descriptor.password.expose_secret(), &connect_string)
            .map_err(|e| ProcVaultError::connection_failed(&descriptor.database, e.to_string()))?;

        info!(database = %descriptor.database, "connected to Oracle");
        Ok(Self { conn })
    }
}

/// Translate a JDBC thin URL into an OCI connect string
#[must_use]
pub fn oracle_connect_string(url: &str) -> String {
    let target = url.trim().strip_prefix(JDBC_THIN_PREFIX).unwrap_or(url.trim());
    if target.starts_with("ldap://") || target.starts_with("ldaps://") || target.starts_with('(') {
        return target.to_string();
    }

    let parts: Vec<&str> = target.split(':').collect();
    match parts.as_slice() {
        [host, port, sid] if !host.is_empty() && port.parse::<u16>().is_ok() && !sid.is_empty() => format!(
            "(DESCRIPTION=(ADDRESS=(PROTOCOL=TCP)(HOST={host})(PORT={port}))(CONNECT_DATA=(SID={sid})))"
        ),
        _ => target.to_string(),
    }
}

fn render_block(procedure: &str, placeholders: usize) -> String {
    let binds: Vec<String> = (1..=placeholders).map(|i| format!(":{i}")).collect();
    format!("BEGIN {procedure}({}); END;", binds.join(", "))
}

fn out_type(param: &ProcedureParam) -> OracleType {
    match param.param_type {
        ParamType::Varchar => OracleType::Varchar2(param.param_type.default_width()),
        ParamType::Integer => OracleType::Int64,
        ParamType::Decimal => OracleType::BinaryDouble,
        ParamType::Number => OracleType::Number(0, -127),
        ParamType::Date => OracleType::Date,
        ParamType::Timestamp => OracleType::Timestamp(6),
        ParamType::Boolean => OracleType::Boolean,
    }
}

fn bind_in(stmt: &mut Statement, pos: usize, value: &TypedValue) -> ::oracle::Result<()> {
    match value {
        TypedValue::Text(s) => stmt.bind(pos, s),
        TypedValue::Integer(i) => stmt.bind(pos, i),
        TypedValue::Decimal(f) => stmt.bind(pos, f),
        TypedValue::Date(d) => stmt.bind(pos, d),
        TypedValue::Timestamp(ts) => stmt.bind(pos, ts),
        TypedValue::Boolean(b) => stmt.bind(pos, b),
        TypedValue::Null => stmt.bind(pos, &None::<String>),
    }
}

fn read_out(stmt: &Statement, pos: usize, param_type: ParamType) -> ::oracle::Result<Value> {
    Ok(match param_type {
        ParamType::Varchar => stmt.bind_value::<_, Option<String>>(pos)?.map_or(Value::Null, Value::String),
        ParamType::Integer => stmt.bind_value::<_, Option<i64>>(pos)?.map_or(Value::Null, Value::from),
        ParamType::Decimal => stmt
            .bind_value::<_, Option<f64>>(pos)?
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::Null, Value::Number),
        ParamType::Number => stmt.bind_value::<_, Option<String>>(pos)?.map_or(Value::Null, |n| number_to_json(&n)),
        ParamType::Date => stmt
            .bind_value::<_, Option<NaiveDateTime>>(pos)?
            .map_or(Value::Null, |d| Value::String(d.date().format("%Y-%m-%d").to_string())),
        ParamType::Timestamp => stmt
            .bind_value::<_, Option<NaiveDateTime>>(pos)?
            .map_or(Value::Null, |ts| Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        ParamType::Boolean => stmt.bind_value::<_, Option<bool>>(pos)?.map_or(Value::Null, Value::Bool),
    })
}

/// Oracle NUMBER text as a JSON number, integral values kept exact
fn number_to_json(text: &str) -> Value {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map_or_else(|| Value::String(text.to_string()), Value::Number)
}

/// Convert one result-set cell, numbers as JSON numbers and the rest as text
fn cell_to_json(row: &Row, idx: usize, oracle_type: &OracleType) -> ::oracle::Result<Value> {
    Ok(match oracle_type {
        OracleType::Number(_, 0) | OracleType::Int64 => match row.get::<_, Option<i64>>(idx) {
            Ok(v) => v.map_or(Value::Null, Value::from),
            Err(_) => row.get::<_, Option<String>>(idx)?.map_or(Value::Null, Value::String),
        },
        OracleType::Number(_, _) | OracleType::BinaryDouble | OracleType::BinaryFloat | OracleType::Float(_) => row
            .get::<_, Option<f64>>(idx)?
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::Null, Value::Number),
        OracleType::Date => row
            .get::<_, Option<NaiveDate>>(idx)?
            .map_or(Value::Null, |d| Value::String(d.format("%Y-%m-%d").to_string())),
        OracleType::Boolean => row.get::<_, Option<bool>>(idx)?.map_or(Value::Null, Value::Bool),
        _ => row.get::<_, Option<String>>(idx)?.map_or(Value::Null, Value::String),
    })
}

impl CallableConnection for OracleConnection {
    fn engine(&self) -> DbType {
        DbType::Oracle
    }

    fn call_procedure(&mut self, call: &ProcedureCall) -> Result<CallOutcome> {
        let fail = |e: ::oracle::Error| ProcVaultError::execution_failed(&call.procedure, e.to_string());
        let block = render_block(&call.procedure, call.placeholder_count());
        let mut stmt = self.conn.statement(&block).build().map_err(fail)?;

        for (idx, (_, value)) in call.inputs.iter().enumerate() {
            bind_in(&mut stmt, idx + 1, value).map_err(fail)?;
        }
        let first_out = call.inputs.len() + 1;
        for (offset, param) in call.outputs.iter().enumerate() {
            stmt.bind(first_out + offset, &out_type(param)).map_err(fail)?;
        }

        stmt.execute(&[]).map_err(fail)?;

        let outputs = call
            .outputs
            .iter()
            .enumerate()
            .map(|(offset, param)| read_out(&stmt, first_out + offset, param.param_type))
            .collect::<::oracle::Result<Vec<_>>>()
            .map_err(fail)?;

        self.conn.commit().map_err(fail)?;
        Ok(CallOutcome { outputs, return_value: None })
    }

    fn execute_sql(&mut self, sql: &str, params: &[TypedValue]) -> Result<SqlOutcome> {
        let fail = |e: ::oracle::Error| ProcVaultError::execution_failed(sql, e.to_string());
        let mut stmt = self.conn.statement(sql).build().map_err(fail)?;

        for (idx, value) in params.iter().enumerate() {
            bind_in(&mut stmt, idx + 1, value).map_err(fail)?;
        }

        if stmt.is_query() {
            let rows = stmt.query(&[] as &[&dyn ToSql]).map_err(fail)?;
            let info: Vec<(String, OracleType)> = rows
                .column_info()
                .iter()
                .map(|c| (c.name().to_string(), c.oracle_type().clone()))
                .collect();

            let mut data = Vec::new();
            for row in rows {
                let row = row.map_err(fail)?;
                let values = info
                    .iter()
                    .enumerate()
                    .map(|(idx, (_, ty))| cell_to_json(&row, idx, ty))
                    .collect::<::oracle::Result<Vec<_>>>()
                    .map_err(fail)?;
                data.push(values);
            }
            return Ok(SqlOutcome::Rows { columns: info.into_iter().map(|(name, _)| name).collect(), rows: data });
        }

        stmt.execute(&[]).map_err(fail)?;
        let affected = stmt.row_count().map_err(fail)?;
        self.conn.commit().map_err(fail)?;
        Ok(SqlOutcome::RowsAffected(affected))
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .close()
            .map_err(|e| ProcVaultError::execution_failed("close", format!("Failed to close Oracle session: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_string_direct_host() {
        assert_eq!(
            oracle_connect_string("jdbc:oracle:thin:@db-host:1521:ORCL"),
            "(DESCRIPTION=(ADDRESS=(PROTOCOL=TCP)(HOST=db-host)(PORT=1521))(CONNECT_DATA=(SID=ORCL)))"
        );
    }

    #[test]
    fn test_connect_string_ldap_passthrough() {
        let url = "jdbc:oracle:thin:@ldap://l1:1389/ORCL,cn=OracleContext ldap://l2:1389/ORCL,cn=OracleContext";
        assert_eq!(
            oracle_connect_string(url),
            "ldap://l1:1389/ORCL,cn=OracleContext ldap://l2:1389/ORCL,cn=OracleContext"
        );
    }

    #[test]
    fn test_connect_string_other_forms() {
        assert_eq!(oracle_connect_string("//db-host:1521/service"), "//db-host:1521/service");
        assert_eq!(oracle_connect_string("jdbc:oracle:thin:@ORCL_ALIAS"), "ORCL_ALIAS");
    }

    #[test]
    fn test_render_block() {
        assert_eq!(render_block("PKG.ADD_TWO", 3), "BEGIN PKG.ADD_TWO(:1, :2, :3); END;");
        assert_eq!(render_block("PING", 0), "BEGIN PING(); END;");
    }

    #[test]
    fn test_out_types() {
        let param = |t| ProcedureParam { name: "x".into(), param_type: t, raw: None };
        assert_eq!(out_type(&param(ParamType::Varchar)), OracleType::Varchar2(4000));
        assert_eq!(out_type(&param(ParamType::Integer)), OracleType::Int64);
        assert_eq!(out_type(&param(ParamType::Timestamp)), OracleType::Timestamp(6));
        assert_eq!(out_type(&param(ParamType::Number)), OracleType::Number(0, -127));
    }

    #[test]
    fn test_number_to_json() {
        assert_eq!(number_to_json("9007199254740993"), Value::from(9_007_199_254_740_993_i64));
        assert_eq!(number_to_json("1.5"), serde_json::json!(1.5));
        assert!(number_to_json("12345678901234567890").is_f64());
    }
}
