//! Database Engine Traits and Core Types
//!
//! This module defines the seam between execution logic and native drivers.
//! Each engine (`Oracle`, `SQLite`) opens one [`CallableConnection`] per
//! invocation through a [`Connector`]; nothing is pooled or reused.
//!
//! # Engine Isolation
//! Each engine implementation is completely independent and gated behind its
//! own cargo feature. Drivers are synchronous; callers run them inline on the
//! single invocation path.

use serde_json::Value;

use crate::connection::{ConnectionDescriptor, DbType};
use crate::error::{ProcVaultError, Result};
use crate::procedure::{ProcedureParam, TypedValue};

#[cfg(feature = "oracle")]
pub mod oracle;

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// A fully marshalled procedure invocation
#[derive(Debug, Clone)]
pub struct ProcedureCall {
    /// Validated procedure identifier
    pub procedure: String,
    /// IN parameters with their converted values, in declaration order
    pub inputs: Vec<(ProcedureParam, TypedValue)>,
    /// OUT parameters, bound after the IN parameters
    pub outputs: Vec<ProcedureParam>,
}

impl ProcedureCall {
    /// Total number of positional placeholders
    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }
}

/// Values read back after a procedure call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOutcome {
    /// One value per OUT parameter, in declaration order
    pub outputs: Vec<Value>,
    /// Function return value when the engine produces one and no OUT
    /// parameter received it
    pub return_value: Option<Value>,
}

/// Result of a single SQL statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlOutcome {
    /// Result set (column names plus rows)
    Rows { columns: Vec<String>, rows: Vec<Vec<Value>> },
    /// DML / DDL row count
    RowsAffected(u64),
}

/// One open database connection, exclusively owned by one invocation
pub trait CallableConnection: Send {
    /// Engine behind this connection
    fn engine(&self) -> DbType;

    /// Bind, execute and read back a procedure call
    ///
    /// Errors are not retried; procedure side effects may not be idempotent.
    fn call_procedure(&mut self, call: &ProcedureCall) -> Result<CallOutcome>;

    /// Execute one SQL statement with positional parameters
    fn execute_sql(&mut self, sql: &str, params: &[TypedValue]) -> Result<SqlOutcome>;

    /// Close the connection, releasing the session
    fn close(self: Box<Self>) -> Result<()>;
}

/// Opens connections from descriptors
pub trait Connector: Send + Sync {
    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn CallableConnection>>;
}

/// Connector backed by the native drivers compiled into this build
#[derive(Debug, Default, Clone, Copy)]
pub struct DriverConnector;

impl Connector for DriverConnector {
    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn CallableConnection>> {
        match descriptor.db_type {
            #[cfg(feature = "oracle")]
            DbType::Oracle => Ok(Box::new(oracle::OracleConnection::open(descriptor)?)),
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => Ok(Box::new(sqlite::SqliteConnection::open(descriptor)?)),
            #[allow(unreachable_patterns)]
            other => Err(ProcVaultError::config_error(format!(
                "Database type '{other}' is not enabled in this build"
            ))),
        }
    }
}
