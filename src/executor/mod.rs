//! Procedure and SQL Executors
//!
//! [`ProcedureExecutor`] marshals parameter specs into a [`ProcedureCall`],
//! runs it on a connection and maps OUT values back by parameter name.
//! [`SqlExecutor`] runs raw statements and scripts.
//!
//! Both are plain values constructed per invocation and hold no state.

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::engine::{CallableConnection, ProcedureCall, SqlOutcome};
use crate::error::{ProcVaultError, Result};
use crate::procedure::{self, TypedValue};
use crate::sql;

/// Key used for a function return value when no OUT parameter is declared
pub const RETURN_VALUE_KEY: &str = "result";

/// Executes stored procedures
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcedureExecutor;

impl ProcedureExecutor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Execute `procedure` with IN and OUT specs, returning OUT values by name
    ///
    /// The procedure name and connection are checked before anything is
    /// parsed or built. Parse and conversion errors short-circuit before the
    /// call. Driver errors come back as execution failures naming the
    /// procedure.
    pub fn execute(
        &self,
        connection: Option<&mut (dyn CallableConnection + '_)>,
        procedure: &str,
        in_spec: Option<&str>,
        out_spec: Option<&str>,
    ) -> Result<Map<String, Value>> {
        if procedure.trim().is_empty() {
            return Err(ProcVaultError::invalid_input("Procedure name must not be empty"));
        }
        let Some(connection) = connection else {
            return Err(ProcVaultError::invalid_input(format!(
                "No database connection available to execute '{}'",
                procedure.trim()
            )));
        };
        let procedure = procedure::validate_procedure_name(procedure)?;

        let call = Self::prepare(procedure, in_spec, out_spec)?;
        debug!(
            procedure,
            call = %procedure::build_call_string(procedure, call.placeholder_count()),
            "executing procedure"
        );

        let outcome = connection.call_procedure(&call).map_err(|e| attach_target(e, procedure))?;
        if outcome.outputs.len() != call.outputs.len() {
            return Err(ProcVaultError::execution_failed(
                procedure,
                format!("expected {} OUT value(s), driver returned {}", call.outputs.len(), outcome.outputs.len()),
            ));
        }

        let mut result = Map::new();
        for (param, value) in call.outputs.iter().zip(outcome.outputs) {
            result.insert(param.name.clone(), value);
        }
        if let Some(value) = outcome.return_value {
            result.entry(RETURN_VALUE_KEY).or_insert(value);
        }

        info!(procedure, outputs = result.len(), "procedure executed");
        Ok(result)
    }

    /// Parse both specs and convert IN values
    pub fn prepare(procedure: &str, in_spec: Option<&str>, out_spec: Option<&str>) -> Result<ProcedureCall> {
        let inputs = procedure::parse_in(in_spec)?
            .into_iter()
            .map(|param| param.typed_value().map(|value| (param, value)))
            .collect::<Result<Vec<_>>>()?;
        let outputs = procedure::parse_out(out_spec)?;

        Ok(ProcedureCall { procedure: procedure.to_string(), inputs, outputs })
    }
}

/// Executes raw SQL statements and scripts
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlExecutor;

impl SqlExecutor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Execute one statement with optional positional parameters
    ///
    /// Parameters use the IN spec grammar; names are labels only. The number
    /// of placeholders must match the number of parameters.
    pub fn execute(
        &self,
        connection: &mut (dyn CallableConnection + '_),
        statement: &str,
        params_spec: Option<&str>,
    ) -> Result<SqlOutcome> {
        let statement = statement.trim().trim_end_matches(';').trim();
        if statement.is_empty() {
            return Err(ProcVaultError::invalid_input("SQL statement must not be empty"));
        }

        let params = procedure::parse_in(params_spec)?
            .iter()
            .map(procedure::ProcedureParam::typed_value)
            .collect::<Result<Vec<TypedValue>>>()?;
        sql::check_placeholders(statement, params.len())?;

        debug!(params = params.len(), "executing SQL statement");
        connection.execute_sql(statement, &params).map_err(|e| attach_target(e, statement))
    }

    /// Execute every statement of a script in order, stopping at the first failure
    pub fn execute_script(
        &self,
        connection: &mut (dyn CallableConnection + '_),
        script: &str,
    ) -> Result<Vec<SqlOutcome>> {
        let statements = sql::split_statements(script);
        if statements.is_empty() {
            return Err(ProcVaultError::invalid_input("Script contains no statements"));
        }

        let mut outcomes = Vec::with_capacity(statements.len());
        for (idx, statement) in statements.iter().enumerate() {
            debug!(statement = idx + 1, total = statements.len(), "executing script statement");
            let outcome = connection.execute_sql(statement, &[]).map_err(|e| {
                ProcVaultError::execution_failed(format!("script statement {}", idx + 1), detail_of(&e))
            })?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

/// Re-label driver errors with the procedure or statement that failed
fn attach_target(err: ProcVaultError, target: &str) -> ProcVaultError {
    match err {
        ProcVaultError::InvalidInput(_) => err,
        ProcVaultError::ExecutionFailed { detail, .. } => ProcVaultError::execution_failed(target, detail),
        other => ProcVaultError::execution_failed(target, other.message()),
    }
}

fn detail_of(err: &ProcVaultError) -> String {
    match err {
        ProcVaultError::ExecutionFailed { detail, .. } => detail.clone(),
        other => other.message(),
    }
}
