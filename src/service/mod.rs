//! Execution Orchestrator
//!
//! Ties credential resolution, connection acquisition and execution together
//! for one invocation:
//!
//! ```text
//! START -> CREDENTIAL_RESOLUTION -> { FAILED | CONNECTED } -> EXECUTING -> { SUCCESS | FAILED }
//! ```
//!
//! `CONNECTED` is entered only once a password is resolved and the physical
//! connection is open. The connection is closed when execution ends, on every
//! path. This is the only place where errors become an [`ExecutionResult`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::connection::{self, DbType};
use crate::credential::{PasswordPrompter, PasswordRequest, PasswordResolver};
use crate::engine::{CallableConnection, Connector, DriverConnector, SqlOutcome};
use crate::error::{ProcVaultError, Result};
use crate::executor::{ProcedureExecutor, SqlExecutor};
use crate::output::{format_table, ExecutionResult};
use crate::procedure;
use crate::vault;

/// Invocation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    CredentialResolution,
    Connected,
    Executing,
    Success,
    Failed,
}

impl Phase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::CredentialResolution => "CREDENTIAL_RESOLUTION",
            Self::Connected => "CONNECTED",
            Self::Executing => "EXECUTING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn enter(phase: Phase) {
    debug!(phase = phase.as_str(), "phase transition");
}

/// Which database to reach and as whom
#[derive(Debug, Clone)]
pub struct DatabaseTarget {
    pub db_type: DbType,
    pub database: String,
    pub user: String,
    /// Direct host; `None` selects directory (LDAP) lookup for Oracle
    pub host: Option<String>,
}

/// Direct Vault parameters exactly as supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct VaultParams {
    pub vault_url: Option<String>,
    pub role_id: Option<String>,
    pub secret_id: Option<String>,
    pub ait: Option<String>,
}

impl VaultParams {
    fn password_request(&self, user: &str, database: &str) -> Result<PasswordRequest> {
        PasswordRequest::new(
            user,
            database,
            self.vault_url.clone(),
            self.role_id.clone(),
            self.secret_id.clone(),
            self.ait.clone(),
        )
    }
}

/// Stored procedure invocation
#[derive(Debug, Clone)]
pub struct ProcedureRequest {
    pub target: DatabaseTarget,
    pub vault: VaultParams,
    /// Blank selects password-only mode
    pub procedure: String,
    pub in_spec: Option<String>,
    pub out_spec: Option<String>,
}

/// Raw SQL or script invocation
#[derive(Debug, Clone)]
pub struct SqlRequest {
    pub target: DatabaseTarget,
    pub vault: VaultParams,
    pub sql: Option<String>,
    pub script: Option<PathBuf>,
    /// Positional parameters in the IN spec grammar
    pub params: Option<String>,
}

/// Password retrieval without touching the database
#[derive(Debug, Clone)]
pub struct VaultRequest {
    pub user: String,
    pub database: String,
    pub vault: VaultParams,
    /// Use the registry instead of direct parameters
    pub lookup: bool,
}

/// Per-invocation orchestrator
pub struct ExecutionService<C: Connector = DriverConnector> {
    config: AppConfig,
    resolver: PasswordResolver,
    connector: C,
    procedures: ProcedureExecutor,
    statements: SqlExecutor,
}

impl ExecutionService<DriverConnector> {
    /// Service backed by the native drivers
    #[must_use]
    pub fn new(config: AppConfig, prompter: Option<Box<dyn PasswordPrompter>>) -> Self {
        Self::with_connector(config, prompter, DriverConnector)
    }
}

impl<C: Connector> ExecutionService<C> {
    /// Service with a custom connector
    #[must_use]
    pub fn with_connector(config: AppConfig, prompter: Option<Box<dyn PasswordPrompter>>, connector: C) -> Self {
        let resolver = PasswordResolver::standard(config.clone(), prompter);
        Self { config, resolver, connector, procedures: ProcedureExecutor::new(), statements: SqlExecutor::new() }
    }

    /// Run a stored procedure
    pub async fn execute_procedure(&self, request: &ProcedureRequest) -> ExecutionResult {
        finish(self.run_procedure(request).await)
    }

    /// Run raw SQL or a script
    pub async fn execute_sql(&self, request: &SqlRequest) -> ExecutionResult {
        finish(self.run_sql(request).await)
    }

    /// Resolve a password through Vault only
    pub async fn retrieve_password(&self, request: &VaultRequest) -> ExecutionResult {
        finish(self.run_vault(request).await)
    }

    async fn run_procedure(&self, request: &ProcedureRequest) -> Result<ExecutionResult> {
        enter(Phase::Start);
        let procedure = request.procedure.trim();
        if !procedure.is_empty() {
            procedure::validate_procedure_name(procedure)?;
            ProcedureExecutor::prepare(procedure, request.in_spec.as_deref(), request.out_spec.as_deref())?;
        }

        let password = self.resolve_password(&request.target, &request.vault).await?;
        if procedure.is_empty() {
            info!(user = %request.target.user, database = %request.target.database, "password-only mode");
            return Ok(ExecutionResult::password_only());
        }

        let executor = self.procedures;
        let data = self.with_connection(&request.target, password, |conn| {
            executor.execute(Some(conn), procedure, request.in_spec.as_deref(), request.out_spec.as_deref())
        })?;
        Ok(ExecutionResult::success(data))
    }

    async fn run_sql(&self, request: &SqlRequest) -> Result<ExecutionResult> {
        enter(Phase::Start);
        let sql = request.sql.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let script = match (sql, &request.script) {
            (Some(_), Some(_)) => {
                return Err(ProcVaultError::invalid_input("Provide either an SQL statement or a script, not both"));
            }
            (None, Some(path)) => Some(std::fs::read_to_string(path).map_err(|e| {
                ProcVaultError::invalid_input(format!("Could not read script {}: {e}", path.display()))
            })?),
            _ => None,
        };
        if script.is_some() && request.params.as_deref().is_some_and(|p| !p.trim().is_empty()) {
            return Err(ProcVaultError::invalid_input("Parameters are not supported for scripts"));
        }

        let password = self.resolve_password(&request.target, &request.vault).await?;
        let executor = self.statements;

        if let Some(script) = script {
            return self.with_connection(&request.target, password, |conn| {
                let outcomes = executor.execute_script(conn, &script)?;
                let messages: Vec<String> = outcomes.iter().map(|o| shape_sql(o).1).collect();
                let mut data = Map::new();
                data.insert("statements_executed".to_string(), Value::from(outcomes.len()));
                Ok(ExecutionResult::success(data).with_message(messages.join("\n")))
            });
        }

        let Some(sql) = sql else {
            info!(user = %request.target.user, database = %request.target.database, "password-only mode");
            return Ok(ExecutionResult::password_only());
        };

        self.with_connection(&request.target, password, |conn| {
            let outcome = executor.execute(conn, sql, request.params.as_deref())?;
            let (data, message) = shape_sql(&outcome);
            let result = ExecutionResult::success(data);
            Ok(if message.is_empty() { result } else { result.with_message(message) })
        })
    }

    async fn run_vault(&self, request: &VaultRequest) -> Result<ExecutionResult> {
        enter(Phase::Start);
        enter(Phase::CredentialResolution);

        let coords = if request.lookup {
            self.config.lookup_vault(&request.user, &request.database).ok_or_else(|| {
                ProcVaultError::credential_unavailable(format!(
                    "No vault configuration found for user '{}' and database '{}'",
                    request.user, request.database
                ))
            })?
        } else {
            let password_request = request.vault.password_request(&request.user, &request.database)?;
            let direct = password_request.has_direct_vault_params();
            match password_request.vault.filter(|_| direct) {
                Some(coords) => coords,
                None => {
                    return Err(ProcVaultError::invalid_input(
                        "Direct mode requires --vault-url, --role-id, --secret-id and --ait",
                    ));
                }
            }
        };

        let password = vault::fetch_database_password(
            &coords,
            &self.config.vault.secret_path_template,
            &request.database,
            &request.user,
            self.config.vault.timeout_ms.map(Duration::from_millis),
        )
        .await?;

        let mut data = Map::new();
        data.insert("password".to_string(), Value::String(password.expose_secret().clone()));
        Ok(ExecutionResult::success(data))
    }

    async fn resolve_password(&self, target: &DatabaseTarget, params: &VaultParams) -> Result<SecretString> {
        let request = params.password_request(&target.user, &target.database)?;
        enter(Phase::CredentialResolution);
        self.resolver.resolve(&request).await
    }

    /// Open one connection, run `work`, and close it whatever the outcome
    fn with_connection<T>(
        &self,
        target: &DatabaseTarget,
        password: SecretString,
        work: impl FnOnce(&mut dyn CallableConnection) -> Result<T>,
    ) -> Result<T> {
        let descriptor = connection::build(
            &self.config.databases,
            target.db_type,
            &target.database,
            &target.user,
            password,
            target.host.as_deref(),
        )?;

        let mut conn = self.connector.connect(&descriptor)?;
        enter(Phase::Connected);
        info!(engine = %conn.engine(), database = %target.database, user = %target.user, "connected");

        enter(Phase::Executing);
        let outcome = work(conn.as_mut());
        if let Err(e) = conn.close() {
            warn!(error = %e, "failed to close connection");
        }
        outcome
    }
}

fn finish(outcome: Result<ExecutionResult>) -> ExecutionResult {
    match outcome {
        Ok(result) => {
            enter(Phase::Success);
            result
        }
        Err(e) => {
            enter(Phase::Failed);
            error!(code = e.error_code(), "{}", e.message());
            ExecutionResult::from_error(&e)
        }
    }
}

/// Result map and message for one SQL outcome
///
/// A single-row, single-column result is a scalar keyed by its column.
fn shape_sql(outcome: &SqlOutcome) -> (Map<String, Value>, String) {
    let mut data = Map::new();
    match outcome {
        SqlOutcome::Rows { columns, rows } if columns.len() == 1 && rows.len() == 1 => {
            let value = rows[0].first().cloned().unwrap_or(Value::Null);
            data.insert(columns[0].clone(), value);
            (data, String::new())
        }
        SqlOutcome::Rows { columns, rows } => {
            let objects: Vec<Value> = rows
                .iter()
                .map(|row| Value::Object(columns.iter().cloned().zip(row.iter().cloned()).collect()))
                .collect();
            data.insert("rows".to_string(), Value::Array(objects));
            (data, format_table(columns, rows))
        }
        SqlOutcome::RowsAffected(n) => {
            data.insert("rows_affected".to_string(), Value::from(*n));
            (data, format!("Rows affected: {n}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionDescriptor;
    use crate::engine::{CallOutcome, ProcedureCall};
    use crate::procedure::TypedValue;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubPrompter;

    impl PasswordPrompter for StubPrompter {
        fn prompt(&self, _user: &str, _database: &str) -> Result<SecretString> {
            Ok(SecretString::new("secret".to_string()))
        }
    }

    /// Counts how often the password was asked for
    #[derive(Default, Clone)]
    struct CountingPrompter(Arc<AtomicUsize>);

    impl PasswordPrompter for CountingPrompter {
        fn prompt(&self, _user: &str, _database: &str) -> Result<SecretString> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(SecretString::new("secret".to_string()))
        }
    }

    /// Computes ADD_TWO and counts opens and closes
    #[derive(Default, Clone)]
    struct FakeConnector {
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        refuse: bool,
    }

    struct FakeConnection {
        closed: Arc<AtomicUsize>,
    }

    impl Connector for FakeConnector {
        fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn CallableConnection>> {
            if self.refuse {
                return Err(ProcVaultError::connection_failed(&descriptor.database, "listener refused"));
            }
            assert_eq!(descriptor.password.expose_secret(), "secret");
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeConnection { closed: Arc::clone(&self.closed) }))
        }
    }

    impl CallableConnection for FakeConnection {
        fn engine(&self) -> DbType {
            DbType::Sqlite
        }

        fn call_procedure(&mut self, call: &ProcedureCall) -> Result<CallOutcome> {
            if call.procedure != "ADD_TWO" {
                return Err(ProcVaultError::execution_failed(&call.procedure, "ORA-06550: not found"));
            }
            let sum: i64 = call
                .inputs
                .iter()
                .filter_map(|(_, v)| if let TypedValue::Integer(i) = v { Some(*i) } else { None })
                .sum();
            Ok(CallOutcome { outputs: vec![], return_value: Some(json!(sum)) })
        }

        fn execute_sql(&mut self, _sql: &str, _params: &[TypedValue]) -> Result<SqlOutcome> {
            Ok(SqlOutcome::Rows { columns: vec!["total".into()], rows: vec![vec![json!(5)]] })
        }

        fn close(self: Box<Self>) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn target() -> DatabaseTarget {
        DatabaseTarget { db_type: DbType::Sqlite, database: "testdb".into(), user: "app".into(), host: None }
    }

    fn proc_request(procedure: &str, in_spec: Option<&str>) -> ProcedureRequest {
        ProcedureRequest {
            target: target(),
            vault: VaultParams::default(),
            procedure: procedure.into(),
            in_spec: in_spec.map(String::from),
            out_spec: None,
        }
    }

    fn service(connector: FakeConnector) -> ExecutionService<FakeConnector> {
        ExecutionService::with_connector(AppConfig::default(), Some(Box::new(StubPrompter)), connector)
    }

    #[tokio::test]
    async fn test_add_two_end_to_end() {
        let connector = FakeConnector::default();
        let result = service(connector.clone())
            .execute_procedure(&proc_request("ADD_TWO", Some("a:INTEGER:2,b:INTEGER:3")))
            .await;

        assert_eq!(result.exit_code, 0);
        assert_eq!(Value::Object(result.data), json!({"result": 5}));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_closed_on_failure() {
        let connector = FakeConnector::default();
        let result = service(connector.clone()).execute_procedure(&proc_request("MISSING", None)).await;

        assert_eq!(result.exit_code, ProcVaultError::execution_failed("", "").exit_code());
        assert!(result.data["error"].as_str().unwrap().contains("MISSING"));
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_password_only_mode_does_not_connect() {
        let connector = FakeConnector::default();
        let result = service(connector.clone()).execute_procedure(&proc_request("  ", None)).await;

        assert_eq!(result, ExecutionResult::password_only());
        assert_eq!(connector.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bad_spec_fails_before_credentials() {
        let connector = FakeConnector::default();
        let svc = ExecutionService::with_connector(AppConfig::default(), None, connector.clone());
        let result = svc.execute_procedure(&proc_request("ADD_TWO", Some("a:WIDGET:1"))).await;

        assert_eq!(result.error_code.as_deref(), Some("INVALID_INPUT"));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_password_source_is_credential_error() {
        let svc = ExecutionService::with_connector(AppConfig::default(), None, FakeConnector::default());
        let result = svc.execute_procedure(&proc_request("ADD_TWO", None)).await;
        assert_eq!(result.error_code.as_deref(), Some("CREDENTIAL_UNAVAILABLE"));
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_partial_vault_params_rejected() {
        let mut request = proc_request("ADD_TWO", None);
        request.vault.vault_url = Some("https://vault".into());
        let result = service(FakeConnector::default()).execute_procedure(&request).await;
        assert_eq!(result.error_code.as_deref(), Some("INVALID_INPUT"));
    }

    #[tokio::test]
    async fn test_blank_vault_param_never_prompts() {
        let prompter = CountingPrompter::default();
        let connector = FakeConnector::default();
        let svc =
            ExecutionService::with_connector(AppConfig::default(), Some(Box::new(prompter.clone())), connector.clone());

        let mut request = proc_request("ADD_TWO", None);
        request.vault = VaultParams {
            vault_url: Some("https://vault".into()),
            role_id: Some(String::new()),
            secret_id: Some("s".into()),
            ait: Some("1".into()),
        };
        let result = svc.execute_procedure(&request).await;

        assert_eq!(result.error_code.as_deref(), Some("INVALID_INPUT"));
        assert!(result.message.unwrap().contains("3 of 4 supplied"));
        assert_eq!(prompter.0.load(Ordering::SeqCst), 0);
        assert_eq!(connector.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_direct_vault_failure_propagates() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/auth/approle/login");
            then.status(500).body("internal error");
        });

        let mut request = proc_request("ADD_TWO", None);
        request.vault = VaultParams {
            vault_url: Some(server.base_url()),
            role_id: Some("r".into()),
            secret_id: Some("s".into()),
            ait: Some("1".into()),
        };
        let connector = FakeConnector::default();
        let result = service(connector.clone()).execute_procedure(&request).await;

        assert_eq!(result.error_code.as_deref(), Some("VAULT_TRANSPORT"));
        assert!(result.message.unwrap().contains("login"));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connection_failure() {
        let connector = FakeConnector { refuse: true, ..Default::default() };
        let result = service(connector).execute_procedure(&proc_request("ADD_TWO", None)).await;
        assert_eq!(result.error_code.as_deref(), Some("CONNECTION_FAILED"));
        assert!(result.message.unwrap().contains("testdb"));
    }

    #[tokio::test]
    async fn test_sql_scalar_result() {
        let request = SqlRequest {
            target: target(),
            vault: VaultParams::default(),
            sql: Some("SELECT 2 + 3 AS total".into()),
            script: None,
            params: None,
        };
        let result = service(FakeConnector::default()).execute_sql(&request).await;
        assert_eq!(Value::Object(result.data), json!({"total": 5}));
        assert!(result.message.is_none());
    }

    #[tokio::test]
    async fn test_vault_lookup_without_entry() {
        let request = VaultRequest {
            user: "app".into(),
            database: "ORCL".into(),
            vault: VaultParams::default(),
            lookup: true,
        };
        let result = service(FakeConnector::default()).retrieve_password(&request).await;
        assert_eq!(result.error_code.as_deref(), Some("CREDENTIAL_UNAVAILABLE"));
    }

    #[tokio::test]
    async fn test_vault_direct_returns_password() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/auth/approle/login");
            then.status(200).json_body(json!({"auth": {"client_token": "s.t"}}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/v1/database/creds/1-orcl-app");
            then.status(200).json_body(json!({"data": {"username": "v", "password": "vault-pw"}}));
        });

        let request = VaultRequest {
            user: "app".into(),
            database: "ORCL".into(),
            vault: VaultParams {
                vault_url: Some(server.base_url()),
                role_id: Some("r".into()),
                secret_id: Some("s".into()),
                ait: Some("1".into()),
            },
            lookup: false,
        };
        let result = service(FakeConnector::default()).retrieve_password(&request).await;
        assert_eq!(Value::Object(result.data), json!({"password": "vault-pw"}));
    }

    #[test]
    fn test_shape_sql() {
        let (data, message) = shape_sql(&SqlOutcome::RowsAffected(3));
        assert_eq!(Value::Object(data), json!({"rows_affected": 3}));
        assert_eq!(message, "Rows affected: 3");

        let (data, message) = shape_sql(&SqlOutcome::Rows {
            columns: vec!["id".into(), "name".into()],
            rows: vec![vec![json!(1), json!("a")], vec![json!(2), json!("b")]],
        });
        assert_eq!(Value::Object(data), json!({"rows": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]}));
        assert!(message.starts_with("id | name"));
    }
}
