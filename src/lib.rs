//! procvault - Stored Procedure Executor with Vault-Resolved Credentials
//!
//! procvault runs a stored procedure (or raw SQL) against a database whose
//! password is never stored statically. Each invocation is one short
//! resolve-connect-execute-disconnect cycle:
//!
//! 1. Credential resolution: direct Vault AppRole coordinates, then a
//!    registry of per-user coordinates, then an interactive prompt
//! 2. Connection string synthesis: direct host URL or an LDAP URL listing
//!    every configured directory server
//! 3. Parameter marshalling: `name:type:value` IN specs and `name:type` OUT
//!    specs bound positionally into the call, OUT values read back by name
//!
//! # Module Organization
//! - [`error`] - Error types and exit codes
//! - [`output`] - Execution results, text rendering and JSON envelopes
//! - [`config`] - Connection templates and the Vault registry
//! - [`connection`] - Connection string builder
//! - [`vault`] - Vault AppRole client
//! - [`credential`] - Ordered password resolution
//! - [`procedure`] - Parameter spec parsing and typed values
//! - [`sql`] - Comment stripping, script splitting, placeholder counting
//! - [`engine`] - Connection traits and native drivers
//! - [`executor`] - Procedure and SQL executors
//! - [`service`] - Per-invocation orchestrator

pub mod config;
pub mod connection;
pub mod credential;
pub mod engine;
pub mod error;
pub mod executor;
pub mod output;
pub mod procedure;
pub mod service;
pub mod sql;
pub mod vault;

// Re-export commonly used types for convenience
pub use config::AppConfig;
pub use connection::{ConnectionDescriptor, DbType};
pub use credential::{PasswordPrompter, PasswordRequest, PasswordResolver, PasswordSource};
pub use engine::{CallOutcome, CallableConnection, Connector, DriverConnector, ProcedureCall, SqlOutcome};
pub use error::{ProcVaultError, Result, VaultStep};
pub use executor::{ProcedureExecutor, SqlExecutor};
pub use output::{ErrorEnvelope, ErrorInfo, ExecutionResult, Metadata, SuccessEnvelope};
pub use procedure::{ParamType, ProcedureParam, TypedValue};
pub use service::{DatabaseTarget, ExecutionService, ProcedureRequest, SqlRequest, VaultParams, VaultRequest};
pub use vault::{VaultClient, VaultCoordinates};
