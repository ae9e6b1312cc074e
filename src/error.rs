//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout procvault.
//! Every error maps to a stable error code for JSON output and to a distinct
//! non-zero process exit code.
//!
//! # Error Categories
//! - `InvalidInput`: Malformed parameter spec, missing field, unknown type token
//! - `CredentialUnavailable`: Every password strategy was exhausted
//! - `VaultTransport`: Vault login or secret fetch failed at the HTTP layer
//! - `ConnectionFailed`: Database connection could not be established
//! - `ExecutionFailed`: Procedure or SQL execution failed after connecting
//! - `ConfigError`: Configuration file, template or db-type errors
//!
//! Messages never carry passwords, tokens or secret ids.

use std::fmt;

use thiserror::Error;

/// Which Vault round trip failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultStep {
    /// AppRole login (`POST /v1/auth/approle/login`)
    Login,
    /// Dynamic credential read (`GET /v1/<path>`)
    CredentialFetch,
    /// Client construction, before any request was sent
    Request,
}

impl VaultStep {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::CredentialFetch => "credential fetch",
            Self::Request => "request",
        }
    }
}

impl fmt::Display for VaultStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for procvault operations
#[derive(Error, Debug)]
pub enum ProcVaultError {
    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No strategy produced a usable password
    #[error("Credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// Vault HTTP exchange failed
    #[error("Vault {step} failed: {detail}")]
    VaultTransport { step: VaultStep, detail: String },

    /// Database connection failed
    #[error("Connection to database '{database}' failed: {detail}")]
    ConnectionFailed { database: String, detail: String },

    /// Procedure or SQL execution failed
    #[error("Execution of '{target}' failed: {detail}")]
    ExecutionFailed { target: String, detail: String },

    /// Configuration error (file not found, invalid JSON, unknown db type, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProcVaultError {
    /// Convert error to error code string for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::CredentialUnavailable(_) => "CREDENTIAL_UNAVAILABLE",
            Self::VaultTransport { .. } => "VAULT_TRANSPORT",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::ExecutionFailed { .. } => "EXECUTION_FAILED",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Process exit code for this error class (never 0)
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) => 2,
            Self::CredentialUnavailable(_) => 3,
            Self::VaultTransport { .. } => 4,
            Self::ConnectionFailed { .. } => 5,
            Self::ExecutionFailed { .. } => 6,
            Self::ConfigError(_) => 7,
        }
    }

    /// Get human-readable error message
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a credential unavailable error
    pub fn credential_unavailable(message: impl Into<String>) -> Self {
        Self::CredentialUnavailable(message.into())
    }

    /// Create a Vault transport error for the given step
    pub fn vault_transport(step: VaultStep, detail: impl Into<String>) -> Self {
        Self::VaultTransport { step, detail: detail.into() }
    }

    /// Create a connection failed error wrapped with the target database
    pub fn connection_failed(database: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ConnectionFailed { database: database.into(), detail: detail.into() }
    }

    /// Create an execution failed error carrying the procedure name or statement
    pub fn execution_failed(target: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ExecutionFailed { target: target.into(), detail: detail.into() }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for procvault operations
pub type Result<T> = std::result::Result<T, ProcVaultError>;
