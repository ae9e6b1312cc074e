//! Credential Resolution
//!
//! Resolves a database password at run time by walking an ordered list of
//! strategies; the first one that yields a non-blank password wins:
//!
//! 1. [`PasswordSource::DirectVault`]: caller-supplied Vault coordinates.
//!    Failures propagate, the caller explicitly asked for this path.
//! 2. [`PasswordSource::RegistryVault`]: coordinates looked up by
//!    (user, database) in the configured registry. Failures are logged and
//!    resolution moves on.
//! 3. [`PasswordSource::Prompt`]: interactive prompt. Whatever it returns is
//!    accepted, empty included.
//!
//! If no strategy produces a password the result is
//! [`ProcVaultError::CredentialUnavailable`].

use std::io::{BufRead, IsTerminal};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{ProcVaultError, Result};
use crate::vault::{self, VaultCoordinates};

/// Password request for one invocation
#[derive(Debug, Clone)]
pub struct PasswordRequest {
    pub user: String,
    pub database: String,
    pub vault: Option<VaultCoordinates>,
}

impl PasswordRequest {
    /// Build a request from optional direct Vault parameters
    ///
    /// All four of `vault_url`, `role_id`, `secret_id` and `ait` must be
    /// supplied together or not at all. A parameter counts as supplied only
    /// when it is present and non-blank; a present-but-blank parameter makes
    /// the combination invalid. Values are trimmed.
    pub fn new(
        user: impl Into<String>,
        database: impl Into<String>,
        vault_url: Option<String>,
        role_id: Option<String>,
        secret_id: Option<String>,
        ait: Option<String>,
    ) -> Result<Self> {
        fn usable(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }

        let present = [&vault_url, &role_id, &secret_id, &ait].iter().filter(|v| v.is_some()).count();
        let fields = (usable(vault_url), usable(role_id), usable(secret_id), usable(ait));
        let supplied = [&fields.0, &fields.1, &fields.2, &fields.3].iter().filter(|v| v.is_some()).count();

        let vault = match fields {
            (Some(vault_url), Some(role_id), Some(secret_id), Some(ait)) => Some(VaultCoordinates {
                vault_url,
                role_id,
                secret_id: SecretString::new(secret_id),
                ait,
            }),
            _ if present == 0 => None,
            _ => {
                return Err(ProcVaultError::invalid_input(format!(
                    "Invalid vault parameter combination: {supplied} of 4 supplied. \
                     Either provide all vault parameters (vault-url, role-id, secret-id, ait) or none."
                )));
            }
        };

        Ok(Self { user: user.into(), database: database.into(), vault })
    }

    /// Request without direct Vault coordinates
    pub fn without_vault(user: impl Into<String>, database: impl Into<String>) -> Self {
        Self { user: user.into(), database: database.into(), vault: None }
    }

    /// True when all four direct Vault fields are present and non-blank
    #[must_use]
    pub fn has_direct_vault_params(&self) -> bool {
        self.vault.as_ref().is_some_and(|v| {
            !v.vault_url.trim().is_empty()
                && !v.role_id.trim().is_empty()
                && !v.secret_id.expose_secret().trim().is_empty()
                && !v.ait.trim().is_empty()
        })
    }
}

/// Source of an interactively entered password
pub trait PasswordPrompter: Send + Sync {
    /// Ask for the password of `user` on `database`
    fn prompt(&self, user: &str, database: &str) -> Result<SecretString>;
}

/// Prompt on the controlling terminal, or read one line from stdin when
/// stdin is not a terminal
#[derive(Debug, Default)]
pub struct ConsolePrompter;

impl PasswordPrompter for ConsolePrompter {
    fn prompt(&self, user: &str, database: &str) -> Result<SecretString> {
        if std::io::stdin().is_terminal() {
            let password = dialoguer::Password::new()
                .with_prompt(format!("Enter password for {user}@{database}"))
                .allow_empty_password(true)
                .interact()
                .map_err(|e| ProcVaultError::credential_unavailable(format!("Password prompt failed: {e}")))?;
            return Ok(SecretString::new(password));
        }

        eprint!("Enter password: ");
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| ProcVaultError::credential_unavailable(format!("Could not read password from stdin: {e}")))?;
        Ok(SecretString::new(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// One password strategy
pub enum PasswordSource {
    /// Use the request's own Vault coordinates
    DirectVault,
    /// Look coordinates up in the configured registry
    RegistryVault,
    /// Ask interactively
    Prompt(Box<dyn PasswordPrompter>),
}

impl PasswordSource {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DirectVault => "direct vault",
            Self::RegistryVault => "registry vault",
            Self::Prompt(_) => "prompt",
        }
    }
}

/// Ordered list of password strategies
pub struct PasswordResolver {
    sources: Vec<PasswordSource>,
    config: AppConfig,
}

impl PasswordResolver {
    /// Resolver with an explicit strategy order
    #[must_use]
    pub fn new(config: AppConfig, sources: Vec<PasswordSource>) -> Self {
        Self { sources, config }
    }

    /// Direct Vault, then registry Vault, then the given prompter (if any)
    #[must_use]
    pub fn standard(config: AppConfig, prompter: Option<Box<dyn PasswordPrompter>>) -> Self {
        let mut sources = vec![PasswordSource::DirectVault, PasswordSource::RegistryVault];
        if let Some(prompter) = prompter {
            sources.push(PasswordSource::Prompt(prompter));
        }
        Self::new(config, sources)
    }

    /// Resolve a password for `request`
    pub async fn resolve(&self, request: &PasswordRequest) -> Result<SecretString> {
        for source in &self.sources {
            debug!(source = source.name(), user = %request.user, database = %request.database, "trying password source");
            if let Some(password) = self.try_source(source, request).await? {
                info!(source = source.name(), user = %request.user, database = %request.database, "password resolved");
                return Ok(password);
            }
        }

        Err(ProcVaultError::credential_unavailable(format!(
            "No password could be resolved for user '{}' on database '{}'",
            request.user, request.database
        )))
    }

    async fn try_source(&self, source: &PasswordSource, request: &PasswordRequest) -> Result<Option<SecretString>> {
        match source {
            PasswordSource::DirectVault => {
                let Some(coords) = request.vault.as_ref().filter(|_| request.has_direct_vault_params()) else {
                    return Ok(None);
                };
                let password = self.fetch(coords, request).await?;
                Ok(non_blank(password))
            }
            PasswordSource::RegistryVault => {
                let Some(coords) = self.config.lookup_vault(&request.user, &request.database) else {
                    debug!(user = %request.user, database = %request.database, "no vault registry entry");
                    return Ok(None);
                };
                match self.fetch(&coords, request).await {
                    Ok(password) => Ok(non_blank(password)),
                    Err(e) => {
                        warn!(error = %e, "vault registry lookup failed, falling back");
                        Ok(None)
                    }
                }
            }
            PasswordSource::Prompt(prompter) => prompter.prompt(&request.user, &request.database).map(Some),
        }
    }

    async fn fetch(&self, coords: &VaultCoordinates, request: &PasswordRequest) -> Result<SecretString> {
        vault::fetch_database_password(
            coords,
            &self.config.vault.secret_path_template,
            &request.database,
            &request.user,
            self.config.vault.timeout_ms.map(Duration::from_millis),
        )
        .await
    }
}

/// A blank Vault password counts as no result
fn non_blank(password: SecretString) -> Option<SecretString> {
    if password.expose_secret().trim().is_empty() {
        warn!("vault returned a blank password, ignoring it");
        None
    } else {
        Some(password)
    }
}
