//! Configuration Management
//!
//! This module loads connection templates and the Vault registry.
//!
//! # Configuration Locations
//! - Explicit: `--config <path>` or `PROCVAULT_CONFIG` (used alone when set)
//! - Local: `.procvault/config.json` (team-shareable, per-project)
//! - Global: `~/.config/procvault/config.json` (per-user)
//!
//! # Resolution Precedence
//! Local settings override global ones. Registry entries from both files are
//! kept, local entries first, so a local entry shadows a global one for the
//! same (user, database) pair.
//!
//! Missing files resolve to the built-in defaults; malformed files are errors.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use tracing::{debug, warn};

use crate::error::{ProcVaultError, Result};
use crate::vault::VaultCoordinates;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "PROCVAULT_CONFIG";

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Connection templates per database type
    #[serde(default)]
    pub databases: DatabasesConfig,

    /// Vault client settings
    #[serde(default)]
    pub vault: VaultSettings,

    /// Registry of per-user Vault coordinates
    #[serde(default)]
    pub vaults: Vec<VaultEntry>,
}

/// Connection templates, grouped by database type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabasesConfig {
    #[serde(default)]
    pub oracle: OracleTemplates,

    #[serde(default)]
    pub sqlite: SqliteTemplates,
}

/// Oracle connection templates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OracleTemplates {
    /// Direct host connection (`--host` given)
    #[serde(default)]
    pub jdbc_thin: JdbcThinTemplate,

    /// Directory lookup across several LDAP servers (no host given)
    #[serde(default)]
    pub ldap: LdapTemplate,
}

/// Direct `host:port:service` template
///
/// Placeholders: `{host}`, `{port}`, `{database}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JdbcThinTemplate {
    pub template: String,
    pub port: u16,
}

impl Default for JdbcThinTemplate {
    fn default() -> Self {
        Self { template: "jdbc:oracle:thin:@{host}:{port}:{database}".to_string(), port: 1521 }
    }
}

/// LDAP failover template
///
/// `template` is rendered once per server with `{server}`, `{port}`,
/// `{database}` and `{context}`; the entries are joined by a single space and
/// appended to `prefix`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapTemplate {
    pub prefix: String,
    pub template: String,
    #[serde(default)]
    pub servers: Vec<String>,
    pub port: u16,
    #[serde(default)]
    pub context: String,
}

impl Default for LdapTemplate {
    fn default() -> Self {
        Self {
            prefix: "jdbc:oracle:thin:@".to_string(),
            template: "ldap://{server}:{port}/{database},{context}".to_string(),
            servers: Vec::new(),
            port: 389,
            context: String::new(),
        }
    }
}

/// In-process database templates
///
/// Placeholders: `{database}` and, for `file_template`, `{host}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteTemplates {
    /// Used when a host (directory) is given
    pub file_template: String,
    /// Used when no host is given
    pub memory_template: String,
}

impl Default for SqliteTemplates {
    fn default() -> Self {
        Self {
            file_template: "{host}/{database}".to_string(),
            memory_template: "file:{database}?mode=memory&cache=shared".to_string(),
        }
    }
}

/// Vault client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSettings {
    /// Dynamic credential path, placeholders `{ait}`, `{database}`, `{user}`
    pub secret_path_template: String,

    /// Per-request timeout; none by default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self { secret_path_template: "database/creds/{ait}-{database}-{user}".to_string(), timeout_ms: None }
    }
}

/// One registry entry: Vault coordinates for a (user, database) pair
///
/// Every field is optional in the file; an incomplete entry is skipped at
/// lookup time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultEntry {
    /// Database user this entry applies to
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub role_id: Option<String>,
    #[serde(default)]
    pub secret_id: Option<String>,
    #[serde(default)]
    pub ait: Option<String>,
}

impl VaultEntry {
    fn matches(&self, user: &str, database: &str) -> bool {
        self.id.as_deref() == Some(user) && self.db.as_deref() == Some(database)
    }

    /// Convert to coordinates; `None` when any field is missing or blank
    fn coordinates(&self) -> Option<VaultCoordinates> {
        fn field(v: &Option<String>) -> Option<&str> {
            v.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }

        Some(VaultCoordinates {
            vault_url: field(&self.base_url)?.to_string(),
            role_id: field(&self.role_id)?.to_string(),
            secret_id: SecretString::new(field(&self.secret_id)?.to_string()),
            ait: field(&self.ait)?.to_string(),
        })
    }
}

impl AppConfig {
    /// Look up Vault coordinates for (user, database) in the registry
    ///
    /// The first matching entry wins. A matching but incomplete entry yields
    /// `None` rather than falling through to later entries.
    #[must_use]
    pub fn lookup_vault(&self, user: &str, database: &str) -> Option<VaultCoordinates> {
        let entry = self.vaults.iter().find(|e| e.matches(user, database))?;
        let coords = entry.coordinates();
        if coords.is_none() {
            warn!(user, database, "vault registry entry is incomplete, ignoring it");
        }
        coords
    }
}

/// Get path to local config file (`.procvault/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        ProcVaultError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".procvault").join("config.json"))
}

/// Get path to global config file (`~/.config/procvault/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ProcVaultError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("procvault").join("config.json"))
}

/// Read a config file as raw JSON; a missing file yields an empty object
fn load_value(path: &Path) -> Result<serde_json::Value> {
    if !path.exists() {
        debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| ProcVaultError::config_error(format!("Could not read config file: {e}")))?;

    serde_json::from_str(&contents).map_err(|e| {
        ProcVaultError::config_error(format!("Invalid config file {}: {e}", path.display()))
    })
}

fn from_value(value: serde_json::Value) -> Result<AppConfig> {
    serde_json::from_value(value)
        .map_err(|e| ProcVaultError::config_error(format!("Invalid config file format: {e}")))
}

/// Load one config file; a missing file yields the defaults
pub fn load_config(path: &Path) -> Result<AppConfig> {
    from_value(load_value(path)?)
}

/// Load configuration with precedence
///
/// An explicit path (argument, then `PROCVAULT_CONFIG`) is loaded on its own
/// and must exist. Otherwise global and local files are merged.
pub fn load_with_precedence(explicit: Option<&Path>) -> Result<AppConfig> {
    let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    if let Some(path) = explicit.map(Path::to_path_buf).or(from_env) {
        if !path.exists() {
            return Err(ProcVaultError::config_error(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
        return load_config(&path);
    }

    let local_path = local_config_path()?;
    let global_path = global_config_path()?;

    match (local_path.exists(), global_path.exists()) {
        (false, false) => Ok(AppConfig::default()),
        (true, false) => load_config(&local_path),
        (false, true) => load_config(&global_path),
        (true, true) => {
            let mut merged = load_value(&global_path)?;
            merge(&mut merged, load_value(&local_path)?);
            from_value(merged)
        }
    }
}

/// Deep-merge `local` into `global`
///
/// Objects merge key by key with local values winning. The `vaults`
/// registry is concatenated with local entries first.
pub fn merge(global: &mut serde_json::Value, local: serde_json::Value) {
    use serde_json::Value;

    match (global, local) {
        (Value::Object(g), Value::Object(l)) => {
            for (key, local_value) in l {
                match g.get_mut(&key) {
                    Some(Value::Array(global_list)) if key == "vaults" => {
                        if let Value::Array(mut local_list) = local_value {
                            local_list.append(global_list);
                            *global_list = local_list;
                        }
                    }
                    Some(existing) => merge(existing, local_value),
                    None => {
                        g.insert(key, local_value);
                    }
                }
            }
        }
        (slot, local_value) => *slot = local_value,
    }
}
