//! Connection String Builder
//!
//! Pure function from (db type, database, user, password, optional host) to a
//! [`ConnectionDescriptor`]. Templates come from configuration and are filled
//! in by plain textual substitution of `{name}` placeholders.
//!
//! - Oracle with a host: direct `host:port:service` URL
//! - Oracle without a host: LDAP URL listing every configured directory
//!   server; the driver handles failover between them
//! - SQLite with a host: file path (host is the directory)
//! - SQLite without a host: shared in-memory database named after `database`

use std::fmt;
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::config::DatabasesConfig;
use crate::error::{ProcVaultError, Result};

/// Supported database types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// Oracle network database
    Oracle,
    /// `SQLite` in-process database (local and test use)
    Sqlite,
}

impl DbType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Oracle => "oracle",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbType {
    type Err = ProcVaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oracle" => Ok(Self::Oracle),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(ProcVaultError::config_error(format!("Unsupported database type '{other}'"))),
        }
    }
}

/// Everything needed to open exactly one connection
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    pub db_type: DbType,
    /// Logical database id, kept for error context
    pub database: String,
    pub url: String,
    pub user: String,
    pub password: SecretString,
}

/// Replace each `{key}` in `template` with its value
#[must_use]
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| acc.replace(&format!("{{{key}}}"), value))
}

/// Build a connection descriptor from configured templates
pub fn build(
    config: &DatabasesConfig,
    db_type: DbType,
    database: &str,
    user: &str,
    password: SecretString,
    host: Option<&str>,
) -> Result<ConnectionDescriptor> {
    let database = database.trim();
    if database.is_empty() {
        return Err(ProcVaultError::invalid_input("Database must not be empty"));
    }
    if user.trim().is_empty() {
        return Err(ProcVaultError::invalid_input("User must not be empty"));
    }
    let host = host.map(str::trim).filter(|h| !h.is_empty());

    let url = match db_type {
        DbType::Oracle => oracle_url(config, database, host)?,
        DbType::Sqlite => sqlite_url(config, database, host)?,
    };

    Ok(ConnectionDescriptor {
        db_type,
        database: database.to_string(),
        url,
        user: user.trim().to_string(),
        password,
    })
}

fn oracle_url(config: &DatabasesConfig, database: &str, host: Option<&str>) -> Result<String> {
    if let Some(host) = host {
        let thin = &config.oracle.jdbc_thin;
        require_template("databases.oracle.jdbc_thin.template", &thin.template)?;
        let port = thin.port.to_string();
        return Ok(render(&thin.template, &[("host", host), ("port", &port), ("database", database)]));
    }

    let ldap = &config.oracle.ldap;
    require_template("databases.oracle.ldap.template", &ldap.template)?;
    let servers: Vec<&str> = ldap.servers.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    if servers.is_empty() {
        return Err(ProcVaultError::config_error(
            "No LDAP servers configured (databases.oracle.ldap.servers) and no host given",
        ));
    }

    let port = ldap.port.to_string();
    let entries: Vec<String> = servers
        .iter()
        .map(|server| {
            render(
                &ldap.template,
                &[("server", server), ("port", &port), ("database", database), ("context", &ldap.context)],
            )
        })
        .collect();

    Ok(format!("{}{}", ldap.prefix, entries.join(" ")))
}

fn sqlite_url(config: &DatabasesConfig, database: &str, host: Option<&str>) -> Result<String> {
    let templates = &config.sqlite;
    match host {
        Some(host) => {
            require_template("databases.sqlite.file_template", &templates.file_template)?;
            Ok(render(&templates.file_template, &[("host", host.trim_end_matches('/')), ("database", database)]))
        }
        None => {
            require_template("databases.sqlite.memory_template", &templates.memory_template)?;
            Ok(render(&templates.memory_template, &[("database", database)]))
        }
    }
}

fn require_template(key: &str, template: &str) -> Result<()> {
    if template.trim().is_empty() {
        return Err(ProcVaultError::config_error(format!("Connection template {key} is not configured")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LdapTemplate;
    use pretty_assertions::assert_eq;

    fn pw() -> SecretString {
        SecretString::new("pw".to_string())
    }

    fn ldap_config() -> DatabasesConfig {
        let mut config = DatabasesConfig::default();
        config.oracle.ldap = LdapTemplate {
            servers: vec!["ldap1.example.com".into(), "ldap2.example.com".into()],
            port: 1389,
            context: "cn=OracleContext,dc=example,dc=com".into(),
            ..LdapTemplate::default()
        };
        config
    }

    #[test]
    fn test_oracle_ldap_lists_every_server() {
        let descriptor = build(&ldap_config(), DbType::Oracle, "ORCL", "app", pw(), None).unwrap();

        assert_eq!(
            descriptor.url,
            "jdbc:oracle:thin:@ldap://ldap1.example.com:1389/ORCL,cn=OracleContext,dc=example,dc=com \
             ldap://ldap2.example.com:1389/ORCL,cn=OracleContext,dc=example,dc=com"
        );
        assert_eq!(descriptor.url.matches("ldap1.example.com").count(), 1);
        assert_eq!(descriptor.url.matches("ldap2.example.com").count(), 1);
        // One context per directory entry
        assert_eq!(descriptor.url.matches("cn=OracleContext").count(), 2);
        assert_eq!(descriptor.user, "app");
    }

    #[test]
    fn test_oracle_direct_host() {
        let descriptor = build(&ldap_config(), DbType::Oracle, "ORCL", "app", pw(), Some("db-host")).unwrap();
        assert_eq!(descriptor.url, "jdbc:oracle:thin:@db-host:1521:ORCL");
    }

    #[test]
    fn test_oracle_without_servers_or_host() {
        let err = build(&DatabasesConfig::default(), DbType::Oracle, "ORCL", "app", pw(), None).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_sqlite_urls() {
        let config = DatabasesConfig::default();
        let mem = build(&config, DbType::Sqlite, "testdb", "app", pw(), None).unwrap();
        assert_eq!(mem.url, "file:testdb?mode=memory&cache=shared");

        let file = build(&config, DbType::Sqlite, "app.db", "app", pw(), Some("/var/data/")).unwrap();
        assert_eq!(file.url, "/var/data/app.db");
    }

    #[test]
    fn test_db_type_parsing() {
        assert_eq!("ORACLE".parse::<DbType>().unwrap(), DbType::Oracle);
        assert_eq!("sqlite".parse::<DbType>().unwrap(), DbType::Sqlite);
        let err = "db2".parse::<DbType>().unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_missing_identity_rejected() {
        let config = DatabasesConfig::default();
        assert!(build(&config, DbType::Sqlite, " ", "app", pw(), None).is_err());
        assert!(build(&config, DbType::Sqlite, "db", "", pw(), None).is_err());
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        assert_eq!(render("{a}-{b}", &[("a", "1")]), "1-{b}");
    }
}
