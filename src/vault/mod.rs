//! Vault Secret Client
//!
//! Stateless HTTP client for the two-step AppRole exchange:
//! 1. `POST /v1/auth/approle/login` with `{role_id, secret_id}` returns a
//!    short-lived client token (`auth.client_token`)
//! 2. `GET /v1/<path>` with `X-Vault-Token` returns a freshly generated
//!    database credential pair (`data.username`, `data.password`)
//!
//! Both calls fail fast: non-2xx statuses, transport errors and malformed or
//! incomplete JSON become `VaultTransport` errors naming the failing step.
//! Nothing is retried and the token is never cached. The underlying HTTP
//! client is owned by the `VaultClient` value and released when it drops.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{ProcVaultError, Result, VaultStep};

/// Longest response excerpt quoted in an error message
const MAX_BODY_EXCERPT: usize = 200;

/// Vault coordinates: where to log in and which role to read
///
/// All four fields are required; partial sets are rejected by
/// [`crate::credential::PasswordRequest::new`].
#[derive(Clone)]
pub struct VaultCoordinates {
    pub vault_url: String,
    pub role_id: String,
    pub secret_id: SecretString,
    /// Application identifier token, part of the dynamic role name
    pub ait: String,
}

impl fmt::Debug for VaultCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultCoordinates")
            .field("vault_url", &self.vault_url)
            .field("role_id", &self.role_id)
            .field("secret_id", &"[REDACTED]")
            .field("ait", &self.ait)
            .finish()
    }
}

/// Short-lived client token obtained from AppRole login
pub struct VaultToken(SecretString);

impl VaultToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::new(token.into()))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for VaultToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultToken([REDACTED])")
    }
}

/// Dynamic database credential pair
#[derive(Debug)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: SecretString,
}

#[derive(Deserialize)]
struct LoginResponse {
    auth: Option<LoginAuth>,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: Option<String>,
}

#[derive(Deserialize)]
struct SecretResponse {
    data: Option<SecretData>,
}

#[derive(Deserialize)]
struct SecretData {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct VaultErrorBody {
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    request_id: Option<String>,
}

/// Render the dynamic secret path for a role, lower-cased
///
/// Placeholders: `{ait}`, `{database}`, `{user}`.
#[must_use]
pub fn secret_path(template: &str, ait: &str, database: &str, user: &str) -> String {
    template
        .replace("{ait}", ait)
        .replace("{database}", database)
        .replace("{user}", user)
        .to_lowercase()
}

/// AppRole client bound to one Vault server
#[derive(Debug)]
pub struct VaultClient {
    http: reqwest::Client,
    base_url: String,
}

impl VaultClient {
    /// Create a client for `base_url`
    ///
    /// The URL must use `http://` or `https://`; trailing slashes are dropped.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let base_url = base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ProcVaultError::invalid_input(format!(
                "Vault URL must start with http:// or https://, got '{base_url}'"
            )));
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|e| {
            ProcVaultError::vault_transport(VaultStep::Request, format!("Could not build HTTP client: {e}"))
        })?;

        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange an AppRole (role_id, secret_id) pair for a client token
    pub async fn login(&self, role_id: &str, secret_id: &SecretString) -> Result<VaultToken> {
        let url = format!("{}/v1/auth/approle/login", self.base_url);
        info!(vault = %self.base_url, "authenticating with AppRole");

        let response = self
            .http
            .post(&url)
            .json(&json!({ "role_id": role_id, "secret_id": secret_id.expose_secret() }))
            .send()
            .await
            .map_err(|e| ProcVaultError::vault_transport(VaultStep::Login, format!("POST {url}: {e}")))?;

        let body: LoginResponse = read_json(response, VaultStep::Login).await?;
        let token = body
            .auth
            .and_then(|a| a.client_token)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ProcVaultError::vault_transport(VaultStep::Login, "response is missing auth.client_token")
            })?;

        debug!("AppRole login succeeded");
        Ok(VaultToken::new(token))
    }

    /// Read a dynamic database credential at `path` (relative to `/v1/`)
    pub async fn fetch_dynamic_secret(&self, token: &VaultToken, path: &str) -> Result<DatabaseCredentials> {
        let url = format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'));
        debug!(path, "reading dynamic database credential");

        let response = self
            .http
            .get(&url)
            .header("X-Vault-Token", token.expose())
            .send()
            .await
            .map_err(|e| {
                ProcVaultError::vault_transport(VaultStep::CredentialFetch, format!("GET {url}: {e}"))
            })?;

        let body: SecretResponse = read_json(response, VaultStep::CredentialFetch).await?;
        let data = body.data.ok_or_else(|| {
            ProcVaultError::vault_transport(VaultStep::CredentialFetch, "response is missing data")
        })?;
        let username = data.username.ok_or_else(|| {
            ProcVaultError::vault_transport(VaultStep::CredentialFetch, "response is missing data.username")
        })?;
        let password = data.password.ok_or_else(|| {
            ProcVaultError::vault_transport(VaultStep::CredentialFetch, "response is missing data.password")
        })?;

        Ok(DatabaseCredentials { username, password: SecretString::new(password) })
    }
}

/// Log in with `coords` and fetch the password for (user, database)
///
/// A fresh client is built for the exchange and dropped afterwards; the
/// token is used once.
pub async fn fetch_database_password(
    coords: &VaultCoordinates,
    path_template: &str,
    database: &str,
    user: &str,
    timeout: Option<Duration>,
) -> Result<SecretString> {
    let client = VaultClient::new(&coords.vault_url, timeout)?;
    let token = client.login(&coords.role_id, &coords.secret_id).await?;
    let path = secret_path(path_template, &coords.ait, database, user);
    let credentials = client.fetch_dynamic_secret(&token, &path).await?;

    info!(user, database, vault_user = %credentials.username, "database credential issued by Vault");
    Ok(credentials.password)
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response, step: VaultStep) -> Result<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ProcVaultError::vault_transport(step, format!("could not read response body: {e}")))?;

    if !status.is_success() {
        return Err(ProcVaultError::vault_transport(step, describe_failure(status, &text)));
    }

    serde_json::from_str(&text)
        .map_err(|e| ProcVaultError::vault_transport(step, format!("malformed JSON response: {e}")))
}

/// Summarise a failed Vault response: `Status: N | errors; Request ID: id`
fn describe_failure(status: StatusCode, body: &str) -> String {
    let mut detail = format!("Status: {}", status.as_u16());

    match serde_json::from_str::<VaultErrorBody>(body) {
        Ok(parsed) if !parsed.errors.is_empty() || parsed.request_id.is_some() => {
            if !parsed.errors.is_empty() {
                detail.push_str(" | ");
                detail.push_str(&parsed.errors.join("; "));
            }
            if let Some(id) = parsed.request_id {
                detail.push_str(&format!("; Request ID: {id}"));
            }
        }
        _ if !body.trim().is_empty() => {
            let excerpt: String = body.trim().chars().take(MAX_BODY_EXCERPT).collect();
            detail.push_str(&format!(" | {excerpt}"));
        }
        _ => {}
    }

    detail
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn coords(url: &str) -> VaultCoordinates {
        VaultCoordinates {
            vault_url: url.to_string(),
            role_id: "role-1".to_string(),
            secret_id: SecretString::new("secret-1".to_string()),
            ait: "12345".to_string(),
        }
    }

    #[test]
    fn test_secret_path_is_lowercased() {
        let path = secret_path("database/creds/{ait}-{database}-{user}", "AIT9", "ORCL", "App_User");
        assert_eq!(path, "database/creds/ait9-orcl-app_user");
    }

    #[test]
    fn test_rejects_non_http_url() {
        let err = VaultClient::new("vault.example.com", None).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");

        let client = VaultClient::new("https://vault.example.com/", None).unwrap();
        assert_eq!(client.base_url(), "https://vault.example.com");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", coords("https://vault"));
        assert!(!rendered.contains("secret-1"));
        assert!(format!("{:?}", VaultToken::new("s.abc")).contains("REDACTED"));
    }

    #[test]
    fn test_describe_failure_with_vault_errors() {
        let detail = describe_failure(
            StatusCode::FORBIDDEN,
            r#"{"errors":["permission denied","invalid role"],"request_id":"req-7"}"#,
        );
        assert_eq!(detail, "Status: 403 | permission denied; invalid role; Request ID: req-7");

        let detail = describe_failure(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(detail, "Status: 502 | upstream down");
    }

    #[tokio::test]
    async fn test_login_and_fetch() {
        let server = MockServer::start();
        let login = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/auth/approle/login")
                .json_body(serde_json::json!({"role_id": "role-1", "secret_id": "secret-1"}));
            then.status(200).json_body(serde_json::json!({"auth": {"client_token": "s.token"}}));
        });
        let fetch = server.mock(|when, then| {
            when.method(GET)
                .path("/v1/database/creds/12345-orcl-app")
                .header("x-vault-token", "s.token");
            then.status(200)
                .json_body(serde_json::json!({"data": {"username": "v-app-xyz", "password": "pw"}}));
        });

        let password = fetch_database_password(
            &coords(&server.base_url()),
            "database/creds/{ait}-{database}-{user}",
            "ORCL",
            "APP",
            None,
        )
        .await
        .unwrap();

        assert_eq!(password.expose_secret(), "pw");
        login.assert();
        fetch.assert();
    }

    #[tokio::test]
    async fn test_login_forbidden_names_login_step() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/auth/approle/login");
            then.status(403).json_body(serde_json::json!({"errors": ["permission denied"]}));
        });

        let client = VaultClient::new(&server.base_url(), None).unwrap();
        let err = client.login("role-1", &SecretString::new("bad".to_string())).await.unwrap_err();

        assert!(matches!(err, ProcVaultError::VaultTransport { step: VaultStep::Login, .. }));
        assert!(err.message().contains("login"));
        assert!(err.message().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_login_missing_token() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/auth/approle/login");
            then.status(200).json_body(serde_json::json!({"auth": {}}));
        });

        let client = VaultClient::new(&server.base_url(), None).unwrap();
        let err = client.login("role-1", &SecretString::new("s".to_string())).await.unwrap_err();
        assert!(err.message().contains("client_token"));
    }

    #[tokio::test]
    async fn test_fetch_malformed_json_names_fetch_step() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/database/creds/role");
            then.status(200).body("<html>not json</html>");
        });

        let client = VaultClient::new(&server.base_url(), None).unwrap();
        let err = client
            .fetch_dynamic_secret(&VaultToken::new("t"), "database/creds/role")
            .await
            .unwrap_err();

        assert!(matches!(err, ProcVaultError::VaultTransport { step: VaultStep::CredentialFetch, .. }));
        assert!(err.message().contains("malformed JSON"));
    }

    #[tokio::test]
    async fn test_fetch_missing_password() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/database/creds/role");
            then.status(200).json_body(serde_json::json!({"data": {"username": "u"}}));
        });

        let client = VaultClient::new(&server.base_url(), None).unwrap();
        let err = client
            .fetch_dynamic_secret(&VaultToken::new("t"), "/database/creds/role")
            .await
            .unwrap_err();
        assert!(err.message().contains("data.password"));
    }
}
