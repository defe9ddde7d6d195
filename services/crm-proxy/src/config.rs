//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret and tokens come from env vars or secret files and are
//! never read from the TOML directly.

use common::Secret;
use crm_auth::{Credential, DEFAULT_ACCOUNTS_URL, DEFAULT_API_BASE_URL, OAuthApp};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub crm: CrmConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Per-call timeout for downstream CRM requests.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// CRM API and OAuth client settings
#[derive(Debug, Deserialize)]
pub struct CrmConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_accounts_url")]
    pub accounts_url: String,
    /// Overridden by CRM_CLIENT_ID.
    #[serde(default)]
    pub client_id: String,
    /// Only needed for the operator consent flow.
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub proactive_refresh: bool,
    #[serde(default = "default_refresh_window")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_refresh_window")]
    pub refresh_threshold_secs: u64,
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default)]
    pub refresh_token_file: Option<PathBuf>,

    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    #[serde(skip)]
    pub refresh_token: Option<Secret<String>>,
    #[serde(skip)]
    pub access_token: Option<Secret<String>>,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            accounts_url: default_accounts_url(),
            client_id: String::new(),
            redirect_uri: None,
            refresh_timeout_secs: default_refresh_timeout(),
            proactive_refresh: true,
            refresh_interval_secs: default_refresh_window(),
            refresh_threshold_secs: default_refresh_window(),
            client_secret_file: None,
            refresh_token_file: None,
            client_secret: None,
            refresh_token: None,
            access_token: None,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    1000
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_accounts_url() -> String {
    DEFAULT_ACCOUNTS_URL.to_string()
}

fn default_refresh_timeout() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_refresh_window() -> u64 {
    300
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order, per secret:
    /// 1. env var (`CRM_CLIENT_SECRET`, `CRM_REFRESH_TOKEN`)
    /// 2. `*_file` path from config
    ///
    /// `CRM_ACCESS_TOKEN` is optional. Without it the first CRM call is
    /// rejected and triggers a refresh.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        for (name, url) in [
            ("api_base_url", &config.crm.api_base_url),
            ("accounts_url", &config.crm.accounts_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if config.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.crm.refresh_timeout_secs == 0 {
            return Err(common::Error::Config(
                "refresh_timeout_secs must be greater than 0".into(),
            ));
        }

        if config.crm.proactive_refresh && config.crm.refresh_interval_secs == 0 {
            return Err(common::Error::Config(
                "refresh_interval_secs must be greater than 0".into(),
            ));
        }

        if let Ok(id) = std::env::var("CRM_CLIENT_ID") {
            config.crm.client_id = id;
        }
        if config.crm.client_id.trim().is_empty() {
            return Err(common::Error::Config(
                "client_id is required (config or CRM_CLIENT_ID)".into(),
            ));
        }

        config.crm.client_secret = resolve_secret(
            "CRM_CLIENT_SECRET",
            config.crm.client_secret_file.as_deref(),
        )?;
        if config.crm.client_secret.is_none() {
            return Err(common::Error::Config(
                "client secret is required (CRM_CLIENT_SECRET or client_secret_file)".into(),
            ));
        }

        config.crm.refresh_token = resolve_secret(
            "CRM_REFRESH_TOKEN",
            config.crm.refresh_token_file.as_deref(),
        )?;
        if config.crm.refresh_token.is_none() {
            return Err(common::Error::Config(
                "refresh token is required (CRM_REFRESH_TOKEN or refresh_token_file)".into(),
            ));
        }

        config.crm.access_token = resolve_secret("CRM_ACCESS_TOKEN", None)?;

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("crm-proxy.toml")
    }
}

impl CrmConfig {
    /// OAuth client registration built from this config.
    pub fn oauth_app(&self) -> common::Result<OAuthApp> {
        let secret = self
            .client_secret
            .clone()
            .ok_or_else(|| common::Error::Config("client secret not resolved".into()))?;
        let mut app =
            OAuthApp::new(self.client_id.clone(), secret).with_accounts_url(&self.accounts_url);
        if let Some(uri) = &self.redirect_uri {
            app = app.with_redirect_uri(uri);
        }
        Ok(app)
    }

    /// Starting credential for the store.
    pub fn bootstrap_credential(&self) -> common::Result<Credential> {
        let refresh = self
            .refresh_token
            .clone()
            .ok_or_else(|| common::Error::Config("refresh token not resolved".into()))?;
        let access = self
            .access_token
            .clone()
            .unwrap_or_else(|| Secret::from(""));
        Ok(Credential::bootstrap(access, refresh))
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }
}

/// Read a secret from `env_var`, falling back to `file`. Blank values count
/// as absent.
fn resolve_secret(env_var: &str, file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env_var) {
        let value = value.trim().to_owned();
        if !value.is_empty() {
            return Ok(Some(Secret::new(value)));
        }
    }
    if let Some(file) = file {
        let value = std::fs::read_to_string(file).map_err(|e| {
            common::Error::Config(format!("failed to read {}: {e}", file.display()))
        })?;
        let value = value.trim().to_owned();
        if !value.is_empty() {
            return Ok(Some(Secret::new(value)));
        }
    }
    Ok(None)
}
