//! Registered OAuth client application

use common::Secret;

use crate::constants::{AUTHORIZE_PATH, DEFAULT_ACCOUNTS_URL, SCOPES, TOKEN_PATH};
use crate::error::{Error, Result};

/// The client registration used for every token endpoint call.
#[derive(Debug, Clone)]
pub struct OAuthApp {
    pub accounts_url: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    /// Only needed for the authorization-code flow.
    pub redirect_uri: Option<String>,
}

impl OAuthApp {
    pub fn new(client_id: impl Into<String>, client_secret: Secret<String>) -> Self {
        Self {
            accounts_url: DEFAULT_ACCOUNTS_URL.to_string(),
            client_id: client_id.into(),
            client_secret,
            redirect_uri: None,
        }
    }

    pub fn with_accounts_url(mut self, accounts_url: impl Into<String>) -> Self {
        self.accounts_url = accounts_url.into();
        self
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    /// Absolute token endpoint URL.
    pub fn token_url(&self) -> String {
        format!("{}{}", self.accounts_url.trim_end_matches('/'), TOKEN_PATH)
    }

    /// Consent screen URL an operator opens to mint a refresh token.
    ///
    /// `access_type=offline` and `prompt=consent` make the accounts server
    /// issue a refresh token on every consent, not just the first.
    pub fn authorization_url(&self) -> Result<String> {
        let redirect_uri = self
            .redirect_uri
            .as_deref()
            .ok_or_else(|| Error::Config("redirect_uri is not configured".into()))?;
        if self.client_id.is_empty() {
            return Err(Error::Config("client_id is not configured".into()));
        }

        let mut url = reqwest::Url::parse(&format!(
            "{}{}",
            self.accounts_url.trim_end_matches('/'),
            AUTHORIZE_PATH
        ))
        .map_err(|e| Error::Config(format!("invalid accounts_url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("scope", SCOPES)
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("access_type", "offline")
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("prompt", "consent");
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> OAuthApp {
        OAuthApp::new("1000.CLIENT", Secret::from("shh"))
    }

    #[test]
    fn token_url_joins_without_double_slash() {
        let app = app().with_accounts_url("https://accounts.zoho.eu/");
        assert_eq!(app.token_url(), "https://accounts.zoho.eu/oauth/v2/token");
    }

    #[test]
    fn default_token_url() {
        assert_eq!(app().token_url(), "https://accounts.zoho.com/oauth/v2/token");
    }

    #[test]
    fn authorization_url_contains_required_params() {
        let url = app()
            .with_redirect_uri("https://dash.example/api/oauth/callback")
            .authorization_url()
            .unwrap();

        assert!(url.starts_with("https://accounts.zoho.com/oauth/v2/auth?"));
        assert!(url.contains("client_id=1000.CLIENT"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("scope=ZohoCRM.modules.ALL%2C"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fdash.example%2Fapi%2Foauth%2Fcallback"));
    }

    #[test]
    fn authorization_url_requires_redirect_uri() {
        let err = app().authorization_url().unwrap_err();
        assert!(err.to_string().contains("redirect_uri"), "got: {err}");
    }

    #[test]
    fn authorization_url_requires_client_id() {
        let err = OAuthApp::new("", Secret::from("s"))
            .with_redirect_uri("https://x/cb")
            .authorization_url()
            .unwrap_err();
        assert!(err.to_string().contains("client_id"), "got: {err}");
    }

    #[test]
    fn debug_hides_client_secret() {
        let debug = format!("{:?}", app());
        assert!(!debug.contains("shh"), "secret leaked: {debug}");
    }
}
