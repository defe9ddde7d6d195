//! Token endpoint calls
//!
//! Two grants POST to the same endpoint with parameters in the query string:
//! 1. `refresh_token`: mint a new access token from the long-lived refresh token
//! 2. `authorization_code`: operator bootstrap after the consent screen
//!
//! The accounts server reports some failures with HTTP 200 and an `error`
//! field, so the body is inspected before the status is trusted.

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app::OAuthApp;
use crate::constants::DEFAULT_EXPIRES_IN_SECS;
use crate::credentials::Credential;
use crate::error::{Error, Result};

/// Phrases the accounts server uses when throttling refreshes.
const RATE_LIMIT_PATTERNS: &[&str] = &["too many requests", "rate limit"];

/// Successful token endpoint response.
///
/// `expires_in` is a delta in seconds. `refresh_token` is only present for
/// the authorization-code grant; refresh responses reuse the held token.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_domain: Option<String>,
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN_SECS
}

impl TokenResponse {
    /// Build the credential that replaces the current one.
    ///
    /// `held_refresh` is kept unless the response carries a new refresh token.
    pub fn into_credential(self, held_refresh: &Secret<String>, now_millis: u64) -> Credential {
        let refresh_token = match self.refresh_token {
            Some(rotated) => Secret::new(rotated),
            None => held_refresh.clone(),
        };
        Credential {
            access_token: Secret::new(self.access_token),
            refresh_token,
            expires_at: now_millis.saturating_add(self.expires_in.saturating_mul(1000)),
        }
    }
}

/// Refresh an access token.
pub async fn refresh_token(
    client: &reqwest::Client,
    app: &OAuthApp,
    refresh: &Secret<String>,
) -> Result<TokenResponse> {
    let response = client
        .post(app.token_url())
        .query(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh.expose().as_str()),
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret.expose().as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Http(format!("reading token refresh response: {e}")))?;
    debug!(status, "token endpoint answered refresh");
    parse_token_body(status, &body)
}

/// Exchange a consent-screen grant code for an access/refresh token pair.
pub async fn exchange_code(
    client: &reqwest::Client,
    app: &OAuthApp,
    code: &str,
) -> Result<TokenResponse> {
    let redirect_uri = app
        .redirect_uri
        .as_deref()
        .ok_or_else(|| Error::Config("redirect_uri is not configured".into()))?;

    let response = client
        .post(app.token_url())
        .query(&[
            ("grant_type", "authorization_code"),
            ("client_id", app.client_id.as_str()),
            ("client_secret", app.client_secret.expose().as_str()),
            ("redirect_uri", redirect_uri),
            ("code", code),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Http(format!("reading token exchange response: {e}")))?;
    parse_token_body(status, &body)
}

/// Interpret a token endpoint response.
pub fn parse_token_body(status: u16, body: &str) -> Result<TokenResponse> {
    let value: serde_json::Value = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
    let has_error_field = value.get("error").is_some();

    if !(200..300).contains(&status) || has_error_field {
        return Err(classify_failure(status, body));
    }

    serde_json::from_value::<TokenResponse>(value)
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Classify a failed token endpoint response.
///
/// Rate limiting is reported with varying statuses (400, 429) but a stable
/// description, so the body is matched first. 5xx is the server's problem,
/// not the refresh token's. Everything else is a denial.
pub fn classify_failure(status: u16, body: &str) -> Error {
    let lower = body.to_lowercase();
    if status == 429 || RATE_LIMIT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Error::RateLimited(format!("token endpoint returned {status}: {body}"));
    }
    if status >= 500 {
        return Error::TokenExchange(format!("token endpoint returned {status}: {body}"));
    }
    Error::InvalidCredentials(format!("token endpoint returned {status}: {body}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use std::collections::HashMap;

    #[test]
    fn token_response_defaults_expiry() {
        let token: TokenResponse = serde_json::from_str(r#"{"access_token":"A2"}"#).unwrap();
        assert_eq!(token.access_token, "A2");
        assert_eq!(token.expires_in, 3600);
        assert!(token.refresh_token.is_none());
    }

    #[test]
    fn into_credential_keeps_held_refresh_token() {
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"A2","expires_in":3600}"#).unwrap();
        let cred = token.into_credential(&Secret::from("R1"), 1_000);
        assert_eq!(cred.access_token.expose(), "A2");
        assert_eq!(cred.refresh_token.expose(), "R1");
        assert_eq!(cred.expires_at, 1_000 + 3_600_000);
    }

    #[test]
    fn into_credential_takes_rotated_refresh_token() {
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"A2","refresh_token":"R2","expires_in":60}"#)
                .unwrap();
        let cred = token.into_credential(&Secret::from("R1"), 0);
        assert_eq!(cred.refresh_token.expose(), "R2");
        assert_eq!(cred.expires_at, 60_000);
    }

    #[test]
    fn parse_success_body() {
        let token = parse_token_body(
            200,
            r#"{"access_token":"A2","api_domain":"https://www.zohoapis.com","token_type":"Bearer","expires_in":3600}"#,
        )
        .unwrap();
        assert_eq!(token.access_token, "A2");
        assert_eq!(token.api_domain.as_deref(), Some("https://www.zohoapis.com"));
    }

    #[test]
    fn parse_200_with_error_field_is_denied() {
        let err = parse_token_body(200, r#"{"error":"invalid_code"}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)), "got: {err:?}");
    }

    #[test]
    fn parse_rate_limited_description() {
        let body = r#"{"error_description":"You have made too many requests continuously. Please try again after some time.","error":"Access Denied","status":"failure"}"#;
        let err = parse_token_body(400, body).unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)), "got: {err:?}");
    }

    #[test]
    fn classify_429_is_rate_limited() {
        assert!(matches!(classify_failure(429, ""), Error::RateLimited(_)));
    }

    #[test]
    fn classify_5xx_is_exchange_failure() {
        assert!(matches!(
            classify_failure(503, "unavailable"),
            Error::TokenExchange(_)
        ));
    }

    #[test]
    fn classify_rate_limit_case_insensitive() {
        assert!(matches!(
            classify_failure(400, "TOO MANY REQUESTS"),
            Error::RateLimited(_)
        ));
    }

    #[test]
    fn parse_success_without_access_token_fails() {
        let err = parse_token_body(200, r#"{"expires_in":3600}"#).unwrap_err();
        assert!(matches!(err, Error::TokenExchange(_)), "got: {err:?}");
    }

    /// Mock accounts server that records query params and answers with `reply`.
    async fn start_token_server(
        reply: &'static str,
    ) -> (String, tokio::sync::mpsc::UnboundedReceiver<HashMap<String, String>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let app = axum::Router::new().route(
            "/oauth/v2/token",
            axum::routing::post(move |Query(params): Query<HashMap<String, String>>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(params);
                    (
                        [(axum::http::header::CONTENT_TYPE, "application/json")],
                        reply,
                    )
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (url, rx)
    }

    #[tokio::test]
    async fn refresh_sends_grant_parameters() {
        let (url, mut rx) = start_token_server(r#"{"access_token":"A2","expires_in":3600}"#).await;
        let app = OAuthApp::new("cid", Secret::from("csecret")).with_accounts_url(url);

        let token = refresh_token(&reqwest::Client::new(), &app, &Secret::from("R1"))
            .await
            .unwrap();
        assert_eq!(token.access_token, "A2");

        let params = rx.recv().await.unwrap();
        assert_eq!(params["grant_type"], "refresh_token");
        assert_eq!(params["refresh_token"], "R1");
        assert_eq!(params["client_id"], "cid");
        assert_eq!(params["client_secret"], "csecret");
    }

    #[tokio::test]
    async fn exchange_code_sends_grant_code() {
        let (url, mut rx) = start_token_server(
            r#"{"access_token":"A1","refresh_token":"R1","api_domain":"https://www.zohoapis.com","expires_in":3600}"#,
        )
        .await;
        let app = OAuthApp::new("cid", Secret::from("csecret"))
            .with_accounts_url(url)
            .with_redirect_uri("http://localhost/cb");

        let token = exchange_code(&reqwest::Client::new(), &app, "grant-123")
            .await
            .unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("R1"));

        let params = rx.recv().await.unwrap();
        assert_eq!(params["grant_type"], "authorization_code");
        assert_eq!(params["code"], "grant-123");
        assert_eq!(params["redirect_uri"], "http://localhost/cb");
    }

    #[tokio::test]
    async fn refresh_against_dead_endpoint_is_http_error() {
        let app = OAuthApp::new("cid", Secret::from("s")).with_accounts_url("http://127.0.0.1:1");
        let err = refresh_token(&reqwest::Client::new(), &app, &Secret::from("R1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got: {err:?}");
    }
}
