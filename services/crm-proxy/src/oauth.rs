//! Operator consent flow
//!
//! Mints the long-lived refresh token: the operator opens the consent URL,
//! the accounts server redirects back with a grant code, and the callback
//! exchanges it and installs the result in the credential store.

use crm_gateway::Gateway;
use serde_json::{Value, json};
use tracing::info;

use crate::error::ApiError;

/// Consent screen URL for the configured client.
pub fn authorize_url(gateway: &Gateway) -> Result<Value, ApiError> {
    let url = gateway.app().authorization_url().map_err(|e| match e {
        crm_auth::Error::Config(_) if gateway.app().redirect_uri.is_none() => {
            ApiError::NotConfigured("redirect_uri")
        }
        other => ApiError::CodeExchange(other),
    })?;
    Ok(json!({ "redirect_url": url }))
}

/// Exchange a grant code and install the issued credential.
pub async fn callback(gateway: &Gateway, code: Option<&str>) -> Result<Value, ApiError> {
    let code = code
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Grant code is missing".into()))?;
    if gateway.app().redirect_uri.is_none() {
        return Err(ApiError::NotConfigured("redirect_uri"));
    }

    let token = crm_auth::exchange_code(gateway.http_client(), gateway.app(), code).await?;
    let api_domain = token.api_domain.clone();
    let credential = gateway.install(token).await;

    info!(api_domain = ?api_domain, "grant code exchanged, credential installed");
    Ok(json!({
        "access_token": credential.access_token.expose(),
        "refresh_token": credential.refresh_token.expose(),
        "api_domain": api_domain,
    }))
}
