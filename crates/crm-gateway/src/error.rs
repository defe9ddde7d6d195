//! Error types for gateway operations

/// Why a token refresh could not produce a new credential.
///
/// Cloned to every caller waiting on the same refresh.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// The accounts server is throttling refreshes. Retry later.
    #[error("token refresh rate limited: {0}")]
    RateLimited(String),

    /// The refresh token was rejected (revoked, expired, wrong client).
    /// An operator has to re-run the consent flow.
    #[error("token refresh denied: {0}")]
    Denied(String),

    /// Transport failure, 5xx or timeout talking to the token endpoint.
    #[error("token endpoint unavailable: {0}")]
    Unavailable(String),
}

impl RefreshError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RefreshError::RateLimited(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            RefreshError::RateLimited(r) | RefreshError::Denied(r) | RefreshError::Unavailable(r) => r,
        }
    }
}

impl From<crm_auth::Error> for RefreshError {
    fn from(err: crm_auth::Error) -> Self {
        match err {
            crm_auth::Error::RateLimited(msg) => RefreshError::RateLimited(msg),
            crm_auth::Error::InvalidCredentials(msg) | crm_auth::Error::Config(msg) => {
                RefreshError::Denied(msg)
            }
            crm_auth::Error::Http(msg) | crm_auth::Error::TokenExchange(msg) => {
                RefreshError::Unavailable(msg)
            }
        }
    }
}

/// Errors surfaced by `Gateway::request`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The CRM answered with a non-auth failure, could not be reached, or
    /// rejected a freshly refreshed token. `status` is `None` when no
    /// response arrived.
    #[error("downstream request failed ({}): {payload}", describe_status(.status))]
    Downstream {
        status: Option<u16>,
        payload: String,
    },

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "no response".to_string(),
    }
}

/// Result alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downstream_display_with_status() {
        let err = Error::Downstream {
            status: Some(500),
            payload: "boom".into(),
        };
        assert_eq!(err.to_string(), "downstream request failed (status 500): boom");
    }

    #[test]
    fn downstream_display_without_response() {
        let err = Error::Downstream {
            status: None,
            payload: "timed out".into(),
        };
        assert_eq!(
            err.to_string(),
            "downstream request failed (no response): timed out"
        );
    }

    #[test]
    fn auth_errors_map_to_refresh_errors() {
        assert!(RefreshError::from(crm_auth::Error::RateLimited("x".into())).is_rate_limited());
        assert_eq!(
            RefreshError::from(crm_auth::Error::InvalidCredentials("revoked".into())),
            RefreshError::Denied("revoked".into())
        );
        assert_eq!(
            RefreshError::from(crm_auth::Error::Http("refused".into())),
            RefreshError::Unavailable("refused".into())
        );
        assert_eq!(
            RefreshError::from(crm_auth::Error::TokenExchange("502".into())).reason(),
            "502"
        );
    }

    #[test]
    fn refresh_error_is_transparent_in_gateway_error() {
        let err: Error = RefreshError::Denied("invalid_code".into()).into();
        assert_eq!(err.to_string(), "token refresh denied: invalid_code");
    }
}
