//! HTTP error mapping
//!
//! Gateway and OAuth failures become generic JSON errors. Upstream payloads
//! and token endpoint bodies are logged, never returned to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use crm_gateway::RefreshError;
use thiserror::Error;
use tracing::{error, warn};

/// Per-request failures surfaced by route handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("missing x-school-id header")]
    MissingSchoolId,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error(transparent)]
    Gateway(#[from] crm_gateway::Error),

    #[error("grant code exchange failed: {0}")]
    CodeExchange(#[from] crm_auth::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingSchoolId | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotConfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Gateway(crm_gateway::Error::Refresh(refresh)) => match refresh {
                RefreshError::RateLimited(_) => StatusCode::SERVICE_UNAVAILABLE,
                RefreshError::Denied(_) => StatusCode::BAD_GATEWAY,
                RefreshError::Unavailable(_) => StatusCode::GATEWAY_TIMEOUT,
            },
            ApiError::Gateway(crm_gateway::Error::InvalidRequest(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Gateway(crm_gateway::Error::Downstream { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::CodeExchange(crm_auth::Error::RateLimited(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::CodeExchange(crm_auth::Error::Config(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::CodeExchange(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message safe to show to a dashboard user.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::MissingSchoolId => "Missing school ID".into(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::NotConfigured(what) => format!("{what} is not configured"),
            ApiError::Gateway(crm_gateway::Error::Refresh(refresh)) => match refresh {
                RefreshError::RateLimited(_) => {
                    "CRM is rate limiting token refreshes, try again shortly".into()
                }
                RefreshError::Denied(_) => "CRM session issue, contact an administrator".into(),
                RefreshError::Unavailable(_) => "CRM authorization timed out".into(),
            },
            ApiError::Gateway(_) => "CRM request failed".into(),
            ApiError::CodeExchange(crm_auth::Error::RateLimited(_)) => {
                "CRM is rate limiting token requests, try again shortly".into()
            }
            ApiError::CodeExchange(_) => "Grant code exchange failed".into(),
        }
    }

    /// Log the failure and render the JSON error body.
    pub fn respond(self, request_id: &str) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(request_id, status = status.as_u16(), error = %self, "request failed");
        } else {
            warn!(request_id, status = status.as_u16(), error = %self, "request rejected");
        }
        error_response(status, &self.public_message(), request_id)
    }
}

/// JSON error response: {"error":{"type":"crm_error","message":"...","request_id":"req_..."}}
pub fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type(status),
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn error_type(status: StatusCode) -> &'static str {
    if status.is_client_error() {
        "invalid_request"
    } else {
        "crm_error"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn refresh_errors_map_to_distinct_statuses() {
        let rate_limited: ApiError =
            crm_gateway::Error::from(RefreshError::RateLimited("slow down".into())).into();
        let denied: ApiError =
            crm_gateway::Error::from(RefreshError::Denied("invalid_code".into())).into();
        let unavailable: ApiError =
            crm_gateway::Error::from(RefreshError::Unavailable("timed out".into())).into();

        assert_eq!(rate_limited.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(rate_limited.public_message().contains("try again"));
        assert_eq!(denied.status(), StatusCode::BAD_GATEWAY);
        assert!(denied.public_message().contains("session issue"));
        assert_eq!(unavailable.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn downstream_error_is_bad_gateway() {
        let err: ApiError = crm_gateway::Error::Downstream {
            status: Some(500),
            payload: "internal".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.public_message(), "CRM request failed");
    }

    #[test]
    fn code_exchange_denied_is_bad_gateway() {
        let err = ApiError::from(crm_auth::Error::InvalidCredentials("invalid_code".into()));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(!err.public_message().contains("invalid_code"));
    }

    #[test]
    fn missing_school_id_is_bad_request() {
        assert_eq!(ApiError::MissingSchoolId.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn respond_renders_error_envelope_without_payload() {
        let err: ApiError = crm_gateway::Error::Downstream {
            status: Some(400),
            payload: r#"{"code":"INVALID_QUERY","details":{"secret":"x"}}"#.into(),
        }
        .into();
        let response = err.respond("req_abc");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "crm_error");
        assert_eq!(json["error"]["request_id"], "req_abc");
        assert_eq!(json["error"]["message"], "CRM request failed");
        assert!(!json.to_string().contains("INVALID_QUERY"));
    }

    #[tokio::test]
    async fn client_errors_use_invalid_request_type() {
        let json = body_json(ApiError::MissingSchoolId.respond("req_1")).await;
        assert_eq!(json["error"]["type"], "invalid_request");
        assert_eq!(json["error"]["message"], "Missing school ID");
    }
}
