//! Response classification for CRM API calls
//!
//! The CRM signals a bad access token in two ways depending on the endpoint:
//! HTTP 401, or an `INVALID_TOKEN` code in the JSON body (sometimes with a
//! 2xx status). Both are treated as the same failure. The body-code path is
//! a heuristic built from observed responses, not a documented contract.

use serde_json::Value;

/// Body `code` values that mean the access token was not accepted.
const INVALID_TOKEN_CODES: &[&str] = &["INVALID_TOKEN"];

/// Whether a CRM response rejects the access token.
pub fn is_auth_failure(status: u16, body: &Value) -> bool {
    if status == 401 {
        return true;
    }
    body.get("code")
        .and_then(Value::as_str)
        .is_some_and(|code| INVALID_TOKEN_CODES.contains(&code))
}

/// Decode a response body.
///
/// Search endpoints answer 204 with no body when nothing matches, so an
/// empty body is `null`. Non-JSON bodies are kept as a string.
pub fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
