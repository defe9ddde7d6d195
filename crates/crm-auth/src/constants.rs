//! CRM OAuth endpoints and protocol constants
//!
//! Defaults target the US data centre. Other regions use the same paths on a
//! different host; override `accounts_url` and `api_base_url` in config.

/// Accounts server hosting the authorize and token endpoints.
pub const DEFAULT_ACCOUNTS_URL: &str = "https://accounts.zoho.com";

/// REST API base for CRM module calls.
pub const DEFAULT_API_BASE_URL: &str = "https://www.zohoapis.com/crm/v2";

/// Token endpoint path for refresh and authorization-code grants.
pub const TOKEN_PATH: &str = "/oauth/v2/token";

/// Consent screen path.
pub const AUTHORIZE_PATH: &str = "/oauth/v2/auth";

/// Scopes requested on the consent screen.
pub const SCOPES: &str = "ZohoCRM.modules.ALL,ZohoCRM.settings.variables.ALL,ZohoCRM.settings.ALL";

/// Authorization header scheme. The CRM rejects `Bearer`.
pub const AUTH_SCHEME: &str = "Zoho-oauthtoken";

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;
