//! Authorized CRM request gateway
//!
//! Wraps every outbound CRM call with the current access token, detects a
//! rejected token and retries once after a single-flight refresh. Callers
//! never see a stale-token failure unless the refreshed token is rejected
//! too.
//!
//! Request lifecycle:
//! 1. Snapshot the credential from `CredentialStore`
//! 2. Send with `Authorization: Zoho-oauthtoken <access>`
//! 3. 401 or `INVALID_TOKEN` body → join or start the one in-flight refresh
//! 4. Resend once with the new token; a second rejection is returned as is
//!
//! `spawn_refresh_task` refreshes ahead of expiry through the same slot.

pub mod classify;
pub mod error;
pub mod gateway;
pub mod refresh;

pub use error::{Error, RefreshError, Result};
pub use gateway::{Gateway, GatewayConfig};
pub use refresh::spawn_refresh_task;
