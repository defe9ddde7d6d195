//! CRM OAuth library
//!
//! Token endpoint client, consent-screen URL construction and the in-memory
//! credential store shared by every outbound CRM call. No dependency on the
//! proxy binary.
//!
//! Credential flow:
//! 1. Process start builds `Credential::bootstrap` from configured tokens
//! 2. `CredentialStore` hands snapshots to each outbound call
//! 3. On expiry the gateway calls `token::refresh_token()`
//! 4. `TokenResponse::into_credential()` result is published with `CredentialStore::set()`
//!
//! Operators mint the initial refresh token through `OAuthApp::authorization_url()`
//! and `token::exchange_code()`.

pub mod app;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use app::OAuthApp;
pub use constants::*;
pub use credentials::{Credential, CredentialStore, now_millis};
pub use error::{Error, Result};
pub use token::{TokenResponse, exchange_code, refresh_token};
