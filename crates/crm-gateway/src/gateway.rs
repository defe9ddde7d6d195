//! Authorized request gateway
//!
//! Every outbound CRM call goes through `Gateway::request`. A call is tried
//! with the current access token; if the CRM rejects the token, the gateway
//! refreshes it and tries exactly once more.
//!
//! Refreshes are single-flight. The refresh slot holds at most one shared
//! future; callers that find it occupied await that future instead of
//! hitting the token endpoint themselves. The future publishes the new
//! credential and empties the slot under the same lock before resolving, so
//! a caller checking the slot always sees either the in-flight refresh or
//! its published result.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use crm_auth::{
    AUTH_SCHEME, Credential, CredentialStore, DEFAULT_API_BASE_URL, OAuthApp, TokenResponse,
};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::classify;
use crate::error::{Error, RefreshError, Result};

type RefreshResult = std::result::Result<Arc<Credential>, RefreshError>;
type InFlightRefresh = Shared<BoxFuture<'static, RefreshResult>>;
type RefreshSlot = Mutex<Option<InFlightRefresh>>;

/// Downstream endpoints and time bounds.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub refresh_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            refresh_timeout: Duration::from_secs(15),
        }
    }
}

/// Which try of a logical call is running. A call never gets a third.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    AfterRefresh,
}

/// Result of one try that did not fail outright.
enum Outcome {
    Success(Value),
    Rejected { status: u16, payload: String },
}

/// Cheap to clone; all clones share the store and the refresh slot.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<CredentialStore>,
    app: OAuthApp,
    client: reqwest::Client,
    config: GatewayConfig,
    refresh_slot: Arc<RefreshSlot>,
}

impl Gateway {
    pub fn new(
        store: Arc<CredentialStore>,
        app: OAuthApp,
        client: reqwest::Client,
        config: GatewayConfig,
    ) -> Self {
        info!(
            api_base_url = %config.api_base_url,
            token_url = %app.token_url(),
            "gateway initialized"
        );
        Self {
            inner: Arc::new(Inner {
                store,
                app,
                client,
                config,
                refresh_slot: Arc::new(Mutex::new(None)),
            }),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    pub fn app(&self) -> &OAuthApp {
        &self.inner.app
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.inner.client
    }

    /// Whether a refresh is currently unresolved.
    pub fn is_refreshing(&self) -> bool {
        self.lock_slot().is_some()
    }

    /// Issue an authorized call and return the decoded response body.
    pub async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        self.request_with_query(method, path, &[], body).await
    }

    /// `request` with URL-encoded query parameters.
    #[instrument(skip_all, fields(method = %method, path = %path))]
    pub async fn request_with_query(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let mut attempt = Attempt::First;
        loop {
            let credential = self.inner.store.get();
            match self.send(&method, path, query, body, &credential).await? {
                Outcome::Success(value) => return Ok(value),
                Outcome::Rejected { status, payload } => match attempt {
                    Attempt::First => {
                        warn!(status, "access token rejected, refreshing");
                        self.refresh_after_rejection(&credential).await?;
                        attempt = Attempt::AfterRefresh;
                    }
                    Attempt::AfterRefresh => {
                        warn!(status, "refreshed access token rejected, giving up");
                        return Err(Error::Downstream {
                            status: Some(status),
                            payload,
                        });
                    }
                },
            }
        }
    }

    /// Refresh now, joining a refresh that is already in flight.
    pub async fn refresh_now(&self) -> std::result::Result<Arc<Credential>, RefreshError> {
        let flight = {
            let mut slot = self.lock_slot();
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    let flight = self.start_refresh(self.inner.store.get());
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Install a credential issued outside the refresh path (operator consent).
    ///
    /// Waits out an in-flight refresh so its publish cannot overwrite the
    /// installed credential, then sets it while holding the slot lock. The
    /// held refresh token is kept only if `token` carries none.
    pub async fn install(&self, token: TokenResponse) -> Arc<Credential> {
        loop {
            let flight = {
                let slot = self.lock_slot();
                match slot.as_ref() {
                    Some(flight) => flight.clone(),
                    None => {
                        let held = self.inner.store.get();
                        self.inner.store.set(
                            token.into_credential(&held.refresh_token, crm_auth::now_millis()),
                        );
                        info!("credential installed");
                        return self.inner.store.get();
                    }
                }
            };
            debug!("waiting for in-flight token refresh before installing credential");
            // Outcome is irrelevant; the installed credential replaces it either way
            let _ = flight.await;
        }
    }

    /// Obtain a credential newer than `rejected`.
    ///
    /// Joins the in-flight refresh if there is one. If the store already
    /// holds a different access token, the refresh this caller would start
    /// has already happened and the current credential is returned as is.
    async fn refresh_after_rejection(&self, rejected: &Credential) -> RefreshResult {
        let flight = {
            let mut slot = self.lock_slot();
            if let Some(flight) = slot.as_ref() {
                debug!("joining in-flight token refresh");
                flight.clone()
            } else {
                let current = self.inner.store.get();
                if current.access_token.expose() != rejected.access_token.expose() {
                    debug!("credential already replaced, retrying without refresh");
                    return Ok(current);
                }
                let flight = self.start_refresh(current);
                *slot = Some(flight.clone());
                flight
            }
        };
        flight.await
    }

    /// Build the shared refresh future. Caller must hold the slot lock and
    /// store the returned future in it.
    fn start_refresh(&self, held: Arc<Credential>) -> InFlightRefresh {
        let store = self.inner.store.clone();
        let slot: Weak<RefreshSlot> = Arc::downgrade(&self.inner.refresh_slot);
        let client = self.inner.client.clone();
        let app = self.inner.app.clone();
        let timeout = self.inner.config.refresh_timeout;

        debug!("starting token refresh");
        async move {
            let exchanged = tokio::time::timeout(
                timeout,
                crm_auth::refresh_token(&client, &app, &held.refresh_token),
            )
            .await;

            let fresh = match exchanged {
                Ok(Ok(token)) => Ok(token.into_credential(&held.refresh_token, crm_auth::now_millis())),
                Ok(Err(e)) => Err(RefreshError::from(e)),
                Err(_) => Err(RefreshError::Unavailable(format!(
                    "token refresh timed out after {}ms",
                    timeout.as_millis()
                ))),
            };

            let result = publish(&store, &slot, fresh);

            match &result {
                Ok(credential) => {
                    metrics::counter!("crm_token_refresh_total", "outcome" => "success").increment(1);
                    info!(expires_at = credential.expires_at, "token refresh succeeded");
                }
                Err(e) => {
                    let outcome = match e {
                        RefreshError::RateLimited(_) => "rate_limited",
                        RefreshError::Denied(_) => "denied",
                        RefreshError::Unavailable(_) => "unavailable",
                    };
                    metrics::counter!("crm_token_refresh_total", "outcome" => outcome).increment(1);
                    warn!(error = %e, "token refresh failed");
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    /// One authorized try against the CRM.
    async fn send(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        credential: &Credential,
    ) -> Result<Outcome> {
        let url = format!(
            "{}/{}",
            self.inner.config.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let authorization =
            HeaderValue::from_str(&format!("{AUTH_SCHEME} {}", credential.access_token.expose()))
                .map_err(|_| {
                    Error::InvalidRequest("access token is not a valid header value".into())
                })?;

        let mut request = self
            .inner
            .client
            .request(method.clone(), &url)
            .header(AUTHORIZATION, authorization)
            .timeout(self.inner.config.request_timeout);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                record_downstream("transport_error");
                let payload = if e.is_timeout() {
                    format!(
                        "timed out after {}ms",
                        self.inner.config.request_timeout.as_millis()
                    )
                } else {
                    e.to_string()
                };
                warn!(error = %payload, "downstream request failed");
                return Err(Error::Downstream {
                    status: None,
                    payload,
                });
            }
        };

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| Error::Downstream {
            status: Some(status),
            payload: format!("reading response body: {e}"),
        })?;
        let value = classify::parse_body(&text);

        if classify::is_auth_failure(status, &value) {
            record_downstream("rejected");
            return Ok(Outcome::Rejected {
                status,
                payload: text,
            });
        }
        if (200..300).contains(&status) {
            record_downstream("success");
            return Ok(Outcome::Success(value));
        }

        record_downstream("error");
        debug!(status, "downstream returned error status");
        Err(Error::Downstream {
            status: Some(status),
            payload: text,
        })
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<InFlightRefresh>> {
        self.inner
            .refresh_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Store a successful refresh and empty the slot in one critical section.
///
/// A caller that takes the slot lock afterwards sees the new credential in
/// the store, so it never starts a refresh for a token already replaced.
fn publish(
    store: &CredentialStore,
    slot: &Weak<RefreshSlot>,
    fresh: std::result::Result<Credential, RefreshError>,
) -> RefreshResult {
    let slot = slot.upgrade();
    let mut guard = slot
        .as_ref()
        .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner));
    let result = fresh.map(|credential| {
        store.set(credential);
        store.get()
    });
    if let Some(guard) = guard.as_mut() {
        **guard = None;
    }
    result
}

fn record_downstream(outcome: &'static str) {
    metrics::counter!("crm_downstream_requests_total", "outcome" => outcome).increment(1);
}
