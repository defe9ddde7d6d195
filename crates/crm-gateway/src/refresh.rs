//! Proactive background token refresh
//!
//! Refreshes the access token shortly before its estimated expiry so most
//! requests never pay refresh latency. The background task goes through the
//! gateway's single-flight slot, so it never races a request-time refresh.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::RefreshError;
use crate::gateway::Gateway;

/// Spawn a task that checks the credential every `interval` and refreshes
/// it when it expires within `threshold`.
///
/// Failures are logged and retried on the next tick. The request path still
/// refreshes on rejection regardless of what this task does.
pub fn spawn_refresh_task(
    gateway: Gateway,
    interval: Duration,
    threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; the request path refreshes on rejection
        // until the first real cycle
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&gateway, threshold).await;
        }
    })
}

/// One check: refresh if the credential is due.
async fn refresh_cycle(gateway: &Gateway, threshold: Duration) {
    if !gateway.store().needs_refresh(threshold) {
        debug!("access token not near expiry, skipping refresh");
        return;
    }

    debug!("access token expiring within threshold, refreshing");
    match gateway.refresh_now().await {
        Ok(credential) => {
            info!(expires_at = credential.expires_at, "background token refresh succeeded");
        }
        Err(RefreshError::Denied(reason)) => {
            warn!(
                error = %reason,
                "refresh token rejected; re-run the consent flow to mint a new one"
            );
        }
        Err(e) => {
            warn!(error = %e, "background refresh failed, will retry next cycle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::tests::{gateway_for, start_mock_crm};
    use common::Secret;
    use crm_auth::{Credential, now_millis};

    #[tokio::test]
    async fn refresh_cycle_skips_valid_token() {
        let (url, mock) = start_mock_crm().await;
        let gateway = gateway_for(&url, "A1", "R1");
        gateway.store().set(Credential {
            access_token: Secret::from("A1"),
            refresh_token: Secret::from("R1"),
            expires_at: now_millis() + 3_600_000,
        });

        refresh_cycle(&gateway, Duration::from_secs(300)).await;

        assert_eq!(mock.token_calls(), 0);
        assert_eq!(gateway.store().get().access_token.expose(), "A1");
    }

    #[tokio::test]
    async fn refresh_cycle_refreshes_expiring_token() {
        let (url, mock) = start_mock_crm().await;
        let gateway = gateway_for(&url, "A1", "R1");

        refresh_cycle(&gateway, Duration::from_secs(300)).await;

        assert_eq!(mock.token_calls(), 1);
        let cred = gateway.store().get();
        assert_eq!(cred.access_token.expose(), "A2");
        assert_eq!(cred.refresh_token.expose(), "R1");
    }

    #[tokio::test]
    async fn refresh_cycle_denied_leaves_credential_unchanged() {
        let (url, mock) = start_mock_crm().await;
        mock.set_token_reply(400, r#"{"error":"invalid_code"}"#);
        let gateway = gateway_for(&url, "A1", "R1");

        refresh_cycle(&gateway, Duration::from_secs(300)).await;

        assert_eq!(mock.token_calls(), 1);
        assert_eq!(gateway.store().get().access_token.expose(), "A1");
        assert!(!gateway.is_refreshing());
    }

    #[tokio::test]
    async fn refresh_task_can_be_aborted() {
        let (url, _mock) = start_mock_crm().await;
        let gateway = gateway_for(&url, "A1", "R1");

        let handle = spawn_refresh_task(gateway, Duration::from_secs(3600), Duration::from_secs(300));
        handle.abort();
        let result = handle.await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
