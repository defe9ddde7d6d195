//! School CRM proxy
//!
//! Single-binary service that:
//! 1. Loads the OAuth client and bootstrap tokens
//! 2. Serves school-scoped enquiry, application and school routes
//! 3. Sends every CRM call through the refreshing gateway
//! 4. Refreshes the access token ahead of expiry in the background

mod config;
mod criteria;
mod error;
mod metrics;
mod oauth;
mod records;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use crm_auth::CredentialStore;
use crm_gateway::{Gateway, GatewayConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{Instrument, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::error::ApiError;

/// Maximum time to wait for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Request counters for the health endpoint and drain logging.
#[derive(Clone)]
struct ServiceMetrics {
    requests_total: Arc<AtomicU64>,
    errors_total: Arc<AtomicU64>,
    in_flight: Arc<AtomicU64>,
    started_at: Instant,
}

impl ServiceMetrics {
    fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    gateway: Gateway,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` caps concurrently processed requests.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/api/crm/enquiries", post(enquiries_handler))
        .route("/api/crm/applications", post(applications_handler))
        .route("/api/crm/school", get(school_handler))
        .route("/api/oauth/authorize-url", get(authorize_url_handler))
        .route("/api/oauth/callback", get(callback_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Build the gateway from loaded configuration.
fn build_gateway(config: &Config) -> Result<Gateway> {
    let store = Arc::new(CredentialStore::new(config.crm.bootstrap_credential()?));
    let app = config.crm.oauth_app()?;
    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    Ok(Gateway::new(
        store,
        app,
        client,
        GatewayConfig {
            api_base_url: config.crm.api_base_url.clone(),
            request_timeout: Duration::from_secs(config.server.timeout_secs),
            refresh_timeout: config.crm.refresh_timeout(),
        },
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting crm-proxy");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        api_base_url = %config.crm.api_base_url,
        accounts_url = %config.crm.accounts_url,
        proactive_refresh = config.crm.proactive_refresh,
        bootstrap_access_token = config.crm.access_token.is_some(),
        "configuration loaded"
    );

    let gateway = build_gateway(&config)?;

    let refresh_task = config.crm.proactive_refresh.then(|| {
        info!(
            interval_secs = config.crm.refresh_interval_secs,
            threshold_secs = config.crm.refresh_threshold_secs,
            "starting background token refresh"
        );
        crm_gateway::spawn_refresh_task(
            gateway.clone(),
            config.crm.refresh_interval(),
            config.crm.refresh_threshold(),
        )
    });

    let metrics = ServiceMetrics::new();
    let app_state = AppState {
        gateway,
        metrics: metrics.clone(),
        prometheus: prometheus_handle,
    };
    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: signal the server to drain, then race it against the
    // timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    if let Some(task) = refresh_task {
        task.abort();
    }

    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = metrics.in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// Run one API handler body: count it, time it, and render its result.
async fn track<F>(state: &AppState, route: &'static str, work: F) -> Response
where
    F: Future<Output = std::result::Result<Value, ApiError>>,
{
    let request_id = new_request_id();
    let span = info_span!("request", route, request_id = %request_id);
    let started = Instant::now();
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    state.metrics.in_flight.fetch_add(1, Ordering::Relaxed);

    let response = match work.instrument(span).await {
        Ok(body) => (StatusCode::OK, axum::Json(body)).into_response(),
        Err(e) => {
            state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            e.respond(&request_id)
        }
    };

    state.metrics.in_flight.fetch_sub(1, Ordering::Relaxed);
    metrics::record_request(
        response.status().as_u16(),
        route,
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn enquiries_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let work = records::list(&state.gateway, &records::ENQUIRIES, &headers, &body);
    track(&state, "enquiries", work).await
}

async fn applications_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let work = records::list(&state.gateway, &records::APPLICATIONS, &headers, &body);
    track(&state, "applications", work).await
}

async fn school_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let work = records::school(&state.gateway, &headers);
    track(&state, "school", work).await
}

async fn authorize_url_handler(State(state): State<AppState>) -> Response {
    let work = async { oauth::authorize_url(&state.gateway) };
    track(&state, "authorize_url", work).await
}

async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let work = oauth::callback(&state.gateway, params.get("code").map(String::as_str));
    track(&state, "oauth_callback", work).await
}

/// Health endpoint: status, uptime, request counters and refresh state.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.metrics.started_at.elapsed().as_secs(),
        "requests_served": state.metrics.requests_total.load(Ordering::Relaxed),
        "errors_total": state.metrics.errors_total.load(Ordering::Relaxed),
        "refreshing": state.gateway.is_refreshing(),
    });

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
