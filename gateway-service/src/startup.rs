//! Application startup and lifecycle management.

use crate::config::{Config, StorageBackend};
use crate::handlers::{provision, proxy, usage, webhook};
use crate::middleware::auth::auth_middleware;
use crate::services::{
    AccountStore, BillingClient, MemoryAccountStore, PgAccountStore, UsageMeter, get_metrics,
    init_metrics,
};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{any, get, post},
};
use secrecy::ExposeSecret;
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn AccountStore>,
    pub billing: Arc<BillingClient>,
    pub meter: UsageMeter,
    pub http: reqwest::Client,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "gateway-service",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - account store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "gateway-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        init_metrics();

        let store: Arc<dyn AccountStore> = match config.storage.backend {
            StorageBackend::Postgres => {
                let url = config.storage.database_url.as_ref().ok_or_else(|| {
                    AppError::InternalError(anyhow::anyhow!(
                        "postgres storage selected without a database URL"
                    ))
                })?;
                let store = PgAccountStore::new(
                    url.expose_secret(),
                    config.storage.max_connections,
                    config.storage.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;
                store.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;
                Arc::new(store)
            }
            StorageBackend::Memory => {
                tracing::warn!("In-memory account store selected; data will not survive restarts");
                Arc::new(MemoryAccountStore::new())
            }
        };

        let billing = Arc::new(BillingClient::new(config.billing.clone()));
        if billing.is_configured() {
            tracing::info!("Billing provider client initialized");
        } else {
            tracing::warn!(
                "Billing provider credentials not configured - overage reports will be skipped"
            );
        }

        let meter = UsageMeter::new(store.clone(), billing.clone());

        // Shared forwarding client. Connect timeout bounds even streaming
        // routes; the per-request total timeout is applied in the proxy.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("failed to build HTTP client: {}", e))
            })?;

        let state = AppState {
            config: Arc::new(config.clone()),
            store,
            billing,
            meter,
            http,
        };

        // Bind listener (port 0 = random port for testing)
        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("invalid listen address: {}", e))
            })?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Gateway listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the application state for tests and embedding.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let metered_routes = Router::new()
            .route("/mcp", any(proxy::forward))
            .route("/mcp/*path", any(proxy::forward))
            .route("/api/usage", get(usage::current_usage))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth_middleware,
            ));

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .route("/api/accounts", post(provision::provision_account))
            .route("/webhooks/billing", post(webhook::billing_webhook))
            .merge(metered_routes)
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .layer(CorsLayer::permissive())
            .with_state(self.state);

        tracing::info!(
            service = "gateway-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await
    }
}
