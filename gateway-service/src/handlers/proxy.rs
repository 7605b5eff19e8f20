//! Metering proxy: authenticate, count, forward.
//!
//! The usage unit is committed before the backend is contacted, so a backend
//! timeout or error can never produce unmetered usage. Units are not reverted
//! on backend failure: usage reflects authorized attempts, not confirmed
//! downstream completions.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Uri, header},
    response::Response,
};
use service_core::error::AppError;

use crate::config::BackendConfig;
use crate::middleware::AuthedAccount;
use crate::startup::AppState;

/// Inbound path prefix owned by the proxy.
pub const PROXY_PREFIX: &str = "/mcp";

/// Outbound header carrying the customer identity to the backend.
pub const IDENTITY_HEADER: HeaderName = HeaderName::from_static("x-account-email");

/// Classification of a proxied route, driving post-forward response shaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Long-lived event-stream route; headers are forced so intermediaries
    /// never buffer, and no total timeout is applied.
    Streaming,
    Standard,
}

impl RouteClass {
    pub fn classify(path: &str) -> Self {
        match path.trim_end_matches('/').rsplit('/').next() {
            Some("sse") => RouteClass::Streaming,
            _ => RouteClass::Standard,
        }
    }
}

/// Forward an authenticated, metered request to the backend.
pub async fn forward(State(state): State<AppState>, req: Request) -> Result<Response, AppError> {
    let authed = req
        .extensions()
        .get::<AuthedAccount>()
        .cloned()
        .ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!("auth context missing from proxy request"))
        })?;

    // Meter before forwarding; a store failure rejects the request here.
    state
        .meter
        .record_use(&authed.account, authed.current_usage)
        .await?;

    let route = RouteClass::classify(req.uri().path());
    let target = rewrite_target(&state.config.backend, req.uri());

    let (parts, body) = req.into_parts();

    let mut outbound_headers = parts.headers;
    // Never leak the customer's credential to the backend; the Host header
    // belongs to the backend origin.
    outbound_headers.remove(header::AUTHORIZATION);
    outbound_headers.remove(header::HOST);
    outbound_headers.insert(
        IDENTITY_HEADER,
        HeaderValue::from_str(&authed.account.email).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("account email not header-safe: {}", e))
        })?,
    );

    let mut outbound = state
        .http
        .request(parts.method, &target)
        .headers(outbound_headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()));

    if route == RouteClass::Standard {
        outbound = outbound.timeout(state.config.backend.timeout());
    }

    let upstream = outbound.send().await.map_err(|e| {
        if e.is_timeout() {
            tracing::warn!(
                account_id = %authed.account.account_id,
                target = %target,
                "Backend call timed out; recorded usage unit stands"
            );
            AppError::GatewayTimeout(format!("backend timed out: {}", e))
        } else {
            tracing::warn!(
                account_id = %authed.account.account_id,
                target = %target,
                error = %e,
                "Backend unreachable; recorded usage unit stands"
            );
            AppError::BadGateway(format!("backend unreachable: {}", e))
        }
    })?;

    let response = into_axum_response(upstream)?;
    Ok(shape_response(route, response))
}

/// Rewrite the inbound proxy path onto the backend origin: the `/mcp` prefix
/// becomes the configured mount path; the remainder and query pass through.
fn rewrite_target(backend: &BackendConfig, uri: &Uri) -> String {
    let suffix = uri.path().strip_prefix(PROXY_PREFIX).unwrap_or("");
    let mut target = format!(
        "{}{}{}",
        backend.url.trim_end_matches('/'),
        backend.mount_path,
        suffix
    );
    if let Some(query) = uri.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

/// Stream the upstream response back without buffering, dropping hop-by-hop
/// headers that only applied to the gateway-to-backend connection.
fn into_axum_response(upstream: reqwest::Response) -> Result<Response, AppError> {
    let mut builder = Response::builder().status(upstream.status());

    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name.as_str()) {
            builder = builder.header(name, value);
        }
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("failed to assemble proxied response: {}", e))
        })
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Post-forward response shaping keyed on the route class. Streaming routes
/// get event-stream headers forced regardless of what the backend returned,
/// so proxies and browsers never buffer the stream.
pub fn shape_response(route: RouteClass, mut response: Response) -> Response {
    if route == RouteClass::Streaming {
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.remove(header::CONTENT_LENGTH);
    }
    response
}
