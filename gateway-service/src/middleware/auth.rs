//! Bearer-token authentication for metered routes.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::models::{Account, current_period};
use crate::startup::AppState;

/// Account resolved from the bearer token, with its usage as observed on
/// entry. The meter uses the observed value for the included-vs-overage
/// decision; the count itself is always taken from the atomic increment.
#[derive(Debug, Clone)]
pub struct AuthedAccount {
    pub account: Account,
    pub current_usage: i64,
}

/// Middleware guarding every metered route. Failures reject the request
/// before any usage is counted and before the backend is contacted.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            AppError::Unauthenticated(anyhow::anyhow!(
                "missing or malformed Authorization header"
            ))
        })?;

    let account = state
        .store
        .lookup_by_token(token)
        .await?
        .ok_or_else(|| {
            tracing::warn!("Rejected request with unknown API token");
            AppError::Unauthorized(anyhow::anyhow!("token does not resolve to an account"))
        })?;

    let current_usage = state
        .store
        .current_period_usage(account.account_id, &current_period())
        .await?;

    req.extensions_mut()
        .insert(AuthedAccount {
            account,
            current_usage,
        });

    Ok(next.run(req).await)
}

/// Extractor for handlers behind `auth_middleware`.
pub struct Authed(pub AuthedAccount);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Authed
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let authed = parts
            .extensions
            .get::<AuthedAccount>()
            .cloned()
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "auth context missing from request extensions"
                ))
            })?;

        Ok(Authed(authed))
    }
}
