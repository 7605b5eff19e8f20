//! Usage introspection for authenticated accounts.

use axum::Json;
use serde::Serialize;
use service_core::error::AppError;

use crate::middleware::Authed;
use crate::models::current_period;

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub tier: String,
    pub period: String,
    pub included_quota: i64,
    pub used: i64,
    pub remaining_included: i64,
}

/// Report the calling account's current-period usage. Read-only; does not
/// consume a metered unit.
pub async fn current_usage(Authed(authed): Authed) -> Result<Json<UsageResponse>, AppError> {
    let account = authed.account;
    let used = authed.current_usage;

    Ok(Json(UsageResponse {
        tier: account.tier,
        period: current_period(),
        included_quota: account.included_quota,
        used,
        remaining_included: (account.included_quota - used).max(0),
    }))
}
