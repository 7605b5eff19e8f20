//! Account provisioning, consumed by the checkout/success flow.
//!
//! Idempotent on the billing customer reference so a reloaded success page or
//! a duplicate webhook never mints a second account.

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

use crate::models::ProvisionAccount;
use crate::startup::AppState;
use crate::utils::generate_api_token;

#[derive(Debug, Deserialize, Validate)]
pub struct ProvisionRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub billing_customer_id: String,
    #[validate(length(min = 1))]
    pub billing_item_id: String,
    pub tier: String,
}

#[derive(Debug, Serialize)]
pub struct ProvisionResponse {
    pub token: String,
    pub tier: String,
    pub included_quota: i64,
}

/// Create-or-fetch the account for a billing customer and return its token.
/// 201 on first creation, 200 with the existing token on replay.
pub async fn provision_account(
    State(state): State<AppState>,
    Json(payload): Json<ProvisionRequest>,
) -> Result<(StatusCode, Json<ProvisionResponse>), AppError> {
    payload.validate()?;

    let included_quota = state
        .config
        .plans
        .included_quota(&payload.tier)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("unknown tier: {}", payload.tier)))?;

    let input = ProvisionAccount {
        email: payload.email,
        billing_customer_id: payload.billing_customer_id,
        billing_item_id: payload.billing_item_id,
        tier: payload.tier,
        included_quota,
    };

    let (account, created) = state.store.provision(&input, generate_api_token()).await?;

    tracing::info!(
        account_id = %account.account_id,
        billing_customer_id = %account.billing_customer_id,
        tier = %account.tier,
        created = created,
        "Account provisioned"
    );

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(ProvisionResponse {
            token: account.token,
            tier: account.tier,
            included_quota: account.included_quota,
        }),
    ))
}
