//! Billing provider webhook handling.
//!
//! Every event is verified against the raw, unparsed body before any state
//! change. The handler is idempotent per event, so provider-side retries are
//! safe to reprocess.

use axum::{Json, extract::State, http::HeaderMap};
use serde_json::json;
use service_core::error::AppError;

use crate::services::billing::SIGNATURE_HEADER;
use crate::services::{BillingEvent, metrics};
use crate::startup::AppState;

pub async fn billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Webhook rejected: missing signature header");
            AppError::BadRequest(anyhow::anyhow!("missing webhook signature"))
        })?;

    let is_valid = state
        .billing
        .verify_webhook_signature(&body, signature)
        .map_err(|e| {
            tracing::error!(error = %e, "Webhook signature verification error");
            AppError::BadRequest(anyhow::anyhow!("webhook verification failed"))
        })?;

    if !is_valid {
        tracing::warn!("Webhook rejected: invalid signature");
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "invalid webhook signature"
        )));
    }

    let event = state.billing.parse_webhook_event(&body).map_err(|e| {
        tracing::warn!(error = %e, "Webhook rejected: unparseable payload");
        AppError::BadRequest(anyhow::anyhow!("invalid webhook payload"))
    })?;

    match event {
        BillingEvent::SubscriptionCancelled { customer } => {
            // Unknown customers fall through as a no-op inside the store; the
            // provider may send events for customers outside this system.
            state.store.clear_billing_item(&customer).await?;
            metrics::record_webhook_event("subscription_cancelled");
            tracing::info!(
                billing_customer_id = %customer,
                "Subscription cancelled; billing line item cleared"
            );
        }
        BillingEvent::Ignored { event_type } => {
            metrics::record_webhook_event("ignored");
            tracing::debug!(event_type = %event_type, "Webhook event ignored");
        }
    }

    Ok(Json(json!({ "received": true })))
}
