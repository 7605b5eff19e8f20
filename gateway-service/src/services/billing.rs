//! Metered-billing provider client.
//!
//! Delivers overage usage reports against a subscription line item and
//! verifies/parses the provider's lifecycle webhooks.

use crate::config::BillingConfig;
use anyhow::{Result, anyhow};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use service_core::utils::signature;

/// Signature header carried by every provider webhook.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Clone)]
pub struct BillingClient {
    client: Client,
    config: BillingConfig,
}

/// A lifecycle event received from the billing provider, reduced to the kinds
/// this gateway acts on. Everything else is acknowledged and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    SubscriptionCancelled { customer: String },
    Ignored { event_type: String },
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: WebhookData,
}

#[derive(Debug, Deserialize, Default)]
struct WebhookData {
    object: Option<WebhookObject>,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    customer: Option<String>,
}

impl BillingClient {
    pub fn new(config: BillingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if provider credentials are set. When they are not, overage
    /// reports are skipped with a warning and everything else still works.
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    /// Report metered usage against a subscription line item.
    ///
    /// Delivery is informational; the gateway's local counter stays the
    /// source of truth whether or not this call succeeds.
    pub async fn report_usage(&self, billing_item_id: &str, quantity: u32) -> Result<()> {
        if !self.is_configured() {
            return Err(anyhow!("billing provider credentials not configured"));
        }

        let url = format!(
            "{}/subscription_items/{}/usage_records",
            self.config.api_base_url, billing_item_id
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(self.config.secret_key.expose_secret(), None::<&str>)
            .form(&[("quantity", quantity.to_string())])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(
                billing_item_id = %billing_item_id,
                quantity = quantity,
                "Usage report delivered"
            );
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(anyhow!("usage report rejected: {} {}", status, body))
        }
    }

    /// Verify a webhook signature header against the raw, unparsed body.
    pub fn verify_webhook_signature(&self, body: &str, header: &str) -> Result<bool> {
        signature::verify_signature_header(
            self.config.webhook_secret.expose_secret(),
            header,
            body,
            self.config.signature_tolerance_secs,
            chrono::Utc::now().timestamp(),
        )
    }

    /// Parse a verified webhook body into a typed event.
    pub fn parse_webhook_event(&self, body: &str) -> Result<BillingEvent> {
        let envelope: WebhookEnvelope = serde_json::from_str(body)?;

        Ok(match envelope.event_type.as_str() {
            "customer.subscription.deleted" => {
                let customer = envelope
                    .data
                    .object
                    .and_then(|o| o.customer)
                    .ok_or_else(|| anyhow!("cancellation event missing customer reference"))?;
                BillingEvent::SubscriptionCancelled { customer }
            }
            other => BillingEvent::Ignored {
                event_type: other.to_string(),
            },
        })
    }
}
