//! Usage metering: the authoritative per-period counter plus best-effort
//! overage reporting.

use crate::models::{Account, current_period};
use crate::services::billing::BillingClient;
use crate::services::metrics;
use crate::services::store::AccountStore;
use service_core::error::AppError;
use std::sync::Arc;

/// Result of metering one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterOutcome {
    /// New cumulative total for the current period, including this unit.
    pub total: i64,
    /// Whether this unit fell beyond the included quota.
    pub overage: bool,
}

#[derive(Clone)]
pub struct UsageMeter {
    store: Arc<dyn AccountStore>,
    billing: Arc<BillingClient>,
}

impl UsageMeter {
    pub fn new(store: Arc<dyn AccountStore>, billing: Arc<BillingClient>) -> Self {
        Self { store, billing }
    }

    /// Count one unit for the account, deciding included vs. overage from the
    /// usage observed before this increment.
    ///
    /// The increment must commit before the request is forwarded; a store
    /// failure rejects the request rather than letting it through unmetered.
    /// Overage reports are fire-and-forget: a delivery failure is logged and
    /// never rolls back the local counter.
    ///
    /// Cancelled subscriptions (no billing line item) may spend the remainder
    /// of their included quota but are rejected before incurring overage that
    /// could never be billed.
    pub async fn record_use(
        &self,
        account: &Account,
        observed_usage: i64,
    ) -> Result<MeterOutcome, AppError> {
        if account.billing_item_id.is_none() && observed_usage >= account.included_quota {
            tracing::info!(
                account_id = %account.account_id,
                tier = %account.tier,
                "Included quota spent and subscription is cancelled; rejecting"
            );
            return Err(AppError::QuotaExhausted(anyhow::anyhow!(
                "included quota spent and subscription is no longer billable"
            )));
        }

        let period = current_period();
        let total = self
            .store
            .increment_usage(account.account_id, &period)
            .await
            .map_err(|e| {
                tracing::error!(
                    account_id = %account.account_id,
                    period = %period,
                    error = %e,
                    "Usage increment failed; rejecting request"
                );
                AppError::MeteringStore(anyhow::anyhow!("usage increment failed: {}", e))
            })?;

        metrics::record_usage_unit(&account.tier);

        let previous = total - 1;
        let overage = previous >= account.included_quota;

        if overage {
            match &account.billing_item_id {
                Some(item) => self.dispatch_report(account, item.clone()),
                None => {
                    // Boundary race: usage crossed the quota between the
                    // observed read and the atomic increment. The count
                    // stands; the report has nowhere to go.
                    tracing::warn!(
                        account_id = %account.account_id,
                        "Overage unit on an account with no billing line item; report skipped"
                    );
                }
            }
        }

        tracing::debug!(
            account_id = %account.account_id,
            period = %period,
            total = total,
            overage = overage,
            "Usage unit recorded"
        );

        Ok(MeterOutcome { total, overage })
    }

    /// Fire-and-forget delivery of one overage unit. Report ordering between
    /// concurrent requests is not guaranteed.
    fn dispatch_report(&self, account: &Account, billing_item_id: String) {
        let billing = self.billing.clone();
        let account_id = account.account_id;

        tokio::spawn(async move {
            match billing.report_usage(&billing_item_id, 1).await {
                Ok(()) => {
                    metrics::record_overage_report("delivered");
                }
                Err(e) => {
                    metrics::record_overage_report("failed");
                    tracing::warn!(
                        account_id = %account_id,
                        error = %e,
                        "Overage report delivery failed; local counter stands"
                    );
                }
            }
        });
    }
}
