//! Domain models for the metering gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A provisioned customer identity, keyed by an opaque API token.
///
/// `billing_item_id` is the provider-side handle for metered overage
/// reporting; `None` means the subscription was cancelled and overage can no
/// longer be billed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub account_id: Uuid,
    #[serde(skip_serializing)]
    pub token: String,
    pub email: String,
    pub billing_customer_id: String,
    pub billing_item_id: Option<String>,
    pub tier: String,
    pub included_quota: i64,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating (or idempotently fetching) an account.
#[derive(Debug, Clone)]
pub struct ProvisionAccount {
    pub email: String,
    pub billing_customer_id: String,
    pub billing_item_id: String,
    pub tier: String,
    pub included_quota: i64,
}

/// Calendar-month accounting window key, e.g. `2026-08`.
pub fn period_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Period key for the current UTC month.
pub fn current_period() -> String {
    period_key(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_period_key_is_calendar_month() {
        let at = Utc.with_ymd_and_hms(2026, 8, 29, 23, 59, 59).unwrap();
        assert_eq!(period_key(at), "2026-08");

        let next = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
        assert_eq!(period_key(next), "2026-09");
    }

    #[test]
    fn test_period_key_zero_pads_month() {
        let at = Utc.with_ymd_and_hms(2027, 1, 5, 12, 0, 0).unwrap();
        assert_eq!(period_key(at), "2027-01");
    }
}
