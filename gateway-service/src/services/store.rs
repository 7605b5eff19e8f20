//! Account and usage storage.
//!
//! The store is the only shared mutable resource in the gateway. All usage
//! mutation goes through `increment_usage`, which is a single atomic
//! upsert-and-return operation so concurrent requests can never lose or
//! duplicate a count.

use crate::models::{Account, ProvisionAccount};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{info, instrument};
use uuid::Uuid;

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Resolve a raw API token to an account. `None` when unknown.
    async fn lookup_by_token(&self, token: &str) -> Result<Option<Account>, AppError>;

    /// Cumulative units for the given period; 0 when no record exists yet.
    async fn current_period_usage(&self, account_id: Uuid, period: &str)
        -> Result<i64, AppError>;

    /// Atomically add one unit to the period counter and return the new total.
    async fn increment_usage(&self, account_id: Uuid, period: &str) -> Result<i64, AppError>;

    /// Idempotent create keyed on `billing_customer_id`. Returns the account
    /// and whether it was newly created; a replay returns the existing account
    /// (and its original token) untouched.
    async fn provision(
        &self,
        input: &ProvisionAccount,
        fresh_token: String,
    ) -> Result<(Account, bool), AppError>;

    /// Clear the billing line item for the given customer. No-op when the
    /// customer is unknown.
    async fn clear_billing_item(&self, billing_customer_id: &str) -> Result<(), AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

// =============================================================================
// Postgres implementation
// =============================================================================

const ACCOUNT_COLUMNS: &str = "account_id, token, email, billing_customer_id, billing_item_id, tier, included_quota, created_utc";

#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    #[instrument(skip(database_url), fields(service = "gateway-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    #[instrument(skip(self, token))]
    async fn lookup_by_token(&self, token: &str) -> Result<Option<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lookup_by_token"])
            .start_timer();

        // Keyed equality lookup on the full token; no prefix scans that could
        // leak timing correlated with partial matches.
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE token = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to look up token: {}", e)))?;

        timer.observe_duration();
        Ok(account)
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn current_period_usage(
        &self,
        account_id: Uuid,
        period: &str,
    ) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["current_period_usage"])
            .start_timer();

        let units = sqlx::query_scalar::<_, i64>(
            "SELECT units FROM usage_periods WHERE account_id = $1 AND period = $2",
        )
        .bind(account_id)
        .bind(period)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to read usage: {}", e)))?;

        timer.observe_duration();
        Ok(units.unwrap_or(0))
    }

    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn increment_usage(&self, account_id: Uuid, period: &str) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["increment_usage"])
            .start_timer();

        // Single atomic upsert-and-return; never a read-then-write pair.
        let units = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO usage_periods (account_id, period, units)
            VALUES ($1, $2, 1)
            ON CONFLICT (account_id, period)
            DO UPDATE SET units = usage_periods.units + 1, updated_utc = now()
            RETURNING units
            "#,
        )
        .bind(account_id)
        .bind(period)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to increment usage: {}", e))
        })?;

        timer.observe_duration();
        Ok(units)
    }

    #[instrument(skip(self, input, fresh_token), fields(billing_customer_id = %input.billing_customer_id))]
    async fn provision(
        &self,
        input: &ProvisionAccount,
        fresh_token: String,
    ) -> Result<(Account, bool), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["provision"])
            .start_timer();

        let existing = sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE billing_customer_id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(&input.billing_customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check account: {}", e)))?;

        if let Some(account) = existing {
            timer.observe_duration();
            return Ok((account, false));
        }

        // ON CONFLICT DO NOTHING keeps a concurrent duplicate provisioning
        // (webhook / success-page race) from creating a second account.
        let inserted = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts (account_id, token, email, billing_customer_id, billing_item_id, tier, included_quota)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (billing_customer_id) DO NOTHING
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&fresh_token)
        .bind(&input.email)
        .bind(&input.billing_customer_id)
        .bind(&input.billing_item_id)
        .bind(&input.tier)
        .bind(input.included_quota)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create account: {}", e)))?;

        let result = match inserted {
            Some(account) => (account, true),
            None => {
                // Lost the race; fetch the winner's account.
                let account = sqlx::query_as::<_, Account>(&format!(
                    "SELECT {} FROM accounts WHERE billing_customer_id = $1",
                    ACCOUNT_COLUMNS
                ))
                .bind(&input.billing_customer_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to fetch account: {}", e))
                })?;
                (account, false)
            }
        };

        timer.observe_duration();
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn clear_billing_item(&self, billing_customer_id: &str) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["clear_billing_item"])
            .start_timer();

        let result = sqlx::query(
            "UPDATE accounts SET billing_item_id = NULL WHERE billing_customer_id = $1",
        )
        .bind(billing_customer_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to clear billing item: {}", e))
        })?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                billing_customer_id = %billing_customer_id,
                "Cancellation for unknown customer; nothing to clear"
            );
        }

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// Dashmap-backed store for local development and tests. Data does not
/// survive a restart.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: DashMap<Uuid, Account>,
    /// billing_customer_id -> account_id; the entry lock makes provisioning
    /// atomic per customer.
    customers: DashMap<String, Uuid>,
    usage: DashMap<(Uuid, String), i64>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn lookup_by_token(&self, token: &str) -> Result<Option<Account>, AppError> {
        // Constant-time comparison of equal-length candidates; the scan is
        // over accounts, not token prefixes.
        let mut found = None;
        for entry in self.accounts.iter() {
            let candidate = entry.token.as_bytes();
            if candidate.len() == token.len()
                && bool::from(candidate.ct_eq(token.as_bytes()))
            {
                found = Some(entry.clone());
            }
        }
        Ok(found)
    }

    async fn current_period_usage(
        &self,
        account_id: Uuid,
        period: &str,
    ) -> Result<i64, AppError> {
        Ok(self
            .usage
            .get(&(account_id, period.to_string()))
            .map(|u| *u)
            .unwrap_or(0))
    }

    async fn increment_usage(&self, account_id: Uuid, period: &str) -> Result<i64, AppError> {
        let mut entry = self
            .usage
            .entry((account_id, period.to_string()))
            .or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn provision(
        &self,
        input: &ProvisionAccount,
        fresh_token: String,
    ) -> Result<(Account, bool), AppError> {
        match self.customers.entry(input.billing_customer_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                let account = self
                    .accounts
                    .get(existing.get())
                    .map(|a| a.clone())
                    .ok_or_else(|| {
                        AppError::MeteringStore(anyhow::anyhow!(
                            "customer index points at a missing account"
                        ))
                    })?;
                Ok((account, false))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let account = Account {
                    account_id: Uuid::new_v4(),
                    token: fresh_token,
                    email: input.email.clone(),
                    billing_customer_id: input.billing_customer_id.clone(),
                    billing_item_id: Some(input.billing_item_id.clone()),
                    tier: input.tier.clone(),
                    included_quota: input.included_quota,
                    created_utc: Utc::now(),
                };
                self.accounts.insert(account.account_id, account.clone());
                slot.insert(account.account_id);
                Ok((account, true))
            }
        }
    }

    async fn clear_billing_item(&self, billing_customer_id: &str) -> Result<(), AppError> {
        if let Some(account_id) = self.customers.get(billing_customer_id) {
            if let Some(mut account) = self.accounts.get_mut(&account_id) {
                account.billing_item_id = None;
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
