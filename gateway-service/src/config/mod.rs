use anyhow::{Context, Result, anyhow, bail};
use dotenvy::dotenv;
use secrecy::Secret;
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub billing: BillingConfig,
    pub backend: BackendConfig,
    pub plans: PlanCatalog,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: Option<Secret<String>>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Clone, Debug)]
pub struct BillingConfig {
    /// Base URL of the metered-billing provider API.
    pub api_base_url: String,
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    /// Maximum accepted age of a webhook signature timestamp.
    pub signature_tolerance_secs: i64,
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    /// Origin of the downstream automation backend, e.g. `http://n8n:5678`.
    pub url: String,
    /// Backend path that the inbound `/mcp` prefix is rewritten to.
    pub mount_path: String,
    /// Per-request timeout for non-streaming routes.
    pub timeout_secs: u64,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One subscription tier: how many metered units are included free per period.
#[derive(Clone, Debug)]
pub struct Plan {
    pub tier: String,
    pub included_quota: i64,
}

/// Immutable tier catalog, constructed once at startup and passed by
/// reference. No component reads plan data from the environment directly.
#[derive(Clone, Debug)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self { plans }
    }

    pub fn included_quota(&self, tier: &str) -> Option<i64> {
        self.plans
            .iter()
            .find(|p| p.tier == tier)
            .map(|p| p.included_quota)
    }

    pub fn tiers(&self) -> impl Iterator<Item = &str> {
        self.plans.iter().map(|p| p.tier.as_str())
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(vec![
            Plan {
                tier: "starter".to_string(),
                included_quota: 0,
            },
            Plan {
                tier: "pro".to_string(),
                included_quota: 2000,
            },
            Plan {
                tier: "scale".to_string(),
                included_quota: 10_000,
            },
        ])
    }
}

/// Parse a catalog override of the form `tier:quota,tier:quota`.
fn parse_plans(raw: &str) -> Result<PlanCatalog> {
    let mut plans = Vec::new();
    for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
        let (tier, quota) = entry
            .trim()
            .split_once(':')
            .ok_or_else(|| anyhow!("invalid plan entry '{}', expected tier:quota", entry))?;
        let quota: i64 = quota
            .parse()
            .with_context(|| format!("invalid quota in plan entry '{}'", entry))?;
        if quota < 0 {
            bail!("included quota must be non-negative in plan entry '{}'", entry);
        }
        plans.push(Plan {
            tier: tier.to_string(),
            included_quota: quota,
        });
    }
    if plans.is_empty() {
        bail!("plan catalog override is empty");
    }
    Ok(PlanCatalog::new(plans))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("GATEWAY_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .context("GATEWAY_PORT must be a port number")?;

        let backend_kind = env::var("GATEWAY_STORAGE").unwrap_or_else(|_| "postgres".to_string());
        let storage_backend = match backend_kind.as_str() {
            "postgres" => StorageBackend::Postgres,
            "memory" => StorageBackend::Memory,
            other => bail!("unsupported storage backend: {}", other),
        };
        let database_url = env::var("GATEWAY_DATABASE_URL").ok().map(Secret::new);
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            bail!("GATEWAY_DATABASE_URL must be set for postgres storage");
        }
        let max_connections = env::var("GATEWAY_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("GATEWAY_DB_MAX_CONNECTIONS must be an integer")?;
        let min_connections = env::var("GATEWAY_DB_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .context("GATEWAY_DB_MIN_CONNECTIONS must be an integer")?;

        let api_base_url = env::var("GATEWAY_BILLING_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string());
        let secret_key = env::var("GATEWAY_BILLING_SECRET_KEY").unwrap_or_default();
        let webhook_secret =
            env::var("GATEWAY_BILLING_WEBHOOK_SECRET").unwrap_or_else(|_| "dev-secret".to_string());
        let signature_tolerance_secs = env::var("GATEWAY_WEBHOOK_TOLERANCE_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .context("GATEWAY_WEBHOOK_TOLERANCE_SECS must be an integer")?;

        let backend_url = env::var("GATEWAY_BACKEND_URL")
            .map_err(|_| anyhow!("GATEWAY_BACKEND_URL must be set"))?;
        let mount_path = env::var("GATEWAY_BACKEND_MOUNT_PATH").unwrap_or_else(|_| "/mcp".to_string());
        if !mount_path.is_empty() && !mount_path.starts_with('/') {
            bail!("GATEWAY_BACKEND_MOUNT_PATH must start with '/'");
        }
        let timeout_secs = env::var("GATEWAY_BACKEND_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("GATEWAY_BACKEND_TIMEOUT_SECS must be an integer")?;

        let plans = match env::var("GATEWAY_PLANS") {
            Ok(raw) => parse_plans(&raw)?,
            Err(_) => PlanCatalog::default(),
        };

        Ok(Self {
            server: ServerConfig { host, port },
            storage: StorageConfig {
                backend: storage_backend,
                database_url,
                max_connections,
                min_connections,
            },
            billing: BillingConfig {
                api_base_url,
                secret_key: Secret::new(secret_key),
                webhook_secret: Secret::new(webhook_secret),
                signature_tolerance_secs,
            },
            backend: BackendConfig {
                url: backend_url,
                mount_path,
                timeout_secs,
            },
            plans,
            service_name: "gateway-service".to_string(),
            log_level: env::var("GATEWAY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("GATEWAY_OTLP_ENDPOINT").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_tiers() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.included_quota("starter"), Some(0));
        assert_eq!(catalog.included_quota("pro"), Some(2000));
        assert_eq!(catalog.included_quota("scale"), Some(10_000));
        assert_eq!(catalog.included_quota("enterprise"), None);
    }

    #[test]
    fn test_parse_plans_override() {
        let catalog = parse_plans("trial:5, pro:2000").unwrap();
        assert_eq!(catalog.included_quota("trial"), Some(5));
        assert_eq!(catalog.included_quota("pro"), Some(2000));
        assert_eq!(catalog.tiers().count(), 2);
    }

    #[test]
    fn test_parse_plans_rejects_bad_entries() {
        assert!(parse_plans("").is_err());
        assert!(parse_plans("pro").is_err());
        assert!(parse_plans("pro:abc").is_err());
        assert!(parse_plans("pro:-1").is_err());
    }
}
