//! Test helper module for gateway-service integration tests.
//!
//! Spawns the gateway on a random port with the in-memory store, pointing at
//! wiremock doubles for the backend and the billing provider.

#![allow(dead_code)]

use gateway_service::config::{
    BackendConfig, BillingConfig, Config, Plan, PlanCatalog, ServerConfig, StorageBackend,
    StorageConfig,
};
use gateway_service::startup::Application;
use secrecy::Secret;
use std::time::Duration;
use wiremock::MockServer;

pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const BILLING_KEY: &str = "sk_test_billing_key";
pub const TEST_EMAIL: &str = "user@example.com";

/// Running gateway instance under test.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
}

impl TestApp {
    /// Spawn with the default test catalog (starter: 0 included, pro: 2000).
    pub async fn spawn(backend_url: &str, billing_url: &str) -> Self {
        Self::spawn_with_plans(
            backend_url,
            billing_url,
            vec![
                Plan {
                    tier: "starter".to_string(),
                    included_quota: 0,
                },
                Plan {
                    tier: "pro".to_string(),
                    included_quota: 2000,
                },
            ],
        )
        .await
    }

    pub async fn spawn_with_plans(backend_url: &str, billing_url: &str, plans: Vec<Plan>) -> Self {
        Self::spawn_with(backend_url, billing_url, plans, 5).await
    }

    /// Spawn with a short backend timeout, for exercising the timeout path
    /// without slow tests.
    pub async fn spawn_with_backend_timeout(
        backend_url: &str,
        billing_url: &str,
        timeout_secs: u64,
    ) -> Self {
        Self::spawn_with(
            backend_url,
            billing_url,
            vec![Plan {
                tier: "pro".to_string(),
                included_quota: 2000,
            }],
            timeout_secs,
        )
        .await
    }

    async fn spawn_with(
        backend_url: &str,
        billing_url: &str,
        plans: Vec<Plan>,
        timeout_secs: u64,
    ) -> Self {
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Random port
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                database_url: None,
                max_connections: 5,
                min_connections: 1,
            },
            billing: BillingConfig {
                api_base_url: billing_url.trim_end_matches('/').to_string(),
                secret_key: Secret::new(BILLING_KEY.to_string()),
                webhook_secret: Secret::new(WEBHOOK_SECRET.to_string()),
                signature_tolerance_secs: 300,
            },
            backend: BackendConfig {
                url: backend_url.trim_end_matches('/').to_string(),
                mount_path: "/internal".to_string(),
                timeout_secs,
            },
            plans: PlanCatalog::new(plans),
            service_name: "gateway-service-test".to_string(),
            log_level: "warn".to_string(),
            otlp_endpoint: None,
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("http://127.0.0.1:{}/health", port);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address: format!("http://127.0.0.1:{}", port),
            port,
            client,
        }
    }

    /// Provision an account and return its API token.
    pub async fn provision(&self, customer: &str, tier: &str) -> String {
        let response = self.provision_response(customer, tier).await;
        assert!(
            response.status().is_success(),
            "provisioning failed: {}",
            response.status()
        );
        let body: serde_json::Value = response.json().await.expect("provision response body");
        body["token"].as_str().expect("token in response").to_string()
    }

    pub async fn provision_response(&self, customer: &str, tier: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/api/accounts", self.address))
            .json(&serde_json::json!({
                "email": TEST_EMAIL,
                "billing_customer_id": customer,
                "billing_item_id": format!("si_{}", customer),
                "tier": tier,
            }))
            .send()
            .await
            .expect("provision request")
    }

    /// Proxied call through the gateway.
    pub async fn proxy_get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .bearer_auth(token)
            .send()
            .await
            .expect("proxy request")
    }

    /// Current-period usage as seen by the gateway.
    pub async fn usage(&self, token: &str) -> serde_json::Value {
        let response = self
            .client
            .get(format!("{}/api/usage", self.address))
            .bearer_auth(token)
            .send()
            .await
            .expect("usage request");
        assert!(response.status().is_success());
        response.json().await.expect("usage body")
    }

    /// Post a webhook body signed with the test secret.
    pub async fn post_webhook(&self, body: &str) -> reqwest::Response {
        let header = signed_header(body);
        self.client
            .post(format!("{}/webhooks/billing", self.address))
            .header("Stripe-Signature", header)
            .body(body.to_string())
            .send()
            .await
            .expect("webhook request")
    }

    pub async fn post_webhook_raw(
        &self,
        body: &str,
        signature: Option<&str>,
    ) -> reqwest::Response {
        let mut request = self
            .client
            .post(format!("{}/webhooks/billing", self.address))
            .body(body.to_string());
        if let Some(signature) = signature {
            request = request.header("Stripe-Signature", signature);
        }
        request.send().await.expect("webhook request")
    }
}

/// Valid signature header for a webhook body, as the provider would send it.
pub fn signed_header(body: &str) -> String {
    service_core::utils::signature::signature_header(
        WEBHOOK_SECRET,
        chrono::Utc::now().timestamp(),
        body,
    )
    .expect("sign webhook body")
}

/// Cancellation event body for a billing customer.
pub fn cancellation_body(customer: &str) -> String {
    serde_json::json!({
        "type": "customer.subscription.deleted",
        "data": { "object": { "customer": customer, "status": "canceled" } }
    })
    .to_string()
}

/// Wait until the mock server has received `expected` requests, failing after
/// a bounded number of polls. Used for fire-and-forget overage reports.
pub async fn wait_for_requests(server: &MockServer, expected: usize) {
    for _ in 0..50 {
        let received = server
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or(0);
        if received >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let received = server
        .received_requests()
        .await
        .map(|r| r.len())
        .unwrap_or(0);
    assert_eq!(
        received, expected,
        "mock server never reached {} requests",
        expected
    );
}
