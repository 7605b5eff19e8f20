pub mod billing;
pub mod meter;
pub mod metrics;
pub mod store;

pub use billing::{BillingClient, BillingEvent};
pub use meter::{MeterOutcome, UsageMeter};
pub use metrics::{get_metrics, init_metrics};
pub use store::{AccountStore, MemoryAccountStore, PgAccountStore};
