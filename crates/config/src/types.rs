use crate::environment::Environment;

/// Application configuration, built once at startup and passed to each
/// component at construction time.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,
    /// "postgres" or "memory" (detached/test mode)
    pub storage_backend: String,
    pub environment: Environment,
    pub scheduler: SchedulerConfig,
    pub billing: BillingConfig,
    pub push: PushConfig,
    pub reconcile: ReconcileConfig,
}

/// Scheduler gateway configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub base_url: String,
    /// When false, every gateway operation is a no-op (detached mode)
    pub enabled: bool,
    pub request_timeout_secs: u64,
}

/// Credit ledger configuration
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub payments_base_url: String,
    /// Whether an insufficient balance may trigger one out-of-band charge
    pub auto_recharge: bool,
    /// Upper bound on the post-charge settle wait
    pub settle_wait_secs: u64,
    /// Minimum balance required to create a fine-tuning job
    pub job_min_credits: f64,
}

/// Push ingestion channel (Redis Streams) configuration
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub redis_url: String,
    pub stream: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub enabled: bool,
}

/// Reconciliation loop configuration
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Seconds between reconciliation passes
    pub interval_secs: u64,
    /// Trailing window during which COMPLETED jobs still get polled for
    /// late artifact/metric events
    pub completed_grace_minutes: i64,
}
