use std::env;

use anyhow::{bail, Result};
use tracing::info;

use crate::environment::Environment;
use crate::types::{
    AppConfig, BillingConfig, PushConfig, ReconcileConfig, SchedulerConfig,
};

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key).as_deref() {
        Ok("true") | Ok("1") => true,
        Ok("false") | Ok("0") => false,
        _ => default,
    }
}

/// Build the application configuration from environment variables.
///
/// Development mode fills in local defaults; production fails fast on a
/// missing database URL instead of silently pointing at localhost.
pub fn load_config() -> Result<AppConfig> {
    let environment = Environment::detect();

    let database_url = match env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) if environment.is_production() => {
            bail!("DATABASE_URL must be set in production")
        }
        Err(_) => "postgresql://localhost/tuneforge".to_string(),
    };

    let config = AppConfig {
        server_host: env_or("SERVER_HOST", "0.0.0.0"),
        server_port: env_parse("SERVER_PORT", 3000),
        database_url,
        storage_backend: env_or("STORAGE_BACKEND", "postgres"),
        environment,
        scheduler: SchedulerConfig {
            base_url: env_or("SCHEDULER_BASE_URL", "http://localhost:5100"),
            enabled: env_bool("RUN_WITH_SCHEDULER", true),
            request_timeout_secs: env_parse("SCHEDULER_TIMEOUT_SECS", 30),
        },
        billing: BillingConfig {
            payments_base_url: env_or("PAYMENTS_BASE_URL", "http://localhost:5200"),
            auto_recharge: env_bool("BILLING_AUTO_RECHARGE", true),
            settle_wait_secs: env_parse("BILLING_SETTLE_WAIT_SECS", 20),
            job_min_credits: env_parse("FINE_TUNING_JOB_MIN_CREDITS", 1.0),
        },
        push: PushConfig {
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            stream: env_or("PUSH_STREAM", "job-events"),
            consumer_group: env_or("PUSH_CONSUMER_GROUP", "tuneforge-api"),
            consumer_name: env_or("PUSH_CONSUMER_NAME", "api-0"),
            enabled: env_bool("RUN_WITH_PUSH", true),
        },
        reconcile: ReconcileConfig {
            interval_secs: env_parse("RECONCILE_INTERVAL_SECS", 60),
            completed_grace_minutes: env_parse("RECONCILE_COMPLETED_GRACE_MINUTES", 10),
        },
    };

    info!(
        environment = config.environment.as_str(),
        storage = %config.storage_backend,
        scheduler_enabled = config.scheduler.enabled,
        "Loaded configuration"
    );

    Ok(config)
}
