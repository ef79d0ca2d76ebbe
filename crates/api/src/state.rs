use std::sync::Arc;

use tracing::info;

use tuneforge_billing::{CreditLedger, HttpPaymentClient};
use tuneforge_config::AppConfig;
use tuneforge_scheduler::SchedulerClient;
use tuneforge_storage::{MemoryStorageBackend, PostgresStorageBackend, StorageBackend};

/// Application state shared across all handlers and background tasks
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StorageBackend>,
    pub scheduler: Arc<SchedulerClient>,
    pub ledger: Arc<CreditLedger>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn StorageBackend> = if config.storage_backend == "postgres" {
            info!("Using PostgreSQL storage backend");
            Arc::new(PostgresStorageBackend::new(&config.database_url).await?)
        } else {
            info!("Using memory storage backend");
            Arc::new(MemoryStorageBackend::new())
        };

        let scheduler = Arc::new(SchedulerClient::new(config.scheduler.clone())?);

        let payments = Arc::new(HttpPaymentClient::new(
            config.billing.payments_base_url.clone(),
        )?);
        let ledger = Arc::new(CreditLedger::new(
            store.clone(),
            payments,
            config.billing.clone(),
        ));

        Ok(Self {
            store,
            scheduler,
            ledger,
            config: Arc::new(config),
        })
    }
}
