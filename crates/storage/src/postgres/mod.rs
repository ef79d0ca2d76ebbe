//! PostgreSQL storage backend implementation

mod billing;
mod jobs;
mod models;
mod rows;

pub use rows::*;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;
use uuid::Uuid;

use tuneforge_models::{
    ApiError, ApiResult, BaseModelData, BillingCreditData, BillingTransactionType, DatasetData,
    FineTunedModelData, FineTunedModelStatus, JobDetailData, JobMetadata, JobProgress,
    JobReconcileUpdate, JobStatus, JobWithDetail, UsageRecordData, UserData,
};

use super::StorageBackend;

/// PostgreSQL storage backend
pub struct PostgresStorageBackend {
    pool: PgPool,
}

impl PostgresStorageBackend {
    /// Connect, run pending migrations, and return the backend.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL database...");

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to PostgreSQL: {e}"))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {e}"))?;

        info!("Connected to PostgreSQL and ran migrations");
        Ok(Self { pool })
    }

    /// Get the underlying database connection pool
    pub fn get_db_pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn db_err(e: sqlx::Error) -> ApiError {
    ApiError::Database {
        reason: e.to_string(),
    }
}

#[async_trait]
impl StorageBackend for PostgresStorageBackend {
    async fn create_job(&self, job: &JobMetadata, detail: &JobDetailData) -> ApiResult<()> {
        self.create_job_impl(job, detail).await
    }

    async fn get_job_by_name(
        &self,
        user_id: Uuid,
        name: &str,
    ) -> ApiResult<Option<JobWithDetail>> {
        self.get_job_by_name_impl(user_id, name).await
    }

    async fn get_job_by_id(&self, job_id: Uuid, user_id: Uuid) -> ApiResult<Option<JobMetadata>> {
        self.get_job_by_id_impl(job_id, user_id).await
    }

    async fn list_jobs(&self, user_id: Uuid) -> ApiResult<Vec<JobMetadata>> {
        self.list_jobs_impl(user_id).await
    }

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> ApiResult<()> {
        self.set_job_status_impl(job_id, status).await
    }

    async fn jobs_for_reconciliation(
        &self,
        completed_grace_minutes: i64,
    ) -> ApiResult<Vec<JobWithDetail>> {
        self.jobs_for_reconciliation_impl(completed_grace_minutes)
            .await
    }

    async fn apply_job_updates(
        &self,
        user_id: Uuid,
        updates: &[JobReconcileUpdate],
    ) -> ApiResult<usize> {
        self.apply_job_updates_impl(user_id, updates).await
    }

    async fn update_job_progress(
        &self,
        job_id: Uuid,
        user_id: Uuid,
        progress: &JobProgress,
    ) -> ApiResult<bool> {
        self.update_job_progress_impl(job_id, user_id, progress).await
    }

    async fn get_model_for_job(&self, job_id: Uuid) -> ApiResult<Option<FineTunedModelData>> {
        self.get_model_for_job_impl(job_id).await
    }

    async fn insert_fine_tuned_model(&self, model: &FineTunedModelData) -> ApiResult<()> {
        self.insert_fine_tuned_model_impl(model).await
    }

    async fn set_model_status_for_job(
        &self,
        job_id: Uuid,
        status: FineTunedModelStatus,
    ) -> ApiResult<()> {
        self.set_model_status_for_job_impl(job_id, status).await
    }

    async fn get_base_model_by_name(&self, name: &str) -> ApiResult<Option<BaseModelData>> {
        self.get_base_model_by_name_impl(name).await
    }

    async fn get_base_model_by_id(&self, id: Uuid) -> ApiResult<Option<BaseModelData>> {
        self.get_base_model_by_id_impl(id).await
    }

    async fn get_dataset_by_name(
        &self,
        user_id: Uuid,
        name: &str,
    ) -> ApiResult<Option<DatasetData>> {
        self.get_dataset_by_name_impl(user_id, name).await
    }

    async fn get_dataset_by_id(&self, id: Uuid) -> ApiResult<Option<DatasetData>> {
        self.get_dataset_by_id_impl(id).await
    }

    async fn get_user(&self, user_id: Uuid) -> ApiResult<Option<UserData>> {
        self.get_user_impl(user_id).await
    }

    async fn get_credit_record(
        &self,
        user_id: Uuid,
        transaction_id: &str,
        transaction_type: BillingTransactionType,
    ) -> ApiResult<Option<BillingCreditData>> {
        self.get_credit_record_impl(user_id, transaction_id, transaction_type)
            .await
    }

    async fn record_deduction(
        &self,
        credit: &BillingCreditData,
        usage: &UsageRecordData,
    ) -> ApiResult<()> {
        self.record_deduction_impl(credit, usage).await
    }

    async fn record_credit(&self, credit: &BillingCreditData) -> ApiResult<()> {
        self.record_credit_impl(credit).await
    }
}
