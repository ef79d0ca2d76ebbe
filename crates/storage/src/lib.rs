//! Persistence layer for the tuneforge API.
//!
//! Exposes a `StorageBackend` trait with explicit repository operations
//! returning plain data structures, with no ORM objects and no lazy relationship
//! loading. Two implementations: PostgreSQL for real deployments and an
//! in-memory backend for detached mode and tests.

use async_trait::async_trait;
use uuid::Uuid;

use tuneforge_models::{
    ApiResult, BaseModelData, BillingCreditData, BillingTransactionType, DatasetData,
    FineTunedModelData, FineTunedModelStatus, JobDetailData, JobMetadata, JobProgress,
    JobReconcileUpdate, JobStatus, JobWithDetail, UsageRecordData, UserData,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStorageBackend;
pub use postgres::PostgresStorageBackend;

/// Storage operations used by the job lifecycle, the reconciliation loop,
/// the ingestion paths, and the credit ledger.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // Jobs

    /// Insert a job and its detail row together.
    async fn create_job(&self, job: &JobMetadata, detail: &JobDetailData) -> ApiResult<()>;

    async fn get_job_by_name(&self, user_id: Uuid, name: &str)
        -> ApiResult<Option<JobWithDetail>>;

    async fn get_job_by_id(&self, job_id: Uuid, user_id: Uuid) -> ApiResult<Option<JobMetadata>>;

    async fn list_jobs(&self, user_id: Uuid) -> ApiResult<Vec<JobMetadata>>;

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> ApiResult<()>;

    /// All non-terminal jobs, plus COMPLETED jobs updated within the trailing
    /// grace window (late artifact/metric events may still arrive for them).
    async fn jobs_for_reconciliation(
        &self,
        completed_grace_minutes: i64,
    ) -> ApiResult<Vec<JobWithDetail>>;

    /// Apply one user's reconciliation batch in a single transaction.
    /// Progress regressions are ignored inside the update, not rejected.
    /// Returns the number of jobs touched.
    async fn apply_job_updates(
        &self,
        user_id: Uuid,
        updates: &[JobReconcileUpdate],
    ) -> ApiResult<usize>;

    /// Monotonic progress update for one job. Returns false when the job does
    /// not exist for the user; a stale update is ignored and still reports
    /// success.
    async fn update_job_progress(
        &self,
        job_id: Uuid,
        user_id: Uuid,
        progress: &JobProgress,
    ) -> ApiResult<bool>;

    // Fine-tuned models

    async fn get_model_for_job(&self, job_id: Uuid) -> ApiResult<Option<FineTunedModelData>>;

    async fn insert_fine_tuned_model(&self, model: &FineTunedModelData) -> ApiResult<()>;

    async fn set_model_status_for_job(
        &self,
        job_id: Uuid,
        status: FineTunedModelStatus,
    ) -> ApiResult<()>;

    // Base models and datasets

    async fn get_base_model_by_name(&self, name: &str) -> ApiResult<Option<BaseModelData>>;

    async fn get_base_model_by_id(&self, id: Uuid) -> ApiResult<Option<BaseModelData>>;

    async fn get_dataset_by_name(&self, user_id: Uuid, name: &str)
        -> ApiResult<Option<DatasetData>>;

    async fn get_dataset_by_id(&self, id: Uuid) -> ApiResult<Option<DatasetData>>;

    // Users and the credit ledger

    async fn get_user(&self, user_id: Uuid) -> ApiResult<Option<UserData>>;

    /// Ledger lookup by the `(user, transaction_id, transaction_type)`
    /// idempotency key.
    async fn get_credit_record(
        &self,
        user_id: Uuid,
        transaction_id: &str,
        transaction_type: BillingTransactionType,
    ) -> ApiResult<Option<BillingCreditData>>;

    /// Record a deduction: debit the balance, insert the negative ledger
    /// entry, and insert the usage record in one transaction.
    async fn record_deduction(
        &self,
        credit: &BillingCreditData,
        usage: &UsageRecordData,
    ) -> ApiResult<()>;

    /// Record a credit addition: insert the ledger entry and credit the
    /// balance in one transaction. A reused idempotency key surfaces as
    /// `ApiError::DuplicateTransaction`.
    async fn record_credit(&self, credit: &BillingCreditData) -> ApiResult<()>;
}
