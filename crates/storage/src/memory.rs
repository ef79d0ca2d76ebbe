//! In-memory storage backend for detached mode and tests

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use tuneforge_models::{
    ApiError, ApiResult, BaseModelData, BillingCreditData, BillingTransactionType, DatasetData,
    FineTunedModelData, FineTunedModelStatus, JobDetailData, JobMetadata, JobProgress,
    JobReconcileUpdate, JobStatus, JobWithDetail, UsageRecordData, UserData,
};

use super::StorageBackend;

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryStorageBackend {
    jobs: RwLock<HashMap<Uuid, JobWithDetail>>,
    models: RwLock<HashMap<Uuid, FineTunedModelData>>, // keyed by job id
    base_models: RwLock<HashMap<Uuid, BaseModelData>>,
    datasets: RwLock<HashMap<Uuid, DatasetData>>,
    users: RwLock<HashMap<Uuid, UserData>>,
    credits: RwLock<Vec<BillingCreditData>>,
    usage: RwLock<HashMap<Uuid, UsageRecordData>>, // keyed by job id
}

impl MemoryStorageBackend {
    pub fn new() -> Self {
        Self::default()
    }

    // Seed helpers for detached mode and tests

    pub async fn insert_user(&self, user: UserData) {
        self.users.write().await.insert(user.id, user);
    }

    pub async fn insert_base_model(&self, model: BaseModelData) {
        self.base_models.write().await.insert(model.id, model);
    }

    pub async fn insert_dataset(&self, dataset: DatasetData) {
        self.datasets.write().await.insert(dataset.id, dataset);
    }

    pub async fn credit_entries(&self, user_id: Uuid) -> Vec<BillingCreditData> {
        self.credits
            .read()
            .await
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn usage_for_job(&self, job_id: Uuid) -> Option<UsageRecordData> {
        self.usage.read().await.get(&job_id).cloned()
    }

    /// Credit a user's balance directly, bypassing the ledger. Used by tests
    /// to simulate the payment webhook that posts a settled charge.
    pub async fn set_balance(&self, user_id: Uuid, balance: f64) {
        if let Some(user) = self.users.write().await.get_mut(&user_id) {
            user.credits_balance = balance;
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryStorageBackend {
    async fn create_job(&self, job: &JobMetadata, detail: &JobDetailData) -> ApiResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs
            .values()
            .any(|j| j.job.user_id == job.user_id && j.job.name == job.name)
        {
            return Err(ApiError::JobNameExists {
                name: job.name.clone(),
            });
        }
        jobs.insert(
            job.id,
            JobWithDetail {
                job: job.clone(),
                detail: detail.clone(),
            },
        );
        Ok(())
    }

    async fn get_job_by_name(
        &self,
        user_id: Uuid,
        name: &str,
    ) -> ApiResult<Option<JobWithDetail>> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .find(|j| j.job.user_id == user_id && j.job.name == name)
            .cloned())
    }

    async fn get_job_by_id(&self, job_id: Uuid, user_id: Uuid) -> ApiResult<Option<JobMetadata>> {
        Ok(self
            .jobs
            .read()
            .await
            .get(&job_id)
            .filter(|j| j.job.user_id == user_id)
            .map(|j| j.job.clone()))
    }

    async fn list_jobs(&self, user_id: Uuid) -> ApiResult<Vec<JobMetadata>> {
        let mut jobs: Vec<JobMetadata> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.job.user_id == user_id)
            .map(|j| j.job.clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> ApiResult<()> {
        if let Some(entry) = self.jobs.write().await.get_mut(&job_id) {
            entry.job.status = status;
            entry.job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn jobs_for_reconciliation(
        &self,
        completed_grace_minutes: i64,
    ) -> ApiResult<Vec<JobWithDetail>> {
        let cutoff = Utc::now() - Duration::minutes(completed_grace_minutes);
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| {
                !j.job.status.is_terminal()
                    || (j.job.status == JobStatus::Completed && j.job.updated_at >= cutoff)
            })
            .cloned()
            .collect())
    }

    async fn apply_job_updates(
        &self,
        user_id: Uuid,
        updates: &[JobReconcileUpdate],
    ) -> ApiResult<usize> {
        let mut jobs = self.jobs.write().await;
        let mut touched = 0usize;

        for update in updates {
            if update.is_empty() {
                continue;
            }
            let Some(entry) = jobs.get_mut(&update.job_id) else {
                continue;
            };
            if entry.job.user_id != user_id {
                continue;
            }

            if let Some(status) = update.status {
                entry.job.status = status;
            }
            if let Some(progress) = &update.progress {
                if entry.job.current_step.unwrap_or(-1) < progress.current_step {
                    entry.job.current_step = Some(progress.current_step);
                    entry.job.total_steps = Some(progress.total_steps);
                    entry.job.current_epoch = Some(progress.current_epoch);
                    entry.job.total_epochs = Some(progress.total_epochs);
                }
            }
            if let Some(num_tokens) = update.num_tokens {
                entry.job.num_tokens = Some(num_tokens);
            }
            if let Some(timestamps) = &update.timestamps {
                entry.detail.timestamps = timestamps.clone();
            }
            if let Some(metrics) = &update.metrics {
                entry.detail.metrics = metrics.clone();
            }
            entry.job.updated_at = Utc::now();
            touched += 1;
        }

        Ok(touched)
    }

    async fn update_job_progress(
        &self,
        job_id: Uuid,
        user_id: Uuid,
        progress: &JobProgress,
    ) -> ApiResult<bool> {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if entry.job.user_id != user_id {
            return Ok(false);
        }

        if entry.job.current_step.unwrap_or(-1) < progress.current_step {
            entry.job.current_step = Some(progress.current_step);
            entry.job.total_steps = Some(progress.total_steps);
            entry.job.current_epoch = Some(progress.current_epoch);
            entry.job.total_epochs = Some(progress.total_epochs);
            entry.job.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn get_model_for_job(&self, job_id: Uuid) -> ApiResult<Option<FineTunedModelData>> {
        Ok(self.models.read().await.get(&job_id).cloned())
    }

    async fn insert_fine_tuned_model(&self, model: &FineTunedModelData) -> ApiResult<()> {
        let mut models = self.models.write().await;
        if models.contains_key(&model.fine_tuning_job_id) {
            return Err(ApiError::Database {
                reason: format!(
                    "model already exists for job {}",
                    model.fine_tuning_job_id
                ),
            });
        }
        models.insert(model.fine_tuning_job_id, model.clone());
        Ok(())
    }

    async fn set_model_status_for_job(
        &self,
        job_id: Uuid,
        status: FineTunedModelStatus,
    ) -> ApiResult<()> {
        if let Some(model) = self.models.write().await.get_mut(&job_id) {
            model.status = status;
        }
        Ok(())
    }

    async fn get_base_model_by_name(&self, name: &str) -> ApiResult<Option<BaseModelData>> {
        Ok(self
            .base_models
            .read()
            .await
            .values()
            .find(|m| m.name == name)
            .cloned())
    }

    async fn get_base_model_by_id(&self, id: Uuid) -> ApiResult<Option<BaseModelData>> {
        Ok(self.base_models.read().await.get(&id).cloned())
    }

    async fn get_dataset_by_name(
        &self,
        user_id: Uuid,
        name: &str,
    ) -> ApiResult<Option<DatasetData>> {
        Ok(self
            .datasets
            .read()
            .await
            .values()
            .find(|d| d.user_id == user_id && d.name == name)
            .cloned())
    }

    async fn get_dataset_by_id(&self, id: Uuid) -> ApiResult<Option<DatasetData>> {
        Ok(self.datasets.read().await.get(&id).cloned())
    }

    async fn get_user(&self, user_id: Uuid) -> ApiResult<Option<UserData>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn get_credit_record(
        &self,
        user_id: Uuid,
        transaction_id: &str,
        transaction_type: BillingTransactionType,
    ) -> ApiResult<Option<BillingCreditData>> {
        Ok(self
            .credits
            .read()
            .await
            .iter()
            .find(|c| {
                c.user_id == user_id
                    && c.transaction_id == transaction_id
                    && c.transaction_type == transaction_type
            })
            .cloned())
    }

    async fn record_deduction(
        &self,
        credit: &BillingCreditData,
        usage: &UsageRecordData,
    ) -> ApiResult<()> {
        let mut users = self.users.write().await;
        let mut credits = self.credits.write().await;
        let mut usage_records = self.usage.write().await;

        if credits.iter().any(|c| {
            c.user_id == credit.user_id
                && c.transaction_id == credit.transaction_id
                && c.transaction_type == credit.transaction_type
        }) {
            return Err(ApiError::DuplicateTransaction {
                transaction_id: credit.transaction_id.clone(),
            });
        }

        let user = users
            .get_mut(&credit.user_id)
            .ok_or(ApiError::UserNotFound {
                id: credit.user_id,
            })?;

        user.credits_balance += credit.credits;
        credits.push(credit.clone());
        usage_records.insert(usage.fine_tuning_job_id, usage.clone());
        Ok(())
    }

    async fn record_credit(&self, credit: &BillingCreditData) -> ApiResult<()> {
        let mut users = self.users.write().await;
        let mut credits = self.credits.write().await;

        if credits.iter().any(|c| {
            c.user_id == credit.user_id
                && c.transaction_id == credit.transaction_id
                && c.transaction_type == credit.transaction_type
        }) {
            return Err(ApiError::DuplicateTransaction {
                transaction_id: credit.transaction_id.clone(),
            });
        }

        let user = users
            .get_mut(&credit.user_id)
            .ok_or(ApiError::UserNotFound {
                id: credit.user_id,
            })?;

        user.credits_balance += credit.credits;
        credits.push(credit.clone());
        Ok(())
    }
}
