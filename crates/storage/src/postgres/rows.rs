//! Database row structures for the PostgreSQL backend

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use sqlx::FromRow;
use uuid::Uuid;

use tuneforge_models::{
    BaseModelData, BaseModelStatus, BillingCreditData, BillingTransactionType, DatasetData,
    DatasetStatus, FineTunedModelData, FineTunedModelStatus, JobDetailData, JobMetadata,
    JobStatus, JobType, ServiceName, UsageRecordData, UsageUnit, UserData,
};

/// Row for the fine_tuning_jobs table
#[derive(Debug, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub base_model_id: Uuid,
    pub dataset_id: Uuid,
    pub name: String,
    pub job_type: String,
    pub status: String,
    pub current_step: Option<i32>,
    pub total_steps: Option<i32>,
    pub current_epoch: Option<i32>,
    pub total_epochs: Option<i32>,
    pub num_tokens: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobRow> for JobMetadata {
    fn from(row: JobRow) -> Self {
        JobMetadata {
            id: row.id,
            user_id: row.user_id,
            base_model_id: row.base_model_id,
            dataset_id: row.dataset_id,
            name: row.name,
            job_type: JobType::parse(&row.job_type).unwrap_or(JobType::Lora),
            status: JobStatus::parse(&row.status).unwrap_or(JobStatus::New),
            current_step: row.current_step,
            total_steps: row.total_steps,
            current_epoch: row.current_epoch,
            total_epochs: row.total_epochs,
            num_tokens: row.num_tokens,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Job joined with its detail row
#[derive(Debug, FromRow)]
pub struct JobWithDetailRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub base_model_id: Uuid,
    pub dataset_id: Uuid,
    pub name: String,
    pub job_type: String,
    pub status: String,
    pub current_step: Option<i32>,
    pub total_steps: Option<i32>,
    pub current_epoch: Option<i32>,
    pub total_epochs: Option<i32>,
    pub num_tokens: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub parameters: JsonValue,
    pub metrics: JsonValue,
    pub timestamps: JsonValue,
}

impl JobWithDetailRow {
    pub fn split(self) -> (JobMetadata, JobDetailData) {
        let timestamps: Map<String, JsonValue> = match self.timestamps {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        let detail = JobDetailData {
            parameters: self.parameters,
            metrics: self.metrics,
            timestamps,
        };
        let job = JobMetadata {
            id: self.id,
            user_id: self.user_id,
            base_model_id: self.base_model_id,
            dataset_id: self.dataset_id,
            name: self.name,
            job_type: JobType::parse(&self.job_type).unwrap_or(JobType::Lora),
            status: JobStatus::parse(&self.status).unwrap_or(JobStatus::New),
            current_step: self.current_step,
            total_steps: self.total_steps,
            current_epoch: self.current_epoch,
            total_epochs: self.total_epochs,
            num_tokens: self.num_tokens,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        (job, detail)
    }
}

/// Row for the fine_tuned_models table
#[derive(Debug, FromRow)]
pub struct FineTunedModelRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub fine_tuning_job_id: Uuid,
    pub name: String,
    pub status: String,
    pub artifacts: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl From<FineTunedModelRow> for FineTunedModelData {
    fn from(row: FineTunedModelRow) -> Self {
        FineTunedModelData {
            id: row.id,
            user_id: row.user_id,
            fine_tuning_job_id: row.fine_tuning_job_id,
            name: row.name,
            status: FineTunedModelStatus::parse(&row.status)
                .unwrap_or(FineTunedModelStatus::Active),
            artifacts: row.artifacts,
            created_at: row.created_at,
        }
    }
}

/// Row for the base_models table
#[derive(Debug, FromRow)]
pub struct BaseModelRow {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub hf_url: Option<String>,
    pub cluster_config: JsonValue,
    pub credits_per_token: f64,
}

impl From<BaseModelRow> for BaseModelData {
    fn from(row: BaseModelRow) -> Self {
        BaseModelData {
            id: row.id,
            name: row.name,
            status: BaseModelStatus::parse(&row.status).unwrap_or(BaseModelStatus::Inactive),
            hf_url: row.hf_url,
            cluster_config: row.cluster_config,
            credits_per_token: row.credits_per_token,
        }
    }
}

/// Row for the datasets table
#[derive(Debug, FromRow)]
pub struct DatasetRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub status: String,
    pub storage_url: String,
}

impl From<DatasetRow> for DatasetData {
    fn from(row: DatasetRow) -> Self {
        DatasetData {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            status: DatasetStatus::parse(&row.status).unwrap_or(DatasetStatus::Uploaded),
            storage_url: row.storage_url,
        }
    }
}

/// Row for the users table
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub credits_balance: f64,
    pub payment_customer_id: Option<String>,
}

impl From<UserRow> for UserData {
    fn from(row: UserRow) -> Self {
        UserData {
            id: row.id,
            email: row.email,
            credits_balance: row.credits_balance,
            payment_customer_id: row.payment_customer_id,
        }
    }
}

/// Row for the billing_credits table
#[derive(Debug, FromRow)]
pub struct BillingCreditRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub credits: f64,
    pub transaction_id: String,
    pub transaction_type: String,
    pub created_at: DateTime<Utc>,
}

impl From<BillingCreditRow> for BillingCreditData {
    fn from(row: BillingCreditRow) -> Self {
        BillingCreditData {
            id: row.id,
            user_id: row.user_id,
            credits: row.credits,
            transaction_id: row.transaction_id,
            transaction_type: BillingTransactionType::parse(&row.transaction_type)
                .unwrap_or(BillingTransactionType::ManualAdjustment),
            created_at: row.created_at,
        }
    }
}

/// Row for the usage_records table
#[derive(Debug, FromRow)]
pub struct UsageRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub usage_amount: i64,
    pub usage_unit: String,
    pub cost: f64,
    pub service_name: String,
    pub fine_tuning_job_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<UsageRow> for UsageRecordData {
    fn from(row: UsageRow) -> Self {
        UsageRecordData {
            id: row.id,
            user_id: row.user_id,
            usage_amount: row.usage_amount,
            usage_unit: UsageUnit::parse(&row.usage_unit).unwrap_or(UsageUnit::Token),
            cost: row.cost,
            service_name: ServiceName::parse(&row.service_name)
                .unwrap_or(ServiceName::FineTuningJob),
            fine_tuning_job_id: row.fine_tuning_job_id,
            created_at: row.created_at,
        }
    }
}
