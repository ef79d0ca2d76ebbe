//! HTTP gateway to the external Scheduler service.
//!
//! The scheduler actually runs training jobs on GPU clusters; this crate
//! only builds payloads, issues requests, and translates failures into the
//! shared error enum. With `scheduler.enabled = false` every operation is a
//! no-op so the rest of the system can run detached.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{info, warn};
use uuid::Uuid;

use tuneforge_config::SchedulerConfig;
use tuneforge_models::{
    ApiError, ApiResult, BaseModelData, DatasetData, JobDetailData, JobMetadata,
    SchedulerJobUpdate,
};

mod types;
pub use types::*;

/// Client for the external Scheduler API
#[derive(Debug, Clone)]
pub struct SchedulerClient {
    http: reqwest::Client,
    config: SchedulerConfig,
}

impl SchedulerClient {
    pub fn new(config: SchedulerConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    /// Submit a job to the scheduler.
    ///
    /// The caller owns the failure transition: on error it moves the job to
    /// FAILED and persists that.
    pub async fn submit(
        &self,
        job: &JobMetadata,
        detail: &JobDetailData,
        dataset: &DatasetData,
        base_model: &BaseModelData,
        override_env: Option<&str>,
    ) -> ApiResult<()> {
        if !self.config.enabled {
            info!("Scheduler API is disabled, skipping job submission");
            return Ok(());
        }

        let payload = build_submit_payload(job, detail, dataset, base_model, override_env)?;

        let response = self
            .http
            .post(format!("{}/jobs", self.config.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ApiError::JobSubmission {
                reason: e.to_string(),
            })?;

        match response.status() {
            status if status.is_success() => {
                info!(job_id = %job.id, "Submitted fine-tuning job to scheduler");
                Ok(())
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                let message = response
                    .json::<SchedulerErrorBody>()
                    .await
                    .map(|b| b.message)
                    .unwrap_or_else(|e| e.to_string());
                Err(ApiError::JobSubmission { reason: message })
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ApiError::JobSubmission {
                    reason: format!("scheduler returned {status}: {body}"),
                })
            }
        }
    }

    /// Fetch status updates for a user's jobs in one batched call.
    ///
    /// Always one request per user, never per job; the reconciliation loop
    /// treats a failure here as "skip this user's batch".
    pub async fn fetch_batch(
        &self,
        user_id: Uuid,
        job_ids: &[Uuid],
    ) -> ApiResult<Vec<SchedulerJobUpdate>> {
        if !self.config.enabled {
            info!("Scheduler API is disabled, skipping status fetch");
            return Ok(Vec::new());
        }

        let request = FetchJobsRequest {
            user_id: user_id.to_string(),
            job_ids: job_ids.iter().map(Uuid::to_string).collect(),
        };

        let response = self
            .http
            .post(format!("{}/jobs/get_by_user_and_ids", self.config.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::SchedulerRefresh {
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::SchedulerRefresh {
                reason: format!("scheduler returned {status}: {body}"),
            });
        }

        response
            .json::<Vec<SchedulerJobUpdate>>()
            .await
            .map_err(|e| ApiError::SchedulerRefresh {
                reason: format!("invalid response body: {e}"),
            })
    }

    /// Request cancellation of a running job.
    ///
    /// A 404 is an expected outcome (job already gone or never started) and
    /// is marked distinctly so callers can treat it as already-stopped.
    pub async fn stop(&self, job_id: Uuid) -> ApiResult<()> {
        if !self.config.enabled {
            info!("Scheduler API is disabled, skipping stop request");
            return Ok(());
        }

        let response = self
            .http
            .post(format!("{}/jobs/{}/stop", self.config.base_url, job_id))
            .send()
            .await
            .map_err(|e| ApiError::JobCancellation {
                job_id,
                reason: e.to_string(),
                not_found: false,
            })?;

        match response.status() {
            status if status.is_success() => {
                info!(job_id = %job_id, "Requested stop for fine-tuning job");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                warn!(job_id = %job_id, "Stop requested for a job the scheduler does not know");
                Err(ApiError::JobCancellation {
                    job_id,
                    reason: "job not found or not running".to_string(),
                    not_found: true,
                })
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ApiError::JobCancellation {
                    job_id,
                    reason: format!("scheduler returned {status}: {body}"),
                    not_found: false,
                })
            }
        }
    }
}

/// Build the scheduler submit payload from the job aggregate.
///
/// GPU count and type come from the base model's cluster table, keyed by the
/// fine-tuning method; the remaining knobs come from the job parameters with
/// the scheduler's documented defaults.
pub fn build_submit_payload(
    job: &JobMetadata,
    detail: &JobDetailData,
    dataset: &DatasetData,
    base_model: &BaseModelData,
    override_env: Option<&str>,
) -> ApiResult<SubmitJobPayload> {
    let method_key = job.job_type.cluster_config_key();
    let cluster = base_model.cluster_config_for(method_key).ok_or_else(|| {
        ApiError::Validation {
            field: "cluster_config".to_string(),
            reason: format!(
                "base model {} has no cluster configuration for {method_key}",
                base_model.name
            ),
        }
    })?;

    let params = &detail.parameters;
    let batch_size = params
        .get("batch_size")
        .and_then(|v| v.as_i64())
        .unwrap_or(2);
    let shuffle = params
        .get("shuffle")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let num_epochs = params
        .get("num_epochs")
        .and_then(|v| v.as_i64())
        .unwrap_or(1);

    Ok(SubmitJobPayload {
        job_id: job.id.to_string(),
        workflow: FINE_TUNING_WORKFLOW,
        args: SubmitJobArgs {
            job_config_name: base_model.name.clone(),
            dataset_id: dataset.storage_url.clone(),
            batch_size,
            shuffle,
            num_epochs,
            use_lora: job.job_type.use_lora(),
            use_qlora: job.job_type.use_qlora(),
            num_gpus: cluster.num_gpus,
            override_env: override_env.map(str::to_string),
        },
        gpu_type: cluster.gpu_type,
        user_id: job.user_id.to_string(),
        keep_alive: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tuneforge_models::{
        BaseModelStatus, DatasetStatus, JobStatus, JobType,
    };

    fn fixture(job_type: JobType) -> (JobMetadata, JobDetailData, DatasetData, BaseModelData) {
        let user_id = Uuid::new_v4();
        let base_model = BaseModelData {
            id: Uuid::new_v4(),
            name: "llm_llama3_1_8b".into(),
            status: BaseModelStatus::Active,
            hf_url: None,
            cluster_config: json!({
                "lora": {"num_gpus": 4, "gpu_type": "a100-40gb"},
                "qlora": {"num_gpus": 1, "gpu_type": "a100-40gb"},
            }),
            credits_per_token: 0.000003,
        };
        let dataset = DatasetData {
            id: Uuid::new_v4(),
            user_id,
            name: "chat-pairs".into(),
            status: DatasetStatus::Validated,
            storage_url: "gs://datasets/user/chat-pairs.jsonl".into(),
        };
        let job = JobMetadata {
            id: Uuid::new_v4(),
            user_id,
            base_model_id: base_model.id,
            dataset_id: dataset.id,
            name: "my-run".into(),
            job_type,
            status: JobStatus::New,
            current_step: None,
            total_steps: None,
            current_epoch: None,
            total_epochs: None,
            num_tokens: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let detail = JobDetailData::new(json!({"batch_size": 8, "num_epochs": 3}));
        (job, detail, dataset, base_model)
    }

    #[test]
    fn lora_payload_uses_cluster_table() {
        let (job, detail, dataset, base_model) = fixture(JobType::Lora);
        let payload = build_submit_payload(&job, &detail, &dataset, &base_model, None).unwrap();

        assert_eq!(payload.workflow, FINE_TUNING_WORKFLOW);
        assert_eq!(payload.gpu_type, "a100-40gb");
        assert_eq!(payload.args.num_gpus, 4);
        assert!(payload.args.use_lora);
        assert!(!payload.args.use_qlora);
        assert_eq!(payload.args.batch_size, 8);
        assert_eq!(payload.args.num_epochs, 3);
        assert_eq!(payload.args.dataset_id, "gs://datasets/user/chat-pairs.jsonl");
        assert!(!payload.keep_alive);
    }

    #[test]
    fn qlora_payload_sets_both_flags() {
        let (job, detail, dataset, base_model) = fixture(JobType::Qlora);
        let payload = build_submit_payload(&job, &detail, &dataset, &base_model, Some("dev")).unwrap();

        assert!(payload.args.use_lora);
        assert!(payload.args.use_qlora);
        assert_eq!(payload.args.num_gpus, 1);
        assert_eq!(payload.args.override_env.as_deref(), Some("dev"));
    }

    #[test]
    fn missing_cluster_entry_is_rejected() {
        let (job, detail, dataset, base_model) = fixture(JobType::Full);
        let err = build_submit_payload(&job, &detail, &dataset, &base_model, None).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn parameter_defaults_apply() {
        let (job, mut detail, dataset, base_model) = fixture(JobType::Lora);
        detail.parameters = json!({});
        let payload = build_submit_payload(&job, &detail, &dataset, &base_model, None).unwrap();
        assert_eq!(payload.args.batch_size, 2);
        assert!(payload.args.shuffle);
        assert_eq!(payload.args.num_epochs, 1);
    }
}
