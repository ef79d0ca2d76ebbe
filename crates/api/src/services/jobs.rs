//! Fine-tuning job lifecycle operations

use serde_json::{Map, Value as JsonValue};
use tracing::{info, warn};
use uuid::Uuid;

use tuneforge_models::{
    ApiError, ApiResult, CreateJobRequest, JobDetailData, JobDetailResponse, JobMetadata,
    JobResponse, JobStatus, JobWithDetail, FineTunedModelStatus,
};

use crate::state::AppState;

/// Create a fine-tuning job and submit it to the scheduler.
///
/// Submission failure is the one gateway error that mutates state: the job
/// is moved to FAILED and persisted before the error is surfaced.
pub async fn create_job(
    state: &AppState,
    user_id: Uuid,
    request: CreateJobRequest,
) -> ApiResult<JobDetailResponse> {
    let user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or(ApiError::UserNotFound { id: user_id })?;

    let min_credits = state.config.billing.job_min_credits;
    if user.credits_balance < min_credits {
        return Err(ApiError::PaymentRequired {
            required: min_credits,
            available: user.credits_balance,
        });
    }

    let base_model = state
        .store
        .get_base_model_by_name(&request.base_model_name)
        .await?
        .ok_or_else(|| ApiError::BaseModelNotFound {
            name: request.base_model_name.clone(),
        })?;

    let dataset = state
        .store
        .get_dataset_by_name(user_id, &request.dataset_name)
        .await?
        .ok_or_else(|| ApiError::DatasetNotFound {
            name: request.dataset_name.clone(),
        })?;

    if state
        .store
        .get_job_by_name(user_id, &request.name)
        .await?
        .is_some()
    {
        return Err(ApiError::JobNameExists {
            name: request.name.clone(),
        });
    }

    let parameters = match request.parameters {
        JsonValue::Object(map) => JsonValue::Object(map),
        JsonValue::Null => JsonValue::Object(Map::new()),
        other => {
            return Err(ApiError::Validation {
                field: "parameters".to_string(),
                reason: format!("expected an object, got {other}"),
            })
        }
    };

    let now = chrono::Utc::now();
    let job = JobMetadata {
        id: Uuid::new_v4(),
        user_id,
        base_model_id: base_model.id,
        dataset_id: dataset.id,
        name: request.name.clone(),
        job_type: request.job_type,
        status: JobStatus::New,
        current_step: None,
        total_steps: None,
        current_epoch: None,
        total_epochs: None,
        num_tokens: None,
        created_at: now,
        updated_at: now,
    };
    let detail = JobDetailData::new(parameters);

    state.store.create_job(&job, &detail).await?;
    info!(job_id = %job.id, user_id = %user_id, name = %job.name, "Created fine-tuning job");

    let override_env = state.config.environment.as_str();
    if let Err(e) = state
        .scheduler
        .submit(&job, &detail, &dataset, &base_model, Some(override_env))
        .await
    {
        warn!(job_id = %job.id, error = %e, "Job submission failed, marking job FAILED");
        state.store.set_job_status(job.id, JobStatus::Failed).await?;
        return Err(e);
    }

    detail_response(
        state,
        JobWithDetail {
            job,
            detail,
        },
    )
    .await
}

/// Get detailed information about one job.
pub async fn get_job(
    state: &AppState,
    user_id: Uuid,
    job_name: &str,
) -> ApiResult<JobDetailResponse> {
    let found = state
        .store
        .get_job_by_name(user_id, job_name)
        .await?
        .ok_or_else(|| ApiError::JobNotFound {
            name: job_name.to_string(),
        })?;
    detail_response(state, found).await
}

/// List all jobs owned by a user.
pub async fn list_jobs(state: &AppState, user_id: Uuid) -> ApiResult<Vec<JobResponse>> {
    let jobs = state.store.list_jobs(user_id).await?;
    let mut responses = Vec::with_capacity(jobs.len());
    for job in jobs {
        let base_model_name = state
            .store
            .get_base_model_by_id(job.base_model_id)
            .await?
            .map(|m| m.name)
            .unwrap_or_default();
        let dataset_name = state
            .store
            .get_dataset_by_id(job.dataset_id)
            .await?
            .map(|d| d.name)
            .unwrap_or_default();
        responses.push(JobResponse::from_parts(&job, &base_model_name, &dataset_name));
    }
    Ok(responses)
}

/// Cancel a job: optimistic transition to STOPPING plus a fire-and-forget
/// stop request. The reconciliation loop applies the terminal STOPPED or
/// FAILED once the scheduler reports it.
pub async fn cancel_job(
    state: &AppState,
    user_id: Uuid,
    job_name: &str,
) -> ApiResult<JobDetailResponse> {
    let found = state
        .store
        .get_job_by_name(user_id, job_name)
        .await?
        .ok_or_else(|| ApiError::JobNotFound {
            name: job_name.to_string(),
        })?;

    if !found.job.status.can_transition_to(JobStatus::Stopping) {
        return Err(ApiError::InvalidJobState {
            job_id: found.job.id,
            status: found.job.status.as_str().to_string(),
            operation: "cancelled",
        });
    }

    state
        .store
        .set_job_status(found.job.id, JobStatus::Stopping)
        .await?;
    info!(job_id = %found.job.id, user_id = %user_id, "Cancelling fine-tuning job");

    let scheduler = state.scheduler.clone();
    let job_id = found.job.id;
    tokio::spawn(async move {
        if let Err(e) = scheduler.stop(job_id).await {
            match e {
                ApiError::JobCancellation {
                    not_found: true, ..
                } => {
                    // Already gone on the scheduler side; reconciliation
                    // will observe the terminal status
                    warn!(job_id = %job_id, "Scheduler no longer knows the job being cancelled");
                }
                other => {
                    warn!(job_id = %job_id, error = %other, "Stop request failed");
                }
            }
        }
    });

    let mut updated = found;
    updated.job.status = JobStatus::Stopping;
    detail_response(state, updated).await
}

/// Mark a terminal job and its model (if any) as DELETED.
pub async fn delete_job(state: &AppState, user_id: Uuid, job_name: &str) -> ApiResult<()> {
    let found = state
        .store
        .get_job_by_name(user_id, job_name)
        .await?
        .ok_or_else(|| ApiError::JobNotFound {
            name: job_name.to_string(),
        })?;

    if !found.job.status.can_transition_to(JobStatus::Deleted) {
        return Err(ApiError::InvalidJobState {
            job_id: found.job.id,
            status: found.job.status.as_str().to_string(),
            operation: "deleted",
        });
    }

    state
        .store
        .set_job_status(found.job.id, JobStatus::Deleted)
        .await?;
    state
        .store
        .set_model_status_for_job(found.job.id, FineTunedModelStatus::Deleted)
        .await?;

    info!(job_id = %found.job.id, user_id = %user_id, "Marked fine-tuning job as deleted");
    Ok(())
}

async fn detail_response(state: &AppState, found: JobWithDetail) -> ApiResult<JobDetailResponse> {
    let base_model_name = state
        .store
        .get_base_model_by_id(found.job.base_model_id)
        .await?
        .map(|m| m.name)
        .unwrap_or_default();
    let dataset_name = state
        .store
        .get_dataset_by_id(found.job.dataset_id)
        .await?
        .map(|d| d.name)
        .unwrap_or_default();

    Ok(JobDetailResponse {
        job: JobResponse::from_parts(&found.job, &base_model_name, &dataset_name),
        parameters: found.detail.parameters,
        metrics: found.detail.metrics,
        timestamps: found.detail.timestamps,
    })
}
