//! Artifact and progress ingestion.
//!
//! Both delivery paths (the polling reconciliation loop and the push
//! channel) funnel into these two operations. Delivery is at-least-once
//! and unordered, so both are idempotent: a duplicate artifact event is a
//! logged no-op and a stale progress event is ignored.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use tuneforge_models::{
    ApiResult, FineTunedModelData, FineTunedModelStatus, JobProgress, ModelArtifacts,
};
use tuneforge_storage::StorageBackend;

/// Apply a progress event for a job.
///
/// Returns the ack decision for the event source: false only when the job
/// does not exist for the claimed user. A regression in `current_step` is
/// dropped by the monotonic guard and still acks.
pub async fn apply_progress(
    store: &Arc<dyn StorageBackend>,
    job_id: Uuid,
    user_id: Uuid,
    progress: &JobProgress,
) -> ApiResult<bool> {
    let applied = store.update_job_progress(job_id, user_id, progress).await?;
    if applied {
        info!(
            job_id = %job_id,
            current_step = progress.current_step,
            total_steps = progress.total_steps,
            "Applied progress update"
        );
    } else {
        warn!(job_id = %job_id, user_id = %user_id, "Progress update for unknown job");
    }
    Ok(applied)
}

/// Create a fine-tuned model from reported artifacts, at most once per job.
///
/// An ownership mismatch is treated as "not found" and rejected (no ack);
/// an already-existing model acks success so duplicate delivery from either
/// channel cannot double-create.
pub async fn ingest_artifacts(
    store: &Arc<dyn StorageBackend>,
    job_id: Uuid,
    user_id: Uuid,
    artifacts: &ModelArtifacts,
) -> ApiResult<bool> {
    let Some(job) = store.get_job_by_id(job_id, user_id).await? else {
        warn!(job_id = %job_id, user_id = %user_id, "Cannot create model: job not found for user");
        return Ok(false);
    };

    if let Some(existing) = store.get_model_for_job(job_id).await? {
        warn!(
            job_id = %job_id,
            model_id = %existing.id,
            "Model already exists for job, ignoring artifacts"
        );
        return Ok(true);
    }

    let model = FineTunedModelData {
        id: Uuid::new_v4(),
        user_id,
        fine_tuning_job_id: job_id,
        name: format!("{}_model", job.name),
        status: FineTunedModelStatus::Active,
        artifacts: serde_json::to_value(artifacts).unwrap_or_default(),
        created_at: Utc::now(),
    };

    if let Err(e) = store.insert_fine_tuned_model(&model).await {
        // Lost a race with the other delivery path; existence wins
        if store.get_model_for_job(job_id).await?.is_some() {
            warn!(job_id = %job_id, "Model created concurrently, ignoring artifacts");
            return Ok(true);
        }
        return Err(e);
    }

    info!(job_id = %job_id, model_id = %model.id, name = %model.name, "Created fine-tuned model");
    Ok(true)
}
