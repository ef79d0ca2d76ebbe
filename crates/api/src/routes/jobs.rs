use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};

use tuneforge_models::{CreateJobRequest, JobDetailResponse, JobResponse};

use crate::services::jobs;
use crate::state::AppState;

use super::{caller_id, AppError};

/// Create fine-tuning jobs router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/v1/fine-tuning", post(create_job).get(list_jobs))
        .route("/v1/fine-tuning/:job_name", get(get_job).delete(delete_job))
        .route("/v1/fine-tuning/:job_name/cancel", post(cancel_job))
}

async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobDetailResponse>), AppError> {
    let user_id = caller_id(&headers)?;
    let response = jobs::create_job(&state, user_id, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<JobResponse>>, AppError> {
    let user_id = caller_id(&headers)?;
    Ok(Json(jobs::list_jobs(&state, user_id).await?))
}

async fn get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_name): Path<String>,
) -> Result<Json<JobDetailResponse>, AppError> {
    let user_id = caller_id(&headers)?;
    Ok(Json(jobs::get_job(&state, user_id, &job_name).await?))
}

async fn cancel_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_name): Path<String>,
) -> Result<Json<JobDetailResponse>, AppError> {
    let user_id = caller_id(&headers)?;
    Ok(Json(jobs::cancel_job(&state, user_id, &job_name).await?))
}

async fn delete_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_name): Path<String>,
) -> Result<StatusCode, AppError> {
    let user_id = caller_id(&headers)?;
    jobs::delete_job(&state, user_id, &job_name).await?;
    Ok(StatusCode::NO_CONTENT)
}
