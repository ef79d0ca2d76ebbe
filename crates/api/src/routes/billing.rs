use axum::{
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

use tuneforge_models::{
    ApiError, BillingCreditData, CreditAddRequest, CreditDeductRequest,
};

use crate::state::AppState;

use super::{caller_id, AppError};

/// Create billing router.
///
/// Deduct and add are trusted internal endpoints; the admin gate lives in
/// the upstream auth layer.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/v1/billing/credits-deduct", post(deduct_credits))
        .route("/v1/billing/credits-add", post(add_credits))
        .route("/v1/billing/credits", get(get_balance))
}

async fn deduct_credits(
    State(state): State<AppState>,
    Json(request): Json<CreditDeductRequest>,
) -> Result<Json<BillingCreditData>, AppError> {
    Ok(Json(state.ledger.deduct(&request).await?))
}

async fn add_credits(
    State(state): State<AppState>,
    Json(request): Json<CreditAddRequest>,
) -> Result<Json<BillingCreditData>, AppError> {
    Ok(Json(state.ledger.add_credits(&request).await?))
}

async fn get_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let user_id = caller_id(&headers)?;
    let user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or(ApiError::UserNotFound { id: user_id })?;
    Ok(Json(json!({
        "user_id": user.id,
        "credits_balance": user.credits_balance,
    })))
}
