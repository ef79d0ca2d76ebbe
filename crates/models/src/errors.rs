use thiserror::Error;
use uuid::Uuid;

/// API errors
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Base model not found: {name}")]
    BaseModelNotFound { name: String },

    #[error("Dataset not found: {name}")]
    DatasetNotFound { name: String },

    #[error("Fine-tuning job not found: {name}")]
    JobNotFound { name: String },

    #[error("Fine-tuned model not found: {name}")]
    ModelNotFound { name: String },

    #[error("User not found: {id}")]
    UserNotFound { id: Uuid },

    #[error("Fine-tuning job name already exists: {name}")]
    JobNameExists { name: String },

    #[error("Job {job_id} cannot be {operation} in state {status}")]
    InvalidJobState {
        job_id: Uuid,
        status: String,
        operation: &'static str,
    },

    #[error("Pricing not defined for service {service} and unit {unit}")]
    UnknownPricing { service: String, unit: String },

    #[error("Duplicate transaction: {transaction_id}")]
    DuplicateTransaction { transaction_id: String },

    #[error("Insufficient credits: required {required}, available {available}")]
    PaymentRequired { required: f64, available: f64 },

    #[error("Job submission failed: {reason}")]
    JobSubmission { reason: String },

    #[error("Scheduler refresh failed: {reason}")]
    SchedulerRefresh { reason: String },

    #[error("Job cancellation failed for {job_id}: {reason}")]
    JobCancellation {
        job_id: Uuid,
        reason: String,
        not_found: bool,
    },

    #[error("Validation error: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Database error: {reason}")]
    Database { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl ApiError {
    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BaseModelNotFound { .. } => 404,
            ApiError::DatasetNotFound { .. } => 404,
            ApiError::JobNotFound { .. } => 404,
            ApiError::ModelNotFound { .. } => 404,
            ApiError::UserNotFound { .. } => 404,
            ApiError::JobNameExists { .. } => 409,
            ApiError::InvalidJobState { .. } => 409,
            ApiError::DuplicateTransaction { .. } => 409,
            ApiError::UnknownPricing { .. } => 422,
            ApiError::Validation { .. } => 400,
            ApiError::PaymentRequired { .. } => 402,
            ApiError::JobSubmission { .. } => 502,
            ApiError::SchedulerRefresh { .. } => 502,
            ApiError::JobCancellation { not_found, .. } => {
                if *not_found {
                    404
                } else {
                    502
                }
            }
            ApiError::Database { .. } => 500,
            ApiError::Internal { .. } => 500,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::SchedulerRefresh { .. }
                | ApiError::Database { .. }
                | ApiError::Internal { .. }
                | ApiError::JobCancellation {
                    not_found: false,
                    ..
                }
        )
    }

    /// Get error category
    pub fn category(&self) -> &'static str {
        match self {
            ApiError::BaseModelNotFound { .. } => "model",
            ApiError::DatasetNotFound { .. } => "dataset",
            ApiError::JobNotFound { .. } => "job",
            ApiError::ModelNotFound { .. } => "model",
            ApiError::UserNotFound { .. } => "user",
            ApiError::JobNameExists { .. } => "job",
            ApiError::InvalidJobState { .. } => "job",
            ApiError::UnknownPricing { .. } => "billing",
            ApiError::DuplicateTransaction { .. } => "billing",
            ApiError::PaymentRequired { .. } => "billing",
            ApiError::JobSubmission { .. } => "scheduler",
            ApiError::SchedulerRefresh { .. } => "scheduler",
            ApiError::JobCancellation { .. } => "scheduler",
            ApiError::Validation { .. } => "validation",
            ApiError::Database { .. } => "database",
            ApiError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Error response body for HTTP endpoints
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
    pub retryable: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        Self {
            error: err.category().to_string(),
            message: err.to_string(),
            code: err.status_code(),
            retryable: err.is_retryable(),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal {
            reason: err.to_string(),
        }
    }
}
