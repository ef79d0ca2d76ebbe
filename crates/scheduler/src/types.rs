//! Wire types for the scheduler API
//!
//! Payloads are fixed structs internally and only become JSON at the HTTP
//! edge.

use serde::{Deserialize, Serialize};

/// Workflow every fine-tuning job runs under
pub const FINE_TUNING_WORKFLOW: &str = "torchtunewrapper";

/// Body for `POST {scheduler}/jobs`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubmitJobPayload {
    pub job_id: String,
    pub workflow: &'static str,
    pub args: SubmitJobArgs,
    pub gpu_type: String,
    pub user_id: String,
    pub keep_alive: bool,
}

/// Training arguments inside the submit payload
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubmitJobArgs {
    pub job_config_name: String,
    pub dataset_id: String,
    pub batch_size: i64,
    pub shuffle: bool,
    pub num_epochs: i64,
    pub use_lora: bool,
    pub use_qlora: bool,
    pub num_gpus: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_env: Option<String>,
}

/// Body for `POST {scheduler}/jobs/get_by_user_and_ids`
#[derive(Debug, Clone, Serialize)]
pub struct FetchJobsRequest {
    pub user_id: String,
    pub job_ids: Vec<String>,
}

/// Error body the scheduler returns on validation failures (422)
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerErrorBody {
    pub message: String,
}
