use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::Id;

/// Fine-tuning job status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    New,
    Queued,
    Running,
    Stopping,
    Stopped,
    Completed,
    Failed,
    Deleted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "NEW",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Stopping => "STOPPING",
            JobStatus::Stopped => "STOPPED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(JobStatus::New),
            "QUEUED" => Some(JobStatus::Queued),
            "RUNNING" => Some(JobStatus::Running),
            "STOPPING" => Some(JobStatus::Stopping),
            "STOPPED" => Some(JobStatus::Stopped),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            "DELETED" => Some(JobStatus::Deleted),
            _ => None,
        }
    }

    /// Key used in the per-status timestamps map ("queued", "running", ...)
    pub fn timestamp_key(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Stopping => "stopping",
            JobStatus::Stopped => "stopped",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Deleted => "deleted",
        }
    }

    /// Terminal statuses are never polled again once their grace window passes
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped | JobStatus::Deleted
        )
    }

    /// Statuses the reconciliation loop always keeps in its polling set
    pub fn non_terminal() -> &'static [JobStatus] {
        &[
            JobStatus::New,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Stopping,
        ]
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// NEW -> QUEUED -> RUNNING -> {COMPLETED, FAILED, STOPPING -> STOPPED};
    /// DELETED only from a terminal status, and only via user action.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if *self == next {
            return false;
        }
        match (self, next) {
            (JobStatus::New, JobStatus::Queued)
            | (JobStatus::New, JobStatus::Running)
            | (JobStatus::New, JobStatus::Failed)
            | (JobStatus::Queued, JobStatus::Running)
            | (JobStatus::Queued, JobStatus::Failed)
            | (JobStatus::Queued, JobStatus::Stopping)
            | (JobStatus::Running, JobStatus::Completed)
            | (JobStatus::Running, JobStatus::Failed)
            | (JobStatus::Running, JobStatus::Stopping)
            | (JobStatus::Stopping, JobStatus::Stopped)
            | (JobStatus::Stopping, JobStatus::Failed)
            | (JobStatus::Stopping, JobStatus::Completed) => true,
            (from, JobStatus::Deleted) => from.is_terminal(),
            _ => false,
        }
    }
}

/// Map a scheduler-reported status string onto the internal vocabulary.
///
/// The scheduler exposes VM-provisioning states we hide behind QUEUED; every
/// other status it reports is already in the internal vocabulary. Returns
/// `None` for strings in neither set so callers can reject vocabulary drift
/// instead of persisting it.
pub fn map_scheduler_status(raw: &str) -> Option<JobStatus> {
    match raw {
        "WAIT_FOR_VM" | "FOUND_VM" | "DETACHED_VM" => Some(JobStatus::Queued),
        other => JobStatus::parse(other),
    }
}

/// Whether a scheduler status belongs to a many-to-one family (several
/// external statuses collapsing into one internal bucket).
fn is_collapsed_status(raw: &str) -> bool {
    matches!(raw, "WAIT_FOR_VM" | "FOUND_VM" | "DETACHED_VM")
}

/// Merge scheduler-reported per-status timestamps into the stored map.
///
/// Rules:
/// - an empty or absent external timestamp never overwrites a stored value;
/// - for many-to-one families (the QUEUED bucket), the first recorded
///   timestamp wins; later family members do not replace it;
/// - pass-through statuses update their own bucket with the latest value;
/// - unrecognized status names are skipped.
pub fn merge_status_timestamps(
    existing: &Map<String, JsonValue>,
    incoming: &BTreeMap<String, Option<String>>,
) -> Map<String, JsonValue> {
    let mut merged = existing.clone();
    for (event, timestamp) in incoming {
        let Some(status) = map_scheduler_status(event) else {
            continue;
        };
        let value = match timestamp {
            Some(ts) if !ts.is_empty() => ts.clone(),
            _ => continue,
        };
        let key = status.timestamp_key();
        let already_set = merged
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if already_set && is_collapsed_status(event) {
            continue;
        }
        merged.insert(key.to_string(), JsonValue::String(value));
    }
    merged
}

/// Fine-tuning method requested for a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobType {
    Full,
    Lora,
    Qlora,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Full => "FULL",
            JobType::Lora => "LORA",
            JobType::Qlora => "QLORA",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FULL" => Some(JobType::Full),
            "LORA" => Some(JobType::Lora),
            "QLORA" => Some(JobType::Qlora),
            _ => None,
        }
    }

    pub fn use_lora(&self) -> bool {
        matches!(self, JobType::Lora | JobType::Qlora)
    }

    pub fn use_qlora(&self) -> bool {
        matches!(self, JobType::Qlora)
    }

    /// Key into a base model's cluster configuration table
    pub fn cluster_config_key(&self) -> &'static str {
        match self {
            JobType::Full => "full",
            JobType::Lora => "lora",
            JobType::Qlora => "qlora",
        }
    }
}

/// Fine-tuning job metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
    pub id: Id,
    pub user_id: Id,
    pub base_model_id: Id,
    pub dataset_id: Id,
    pub name: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub current_step: Option<i32>,
    pub total_steps: Option<i32>,
    pub current_epoch: Option<i32>,
    pub total_epochs: Option<i32>,
    pub num_tokens: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Free-form job detail (1:1 with a job)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetailData {
    pub parameters: JsonValue,
    pub metrics: JsonValue,
    pub timestamps: Map<String, JsonValue>,
}

impl JobDetailData {
    /// Detail row created alongside a new job: empty metrics, one timestamp
    /// bucket per internal status.
    pub fn new(parameters: JsonValue) -> Self {
        let mut timestamps = Map::new();
        for status in [
            JobStatus::New,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Stopping,
            JobStatus::Stopped,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            timestamps.insert(status.timestamp_key().to_string(), JsonValue::Null);
        }
        Self {
            parameters,
            metrics: JsonValue::Object(Map::new()),
            timestamps,
        }
    }
}

/// Job plus its detail row, as loaded for reconciliation
#[derive(Debug, Clone)]
pub struct JobWithDetail {
    pub job: JobMetadata,
    pub detail: JobDetailData,
}

/// Progress counters reported by the scheduler
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobProgress {
    pub current_step: i32,
    pub total_steps: i32,
    pub current_epoch: i32,
    pub total_epochs: i32,
}

/// One job's pending changes within a per-user reconciliation batch
#[derive(Debug, Clone, Default)]
pub struct JobReconcileUpdate {
    pub job_id: Id,
    pub status: Option<JobStatus>,
    pub timestamps: Option<Map<String, JsonValue>>,
    pub progress: Option<JobProgress>,
    pub metrics: Option<JsonValue>,
    pub num_tokens: Option<i64>,
}

impl JobReconcileUpdate {
    pub fn new(job_id: Id) -> Self {
        Self {
            job_id,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.timestamps.is_none()
            && self.progress.is_none()
            && self.metrics.is_none()
            && self.num_tokens.is_none()
    }
}

/// Request to create a new fine-tuning job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    pub base_model_name: String,
    pub dataset_name: String,
    pub job_type: JobType,
    #[serde(default)]
    pub parameters: JsonValue,
}

/// Job summary returned by list endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: Id,
    pub name: String,
    pub base_model_name: String,
    pub dataset_name: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub current_step: Option<i32>,
    pub total_steps: Option<i32>,
    pub current_epoch: Option<i32>,
    pub total_epochs: Option<i32>,
    pub num_tokens: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full job view including detail fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetailResponse {
    #[serde(flatten)]
    pub job: JobResponse,
    pub parameters: JsonValue,
    pub metrics: JsonValue,
    pub timestamps: Map<String, JsonValue>,
}

impl JobResponse {
    pub fn from_parts(job: &JobMetadata, base_model_name: &str, dataset_name: &str) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            base_model_name: base_model_name.to_string(),
            dataset_name: dataset_name.to_string(),
            job_type: job.job_type,
            status: job.status,
            current_step: job.current_step,
            total_steps: job.total_steps,
            current_epoch: job.current_epoch,
            total_epochs: job.total_epochs,
            num_tokens: job.num_tokens,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Scheduler-reported state for one job, as returned by the batched fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerJobUpdate {
    pub job_id: Uuid,
    pub status: String,
    #[serde(default)]
    pub timestamps: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub artifacts: Option<JsonValue>,
    #[serde(default)]
    pub metrics: Option<JsonValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scheduler_vm_statuses_collapse_to_queued() {
        assert_eq!(map_scheduler_status("WAIT_FOR_VM"), Some(JobStatus::Queued));
        assert_eq!(map_scheduler_status("FOUND_VM"), Some(JobStatus::Queued));
        assert_eq!(map_scheduler_status("DETACHED_VM"), Some(JobStatus::Queued));
    }

    #[test]
    fn internal_statuses_pass_through() {
        assert_eq!(map_scheduler_status("RUNNING"), Some(JobStatus::Running));
        assert_eq!(map_scheduler_status("COMPLETED"), Some(JobStatus::Completed));
        assert_eq!(map_scheduler_status("SOME_NEW_STATE"), None);
    }

    #[test]
    fn transitions_follow_state_machine() {
        assert!(JobStatus::New.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Stopping));
        assert!(JobStatus::Stopping.can_transition_to(JobStatus::Stopped));
        assert!(JobStatus::Completed.can_transition_to(JobStatus::Deleted));

        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Deleted));
        assert!(!JobStatus::New.can_transition_to(JobStatus::Stopped));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn empty_timestamp_does_not_overwrite() {
        let mut existing = Map::new();
        existing.insert("running".into(), json!("2024-01-01T00:05:00Z"));

        let mut incoming = BTreeMap::new();
        incoming.insert("WAIT_FOR_VM".to_string(), None);
        incoming.insert("FOUND_VM".to_string(), Some(String::new()));

        let merged = merge_status_timestamps(&existing, &incoming);
        assert_eq!(merged.get("running"), Some(&json!("2024-01-01T00:05:00Z")));
        assert!(merged.get("queued").is_none());
    }

    #[test]
    fn first_arrival_wins_within_queued_family() {
        let existing = Map::new();

        let mut first = BTreeMap::new();
        first.insert(
            "WAIT_FOR_VM".to_string(),
            Some("2024-01-01T00:00:00Z".to_string()),
        );
        let merged = merge_status_timestamps(&existing, &first);
        assert_eq!(merged.get("queued"), Some(&json!("2024-01-01T00:00:00Z")));

        let mut second = BTreeMap::new();
        second.insert(
            "FOUND_VM".to_string(),
            Some("2024-01-01T00:01:00Z".to_string()),
        );
        let merged = merge_status_timestamps(&merged, &second);
        // A later family member must not replace the recorded bucket
        assert_eq!(merged.get("queued"), Some(&json!("2024-01-01T00:00:00Z")));
    }

    #[test]
    fn pass_through_status_updates_own_bucket() {
        let mut existing = Map::new();
        existing.insert("running".into(), json!("2024-01-01T00:00:00Z"));

        let mut incoming = BTreeMap::new();
        incoming.insert(
            "RUNNING".to_string(),
            Some("2024-01-01T00:10:00Z".to_string()),
        );
        let merged = merge_status_timestamps(&existing, &incoming);
        assert_eq!(merged.get("running"), Some(&json!("2024-01-01T00:10:00Z")));
    }

    #[test]
    fn unknown_status_names_are_skipped() {
        let existing = Map::new();
        let mut incoming = BTreeMap::new();
        incoming.insert(
            "MYSTERY_PHASE".to_string(),
            Some("2024-01-01T00:00:00Z".to_string()),
        );
        let merged = merge_status_timestamps(&existing, &incoming);
        assert!(merged.is_empty());
    }

    #[test]
    fn job_type_flags() {
        assert!(JobType::Lora.use_lora());
        assert!(!JobType::Lora.use_qlora());
        assert!(JobType::Qlora.use_lora());
        assert!(JobType::Qlora.use_qlora());
        assert!(!JobType::Full.use_lora());
        assert_eq!(JobType::Qlora.cluster_config_key(), "qlora");
    }
}
