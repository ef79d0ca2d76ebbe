//! Background reconciliation of job state against the scheduler.
//!
//! A single periodic task loads every job that can still change, groups the
//! jobs by owner (the scheduler's batch endpoint is per-user), pulls the
//! authoritative state, and merges it into local persistence one user
//! transaction at a time. One user's gateway or commit failure never aborts
//! the pass for the others.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tuneforge_billing::CreditLedger;
use tuneforge_config::ReconcileConfig;
use tuneforge_models::{
    map_scheduler_status, merge_status_timestamps, ApiError, ApiResult, CreditDeductRequest,
    JobProgress, JobReconcileUpdate, JobStatus, JobWithDetail, ModelArtifacts,
    SchedulerJobUpdate, ServiceName, UsageUnit,
};
use tuneforge_scheduler::SchedulerClient;
use tuneforge_storage::StorageBackend;

use crate::services::ingest;
use crate::state::AppState;

/// Source of batched job status updates, per user.
///
/// The scheduler gateway is the real implementation; tests substitute their
/// own to exercise the loop without HTTP.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_batch(
        &self,
        user_id: Uuid,
        job_ids: &[Uuid],
    ) -> ApiResult<Vec<SchedulerJobUpdate>>;
}

#[async_trait]
impl StatusSource for SchedulerClient {
    async fn fetch_batch(
        &self,
        user_id: Uuid,
        job_ids: &[Uuid],
    ) -> ApiResult<Vec<SchedulerJobUpdate>> {
        SchedulerClient::fetch_batch(self, user_id, job_ids).await
    }
}

/// Counters for one reconciliation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub users: usize,
    pub users_skipped: usize,
    pub jobs_updated: usize,
    pub artifacts_acked: usize,
}

/// Start the periodic reconciliation task.
///
/// The pass body is awaited inside the tick loop, so runs never overlap.
pub fn start_reconciliation_task(state: Arc<AppState>) {
    tokio::spawn(async move {
        let config = state.config.reconcile.clone();
        info!(
            interval_secs = config.interval_secs,
            "Starting job status reconciliation task"
        );

        let mut ticker = interval(Duration::from_secs(config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match run_reconciliation_pass(
                &state.store,
                state.scheduler.as_ref(),
                &state.ledger,
                &config,
            )
            .await
            {
                Ok(stats) if stats.users > 0 => {
                    info!(
                        users = stats.users,
                        users_skipped = stats.users_skipped,
                        jobs_updated = stats.jobs_updated,
                        "Reconciliation pass finished"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Reconciliation pass failed"),
            }
        }
    });
}

/// Run one reconciliation pass over every job that can still change.
pub async fn run_reconciliation_pass(
    store: &Arc<dyn StorageBackend>,
    source: &dyn StatusSource,
    ledger: &CreditLedger,
    config: &ReconcileConfig,
) -> ApiResult<ReconcileStats> {
    let jobs = store
        .jobs_for_reconciliation(config.completed_grace_minutes)
        .await?;
    if jobs.is_empty() {
        debug!("No jobs need a status update");
        return Ok(ReconcileStats::default());
    }

    let mut stats = ReconcileStats::default();

    for (user_id, user_jobs) in group_jobs_by_user(jobs) {
        stats.users += 1;

        let job_ids: Vec<Uuid> = user_jobs.iter().map(|j| j.job.id).collect();
        let updates = match source.fetch_batch(user_id, &job_ids).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Status fetch failed, skipping user batch");
                stats.users_skipped += 1;
                continue;
            }
        };

        let jobs_by_id: HashMap<Uuid, &JobWithDetail> =
            user_jobs.iter().map(|j| (j.job.id, j)).collect();

        let mut batch = Vec::new();
        let mut artifact_events = Vec::new();
        let mut deductions = Vec::new();

        for update in &updates {
            let Some(current) = jobs_by_id.get(&update.job_id) else {
                warn!(job_id = %update.job_id, "Scheduler reported a job we did not ask about");
                continue;
            };

            let merged = merge_update(current, update);
            if let Some(artifacts) = extract_artifacts(update) {
                artifact_events.push((update.job_id, artifacts));
            }

            // Deduct once the job is (or just became) COMPLETED and usage is
            // known; the ledger's idempotency key absorbs repeats within the
            // grace window.
            let final_status = merged.status.unwrap_or(current.job.status);
            let tokens = merged.num_tokens.or(current.job.num_tokens).unwrap_or(0);
            if final_status == JobStatus::Completed && tokens > 0 {
                deductions.push((update.job_id, tokens));
            }

            if !merged.is_empty() {
                batch.push(merged);
            }
        }

        if !batch.is_empty() {
            match store.apply_job_updates(user_id, &batch).await {
                Ok(touched) => {
                    stats.jobs_updated += touched;
                    info!(user_id = %user_id, jobs = touched, "Committed reconciliation batch");
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Batch commit failed, skipping user");
                    stats.users_skipped += 1;
                    continue;
                }
            }
        }

        for (job_id, artifacts) in artifact_events {
            match ingest::ingest_artifacts(store, job_id, user_id, &artifacts).await {
                Ok(true) => stats.artifacts_acked += 1,
                Ok(false) => {
                    warn!(job_id = %job_id, "Artifact event rejected during reconciliation")
                }
                Err(e) => warn!(job_id = %job_id, error = %e, "Artifact ingestion failed"),
            }
        }

        for (job_id, tokens) in deductions {
            let request = CreditDeductRequest {
                user_id,
                usage_amount: tokens,
                usage_unit: UsageUnit::Token,
                service_name: ServiceName::FineTuningJob,
                fine_tuning_job_id: job_id,
            };
            match ledger.deduct(&request).await {
                Ok(_) => {}
                Err(ApiError::PaymentRequired {
                    required,
                    available,
                }) => {
                    warn!(
                        job_id = %job_id,
                        required,
                        available,
                        "Completed job left unbilled: payment required"
                    );
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Credit deduction failed, will retry next pass")
                }
            }
        }
    }

    Ok(stats)
}

/// Group jobs by owner; the scheduler's batch endpoint is keyed by user.
fn group_jobs_by_user(jobs: Vec<JobWithDetail>) -> HashMap<Uuid, Vec<JobWithDetail>> {
    let mut by_user: HashMap<Uuid, Vec<JobWithDetail>> = HashMap::new();
    for job in jobs {
        by_user.entry(job.job.user_id).or_default().push(job);
    }
    by_user
}

/// Turn one scheduler update into the pending changes for one job.
fn merge_update(current: &JobWithDetail, update: &SchedulerJobUpdate) -> JobReconcileUpdate {
    let mut merged = JobReconcileUpdate::new(update.job_id);

    match map_scheduler_status(&update.status) {
        Some(new_status) if new_status != current.job.status => {
            if current.job.status.can_transition_to(new_status) {
                info!(
                    job_id = %update.job_id,
                    from = current.job.status.as_str(),
                    to = new_status.as_str(),
                    "Updating job status"
                );
                merged.status = Some(new_status);
            } else {
                warn!(
                    job_id = %update.job_id,
                    from = current.job.status.as_str(),
                    to = new_status.as_str(),
                    "Ignoring invalid status transition from scheduler"
                );
            }
        }
        Some(_) => {}
        None => {
            warn!(
                job_id = %update.job_id,
                status = %update.status,
                "Scheduler reported a status outside the known vocabulary"
            );
        }
    }

    if !update.timestamps.is_empty() {
        merged.timestamps = Some(merge_status_timestamps(
            &current.detail.timestamps,
            &update.timestamps,
        ));
    }

    if let Some(progress) = extract_progress(update) {
        if progress.current_step > current.job.current_step.unwrap_or(-1) {
            merged.progress = Some(progress);
        }
    }

    if let Some(metrics) = &update.metrics {
        merged.num_tokens = metrics.get("num_tokens").and_then(|v| v.as_i64());
        merged.metrics = Some(metrics.clone());
    }

    merged
}

/// Walk the artifact log for step events and derive the furthest progress.
fn extract_progress(update: &SchedulerJobUpdate) -> Option<JobProgress> {
    let entries = update.artifacts.as_ref()?.get("job_logger")?.as_array()?;

    let mut progress: Option<JobProgress> = None;
    for entry in entries {
        if entry.get("operation").and_then(|v| v.as_str()) != Some("step") {
            continue;
        }
        let Some(data) = entry.get("data") else {
            continue;
        };
        let step_num = data.get("step_num").and_then(|v| v.as_i64()).unwrap_or(-1) as i32;
        if step_num < 0 {
            continue;
        }
        let candidate = JobProgress {
            current_step: step_num,
            total_steps: data.get("step_len").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
            current_epoch: data.get("epoch_num").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
            total_epochs: data.get("epoch_len").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
        };
        if progress.map_or(true, |p| candidate.current_step > p.current_step) {
            progress = Some(candidate);
        }
    }
    progress
}

/// Walk the artifact log for a weights event.
fn extract_artifacts(update: &SchedulerJobUpdate) -> Option<ModelArtifacts> {
    let entries = update.artifacts.as_ref()?.get("job_logger")?.as_array()?;

    for entry in entries {
        if entry.get("operation").and_then(|v| v.as_str()) != Some("weights") {
            continue;
        }
        if let Some(data) = entry.get("data") {
            match serde_json::from_value::<ModelArtifacts>(data.clone()) {
                Ok(artifacts) => return Some(artifacts),
                Err(e) => {
                    warn!(job_id = %update.job_id, error = %e, "Malformed weights artifact")
                }
            }
        }
    }
    None
}
