// Integration tests for the reconciliation loop against the in-memory
// backend, with a scripted status source standing in for the scheduler.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use tuneforge_api::background::{run_reconciliation_pass, StatusSource};
use tuneforge_billing::{ChargeId, ChargeStatus, CreditLedger, PaymentProvider};
use tuneforge_config::{BillingConfig, ReconcileConfig};
use tuneforge_models::{
    ApiError, ApiResult, BaseModelData, BaseModelStatus, JobDetailData, JobMetadata, JobStatus,
    JobType, SchedulerJobUpdate, UserData,
};
use tuneforge_storage::{MemoryStorageBackend, StorageBackend};

/// Status source scripted per user: either a batch of updates or an
/// upstream failure.
#[derive(Default)]
struct ScriptedSource {
    batches: HashMap<Uuid, Vec<SchedulerJobUpdate>>,
    failures: Vec<Uuid>,
}

#[async_trait]
impl StatusSource for ScriptedSource {
    async fn fetch_batch(
        &self,
        user_id: Uuid,
        _job_ids: &[Uuid],
    ) -> ApiResult<Vec<SchedulerJobUpdate>> {
        if self.failures.contains(&user_id) {
            return Err(ApiError::SchedulerRefresh {
                reason: "connection reset by peer".to_string(),
            });
        }
        Ok(self.batches.get(&user_id).cloned().unwrap_or_default())
    }
}

/// Payments provider that always declines; balances in these tests are
/// seeded high enough that it is never reached unless a test wants failure.
struct DecliningPayments;

#[async_trait]
impl PaymentProvider for DecliningPayments {
    async fn charge(&self, _user: &UserData, _amount: f64) -> Result<ChargeId> {
        anyhow::bail!("card declined")
    }

    async fn charge_status(&self, _charge: &ChargeId) -> Result<ChargeStatus> {
        Ok(ChargeStatus::Failed)
    }
}

struct Fixture {
    mem: Arc<MemoryStorageBackend>,
    store: Arc<dyn StorageBackend>,
    ledger: CreditLedger,
    config: ReconcileConfig,
}

async fn fixture() -> Fixture {
    let mem = Arc::new(MemoryStorageBackend::new());
    let store: Arc<dyn StorageBackend> = mem.clone();
    let ledger = CreditLedger::new(
        store.clone(),
        Arc::new(DecliningPayments),
        BillingConfig {
            payments_base_url: "http://payments.test".to_string(),
            auto_recharge: false,
            settle_wait_secs: 1,
            job_min_credits: 1.0,
        },
    );
    Fixture {
        mem,
        store,
        ledger,
        config: ReconcileConfig {
            interval_secs: 60,
            completed_grace_minutes: 10,
        },
    }
}

impl Fixture {
    /// Seed a user with a funded balance and one job in the given status.
    /// The base model charges 0.00001 credits per token.
    async fn seed_job(&self, status: JobStatus, current_step: Option<i32>) -> (Uuid, Uuid) {
        let user_id = Uuid::new_v4();
        let base_model_id = Uuid::new_v4();
        let job_id = Uuid::new_v4();

        self.mem
            .insert_user(UserData {
                id: user_id,
                email: format!("{user_id}@example.com"),
                credits_balance: 100.0,
                payment_customer_id: None,
            })
            .await;
        self.mem
            .insert_base_model(BaseModelData {
                id: base_model_id,
                name: "llm_llama3_1_8b".to_string(),
                status: BaseModelStatus::Active,
                hf_url: None,
                cluster_config: json!({}),
                credits_per_token: 0.00001,
            })
            .await;

        let job = JobMetadata {
            id: job_id,
            user_id,
            base_model_id,
            dataset_id: Uuid::new_v4(),
            name: format!("run-{job_id}"),
            job_type: JobType::Lora,
            status,
            current_step,
            total_steps: current_step.map(|_| 100),
            current_epoch: current_step.map(|_| 1),
            total_epochs: current_step.map(|_| 3),
            num_tokens: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store
            .create_job(&job, &JobDetailData::new(json!({})))
            .await
            .unwrap();
        (user_id, job_id)
    }

    async fn job(&self, job_id: Uuid, user_id: Uuid) -> JobMetadata {
        self.store
            .get_job_by_id(job_id, user_id)
            .await
            .unwrap()
            .unwrap()
    }
}

fn update(job_id: Uuid, status: &str) -> SchedulerJobUpdate {
    SchedulerJobUpdate {
        job_id,
        status: status.to_string(),
        timestamps: BTreeMap::new(),
        artifacts: None,
        metrics: None,
    }
}

#[tokio::test]
async fn wait_for_vm_maps_to_queued_with_timestamp() {
    let f = fixture().await;
    let (user_id, job_id) = f.seed_job(JobStatus::New, None).await;

    let mut upd = update(job_id, "WAIT_FOR_VM");
    upd.timestamps.insert(
        "WAIT_FOR_VM".to_string(),
        Some("2024-01-01T00:00:00Z".to_string()),
    );

    let source = ScriptedSource {
        batches: HashMap::from([(user_id, vec![upd])]),
        failures: vec![],
    };

    let stats = run_reconciliation_pass(&f.store, &source, &f.ledger, &f.config)
        .await
        .unwrap();
    assert_eq!(stats.jobs_updated, 1);

    let job = f.job(job_id, user_id).await;
    assert_eq!(job.status, JobStatus::Queued);

    let detail = f
        .store
        .get_job_by_name(user_id, &job.name)
        .await
        .unwrap()
        .unwrap()
        .detail;
    assert_eq!(
        detail.timestamps.get("queued"),
        Some(&json!("2024-01-01T00:00:00Z"))
    );
}

#[tokio::test]
async fn one_users_failure_does_not_block_others() {
    let f = fixture().await;
    let (user_a, job_a) = f.seed_job(JobStatus::Running, None).await;
    let (user_b, job_b) = f.seed_job(JobStatus::New, None).await;

    let source = ScriptedSource {
        batches: HashMap::from([(user_b, vec![update(job_b, "QUEUED")])]),
        failures: vec![user_a],
    };

    let stats = run_reconciliation_pass(&f.store, &source, &f.ledger, &f.config)
        .await
        .unwrap();
    assert_eq!(stats.users, 2);
    assert_eq!(stats.users_skipped, 1);
    assert_eq!(stats.jobs_updated, 1);

    assert_eq!(f.job(job_a, user_a).await.status, JobStatus::Running);
    assert_eq!(f.job(job_b, user_b).await.status, JobStatus::Queued);
}

#[tokio::test]
async fn stale_progress_from_artifacts_is_ignored() {
    let f = fixture().await;
    let (user_id, job_id) = f.seed_job(JobStatus::Running, Some(50)).await;

    let mut upd = update(job_id, "RUNNING");
    upd.artifacts = Some(json!({
        "job_logger": [
            {"operation": "step", "data": {"step_num": 30, "step_len": 100, "epoch_num": 1, "epoch_len": 3}},
        ]
    }));

    let source = ScriptedSource {
        batches: HashMap::from([(user_id, vec![upd])]),
        failures: vec![],
    };
    run_reconciliation_pass(&f.store, &source, &f.ledger, &f.config)
        .await
        .unwrap();

    assert_eq!(f.job(job_id, user_id).await.current_step, Some(50));
}

#[tokio::test]
async fn forward_progress_takes_the_furthest_step() {
    let f = fixture().await;
    let (user_id, job_id) = f.seed_job(JobStatus::Running, Some(10)).await;

    let mut upd = update(job_id, "RUNNING");
    upd.artifacts = Some(json!({
        "job_logger": [
            {"operation": "step", "data": {"step_num": 40, "step_len": 100, "epoch_num": 1, "epoch_len": 3}},
            {"operation": "step", "data": {"step_num": 70, "step_len": 100, "epoch_num": 2, "epoch_len": 3}},
        ]
    }));

    let source = ScriptedSource {
        batches: HashMap::from([(user_id, vec![upd])]),
        failures: vec![],
    };
    run_reconciliation_pass(&f.store, &source, &f.ledger, &f.config)
        .await
        .unwrap();

    let job = f.job(job_id, user_id).await;
    assert_eq!(job.current_step, Some(70));
    assert_eq!(job.current_epoch, Some(2));
}

#[tokio::test]
async fn weights_artifact_creates_model_once_across_passes() {
    let f = fixture().await;
    let (user_id, job_id) = f.seed_job(JobStatus::Running, None).await;

    let mut upd = update(job_id, "RUNNING");
    upd.artifacts = Some(json!({
        "job_logger": [
            {"operation": "weights", "data": {
                "base_url": "gs://trained/run",
                "weight_files": ["adapter_0.pt"],
                "other_files": [],
            }},
        ]
    }));

    let source = ScriptedSource {
        batches: HashMap::from([(user_id, vec![upd])]),
        failures: vec![],
    };

    run_reconciliation_pass(&f.store, &source, &f.ledger, &f.config)
        .await
        .unwrap();
    // The scheduler keeps reporting the same artifacts on the next poll
    run_reconciliation_pass(&f.store, &source, &f.ledger, &f.config)
        .await
        .unwrap();

    let model = f.store.get_model_for_job(job_id).await.unwrap().unwrap();
    assert!(model.name.ends_with("_model"));
}

#[tokio::test]
async fn completion_deducts_credits_exactly_once() {
    let f = fixture().await;
    let (user_id, job_id) = f.seed_job(JobStatus::Running, Some(100)).await;

    let mut upd = update(job_id, "COMPLETED");
    upd.metrics = Some(json!({"num_tokens": 1_000_000}));

    let source = ScriptedSource {
        batches: HashMap::from([(user_id, vec![upd])]),
        failures: vec![],
    };

    run_reconciliation_pass(&f.store, &source, &f.ledger, &f.config)
        .await
        .unwrap();

    let job = f.job(job_id, user_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.num_tokens, Some(1_000_000));

    let entries = f.mem.credit_entries(user_id).await;
    assert_eq!(entries.len(), 1);
    assert!((entries[0].credits + 10.0).abs() < f64::EPSILON);

    let user = f.store.get_user(user_id).await.unwrap().unwrap();
    assert!((user.credits_balance - 90.0).abs() < f64::EPSILON);

    // The job stays in the grace window and gets polled again; the ledger
    // key makes the second observation a no-op
    run_reconciliation_pass(&f.store, &source, &f.ledger, &f.config)
        .await
        .unwrap();
    assert_eq!(f.mem.credit_entries(user_id).await.len(), 1);
    assert!(f.mem.usage_for_job(job_id).await.is_some());
}

#[tokio::test]
async fn unknown_status_leaves_job_unchanged() {
    let f = fixture().await;
    let (user_id, job_id) = f.seed_job(JobStatus::Running, None).await;

    let source = ScriptedSource {
        batches: HashMap::from([(user_id, vec![update(job_id, "VM_ON_FIRE")])]),
        failures: vec![],
    };
    let stats = run_reconciliation_pass(&f.store, &source, &f.ledger, &f.config)
        .await
        .unwrap();

    assert_eq!(stats.jobs_updated, 0);
    assert_eq!(f.job(job_id, user_id).await.status, JobStatus::Running);
}

#[tokio::test]
async fn invalid_transition_is_ignored() {
    let f = fixture().await;
    // COMPLETED within the grace window still gets polled
    let (user_id, job_id) = f.seed_job(JobStatus::Completed, Some(100)).await;

    let source = ScriptedSource {
        batches: HashMap::from([(user_id, vec![update(job_id, "RUNNING")])]),
        failures: vec![],
    };
    run_reconciliation_pass(&f.store, &source, &f.ledger, &f.config)
        .await
        .unwrap();

    assert_eq!(f.job(job_id, user_id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn empty_timestamp_never_clears_recorded_one() {
    let f = fixture().await;
    let (user_id, job_id) = f.seed_job(JobStatus::Running, None).await;

    // First pass records the running timestamp
    let mut first = update(job_id, "RUNNING");
    first.timestamps.insert(
        "RUNNING".to_string(),
        Some("2024-01-01T00:05:00Z".to_string()),
    );
    let source = ScriptedSource {
        batches: HashMap::from([(user_id, vec![first])]),
        failures: vec![],
    };
    run_reconciliation_pass(&f.store, &source, &f.ledger, &f.config)
        .await
        .unwrap();

    // A later update in the QUEUED family with an empty timestamp must not
    // clear or alter it
    let mut second = update(job_id, "RUNNING");
    second.timestamps.insert("WAIT_FOR_VM".to_string(), None);
    second
        .timestamps
        .insert("RUNNING".to_string(), Some(String::new()));
    let source = ScriptedSource {
        batches: HashMap::from([(user_id, vec![second])]),
        failures: vec![],
    };
    run_reconciliation_pass(&f.store, &source, &f.ledger, &f.config)
        .await
        .unwrap();

    let job = f.job(job_id, user_id).await;
    let detail = f
        .store
        .get_job_by_name(user_id, &job.name)
        .await
        .unwrap()
        .unwrap()
        .detail;
    assert_eq!(
        detail.timestamps.get("running"),
        Some(&json!("2024-01-01T00:05:00Z"))
    );
    // The queued bucket was never legitimately reported, so it stays unset
    assert_eq!(detail.timestamps.get("queued"), Some(&json!(null)));
}
