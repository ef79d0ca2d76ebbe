// Integration tests for artifact/progress ingestion and the push channel
// routing, driven against the in-memory backend.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use tuneforge_api::push::handle_push_message;
use tuneforge_api::services::ingest;
use tuneforge_models::{
    JobDetailData, JobMetadata, JobProgress, JobStatus, JobType, ModelArtifacts,
};
use tuneforge_storage::{MemoryStorageBackend, StorageBackend};

struct Fixture {
    store: Arc<dyn StorageBackend>,
    user_id: Uuid,
    job_id: Uuid,
}

async fn seed_running_job() -> Fixture {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryStorageBackend::new());
    let user_id = Uuid::new_v4();
    let job_id = Uuid::new_v4();

    let job = JobMetadata {
        id: job_id,
        user_id,
        base_model_id: Uuid::new_v4(),
        dataset_id: Uuid::new_v4(),
        name: "my-run".to_string(),
        job_type: JobType::Lora,
        status: JobStatus::Running,
        current_step: None,
        total_steps: None,
        current_epoch: None,
        total_epochs: None,
        num_tokens: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store
        .create_job(&job, &JobDetailData::new(json!({})))
        .await
        .unwrap();

    Fixture {
        store,
        user_id,
        job_id,
    }
}

fn artifacts() -> ModelArtifacts {
    ModelArtifacts {
        base_url: "gs://trained/my-run".to_string(),
        weight_files: vec!["adapter_0.pt".to_string()],
        other_files: vec!["config.json".to_string()],
    }
}

#[tokio::test]
async fn artifact_ingestion_creates_model_once() {
    let f = seed_running_job().await;

    let first = ingest::ingest_artifacts(&f.store, f.job_id, f.user_id, &artifacts())
        .await
        .unwrap();
    assert!(first);

    // Duplicate delivery still acks and does not double-create
    let second = ingest::ingest_artifacts(&f.store, f.job_id, f.user_id, &artifacts())
        .await
        .unwrap();
    assert!(second);

    let model = f.store.get_model_for_job(f.job_id).await.unwrap().unwrap();
    assert_eq!(model.name, "my-run_model");
    assert_eq!(model.user_id, f.user_id);
}

#[tokio::test]
async fn artifact_for_wrong_owner_is_rejected() {
    let f = seed_running_job().await;

    let ack = ingest::ingest_artifacts(&f.store, f.job_id, Uuid::new_v4(), &artifacts())
        .await
        .unwrap();
    assert!(!ack);
    assert!(f.store.get_model_for_job(f.job_id).await.unwrap().is_none());
}

#[tokio::test]
async fn progress_updates_are_monotonic() {
    let f = seed_running_job().await;

    let forward = JobProgress {
        current_step: 50,
        total_steps: 100,
        current_epoch: 1,
        total_epochs: 3,
    };
    assert!(ingest::apply_progress(&f.store, f.job_id, f.user_id, &forward)
        .await
        .unwrap());

    // An out-of-order regression still acks but is not applied
    let stale = JobProgress {
        current_step: 30,
        total_steps: 100,
        current_epoch: 1,
        total_epochs: 3,
    };
    assert!(ingest::apply_progress(&f.store, f.job_id, f.user_id, &stale)
        .await
        .unwrap());

    let job = f
        .store
        .get_job_by_id(f.job_id, f.user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.current_step, Some(50));
}

#[tokio::test]
async fn progress_for_unknown_job_is_rejected() {
    let f = seed_running_job().await;
    let progress = JobProgress {
        current_step: 1,
        total_steps: 10,
        current_epoch: 0,
        total_epochs: 1,
    };
    let ack = ingest::apply_progress(&f.store, Uuid::new_v4(), f.user_id, &progress)
        .await
        .unwrap();
    assert!(!ack);
}

#[tokio::test]
async fn push_progress_message_is_applied() {
    let f = seed_running_job().await;
    let message = json!({
        "job_id": f.job_id.to_string(),
        "user_id": f.user_id.to_string(),
        "action": "job_progress",
        "workflow": "torchtunewrapper",
        "step_num": 42,
        "step_len": 100,
        "epoch_num": 1,
        "epoch_len": 3,
    })
    .to_string();

    assert!(handle_push_message(&f.store, &message).await);

    let job = f
        .store
        .get_job_by_id(f.job_id, f.user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.current_step, Some(42));
    assert_eq!(job.total_steps, Some(100));
}

#[tokio::test]
async fn push_artifact_message_creates_model() {
    let f = seed_running_job().await;
    let message = json!({
        "job_id": f.job_id.to_string(),
        "user_id": f.user_id.to_string(),
        "action": "job_artifacts",
        "workflow": "torchtunewrapper",
        "data": {
            "base_url": "gs://trained/my-run",
            "weight_files": ["adapter_0.pt"],
            "other_files": [],
        },
    })
    .to_string();

    assert!(handle_push_message(&f.store, &message).await);
    // Redelivery of the same message acks without a second model
    assert!(handle_push_message(&f.store, &message).await);

    let model = f.store.get_model_for_job(f.job_id).await.unwrap().unwrap();
    assert_eq!(model.name, "my-run_model");
}

#[tokio::test]
async fn push_sentinel_user_is_dropped_and_acked() {
    let f = seed_running_job().await;
    let message = json!({
        "job_id": f.job_id.to_string(),
        "user_id": "-1",
        "action": "job_progress",
        "workflow": "torchtunewrapper",
        "step_num": 10,
    })
    .to_string();

    assert!(handle_push_message(&f.store, &message).await);

    let job = f
        .store
        .get_job_by_id(f.job_id, f.user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.current_step, None);
}

#[tokio::test]
async fn push_unsupported_workflow_is_not_acked() {
    let f = seed_running_job().await;
    let message = json!({
        "job_id": f.job_id.to_string(),
        "user_id": f.user_id.to_string(),
        "action": "job_progress",
        "workflow": "some_other_pipeline",
        "step_num": 10,
    })
    .to_string();

    assert!(!handle_push_message(&f.store, &message).await);
}

#[tokio::test]
async fn push_unknown_action_is_not_acked() {
    let f = seed_running_job().await;
    let message = json!({
        "job_id": f.job_id.to_string(),
        "user_id": f.user_id.to_string(),
        "action": "job_telepathy",
        "workflow": "torchtunewrapper",
    })
    .to_string();

    assert!(!handle_push_message(&f.store, &message).await);
}

#[tokio::test]
async fn push_progress_without_step_is_not_acked() {
    let f = seed_running_job().await;
    let message = json!({
        "job_id": f.job_id.to_string(),
        "user_id": f.user_id.to_string(),
        "action": "job_progress",
        "workflow": "torchtunewrapper",
    })
    .to_string();

    assert!(!handle_push_message(&f.store, &message).await);
}

#[tokio::test]
async fn push_garbage_is_not_acked() {
    let f = seed_running_job().await;
    assert!(!handle_push_message(&f.store, "not json at all").await);
}
