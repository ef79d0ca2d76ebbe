//! Push ingestion channel.
//!
//! The training side publishes job events (progress, artifacts) onto a Redis
//! Stream; this consumer routes them through the same idempotent ingestion
//! operations the polling loop uses, so duplicate or out-of-order delivery
//! from either path is harmless. A message is acknowledged only after the
//! database commit succeeds; anything else stays pending for redelivery.

use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};
use uuid::Uuid;

use tuneforge_config::PushConfig;
use tuneforge_models::{JobProgress, ModelArtifacts};
use tuneforge_scheduler::FINE_TUNING_WORKFLOW;
use tuneforge_storage::StorageBackend;

use crate::services::ingest;
use crate::state::AppState;

/// User ids the training system uses for its own plumbing; their events are
/// dropped and acked, since redelivery would be pointless.
const SENTINEL_USER_IDS: &[&str] = &["0", "-1"];

/// Stream field that carries the JSON message body
const PAYLOAD_FIELD: &str = "payload";

/// Start the push consumer loop.
pub fn start_push_consumer(state: Arc<AppState>) {
    tokio::spawn(async move {
        let config = state.config.push.clone();
        if !config.enabled {
            info!("Push ingestion channel is disabled");
            return;
        }

        info!(
            stream = %config.stream,
            group = %config.consumer_group,
            "Starting push ingestion consumer"
        );

        loop {
            match consume(&state, &config).await {
                Ok(()) => break,
                Err(e) => {
                    error!(error = %e, "Push consumer failed, reconnecting in 5s");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }
        }
    });
}

async fn consume(state: &AppState, config: &PushConfig) -> anyhow::Result<()> {
    let client = redis::Client::open(config.redis_url.as_str())?;
    let mut conn = ConnectionManager::new(client).await?;

    // Create the consumer group; BUSYGROUP just means it already exists
    let created: Result<(), redis::RedisError> = conn
        .xgroup_create_mkstream(&config.stream, &config.consumer_group, "$")
        .await;
    if let Err(e) = created {
        if !e.to_string().contains("BUSYGROUP") {
            return Err(e.into());
        }
    }

    let options = StreamReadOptions::default()
        .group(&config.consumer_group, &config.consumer_name)
        .block(5_000)
        .count(10);

    loop {
        let reply: StreamReadReply = conn
            .xread_options(&[config.stream.as_str()], &[">"], &options)
            .await?;

        for key in reply.keys {
            for entry in key.ids {
                let Some(raw) = entry
                    .map
                    .get(PAYLOAD_FIELD)
                    .and_then(|v| redis::from_redis_value::<String>(v).ok())
                else {
                    warn!(message_id = %entry.id, "Push message without payload field");
                    continue;
                };

                if handle_push_message(&state.store, &raw).await {
                    let _: i64 = conn
                        .xack(&config.stream, &config.consumer_group, &[&entry.id])
                        .await?;
                }
            }
        }
    }
}

/// Process one push message; returns the ack decision.
///
/// Messages from sentinel users are dropped (acked). Unknown actions,
/// unsupported workflows, malformed bodies, and handler failures are left
/// unacknowledged so the stream redelivers them.
pub async fn handle_push_message(store: &Arc<dyn StorageBackend>, raw: &str) -> bool {
    let data: JsonValue = match serde_json::from_str(raw) {
        Ok(data) => data,
        Err(e) => {
            warn!(error = %e, "Unparseable push message");
            return false;
        }
    };

    let field = |name: &str| data.get(name).and_then(|v| v.as_str()).unwrap_or_default();
    let user_id_raw = field("user_id");
    let workflow = field("workflow");
    let action = field("action");

    if SENTINEL_USER_IDS.contains(&user_id_raw) {
        info!(user_id = %user_id_raw, "Ignoring push message for internal user");
        return true;
    }

    if workflow != FINE_TUNING_WORKFLOW {
        warn!(workflow = %workflow, "Ignoring push message for unsupported workflow");
        return false;
    }

    let (Ok(job_id), Ok(user_id)) = (
        Uuid::parse_str(field("job_id")),
        Uuid::parse_str(user_id_raw),
    ) else {
        warn!("Push message with malformed job or user id");
        return false;
    };

    match action {
        "job_progress" => {
            let step_num = data.get("step_num").and_then(|v| v.as_i64()).unwrap_or(-1);
            if step_num < 0 {
                warn!(job_id = %job_id, "Progress message without a step number");
                return false;
            }
            let progress = JobProgress {
                current_step: step_num as i32,
                total_steps: data.get("step_len").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
                current_epoch: data.get("epoch_num").and_then(|v| v.as_i64()).unwrap_or(0)
                    as i32,
                total_epochs: data.get("epoch_len").and_then(|v| v.as_i64()).unwrap_or(0)
                    as i32,
            };
            match ingest::apply_progress(store, job_id, user_id, &progress).await {
                Ok(ack) => ack,
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Progress ingestion failed");
                    false
                }
            }
        }
        "job_artifacts" => {
            let artifacts = data
                .get("data")
                .cloned()
                .and_then(|d| serde_json::from_value::<ModelArtifacts>(d).ok());
            let Some(artifacts) = artifacts else {
                warn!(job_id = %job_id, "Artifact message with malformed payload");
                return false;
            };
            match ingest::ingest_artifacts(store, job_id, user_id, &artifacts).await {
                Ok(ack) => ack,
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Artifact ingestion failed");
                    false
                }
            }
        }
        other => {
            warn!(action = %other, "Ignoring push message with unknown action");
            false
        }
    }
}
