//! Job queries and the per-user reconciliation batch commit

use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use tuneforge_models::{
    ApiResult, JobDetailData, JobMetadata, JobProgress, JobReconcileUpdate, JobStatus,
    JobWithDetail,
};

use super::rows::{JobRow, JobWithDetailRow};
use super::{db_err, PostgresStorageBackend};

const JOB_WITH_DETAIL_SELECT: &str = r#"
    SELECT j.id, j.user_id, j.base_model_id, j.dataset_id, j.name, j.job_type,
           j.status, j.current_step, j.total_steps, j.current_epoch,
           j.total_epochs, j.num_tokens, j.created_at, j.updated_at,
           d.parameters, d.metrics, d.timestamps
    FROM fine_tuning_jobs j
    JOIN fine_tuning_job_details d ON d.fine_tuning_job_id = j.id
"#;

impl PostgresStorageBackend {
    pub(super) async fn create_job_impl(
        &self,
        job: &JobMetadata,
        detail: &JobDetailData,
    ) -> ApiResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO fine_tuning_jobs
                (id, user_id, base_model_id, dataset_id, name, job_type, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job.id)
        .bind(job.user_id)
        .bind(job.base_model_id)
        .bind(job.dataset_id)
        .bind(&job.name)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO fine_tuning_job_details
                (fine_tuning_job_id, parameters, metrics, timestamps)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(job.id)
        .bind(&detail.parameters)
        .bind(&detail.metrics)
        .bind(JsonValue::Object(detail.timestamps.clone()))
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)
    }

    pub(super) async fn get_job_by_name_impl(
        &self,
        user_id: Uuid,
        name: &str,
    ) -> ApiResult<Option<JobWithDetail>> {
        let row = sqlx::query_as::<_, JobWithDetailRow>(&format!(
            "{JOB_WITH_DETAIL_SELECT} WHERE j.user_id = $1 AND j.name = $2"
        ))
        .bind(user_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| {
            let (job, detail) = r.split();
            JobWithDetail { job, detail }
        }))
    }

    pub(super) async fn get_job_by_id_impl(
        &self,
        job_id: Uuid,
        user_id: Uuid,
    ) -> ApiResult<Option<JobMetadata>> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM fine_tuning_jobs WHERE id = $1 AND user_id = $2",
        )
        .bind(job_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(JobMetadata::from))
    }

    pub(super) async fn list_jobs_impl(&self, user_id: Uuid) -> ApiResult<Vec<JobMetadata>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM fine_tuning_jobs WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(JobMetadata::from).collect())
    }

    pub(super) async fn set_job_status_impl(
        &self,
        job_id: Uuid,
        status: JobStatus,
    ) -> ApiResult<()> {
        sqlx::query(
            "UPDATE fine_tuning_jobs SET status = $1, updated_at = now() WHERE id = $2",
        )
        .bind(status.as_str())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub(super) async fn jobs_for_reconciliation_impl(
        &self,
        completed_grace_minutes: i64,
    ) -> ApiResult<Vec<JobWithDetail>> {
        let cutoff = Utc::now() - Duration::minutes(completed_grace_minutes);

        let rows = sqlx::query_as::<_, JobWithDetailRow>(&format!(
            r#"{JOB_WITH_DETAIL_SELECT}
            WHERE j.status IN ('NEW', 'QUEUED', 'RUNNING', 'STOPPING')
               OR (j.status = 'COMPLETED' AND j.updated_at >= $1)
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let (job, detail) = r.split();
                JobWithDetail { job, detail }
            })
            .collect())
    }

    pub(super) async fn apply_job_updates_impl(
        &self,
        user_id: Uuid,
        updates: &[JobReconcileUpdate],
    ) -> ApiResult<usize> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut touched = 0usize;

        for update in updates {
            if update.is_empty() {
                continue;
            }

            if let Some(status) = update.status {
                sqlx::query(
                    r#"
                    UPDATE fine_tuning_jobs
                    SET status = $1, updated_at = now()
                    WHERE id = $2 AND user_id = $3
                    "#,
                )
                .bind(status.as_str())
                .bind(update.job_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }

            if let Some(progress) = &update.progress {
                // The WHERE guard drops stale out-of-order progress
                sqlx::query(
                    r#"
                    UPDATE fine_tuning_jobs
                    SET current_step = $1, total_steps = $2,
                        current_epoch = $3, total_epochs = $4,
                        updated_at = now()
                    WHERE id = $5 AND user_id = $6
                      AND COALESCE(current_step, -1) < $1
                    "#,
                )
                .bind(progress.current_step)
                .bind(progress.total_steps)
                .bind(progress.current_epoch)
                .bind(progress.total_epochs)
                .bind(update.job_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }

            if let Some(num_tokens) = update.num_tokens {
                sqlx::query(
                    r#"
                    UPDATE fine_tuning_jobs
                    SET num_tokens = $1, updated_at = now()
                    WHERE id = $2 AND user_id = $3
                    "#,
                )
                .bind(num_tokens)
                .bind(update.job_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }

            if update.timestamps.is_some() || update.metrics.is_some() {
                sqlx::query(
                    r#"
                    UPDATE fine_tuning_job_details
                    SET timestamps = COALESCE($1, timestamps),
                        metrics = COALESCE($2, metrics)
                    WHERE fine_tuning_job_id = $3
                    "#,
                )
                .bind(update.timestamps.clone().map(JsonValue::Object))
                .bind(update.metrics.clone())
                .bind(update.job_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }

            touched += 1;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(touched)
    }

    pub(super) async fn update_job_progress_impl(
        &self,
        job_id: Uuid,
        user_id: Uuid,
        progress: &JobProgress,
    ) -> ApiResult<bool> {
        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM fine_tuning_jobs WHERE id = $1 AND user_id = $2",
        )
        .bind(job_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        if exists == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE fine_tuning_jobs
            SET current_step = $1, total_steps = $2,
                current_epoch = $3, total_epochs = $4,
                updated_at = now()
            WHERE id = $5 AND user_id = $6
              AND COALESCE(current_step, -1) < $1
            "#,
        )
        .bind(progress.current_step)
        .bind(progress.total_steps)
        .bind(progress.current_epoch)
        .bind(progress.total_epochs)
        .bind(job_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        // Stale updates fall through the guard and still ack
        Ok(true)
    }
}
