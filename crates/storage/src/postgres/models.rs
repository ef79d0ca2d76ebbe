//! Fine-tuned model, base model, and dataset queries

use uuid::Uuid;

use tuneforge_models::{
    ApiResult, BaseModelData, DatasetData, FineTunedModelData, FineTunedModelStatus,
};

use super::rows::{BaseModelRow, DatasetRow, FineTunedModelRow};
use super::{db_err, PostgresStorageBackend};

impl PostgresStorageBackend {
    pub(super) async fn get_model_for_job_impl(
        &self,
        job_id: Uuid,
    ) -> ApiResult<Option<FineTunedModelData>> {
        let row = sqlx::query_as::<_, FineTunedModelRow>(
            "SELECT * FROM fine_tuned_models WHERE fine_tuning_job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(FineTunedModelData::from))
    }

    pub(super) async fn insert_fine_tuned_model_impl(
        &self,
        model: &FineTunedModelData,
    ) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO fine_tuned_models
                (id, user_id, fine_tuning_job_id, name, status, artifacts)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(model.id)
        .bind(model.user_id)
        .bind(model.fine_tuning_job_id)
        .bind(&model.name)
        .bind(model.status.as_str())
        .bind(&model.artifacts)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub(super) async fn set_model_status_for_job_impl(
        &self,
        job_id: Uuid,
        status: FineTunedModelStatus,
    ) -> ApiResult<()> {
        sqlx::query(
            "UPDATE fine_tuned_models SET status = $1 WHERE fine_tuning_job_id = $2",
        )
        .bind(status.as_str())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub(super) async fn get_base_model_by_name_impl(
        &self,
        name: &str,
    ) -> ApiResult<Option<BaseModelData>> {
        let row = sqlx::query_as::<_, BaseModelRow>(
            "SELECT id, name, status, hf_url, cluster_config, credits_per_token
             FROM base_models WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(BaseModelData::from))
    }

    pub(super) async fn get_base_model_by_id_impl(
        &self,
        id: Uuid,
    ) -> ApiResult<Option<BaseModelData>> {
        let row = sqlx::query_as::<_, BaseModelRow>(
            "SELECT id, name, status, hf_url, cluster_config, credits_per_token
             FROM base_models WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(BaseModelData::from))
    }

    pub(super) async fn get_dataset_by_name_impl(
        &self,
        user_id: Uuid,
        name: &str,
    ) -> ApiResult<Option<DatasetData>> {
        let row = sqlx::query_as::<_, DatasetRow>(
            "SELECT id, user_id, name, status, storage_url
             FROM datasets WHERE user_id = $1 AND name = $2",
        )
        .bind(user_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(DatasetData::from))
    }

    pub(super) async fn get_dataset_by_id_impl(&self, id: Uuid) -> ApiResult<Option<DatasetData>> {
        let row = sqlx::query_as::<_, DatasetRow>(
            "SELECT id, user_id, name, status, storage_url FROM datasets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(DatasetData::from))
    }
}
