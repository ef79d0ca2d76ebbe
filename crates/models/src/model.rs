use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::Id;

/// Fine-tuned model status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FineTunedModelStatus {
    Active,
    Deleted,
}

impl FineTunedModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FineTunedModelStatus::Active => "ACTIVE",
            FineTunedModelStatus::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(FineTunedModelStatus::Active),
            "DELETED" => Some(FineTunedModelStatus::Deleted),
            _ => None,
        }
    }
}

/// Artifacts reported by the scheduler for a finished (or finishing) job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelArtifacts {
    pub base_url: String,
    pub weight_files: Vec<String>,
    #[serde(default)]
    pub other_files: Vec<String>,
}

/// A fine-tuned model derived from a job's artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineTunedModelData {
    pub id: Id,
    pub user_id: Id,
    pub fine_tuning_job_id: Id,
    pub name: String,
    pub status: FineTunedModelStatus,
    pub artifacts: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Base model status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BaseModelStatus {
    Active,
    Inactive,
    Deprecated,
}

impl BaseModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseModelStatus::Active => "ACTIVE",
            BaseModelStatus::Inactive => "INACTIVE",
            BaseModelStatus::Deprecated => "DEPRECATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(BaseModelStatus::Active),
            "INACTIVE" => Some(BaseModelStatus::Inactive),
            "DEPRECATED" => Some(BaseModelStatus::Deprecated),
            _ => None,
        }
    }
}

/// GPU allocation for one fine-tuning method on one base model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfigEntry {
    pub num_gpus: u32,
    pub gpu_type: String,
}

/// A base language model available for fine-tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseModelData {
    pub id: Id,
    pub name: String,
    pub status: BaseModelStatus,
    pub hf_url: Option<String>,
    /// Per-method cluster table, keyed "qlora" | "lora" | "full"
    pub cluster_config: JsonValue,
    /// Credits charged per token of training usage
    pub credits_per_token: f64,
}

impl BaseModelData {
    /// Resolve the cluster entry for a fine-tuning method key.
    pub fn cluster_config_for(&self, key: &str) -> Option<ClusterConfigEntry> {
        self.cluster_config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Dataset status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatasetStatus {
    Uploaded,
    Validated,
    Error,
    Deleted,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetStatus::Uploaded => "UPLOADED",
            DatasetStatus::Validated => "VALIDATED",
            DatasetStatus::Error => "ERROR",
            DatasetStatus::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UPLOADED" => Some(DatasetStatus::Uploaded),
            "VALIDATED" => Some(DatasetStatus::Validated),
            "ERROR" => Some(DatasetStatus::Error),
            "DELETED" => Some(DatasetStatus::Deleted),
            _ => None,
        }
    }
}

/// An uploaded training dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetData {
    pub id: Id,
    pub user_id: Id,
    pub name: String,
    pub status: DatasetStatus,
    pub storage_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn cluster_config_lookup() {
        let model = BaseModelData {
            id: Uuid::new_v4(),
            name: "llm_llama3_1_8b".into(),
            status: BaseModelStatus::Active,
            hf_url: None,
            cluster_config: json!({
                "lora": {"num_gpus": 4, "gpu_type": "a100-40gb"},
                "qlora": {"num_gpus": 1, "gpu_type": "a100-40gb"},
            }),
            credits_per_token: 0.000003,
        };

        let lora = model.cluster_config_for("lora").unwrap();
        assert_eq!(lora.num_gpus, 4);
        assert_eq!(lora.gpu_type, "a100-40gb");
        assert!(model.cluster_config_for("full").is_none());
    }
}
