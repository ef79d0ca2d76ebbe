//! Credit pricing

use tuneforge_models::{ApiError, ApiResult, BaseModelData, ServiceName, UsageUnit};

/// Compute the credits a usage amount costs against a base model's price
/// table. Pricing that is not defined is a hard client error, never retried.
pub fn required_credits(
    usage_amount: i64,
    usage_unit: UsageUnit,
    service_name: ServiceName,
    base_model: &BaseModelData,
) -> ApiResult<f64> {
    match (service_name, usage_unit) {
        (ServiceName::FineTuningJob, UsageUnit::Token) => {
            if base_model.credits_per_token <= 0.0 {
                return Err(ApiError::UnknownPricing {
                    service: service_name.as_str().to_string(),
                    unit: usage_unit.as_str().to_string(),
                });
            }
            Ok(usage_amount as f64 * base_model.credits_per_token)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tuneforge_models::BaseModelStatus;
    use uuid::Uuid;

    fn base_model(credits_per_token: f64) -> BaseModelData {
        BaseModelData {
            id: Uuid::new_v4(),
            name: "llm_llama3_1_8b".into(),
            status: BaseModelStatus::Active,
            hf_url: None,
            cluster_config: json!({}),
            credits_per_token,
        }
    }

    #[test]
    fn token_pricing_scales_with_usage() {
        let model = base_model(0.000003);
        let cost = required_credits(
            1_000_000,
            UsageUnit::Token,
            ServiceName::FineTuningJob,
            &model,
        )
        .unwrap();
        assert!((cost - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unpriced_model_is_a_client_error() {
        let model = base_model(0.0);
        let err = required_credits(100, UsageUnit::Token, ServiceName::FineTuningJob, &model)
            .unwrap_err();
        assert_eq!(err.status_code(), 422);
        assert!(!err.is_retryable());
    }
}
