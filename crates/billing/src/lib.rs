//! Credit ledger.
//!
//! Every credit operation is keyed by `(user_id, transaction_id,
//! transaction_type)`: deductions are retry-safe through a lookup-then-skip,
//! additions reject a reused key outright. A deduction that finds the
//! balance short may attempt exactly one out-of-band recharge for the
//! shortfall before failing with a payment-required error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use tuneforge_config::BillingConfig;
use tuneforge_models::{
    ApiError, ApiResult, BillingCreditData, BillingTransactionType, CreditAddRequest,
    CreditDeductRequest, UsageRecordData, UserData,
};
use tuneforge_storage::StorageBackend;

mod payments;
mod pricing;

pub use payments::{ChargeId, ChargeStatus, HttpPaymentClient, PaymentProvider};
pub use pricing::required_credits;

/// Outcome of the bounded settle wait after an out-of-band charge
enum SettleOutcome {
    /// The charge posted, or the wait expired with it still pending;
    /// the balance refresh decides
    Proceed,
    /// The provider reported the charge as failed
    Failed,
}

/// The credit ledger service
pub struct CreditLedger {
    store: Arc<dyn StorageBackend>,
    payments: Arc<dyn PaymentProvider>,
    config: BillingConfig,
}

impl CreditLedger {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        payments: Arc<dyn PaymentProvider>,
        config: BillingConfig,
    ) -> Self {
        Self {
            store,
            payments,
            config,
        }
    }

    /// Deduct credits for a job's final usage.
    ///
    /// Idempotent per `(user, job)`: a repeated call returns the original
    /// ledger entry and debits nothing. On an insufficient balance, at most
    /// one recharge for the shortfall is attempted; the second iteration
    /// runs with recharge disabled so a charge that silently fails to post
    /// cannot loop forever.
    pub async fn deduct(&self, request: &CreditDeductRequest) -> ApiResult<BillingCreditData> {
        let transaction_id = request.fine_tuning_job_id.to_string();
        let mut allow_recharge = self.config.auto_recharge;

        loop {
            if let Some(existing) = self
                .store
                .get_credit_record(
                    request.user_id,
                    &transaction_id,
                    BillingTransactionType::FineTuningJob,
                )
                .await?
            {
                info!(
                    user_id = %request.user_id,
                    transaction_id = %transaction_id,
                    "Credits already deducted for this job"
                );
                return Ok(existing);
            }

            let job = self
                .store
                .get_job_by_id(request.fine_tuning_job_id, request.user_id)
                .await?
                .ok_or_else(|| ApiError::JobNotFound {
                    name: request.fine_tuning_job_id.to_string(),
                })?;

            let base_model = self
                .store
                .get_base_model_by_id(job.base_model_id)
                .await?
                .ok_or_else(|| ApiError::BaseModelNotFound {
                    name: job.base_model_id.to_string(),
                })?;

            let required = required_credits(
                request.usage_amount,
                request.usage_unit,
                request.service_name,
                &base_model,
            )?;

            let user = self
                .store
                .get_user(request.user_id)
                .await?
                .ok_or(ApiError::UserNotFound {
                    id: request.user_id,
                })?;

            if user.credits_balance >= required {
                return self.commit_deduction(request, &transaction_id, required).await;
            }

            if !allow_recharge {
                warn!(
                    user_id = %request.user_id,
                    required,
                    available = user.credits_balance,
                    "Insufficient credits and recharge exhausted"
                );
                return Err(ApiError::PaymentRequired {
                    required,
                    available: user.credits_balance,
                });
            }

            let shortfall = required - user.credits_balance;
            match self.recharge(&user, shortfall).await {
                SettleOutcome::Proceed => {
                    allow_recharge = false;
                    // One more pass with a refreshed balance
                }
                SettleOutcome::Failed => {
                    return Err(ApiError::PaymentRequired {
                        required,
                        available: user.credits_balance,
                    });
                }
            }
        }
    }

    async fn commit_deduction(
        &self,
        request: &CreditDeductRequest,
        transaction_id: &str,
        required: f64,
    ) -> ApiResult<BillingCreditData> {
        let credit = BillingCreditData {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            credits: -required,
            transaction_id: transaction_id.to_string(),
            transaction_type: BillingTransactionType::FineTuningJob,
            created_at: Utc::now(),
        };
        let usage = UsageRecordData {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            usage_amount: request.usage_amount,
            usage_unit: request.usage_unit,
            cost: required,
            service_name: request.service_name,
            fine_tuning_job_id: request.fine_tuning_job_id,
            created_at: Utc::now(),
        };

        self.store.record_deduction(&credit, &usage).await?;

        info!(
            user_id = %request.user_id,
            job_id = %request.fine_tuning_job_id,
            credits = required,
            "Deducted credits for fine-tuning job"
        );
        Ok(credit)
    }

    /// Charge the shortfall out of band and wait (bounded) for it to post.
    ///
    /// Holds no database transaction across the wait. An expired wait is not
    /// treated as failure; the subsequent balance refresh is authoritative.
    async fn recharge(&self, user: &UserData, shortfall: f64) -> SettleOutcome {
        info!(
            user_id = %user.id,
            amount = shortfall,
            "Attempting out-of-band recharge for credit shortfall"
        );

        let charge = match self.payments.charge(user, shortfall).await {
            Ok(charge) => charge,
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "Recharge attempt failed");
                return SettleOutcome::Failed;
            }
        };

        let total = Duration::from_secs(self.config.settle_wait_secs);
        let start = Instant::now();
        let mut delay = Duration::from_secs(1);

        loop {
            match self.payments.charge_status(&charge).await {
                Ok(ChargeStatus::Settled) => return SettleOutcome::Proceed,
                Ok(ChargeStatus::Failed) => {
                    warn!(user_id = %user.id, charge_id = %charge.0, "Recharge did not settle");
                    return SettleOutcome::Failed;
                }
                Ok(ChargeStatus::Pending) => {}
                Err(e) => {
                    warn!(charge_id = %charge.0, error = %e, "Charge status check failed");
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= total {
                return SettleOutcome::Proceed;
            }
            tokio::time::sleep(delay.min(total - elapsed)).await;
            delay = (delay * 2).min(Duration::from_secs(5));
        }
    }

    /// Add credits manually (trusted internal callers only).
    ///
    /// Unlike a deduction, an add is not naturally retry-safe, so a reused
    /// `(user, transaction_id, type)` key is rejected as a client error.
    pub async fn add_credits(&self, request: &CreditAddRequest) -> ApiResult<BillingCreditData> {
        if request.amount <= 0.0 {
            return Err(ApiError::Validation {
                field: "amount".to_string(),
                reason: "credit amount must be positive".to_string(),
            });
        }

        let user = self
            .store
            .get_user(request.user_id)
            .await?
            .ok_or(ApiError::UserNotFound {
                id: request.user_id,
            })?;

        let credit = BillingCreditData {
            id: Uuid::new_v4(),
            user_id: user.id,
            credits: request.amount,
            transaction_id: request.transaction_id.clone(),
            transaction_type: BillingTransactionType::ManualAdjustment,
            created_at: Utc::now(),
        };

        self.store.record_credit(&credit).await?;

        info!(
            user_id = %user.id,
            amount = request.amount,
            transaction_id = %request.transaction_id,
            "Added credits to user"
        );
        Ok(credit)
    }
}
