use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;

/// Origin of a ledger entry; part of the idempotency key
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingTransactionType {
    FineTuningJob,
    NewUserCredit,
    ManualAdjustment,
    CreditPurchase,
}

impl BillingTransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingTransactionType::FineTuningJob => "FINE_TUNING_JOB",
            BillingTransactionType::NewUserCredit => "NEW_USER_CREDIT",
            BillingTransactionType::ManualAdjustment => "MANUAL_ADJUSTMENT",
            BillingTransactionType::CreditPurchase => "CREDIT_PURCHASE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FINE_TUNING_JOB" => Some(BillingTransactionType::FineTuningJob),
            "NEW_USER_CREDIT" => Some(BillingTransactionType::NewUserCredit),
            "MANUAL_ADJUSTMENT" => Some(BillingTransactionType::ManualAdjustment),
            "CREDIT_PURCHASE" => Some(BillingTransactionType::CreditPurchase),
            _ => None,
        }
    }
}

/// Unit a service's usage is metered in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UsageUnit {
    Token,
}

impl UsageUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageUnit::Token => "token",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "token" => Some(UsageUnit::Token),
            _ => None,
        }
    }
}

/// Billable service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceName {
    FineTuningJob,
}

impl ServiceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::FineTuningJob => "fine_tuning_job",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fine_tuning_job" => Some(ServiceName::FineTuningJob),
            _ => None,
        }
    }
}

/// Immutable signed ledger entry.
///
/// `(user_id, transaction_id, transaction_type)` is unique and serves as the
/// idempotency key for every credit operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingCreditData {
    pub id: Id,
    pub user_id: Id,
    /// Positive for additions, negative for deductions
    pub credits: f64,
    pub transaction_id: String,
    pub transaction_type: BillingTransactionType,
    pub created_at: DateTime<Utc>,
}

/// Final usage recorded for a job when its credits are deducted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecordData {
    pub id: Id,
    pub user_id: Id,
    pub usage_amount: i64,
    pub usage_unit: UsageUnit,
    pub cost: f64,
    pub service_name: ServiceName,
    pub fine_tuning_job_id: Id,
    pub created_at: DateTime<Utc>,
}

/// Account data the ledger needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserData {
    pub id: Id,
    pub email: String,
    pub credits_balance: f64,
    pub payment_customer_id: Option<String>,
}

/// Trusted internal request to deduct credits for a job's usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditDeductRequest {
    pub user_id: Id,
    pub usage_amount: i64,
    pub usage_unit: UsageUnit,
    pub service_name: ServiceName,
    pub fine_tuning_job_id: Id,
}

/// Trusted internal request to add credits manually
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAddRequest {
    pub user_id: Id,
    pub amount: f64,
    pub transaction_id: String,
}
