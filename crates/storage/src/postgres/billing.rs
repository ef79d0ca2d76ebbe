//! User balance and ledger queries

use uuid::Uuid;

use tuneforge_models::{
    ApiError, ApiResult, BillingCreditData, BillingTransactionType, UsageRecordData, UserData,
};

use super::rows::{BillingCreditRow, UserRow};
use super::{db_err, PostgresStorageBackend};

fn ledger_err(e: sqlx::Error, transaction_id: &str) -> ApiError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => ApiError::DuplicateTransaction {
            transaction_id: transaction_id.to_string(),
        },
        _ => db_err(e),
    }
}

impl PostgresStorageBackend {
    pub(super) async fn get_user_impl(&self, user_id: Uuid) -> ApiResult<Option<UserData>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, credits_balance, payment_customer_id FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(UserData::from))
    }

    pub(super) async fn get_credit_record_impl(
        &self,
        user_id: Uuid,
        transaction_id: &str,
        transaction_type: BillingTransactionType,
    ) -> ApiResult<Option<BillingCreditData>> {
        let row = sqlx::query_as::<_, BillingCreditRow>(
            r#"
            SELECT * FROM billing_credits
            WHERE user_id = $1 AND transaction_id = $2 AND transaction_type = $3
            "#,
        )
        .bind(user_id)
        .bind(transaction_id)
        .bind(transaction_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(BillingCreditData::from))
    }

    pub(super) async fn record_deduction_impl(
        &self,
        credit: &BillingCreditData,
        usage: &UsageRecordData,
    ) -> ApiResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // credit.credits is negative for a deduction
        sqlx::query(
            "UPDATE users SET credits_balance = credits_balance + $1, updated_at = now()
             WHERE id = $2",
        )
        .bind(credit.credits)
        .bind(credit.user_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO billing_credits
                (id, user_id, credits, transaction_id, transaction_type)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(credit.id)
        .bind(credit.user_id)
        .bind(credit.credits)
        .bind(&credit.transaction_id)
        .bind(credit.transaction_type.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| ledger_err(e, &credit.transaction_id))?;

        sqlx::query(
            r#"
            INSERT INTO usage_records
                (id, user_id, usage_amount, usage_unit, cost, service_name,
                 fine_tuning_job_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(usage.id)
        .bind(usage.user_id)
        .bind(usage.usage_amount)
        .bind(usage.usage_unit.as_str())
        .bind(usage.cost)
        .bind(usage.service_name.as_str())
        .bind(usage.fine_tuning_job_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ledger_err(e, &credit.transaction_id))?;

        tx.commit().await.map_err(db_err)
    }

    pub(super) async fn record_credit_impl(&self, credit: &BillingCreditData) -> ApiResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO billing_credits
                (id, user_id, credits, transaction_id, transaction_type)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(credit.id)
        .bind(credit.user_id)
        .bind(credit.credits)
        .bind(&credit.transaction_id)
        .bind(credit.transaction_type.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| ledger_err(e, &credit.transaction_id))?;

        sqlx::query(
            "UPDATE users SET credits_balance = credits_balance + $1, updated_at = now()
             WHERE id = $2",
        )
        .bind(credit.credits)
        .bind(credit.user_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)
    }
}
