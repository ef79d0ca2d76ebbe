//! Payment provider abstraction.
//!
//! The real provider sits behind an HTTP API owned by another team; the
//! ledger only needs "charge this customer" and "did that charge post".

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use tuneforge_models::UserData;

/// Identifier of an out-of-band charge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeId(pub String);

/// Observed state of an out-of-band charge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Pending,
    Settled,
    Failed,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Charge the user's default payment method for `amount` credits.
    async fn charge(&self, user: &UserData, amount: f64) -> Result<ChargeId>;

    /// Current status of a previously created charge.
    async fn charge_status(&self, charge: &ChargeId) -> Result<ChargeStatus>;
}

/// HTTP client for the payments service
#[derive(Debug, Clone)]
pub struct HttpPaymentClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    charge_id: String,
}

#[derive(Debug, Deserialize)]
struct ChargeStatusResponse {
    status: String,
}

impl HttpPaymentClient {
    pub fn new(base_url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentClient {
    async fn charge(&self, user: &UserData, amount: f64) -> Result<ChargeId> {
        let Some(customer_id) = &user.payment_customer_id else {
            bail!("user {} has no payment customer id", user.id);
        };

        let response = self
            .http
            .post(format!("{}/charges", self.base_url))
            .json(&serde_json::json!({
                "customer_id": customer_id,
                "amount": amount,
            }))
            .send()
            .await
            .context("charge request failed")?;

        if !response.status().is_success() {
            bail!("payments service returned {}", response.status());
        }

        let body: ChargeResponse = response
            .json()
            .await
            .context("invalid charge response body")?;
        Ok(ChargeId(body.charge_id))
    }

    async fn charge_status(&self, charge: &ChargeId) -> Result<ChargeStatus> {
        let response = self
            .http
            .get(format!("{}/charges/{}", self.base_url, charge.0))
            .send()
            .await
            .context("charge status request failed")?;

        if !response.status().is_success() {
            bail!("payments service returned {}", response.status());
        }

        let body: ChargeStatusResponse = response
            .json()
            .await
            .context("invalid charge status body")?;
        Ok(match body.status.as_str() {
            "settled" | "succeeded" => ChargeStatus::Settled,
            "failed" => ChargeStatus::Failed,
            _ => ChargeStatus::Pending,
        })
    }
}
