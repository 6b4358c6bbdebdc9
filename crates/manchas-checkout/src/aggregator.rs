//! # Payment Aggregator
//!
//! The engines talk to the aggregator through [`PaymentAggregator`];
//! [`WompiClient`] is the HTTP implementation and tests plug in fakes.
//!
//! ## Calls
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_payment_link     POST {api}/payment_links          private key │
//! │  get_transaction         GET  {api}/transactions/{id}      private key │
//! │  find_transaction_by_link GET {api}/transactions                       │
//! │                               ?payment_link_id={id}        private key │
//! │  list_banks              GET  {api}/pse/financial_institutions         │
//! │                                                            public key  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use manchas_core::{DocumentType, Money, PaymentStatus};

use crate::config::AggregatorSettings;

// =============================================================================
// Errors
// =============================================================================

/// Aggregator call failures.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// No answer within the configured timeout.
    #[error("Aggregator request timed out")]
    Timeout,

    /// Connection or protocol failure.
    #[error("Aggregator unreachable: {0}")]
    Transport(String),

    /// The aggregator answered with an error status.
    #[error("Aggregator rejected the request ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// The answer did not have the expected shape.
    #[error("Invalid aggregator response: {0}")]
    InvalidResponse(String),

    /// Credentials missing from configuration.
    #[error("Aggregator not configured: {0}")]
    NotConfigured(&'static str),
}

impl AggregatorError {
    /// The aggregator understood and refused the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, AggregatorError::Rejected { .. })
    }
}

impl From<reqwest::Error> for AggregatorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AggregatorError::Timeout
        } else if err.is_decode() {
            AggregatorError::InvalidResponse(err.to_string())
        } else {
            AggregatorError::Transport(err.to_string())
        }
    }
}

// =============================================================================
// Types
// =============================================================================

/// What the engine asks the aggregator to charge.
#[derive(Debug, Clone)]
pub struct PaymentLinkRequest {
    pub reference: String,
    pub name: String,
    pub description: String,
    pub amount: Money,
    pub currency: String,
    pub redirect_url: String,
    pub document_type: DocumentType,
    pub document_number: String,
}

/// A hosted checkout created for one payment.
#[derive(Debug, Clone)]
pub struct PaymentLink {
    pub id: String,
    pub checkout_url: String,
    pub raw: Value,
}

/// Aggregator view of a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorTransaction {
    pub id: String,
    #[serde(default)]
    pub reference: String,
    pub amount_in_cents: i64,
    pub status: String,
    #[serde(default)]
    pub payment_link_id: Option<String>,
}

impl AggregatorTransaction {
    pub fn payment_status(&self) -> PaymentStatus {
        map_status(&self.status)
    }
}

/// A PSE financial institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    pub financial_institution_code: String,
    pub financial_institution_name: String,
    #[serde(rename = "type", default = "default_bank_type")]
    pub kind: String,
}

fn default_bank_type() -> String {
    "persona_natural".to_string()
}

/// Maps an aggregator status to ours. Unknown statuses stay pending.
pub fn map_status(status: &str) -> PaymentStatus {
    match status {
        "APPROVED" => PaymentStatus::Approved,
        "DECLINED" => PaymentStatus::Declined,
        "VOIDED" => PaymentStatus::Voided,
        "ERROR" => PaymentStatus::Error,
        _ => PaymentStatus::Pending,
    }
}

// =============================================================================
// Trait
// =============================================================================

#[async_trait]
pub trait PaymentAggregator: Send + Sync {
    async fn create_payment_link(
        &self,
        request: &PaymentLinkRequest,
    ) -> Result<PaymentLink, AggregatorError>;

    async fn get_transaction(&self, id: &str) -> Result<AggregatorTransaction, AggregatorError>;

    /// Most recent transaction paid through a payment link, if any.
    async fn find_transaction_by_link(
        &self,
        link_id: &str,
    ) -> Result<Option<AggregatorTransaction>, AggregatorError>;

    /// PSE financial institutions.
    async fn list_banks(&self) -> Result<Vec<Bank>, AggregatorError>;
}

// =============================================================================
// Wompi client
// =============================================================================

/// Wompi REST client.
#[derive(Debug, Clone)]
pub struct WompiClient {
    http: reqwest::Client,
    settings: AggregatorSettings,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct LinkData {
    id: String,
}

impl WompiClient {
    /// Builds a client whose every request is bounded by `timeout_secs`.
    pub fn new(settings: AggregatorSettings) -> Result<Self, AggregatorError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| AggregatorError::Transport(e.to_string()))?;

        Ok(WompiClient { http, settings })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_url.trim_end_matches('/'), path)
    }

    fn private_key(&self) -> Result<&str, AggregatorError> {
        if self.settings.private_key.is_empty() {
            return Err(AggregatorError::NotConfigured("private_key"));
        }
        Ok(&self.settings.private_key)
    }

    fn public_key(&self) -> Result<&str, AggregatorError> {
        if self.settings.public_key.is_empty() {
            return Err(AggregatorError::NotConfigured("public_key"));
        }
        Ok(&self.settings.public_key)
    }

    /// Reads the body, turning non-2xx answers into `Rejected`.
    async fn read_json(response: reqwest::Response) -> Result<Value, AggregatorError> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let detail = body
                .pointer("/error/messages")
                .or_else(|| body.pointer("/error/reason"))
                .or_else(|| body.get("error"))
                .map(Value::to_string)
                .unwrap_or_else(|| body.to_string());
            warn!(status = status.as_u16(), detail = %detail, "Aggregator rejected request");
            return Err(AggregatorError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl PaymentAggregator for WompiClient {
    async fn create_payment_link(
        &self,
        request: &PaymentLinkRequest,
    ) -> Result<PaymentLink, AggregatorError> {
        let payload = json!({
            "name": request.name,
            "description": request.description,
            "single_use": true,
            "collect_shipping": false,
            "currency": request.currency,
            "amount_in_cents": request.amount.cents(),
            "redirect_url": request.redirect_url,
            "customer_data": {
                "customer_references": [
                    { "label": "Tipo de documento", "value": request.document_type.as_str(), "is_required": true },
                    { "label": "Número de documento", "value": request.document_number, "is_required": true }
                ]
            }
        });

        debug!(reference = %request.reference, amount = %request.amount, "Creating payment link");

        let response = self
            .http
            .post(self.url("/payment_links"))
            .bearer_auth(self.private_key()?)
            .json(&payload)
            .send()
            .await?;
        let body = Self::read_json(response).await?;

        let envelope: Envelope<LinkData> = serde_json::from_value(body.clone())
            .map_err(|e| AggregatorError::InvalidResponse(e.to_string()))?;
        let id = envelope.data.id;

        Ok(PaymentLink {
            checkout_url: format!(
                "{}/l/{}",
                self.settings.checkout_base_url.trim_end_matches('/'),
                id
            ),
            id,
            raw: body,
        })
    }

    async fn get_transaction(&self, id: &str) -> Result<AggregatorTransaction, AggregatorError> {
        let response = self
            .http
            .get(self.url(&format!("/transactions/{}", id)))
            .bearer_auth(self.private_key()?)
            .send()
            .await?;
        let body = Self::read_json(response).await?;

        let envelope: Envelope<AggregatorTransaction> = serde_json::from_value(body)
            .map_err(|e| AggregatorError::InvalidResponse(e.to_string()))?;
        Ok(envelope.data)
    }

    async fn find_transaction_by_link(
        &self,
        link_id: &str,
    ) -> Result<Option<AggregatorTransaction>, AggregatorError> {
        let response = self
            .http
            .get(self.url("/transactions"))
            .query(&[("payment_link_id", link_id)])
            .bearer_auth(self.private_key()?)
            .send()
            .await?;
        let body = Self::read_json(response).await?;

        let envelope: Envelope<Vec<AggregatorTransaction>> = serde_json::from_value(body)
            .map_err(|e| AggregatorError::InvalidResponse(e.to_string()))?;
        Ok(envelope.data.into_iter().next())
    }

    async fn list_banks(&self) -> Result<Vec<Bank>, AggregatorError> {
        let response = self
            .http
            .get(self.url("/pse/financial_institutions"))
            .bearer_auth(self.public_key()?)
            .send()
            .await?;
        let body = Self::read_json(response).await?;

        let envelope: Envelope<Vec<Bank>> = serde_json::from_value(body)
            .map_err(|e| AggregatorError::InvalidResponse(e.to_string()))?;
        Ok(envelope.data)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scriptable in-memory aggregator.
    #[derive(Default)]
    pub(crate) struct FakeAggregator {
        pub fail_links: Mutex<bool>,
        pub link_delay: Mutex<Option<std::time::Duration>>,
        pub links: Mutex<Vec<PaymentLinkRequest>>,
        pub transactions: Mutex<HashMap<String, AggregatorTransaction>>,
    }

    impl FakeAggregator {
        pub fn failing() -> Self {
            let fake = FakeAggregator::default();
            *fake.fail_links.lock().unwrap() = true;
            fake
        }

        pub fn slow(delay: std::time::Duration) -> Self {
            let fake = FakeAggregator::default();
            *fake.link_delay.lock().unwrap() = Some(delay);
            fake
        }

        pub fn set_transaction(&self, key: &str, tx: AggregatorTransaction) {
            self.transactions.lock().unwrap().insert(key.to_string(), tx);
        }
    }

    #[async_trait]
    impl PaymentAggregator for FakeAggregator {
        async fn create_payment_link(
            &self,
            request: &PaymentLinkRequest,
        ) -> Result<PaymentLink, AggregatorError> {
            let delay = *self.link_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if *self.fail_links.lock().unwrap() {
                return Err(AggregatorError::Timeout);
            }
            let mut links = self.links.lock().unwrap();
            links.push(request.clone());
            let id = format!("link-{}", links.len());
            Ok(PaymentLink {
                checkout_url: format!("https://checkout.test/l/{}", id),
                id,
                raw: json!({}),
            })
        }

        async fn get_transaction(&self, id: &str) -> Result<AggregatorTransaction, AggregatorError> {
            self.transactions
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or(AggregatorError::Rejected {
                    status: 404,
                    detail: "NOT_FOUND".into(),
                })
        }

        async fn find_transaction_by_link(
            &self,
            link_id: &str,
        ) -> Result<Option<AggregatorTransaction>, AggregatorError> {
            Ok(self.transactions.lock().unwrap().get(link_id).cloned())
        }

        async fn list_banks(&self) -> Result<Vec<Bank>, AggregatorError> {
            Ok(vec![
                Bank {
                    financial_institution_code: "1007".into(),
                    financial_institution_name: "BANCOLOMBIA".into(),
                    kind: default_bank_type(),
                },
                Bank {
                    financial_institution_code: "1001".into(),
                    financial_institution_name: "BANCO DE BOGOTA".into(),
                    kind: default_bank_type(),
                },
            ])
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("APPROVED"), PaymentStatus::Approved);
        assert_eq!(map_status("DECLINED"), PaymentStatus::Declined);
        assert_eq!(map_status("VOIDED"), PaymentStatus::Voided);
        assert_eq!(map_status("ERROR"), PaymentStatus::Error);
        assert_eq!(map_status("PENDING"), PaymentStatus::Pending);
        assert_eq!(map_status("approved"), PaymentStatus::Pending);
    }

    #[test]
    fn test_transaction_deserializes_without_link() {
        let tx: AggregatorTransaction = serde_json::from_value(json!({
            "id": "tx-1234-5678",
            "reference": "MP-1700000000000-4821",
            "amount_in_cents": 300000,
            "status": "APPROVED"
        }))
        .unwrap();

        assert_eq!(tx.payment_status(), PaymentStatus::Approved);
        assert!(tx.payment_link_id.is_none());
    }

    #[test]
    fn test_bank_type_defaults() {
        let bank: Bank = serde_json::from_value(json!({
            "financial_institution_code": "1007",
            "financial_institution_name": "BANCOLOMBIA"
        }))
        .unwrap();
        assert_eq!(bank.kind, "persona_natural");
    }

    #[tokio::test]
    async fn test_client_requires_keys() {
        let client = WompiClient::new(AggregatorSettings::default()).unwrap();

        let err = client.list_banks().await.unwrap_err();
        assert!(matches!(err, AggregatorError::NotConfigured("public_key")));

        let err = client.get_transaction("tx-1").await.unwrap_err();
        assert!(matches!(err, AggregatorError::NotConfigured("private_key")));
    }
}
