//! Payments Gateway client.
//!
//! The gateway is an opaque external rail that moves money between two
//! funding endpoints and returns a transfer identifier. The engine only
//! consumes the contract below; idempotency is enforced on our side by
//! the durable transfer-record check plus a deterministic idempotency
//! key derived from the (loan, obligation) pair.

use bigdecimal::BigDecimal;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

use crate::circuit_breaker::{create_gateway_circuit_breaker, GatewayCircuitBreaker};
use crate::errors::RiskError;

/// Result of a successfully initiated transfer.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    /// Opaque transfer id assigned by the gateway.
    pub transfer_id: String,
}

/// Gateway-side status of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

/// Contract the risk engine requires from the Payments Gateway.
#[async_trait::async_trait]
pub trait PaymentsGateway: Send + Sync {
    /// Moves `amount` from `source_endpoint` to `destination_endpoint`.
    /// `metadata` is carried opaquely; an `idempotency_key` entry, when
    /// present, must make the call idempotent on the gateway side too.
    async fn initiate_transfer(
        &self,
        source_endpoint: &str,
        destination_endpoint: &str,
        amount: &BigDecimal,
        metadata: serde_json::Value,
    ) -> Result<TransferReceipt, RiskError>;

    /// Looks up the current status of a previously initiated transfer.
    async fn transfer_status(&self, transfer_id: &str) -> Result<TransferStatus, RiskError>;
}

/// Deterministic idempotency key for the transfer settling one
/// obligation of one loan.
pub fn transfer_idempotency_key(loan_id: Uuid, obligation_id: Uuid) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", loan_id, obligation_id).as_bytes());
    hex::encode(hasher.finalize())
}

/// HTTP client for the Payments Gateway.
pub struct HttpPaymentsGateway {
    client: reqwest::Client,
    base_url: String,
    token: String,
    breaker: GatewayCircuitBreaker,
}

impl HttpPaymentsGateway {
    /// Creates a new `HttpPaymentsGateway`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the gateway API.
    /// * `token` - The API token for authentication.
    pub fn new(base_url: String, token: String) -> Result<Self, RiskError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                RiskError::GatewayError(format!("Failed to create gateway client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            token,
            breaker: create_gateway_circuit_breaker(),
        })
    }

    async fn post_transfer(
        &self,
        body: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> Result<serde_json::Value, RiskError> {
        let url = format!("{}/v1/transfers", self.base_url);

        let mut request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&body);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RiskError::GatewayError(format!("Gateway request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RiskError::GatewayError(format!(
                "Gateway returned {}: {}",
                status, error_text
            )));
        }

        response.json().await.map_err(|e| {
            RiskError::GatewayError(format!("Failed to parse gateway response: {}", e))
        })
    }
}

#[async_trait::async_trait]
impl PaymentsGateway for HttpPaymentsGateway {
    async fn initiate_transfer(
        &self,
        source_endpoint: &str,
        destination_endpoint: &str,
        amount: &BigDecimal,
        metadata: serde_json::Value,
    ) -> Result<TransferReceipt, RiskError> {
        use failsafe::futures::CircuitBreaker;

        tracing::info!(
            "Initiating gateway transfer {} → {} ({})",
            source_endpoint,
            destination_endpoint,
            amount
        );

        let idempotency_key = metadata
            .get("idempotency_key")
            .and_then(|k| k.as_str())
            .map(|k| k.to_string());

        let body = json!({
            "source_endpoint": source_endpoint,
            "destination_endpoint": destination_endpoint,
            "amount": amount.to_string(),
            "metadata": metadata,
        });

        let response_data = self
            .breaker
            .call(self.post_transfer(body, idempotency_key))
            .await
            .map_err(|e| match e {
                failsafe::Error::Inner(err) => err,
                failsafe::Error::Rejected => RiskError::GatewayError(
                    "Gateway circuit open: too many consecutive failures".to_string(),
                ),
            })?;

        // Try to get the transfer id from different possible locations in the response
        let transfer_id = if let Some(id) = response_data.get("transfer_id").and_then(|i| i.as_str())
        {
            id.to_string()
        } else if let Some(id) = response_data.get("id").and_then(|i| i.as_str()) {
            id.to_string()
        } else if let Some(id) = response_data
            .get("data")
            .and_then(|d| d.get("id"))
            .and_then(|i| i.as_str())
        {
            id.to_string()
        } else {
            tracing::warn!("Unexpected gateway response format: {:?}", response_data);
            return Err(RiskError::GatewayError(
                "Transfer response missing 'transfer_id' field".to_string(),
            ));
        };

        tracing::info!("✓ Transfer initiated: {}", transfer_id);
        Ok(TransferReceipt { transfer_id })
    }

    async fn transfer_status(&self, transfer_id: &str) -> Result<TransferStatus, RiskError> {
        use failsafe::futures::CircuitBreaker;

        let url = format!("{}/v1/transfers/{}", self.base_url, transfer_id);
        tracing::debug!("Fetching transfer status: {}", url);

        let fetch = async {
            let response = self
                .client
                .get(&url)
                .header("Authorization", format!("Bearer {}", self.token))
                .send()
                .await
                .map_err(|e| RiskError::GatewayError(format!("Gateway request failed: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(RiskError::GatewayError(format!(
                    "Gateway returned {}: {}",
                    status, error_text
                )));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| RiskError::GatewayError(format!("Failed to parse status: {}", e)))
        };

        let data = self.breaker.call(fetch).await.map_err(|e| match e {
            failsafe::Error::Inner(err) => err,
            failsafe::Error::Rejected => RiskError::GatewayError(
                "Gateway circuit open: too many consecutive failures".to_string(),
            ),
        })?;

        match data.get("status").and_then(|s| s.as_str()) {
            Some("pending") | Some("processing") => Ok(TransferStatus::Pending),
            Some("completed") | Some("settled") => Ok(TransferStatus::Completed),
            Some("failed") | Some("returned") | Some("cancelled") => Ok(TransferStatus::Failed),
            other => Err(RiskError::GatewayError(format!(
                "Unknown transfer status: {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let gateway =
            HttpPaymentsGateway::new("https://example.com".to_string(), "token".to_string());
        assert!(gateway.is_ok());
    }

    #[test]
    fn idempotency_key_is_deterministic() {
        let loan = Uuid::new_v4();
        let obligation = Uuid::new_v4();
        let a = transfer_idempotency_key(loan, obligation);
        let b = transfer_idempotency_key(loan, obligation);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
