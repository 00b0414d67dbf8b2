//! Delegated submission through the backend's transaction-construction service.
//!
//! - Build the creation request (overrides filtered, amount sent verbatim)
//! - Submit to the construction service
//! - Resolve handle/status/message from heterogeneous responses
//!
//! Endpoints:
//! - GET  /v1/overledger/networks
//! - POST /v1/overledger/transactions
//! - GET  /v1/overledger/networks/{networkId}/transactions/{handle}/status
//! - GET  /v1/overledger/networks/{networkId}/addresses/{address}/balance
//! - GET  /v1/overledger/test

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use txflow_keys::{is_valid_address, is_valid_amount};
use txflow_types::{
    Explorer, NetworkSummary, Result, SubmissionResult, TransferIntent, TxOverrides,
    ValidationError,
};

pub mod client;
pub mod memory;
pub mod resolve;

pub use client::BackendClient;
pub use memory::MemoryBackend;
pub use resolve::{resolve_status, resolve_submission, StatusUpdate};

/// Body of `POST /v1/overledger/transactions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub network_id: String,
    pub from_address: String,
    pub to_address: String,
    /// Decimal string, passed through without unit conversion.
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
}

impl CreateTransactionRequest {
    pub fn from_intent(intent: &TransferIntent) -> Self {
        let TxOverrides {
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            nonce,
        } = &intent.overrides;

        Self {
            network_id: intent.network.trim().to_string(),
            from_address: intent.sender.trim().to_string(),
            to_address: intent.recipient.trim().to_string(),
            amount: intent.amount.trim().to_string(),
            gas_limit: numeric_override(gas_limit.as_deref()),
            max_fee_per_gas: numeric_override(max_fee_per_gas.as_deref()),
            max_priority_fee_per_gas: numeric_override(max_priority_fee_per_gas.as_deref()),
            nonce: nonce.as_deref().and_then(|n| n.trim().parse::<u64>().ok()),
        }
    }
}

/// Keep an override only when it is a plain non-negative integer.
fn numeric_override(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// The construction service as seen by the flow.
#[async_trait]
pub trait TransactionBackend: Send + Sync {
    /// Selectable networks.
    async fn networks(&self) -> Result<Vec<NetworkSummary>>;

    /// Create (and submit) a transaction. The raw body is returned because its
    /// shape differs per network; see [`resolve`].
    async fn create_transaction(&self, request: &CreateTransactionRequest) -> Result<Value>;

    /// Current status of a transaction by handle.
    async fn transaction_status(&self, network_id: &str, handle: &str) -> Result<Value>;
}

/// Check the delegated form: network, both addresses, amount.
pub fn validate_delegated(intent: &TransferIntent) -> std::result::Result<(), ValidationError> {
    if intent.network.trim().is_empty() {
        return Err(ValidationError::MissingNetwork);
    }
    if !is_valid_address(intent.sender.trim()) || !is_valid_address(intent.recipient.trim()) {
        return Err(ValidationError::InvalidAddresses);
    }
    if !is_valid_amount(&intent.amount) {
        return Err(ValidationError::InvalidAmount);
    }
    Ok(())
}

/// Submit an intent to the construction service and resolve the response.
///
/// A response without any handle is not an error: the result carries status
/// and message with `handle: None`, and the caller has nothing to poll.
pub async fn submit_delegated(
    backend: &dyn TransactionBackend,
    intent: &TransferIntent,
    explorer: &Explorer,
) -> Result<SubmissionResult> {
    validate_delegated(intent)?;

    let request = CreateTransactionRequest::from_intent(intent);
    info!(
        network = %request.network_id,
        to = %request.to_address,
        amount = %request.amount,
        "creating delegated transaction"
    );
    let body = backend
        .create_transaction(&request)
        .await
        .map_err(|e| e.into_submission())?;

    let resolved = resolve_submission(&body);
    match &resolved.handle {
        Some(handle) => info!(handle = %handle, status = %resolved.status, "transaction created"),
        // TODO: confirm with the backend owners whether a handle-less response
        // should become an error once every network adapter returns one.
        None => warn!(status = %resolved.status, "no transaction handle in response, not polling"),
    }

    let explorer_url = resolved
        .handle
        .as_deref()
        .and_then(|handle| explorer.tx_url_for_network(&request.network_id, handle));

    Ok(SubmissionResult {
        handle: resolved.handle,
        initial_status: resolved.status,
        message: resolved.message,
        explorer_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use txflow_types::TxflowError;

    const FROM: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    const TO: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

    #[test]
    fn test_request_serialization_omits_absent_overrides() {
        let intent = TransferIntent::delegated("ethereum-sepolia", FROM, TO, " 0.01 ");
        let body = serde_json::to_value(CreateTransactionRequest::from_intent(&intent)).unwrap();
        assert_eq!(
            body,
            json!({
                "networkId": "ethereum-sepolia",
                "fromAddress": FROM,
                "toAddress": TO,
                "amount": "0.01",
            })
        );
    }

    #[test]
    fn test_overrides_filtered() {
        let intent = TransferIntent::delegated("eth", FROM, TO, "1").with_overrides(TxOverrides {
            gas_limit: Some(" 22086 ".into()),
            max_fee_per_gas: Some("9.6 gwei".into()),
            max_priority_fee_per_gas: Some("".into()),
            nonce: Some("7".into()),
        });
        let body = serde_json::to_value(CreateTransactionRequest::from_intent(&intent)).unwrap();
        assert_eq!(body["gasLimit"], json!("22086"));
        assert!(body.get("maxFeePerGas").is_none());
        assert!(body.get("maxPriorityFeePerGas").is_none());
        assert_eq!(body["nonce"], json!(7));

        let intent = TransferIntent::delegated("eth", FROM, TO, "1").with_overrides(TxOverrides {
            nonce: Some("seven".into()),
            ..Default::default()
        });
        let body = serde_json::to_value(CreateTransactionRequest::from_intent(&intent)).unwrap();
        assert!(body.get("nonce").is_none());
    }

    #[test]
    fn test_validation_order() {
        let err = validate_delegated(&TransferIntent::delegated("", "bad", "bad", "0"));
        assert_eq!(err, Err(ValidationError::MissingNetwork));

        let err = validate_delegated(&TransferIntent::delegated("eth", FROM, "bad", "0"));
        assert_eq!(err, Err(ValidationError::InvalidAddresses));

        let err = validate_delegated(&TransferIntent::delegated("eth", "bad", TO, "1"));
        assert_eq!(err, Err(ValidationError::InvalidAddresses));

        let err = validate_delegated(&TransferIntent::delegated("eth", FROM, TO, "0"));
        assert_eq!(err, Err(ValidationError::InvalidAmount));

        assert_eq!(
            validate_delegated(&TransferIntent::delegated("eth", FROM, TO, "0.0001")),
            Ok(())
        );
    }

    #[tokio::test]
    async fn test_submit_resolves_metadata_handle() {
        let backend = MemoryBackend::new();
        backend.respond_to_create(json!({
            "metadata": { "transactionId": "abc", "execution": { "value": "pending" } }
        }));

        let intent = TransferIntent::delegated("ethereum-sepolia", FROM, TO, "0.5");
        let result = submit_delegated(&backend, &intent, &Explorer::default())
            .await
            .unwrap();

        assert_eq!(result.handle.as_deref(), Some("abc"));
        assert_eq!(result.initial_status, "pending");
        assert_eq!(
            result.explorer_url.as_deref(),
            Some("https://sepolia.etherscan.io/tx/abc")
        );

        let requests = backend.create_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].amount, "0.5");
    }

    #[tokio::test]
    async fn test_submit_without_handle() {
        let backend = MemoryBackend::new();
        backend.respond_to_create(json!({ "status": "accepted" }));

        let intent = TransferIntent::delegated("polygon-amoy", FROM, TO, "1");
        let result = submit_delegated(&backend, &intent, &Explorer::default())
            .await
            .unwrap();
        assert_eq!(result.handle, None);
        assert_eq!(result.initial_status, "accepted");
        assert_eq!(result.explorer_url, None);
    }

    #[tokio::test]
    async fn test_invalid_intent_never_reaches_backend() {
        let backend = MemoryBackend::new();
        let intent = TransferIntent::delegated("eth", FROM, TO, "-1");
        let err = submit_delegated(&backend, &intent, &Explorer::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(backend.create_requests().is_empty());
    }

    #[tokio::test]
    async fn test_construction_failure_is_submission_error() {
        let backend = MemoryBackend::new();
        backend.fail_create("insufficient balance on origin account");

        let intent = TransferIntent::delegated("eth", FROM, TO, "1");
        let err = submit_delegated(&backend, &intent, &Explorer::default())
            .await
            .unwrap_err();
        match err {
            TxflowError::Submission(msg) => assert_eq!(msg, "insufficient balance on origin account"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
