//! HTTP client for the dashboard backend's Overledger routes.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::{CreateTransactionRequest, TransactionBackend};
use txflow_types::{NetworkSummary, Result, TxflowError};

/// Header carrying the optional backend API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Deserialize)]
struct NetworksResponse {
    #[serde(default)]
    networks: Vec<NetworkEntry>,
}

#[derive(Debug, Deserialize)]
struct NetworkEntry {
    id: String,
    #[serde(default)]
    name: String,
}

impl From<NetworkEntry> for NetworkSummary {
    fn from(entry: NetworkEntry) -> Self {
        let name = if entry.name.trim().is_empty() {
            entry.id.clone()
        } else {
            entry.name
        };
        NetworkSummary { id: entry.id, name }
    }
}

/// Backend client for network catalog, creation and status queries.
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    api_key: Option<String>,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout_ms: Option<u64>, api_key: Option<String>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(30_000);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| TxflowError::Http(format!("invalid backend URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| TxflowError::Http(format!("invalid backend URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let mut request = request
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout);
        if let Some(ref key) = self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| TxflowError::Http(format!("backend request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TxflowError::Http(error_message(status, &body)));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| TxflowError::Decode(e.to_string()))
    }

    /// Balance of `address` on a network.
    ///
    /// GET /v1/overledger/networks/{networkId}/addresses/{address}/balance
    pub async fn balance(&self, network_id: &str, address: &str) -> Result<Value> {
        let url = self.url(&[
            "v1", "overledger", "networks", network_id, "addresses", address, "balance",
        ])?;
        self.send(self.client.get(url)).await
    }

    /// Connectivity check of the backend's Overledger integration.
    ///
    /// GET /v1/overledger/test
    pub async fn test_connection(&self) -> Result<Value> {
        let url = self.url(&["v1", "overledger", "test"])?;
        self.send(self.client.get(url)).await
    }
}

/// Message for a non-2xx response: the body's `message` when it has one.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message")?.as_str().map(str::to_string))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            format!(
                "API Error: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
            .trim_end()
            .to_string()
        })
}

#[async_trait]
impl TransactionBackend for BackendClient {
    /// GET /v1/overledger/networks
    async fn networks(&self) -> Result<Vec<NetworkSummary>> {
        let url = self.url(&["v1", "overledger", "networks"])?;
        let body = self.send(self.client.get(url)).await?;
        let parsed: NetworksResponse =
            serde_json::from_value(body).map_err(|e| TxflowError::Decode(e.to_string()))?;
        Ok(parsed.networks.into_iter().map(NetworkSummary::from).collect())
    }

    /// POST /v1/overledger/transactions
    async fn create_transaction(&self, request: &CreateTransactionRequest) -> Result<Value> {
        let url = self.url(&["v1", "overledger", "transactions"])?;
        self.send(self.client.post(url).json(request)).await
    }

    /// GET /v1/overledger/networks/{networkId}/transactions/{handle}/status
    async fn transaction_status(&self, network_id: &str, handle: &str) -> Result<Value> {
        let url = self.url(&[
            "v1", "overledger", "networks", network_id, "transactions", handle, "status",
        ])?;
        debug!(%url, "querying transaction status");
        self.send(self.client.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_building() {
        let client = BackendClient::new("http://localhost:8080/", None, None);
        let url = client
            .url(&["v1", "overledger", "networks", "ethereum sepolia", "transactions", "0x1/2", "status"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/v1/overledger/networks/ethereum%20sepolia/transactions/0x1%2F2/status"
        );

        let client = BackendClient::new("https://dash.example/api", None, None);
        let url = client.url(&["v1", "overledger", "test"]).unwrap();
        assert_eq!(url.as_str(), "https://dash.example/api/v1/overledger/test");
    }

    #[test]
    fn test_invalid_base_url() {
        let client = BackendClient::new("not a url", None, None);
        assert!(client.url(&["v1"]).is_err());
    }

    #[test]
    fn test_blank_api_key_ignored() {
        let client = BackendClient::new("http://localhost", None, Some("  ".into()));
        assert!(client.api_key.is_none());
    }

    #[test]
    fn test_error_message_prefers_body() {
        let body = json!({
            "error": "overledger_transaction_failed",
            "message": "upstream rejected the request",
            "code": 500
        })
        .to_string();
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, &body),
            "upstream rejected the request"
        );
    }

    #[test]
    fn test_error_message_fallback() {
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "<html>oops</html>"),
            "API Error: 502 Bad Gateway"
        );
        assert_eq!(
            error_message(StatusCode::NOT_FOUND, r#"{"message":""}"#),
            "API Error: 404 Not Found"
        );
    }

    #[test]
    fn test_network_name_falls_back_to_id() {
        let parsed: NetworksResponse = serde_json::from_value(json!({
            "networks": [
                { "id": "ethereum-sepolia", "name": "Ethereum Sepolia", "type": "evm" },
                { "id": "xrpl-testnet", "name": "" },
                { "id": "bitcoin-testnet" }
            ]
        }))
        .unwrap();
        let networks: Vec<NetworkSummary> =
            parsed.networks.into_iter().map(NetworkSummary::from).collect();
        assert_eq!(networks[0].name, "Ethereum Sepolia");
        assert_eq!(networks[1].name, "xrpl-testnet");
        assert_eq!(networks[2].name, "bitcoin-testnet");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_http_error() {
        let client = BackendClient::new("http://127.0.0.1:1", Some(500), None);
        let err = client.networks().await.unwrap_err();
        assert!(matches!(err, TxflowError::Http(_)));
    }
}
