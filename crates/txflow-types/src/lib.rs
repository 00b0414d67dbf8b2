use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 0x-prefixed hex string (e.g. "0x1234...").
pub type Hex = String;

/// Explorer template used when nothing else is configured (Sepolia Etherscan).
pub const DEFAULT_EXPLORER_TX_BASE: &str = "https://sepolia.etherscan.io/tx/";

/// Input problems that block a submission. Each variant maps to the field it
/// concerns and carries the message shown next to that field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please set a valid RPC URL.")]
    MissingEndpoint,

    #[error("Enter a valid sender private key (0x-prefixed hex, 64 chars)")]
    InvalidSecretKey,

    #[error("Enter a valid destination address")]
    InvalidRecipient,

    #[error("Select a network")]
    MissingNetwork,

    #[error("Enter valid from/to addresses")]
    InvalidAddresses,

    #[error("Enter a valid positive amount")]
    InvalidAmount,

    /// Local path: the amount must also be expressible in whole wei.
    #[error("Enter a valid positive amount in ETH")]
    InvalidLocalAmount,
}

impl ValidationError {
    /// Name of the form field the error belongs to.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingEndpoint => "rpc_url",
            ValidationError::InvalidSecretKey => "private_key",
            ValidationError::InvalidRecipient => "to_address",
            ValidationError::MissingNetwork => "network",
            ValidationError::InvalidAddresses => "addresses",
            ValidationError::InvalidAmount | ValidationError::InvalidLocalAmount => "amount",
        }
    }
}

/// txflow error types.
#[derive(Debug, Error)]
pub enum TxflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Submission(String),

    #[error("{0}")]
    Http(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("{0}")]
    Other(String),
}

impl TxflowError {
    pub fn is_validation(&self) -> bool {
        matches!(self, TxflowError::Validation(_))
    }

    /// Collapse transport/decode failures into a submission error, keeping
    /// the underlying message. Validation errors pass through.
    pub fn into_submission(self) -> Self {
        match self {
            TxflowError::Validation(_) | TxflowError::Submission(_) => self,
            other => TxflowError::Submission(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TxflowError>;

/// Which submission path a transfer takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sign locally with a secret key and broadcast to a JSON-RPC endpoint.
    #[default]
    Local,
    /// Ask the backend construction service to build and submit the transaction.
    Delegated,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Local => f.write_str("local"),
            Direction::Delegated => f.write_str("delegated"),
        }
    }
}

/// Optional fee/nonce overrides, exactly as the user typed them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOverrides {
    pub gas_limit: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub nonce: Option<String>,
}

/// One submission attempt. Built fresh from the form each time, never stored.
#[derive(Clone)]
pub struct TransferIntent {
    pub direction: Direction,
    /// Secret key (local path) or sender address (delegated path).
    pub sender: String,
    pub recipient: String,
    /// Decimal string in the network's native unit.
    pub amount: String,
    /// RPC endpoint URL (local path) or backend network id (delegated path).
    pub network: String,
    pub overrides: TxOverrides,
}

impl TransferIntent {
    pub fn local(endpoint: &str, secret_key: &str, recipient: &str, amount: &str) -> Self {
        Self {
            direction: Direction::Local,
            sender: secret_key.to_string(),
            recipient: recipient.to_string(),
            amount: amount.to_string(),
            network: endpoint.to_string(),
            overrides: TxOverrides::default(),
        }
    }

    pub fn delegated(network_id: &str, from: &str, recipient: &str, amount: &str) -> Self {
        Self {
            direction: Direction::Delegated,
            sender: from.to_string(),
            recipient: recipient.to_string(),
            amount: amount.to_string(),
            network: network_id.to_string(),
            overrides: TxOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: TxOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

// Hand-written so a secret key never ends up in logs.
impl fmt::Debug for TransferIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sender = match self.direction {
            Direction::Local => "<redacted>",
            Direction::Delegated => self.sender.as_str(),
        };
        f.debug_struct("TransferIntent")
            .field("direction", &self.direction)
            .field("sender", &sender)
            .field("recipient", &self.recipient)
            .field("amount", &self.amount)
            .field("network", &self.network)
            .field("overrides", &self.overrides)
            .finish()
    }
}

/// Outcome of a delegated submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    /// Chain hash or backend id; `None` when the response carried neither.
    pub handle: Option<Hex>,
    pub initial_status: String,
    pub message: Option<String>,
    pub explorer_url: Option<String>,
}

/// Outcome of a locally signed transfer, after inclusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalReceipt {
    pub tx_hash: Hex,
    pub explorer_url: String,
}

/// Entry of the backend network catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
}

/// Builds explorer links for transaction hashes.
#[derive(Debug, Clone)]
pub struct Explorer {
    tx_base: String,
}

impl Default for Explorer {
    fn default() -> Self {
        Self::new(DEFAULT_EXPLORER_TX_BASE)
    }
}

impl Explorer {
    pub fn new(tx_base: &str) -> Self {
        let mut tx_base = tx_base.trim().to_string();
        if !tx_base.ends_with('/') {
            tx_base.push('/');
        }
        Self { tx_base }
    }

    pub fn tx_url(&self, tx_hash: &str) -> String {
        format!("{}{}", self.tx_base, tx_hash)
    }

    /// Best-effort link for a delegated transaction: only produced when the
    /// network id names a chain the template is known to cover.
    pub fn tx_url_for_network(&self, network_id: &str, tx_hash: &str) -> Option<String> {
        let lower = network_id.to_lowercase();
        if lower.contains("sepolia") || lower.contains("ethereum") {
            Some(self.tx_url(tx_hash))
        } else {
            None
        }
    }
}

/// Parse a hex string (with or without 0x) to bytes.
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str).map_err(|e| TxflowError::InvalidHex(e.to_string()))
}

/// Convert bytes to a 0x-prefixed hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explorer_local_template() {
        let explorer = Explorer::default();
        assert_eq!(
            explorer.tx_url("0xabc"),
            "https://sepolia.etherscan.io/tx/0xabc"
        );
    }

    #[test]
    fn test_explorer_network_heuristic() {
        let explorer = Explorer::new("https://explorer.example/tx");
        assert_eq!(
            explorer.tx_url_for_network("ethereum-sepolia", "0x1").as_deref(),
            Some("https://explorer.example/tx/0x1")
        );
        assert!(explorer.tx_url_for_network("ETHEREUM", "0x1").is_some());
        assert!(explorer.tx_url_for_network("polygon-amoy", "0x1").is_none());
        assert!(explorer.tx_url_for_network("", "0x1").is_none());
    }

    #[test]
    fn test_intent_debug_redacts_secret() {
        let intent = TransferIntent::local("http://rpc", "0xdeadbeef", "0x01", "1");
        let printed = format!("{:?}", intent);
        assert!(!printed.contains("deadbeef"));
        assert!(printed.contains("<redacted>"));

        let intent = TransferIntent::delegated("eth", "0xsender", "0x01", "1");
        assert!(format!("{:?}", intent).contains("0xsender"));
    }

    #[test]
    fn test_validation_messages_are_distinct() {
        let all = [
            ValidationError::MissingEndpoint,
            ValidationError::InvalidSecretKey,
            ValidationError::InvalidRecipient,
            ValidationError::MissingNetwork,
            ValidationError::InvalidAddresses,
            ValidationError::InvalidAmount,
            ValidationError::InvalidLocalAmount,
        ];
        let messages: std::collections::HashSet<String> =
            all.iter().map(|e| e.to_string()).collect();
        assert_eq!(messages.len(), all.len());
        assert_eq!(
            ValidationError::InvalidLocalAmount.to_string(),
            "Enter a valid positive amount in ETH"
        );
        assert_eq!(ValidationError::InvalidLocalAmount.field(), "amount");
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(hex_to_bytes("0x0a0b").unwrap(), vec![0x0a, 0x0b]);
        assert_eq!(bytes_to_hex(&[0xff, 0x00]), "0xff00");
        assert!(hex_to_bytes("0xzz").is_err());
    }
}
