//! Local signing path: sign a value transfer with a client-held key and
//! broadcast it straight to a JSON-RPC endpoint.
//!
//! - `ChainConnector`: the network seam (sign-and-send, await inclusion)
//! - `JsonRpcConnector`: ethers-backed implementation
//! - `MemoryConnector`: scripted implementation for tests

use async_trait::async_trait;
use ethers::types::U256;
use ethers::utils::parse_ether;
use tracing::info;
use txflow_keys::{is_secret_key, is_valid_address};
use txflow_types::{Explorer, Hex, LocalReceipt, Result, TransferIntent, ValidationError};

pub mod jsonrpc;
pub mod memory;

pub use jsonrpc::JsonRpcConnector;
pub use memory::MemoryConnector;

/// Reported when a broadcast transaction disappears before inclusion.
pub const DROPPED_FROM_MEMPOOL: &str = "transaction dropped from mempool";

/// Wei decimals of the native unit.
const ETHER_DECIMALS: usize = 18;

/// Access to a chain through a JSON-RPC endpoint.
///
/// The secret key is only handed to the signer; implementations must not
/// transmit it anywhere.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Sign a transfer of `amount` (decimal, native unit) to `recipient` and
    /// broadcast it. Returns the transaction hash known before inclusion.
    async fn sign_and_send(
        &self,
        endpoint: &str,
        secret_key: &str,
        recipient: &str,
        amount: &str,
    ) -> Result<Hex>;

    /// Suspend until `tx_hash` is included in a block. Returns the receipt's
    /// transaction hash, or `None` when the receipt carries no usable hash.
    /// A transaction that never gets a receipt is an error.
    async fn await_inclusion(&self, endpoint: &str, tx_hash: &str) -> Result<Option<Hex>>;
}

/// Convert an ETH amount to wei.
///
/// Only plain decimal notation with at most 18 fractional digits is
/// accepted, and the result must be at least one wei.
pub fn parse_local_amount(amount: &str) -> Option<U256> {
    let amount = amount.trim();
    let (whole, fraction) = match amount.split_once('.') {
        Some((whole, fraction)) if !fraction.is_empty() => (whole, fraction),
        Some(_) => return None,
        None => (amount, ""),
    };
    if whole.is_empty()
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
        || fraction.len() > ETHER_DECIMALS
    {
        return None;
    }
    parse_ether(amount).ok().filter(|wei| !wei.is_zero())
}

/// Check the local form in order: endpoint, key, recipient, amount.
pub fn validate_local(intent: &TransferIntent) -> std::result::Result<(), ValidationError> {
    if intent.network.trim().is_empty() {
        return Err(ValidationError::MissingEndpoint);
    }
    if !is_secret_key(&intent.sender) {
        return Err(ValidationError::InvalidSecretKey);
    }
    if !is_valid_address(intent.recipient.trim()) {
        return Err(ValidationError::InvalidRecipient);
    }
    if parse_local_amount(&intent.amount).is_none() {
        return Err(ValidationError::InvalidLocalAmount);
    }
    Ok(())
}

/// Sign, broadcast and wait for inclusion.
///
/// Validation runs before the connector is touched. Every later failure comes
/// back as a single `Submission` error; nothing is retained between calls.
pub async fn submit_local(
    connector: &dyn ChainConnector,
    intent: &TransferIntent,
    explorer: &Explorer,
) -> Result<LocalReceipt> {
    validate_local(intent)?;

    let endpoint = intent.network.trim();
    let recipient = intent.recipient.trim();
    let amount = intent.amount.trim();

    info!(endpoint, recipient, amount, "broadcasting locally signed transfer");
    let sent_hash = connector
        .sign_and_send(endpoint, intent.sender.trim(), recipient, amount)
        .await
        .map_err(|e| e.into_submission())?;

    let included_hash = connector
        .await_inclusion(endpoint, &sent_hash)
        .await
        .map_err(|e| e.into_submission())?;

    // The receipt hash and the broadcast hash identify the same transaction.
    let tx_hash = included_hash.unwrap_or(sent_hash);
    info!(tx_hash = %tx_hash, "transfer included");

    Ok(LocalReceipt {
        explorer_url: explorer.tx_url(&tx_hash),
        tx_hash,
    })
}
