//! ethers-backed connector for EVM JSON-RPC endpoints.
//!
//! A fresh provider is built per call, so a changed endpoint in the form takes
//! effect on the next submission without any reconnect logic.

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, PendingTransaction, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Eip1559TransactionRequest, TransactionReceipt, H256};
use std::time::Duration;
use tracing::debug;

use crate::{parse_local_amount, ChainConnector, DROPPED_FROM_MEMPOOL};
use txflow_types::{Hex, Result, TxflowError, ValidationError};

/// JSON-RPC connector configuration.
#[derive(Debug, Clone)]
pub struct JsonRpcConfig {
    /// Blocks to wait for after inclusion before reporting the receipt.
    pub confirmations: usize,
    /// How often the provider polls for the receipt.
    pub receipt_poll_ms: u64,
}

impl Default for JsonRpcConfig {
    fn default() -> Self {
        Self {
            confirmations: 1,
            receipt_poll_ms: 4_000,
        }
    }
}

pub struct JsonRpcConnector {
    config: JsonRpcConfig,
}

impl JsonRpcConnector {
    pub fn new(config: JsonRpcConfig) -> Self {
        Self { config }
    }

    fn provider(&self, endpoint: &str) -> Result<Provider<Http>> {
        let provider = Provider::<Http>::try_from(endpoint)
            .map_err(|e| TxflowError::Submission(format!("invalid RPC URL: {}", e)))?;
        Ok(provider.interval(Duration::from_millis(self.config.receipt_poll_ms)))
    }
}

impl Default for JsonRpcConnector {
    fn default() -> Self {
        Self::new(JsonRpcConfig::default())
    }
}

fn submission_err(e: impl std::fmt::Display) -> TxflowError {
    TxflowError::Submission(e.to_string())
}

/// `PendingTransaction` resolves to `None` when the transaction left the
/// mempool without being mined.
fn included_hash(receipt: Option<TransactionReceipt>) -> Result<Option<Hex>> {
    match receipt {
        Some(receipt) => Ok(Some(format!("{:#x}", receipt.transaction_hash))),
        None => Err(TxflowError::Submission(DROPPED_FROM_MEMPOOL.to_string())),
    }
}

#[async_trait]
impl ChainConnector for JsonRpcConnector {
    async fn sign_and_send(
        &self,
        endpoint: &str,
        secret_key: &str,
        recipient: &str,
        amount: &str,
    ) -> Result<Hex> {
        let provider = self.provider(endpoint)?;
        let chain_id = provider.get_chainid().await.map_err(submission_err)?;

        let wallet = secret_key
            .parse::<LocalWallet>()
            .map_err(submission_err)?
            .with_chain_id(chain_id.as_u64());
        debug!(chain_id = chain_id.as_u64(), from = ?wallet.address(), "signer ready");

        let to = recipient.parse::<Address>().map_err(submission_err)?;
        let value = parse_local_amount(amount)
            .ok_or(TxflowError::Validation(ValidationError::InvalidLocalAmount))?;
        let request = Eip1559TransactionRequest::new().to(to).value(value);

        let client = SignerMiddleware::new(provider, wallet);
        let pending = client
            .send_transaction(request, None)
            .await
            .map_err(submission_err)?;

        Ok(format!("{:#x}", pending.tx_hash()))
    }

    async fn await_inclusion(&self, endpoint: &str, tx_hash: &str) -> Result<Option<Hex>> {
        let provider = self.provider(endpoint)?;
        let hash = tx_hash.parse::<H256>().map_err(submission_err)?;

        let receipt = PendingTransaction::new(hash, &provider)
            .confirmations(self.config.confirmations)
            .await
            .map_err(submission_err)?;

        included_hash(receipt)
    }
}
