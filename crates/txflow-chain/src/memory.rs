//! In-memory chain connector (for testing and dry runs).

use async_trait::async_trait;
use std::sync::Mutex;

use crate::{ChainConnector, DROPPED_FROM_MEMPOOL};
use txflow_types::{Hex, Result, TxflowError};

/// A transfer the connector was asked to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTransfer {
    pub endpoint: String,
    pub recipient: String,
    pub amount: String,
    pub tx_hash: Hex,
}

/// Records every call and answers with deterministic hashes.
///
/// The secret key is checked for presence but never stored.
pub struct MemoryConnector {
    sent: Mutex<Vec<SentTransfer>>,
    inclusion_checks: Mutex<Vec<Hex>>,
    send_failure: Mutex<Option<String>>,
    inclusion_failure: Mutex<Option<String>>,
    drop_next: Mutex<bool>,
    // None: echo the broadcast hash. Some(x): report x as the receipt hash.
    receipt_hash: Option<Option<Hex>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            inclusion_checks: Mutex::new(Vec::new()),
            send_failure: Mutex::new(None),
            inclusion_failure: Mutex::new(None),
            drop_next: Mutex::new(false),
            receipt_hash: None,
        }
    }

    /// Fix the hash reported by `await_inclusion` (`None` = receipt without hash).
    pub fn with_receipt_hash(mut self, hash: Option<Hex>) -> Self {
        self.receipt_hash = Some(hash);
        self
    }

    pub fn fail_next_send(&self, message: &str) {
        *self.send_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_next_inclusion(&self, message: &str) {
        *self.inclusion_failure.lock().unwrap() = Some(message.to_string());
    }

    /// The next broadcast never gets a receipt.
    pub fn drop_next_transaction(&self) {
        *self.drop_next.lock().unwrap() = true;
    }

    pub fn sent(&self) -> Vec<SentTransfer> {
        self.sent.lock().unwrap().clone()
    }

    /// Total number of connector calls of any kind.
    pub fn call_count(&self) -> usize {
        self.sent.lock().unwrap().len() + self.inclusion_checks.lock().unwrap().len()
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainConnector for MemoryConnector {
    async fn sign_and_send(
        &self,
        endpoint: &str,
        secret_key: &str,
        recipient: &str,
        amount: &str,
    ) -> Result<Hex> {
        if let Some(message) = self.send_failure.lock().unwrap().take() {
            return Err(TxflowError::Submission(message));
        }
        if secret_key.is_empty() {
            return Err(TxflowError::Submission("missing signer key".into()));
        }

        let mut sent = self.sent.lock().unwrap();
        let tx_hash = format!("0x{:064x}", sent.len() + 1);
        sent.push(SentTransfer {
            endpoint: endpoint.to_string(),
            recipient: recipient.to_string(),
            amount: amount.to_string(),
            tx_hash: tx_hash.clone(),
        });
        Ok(tx_hash)
    }

    async fn await_inclusion(&self, _endpoint: &str, tx_hash: &str) -> Result<Option<Hex>> {
        self.inclusion_checks.lock().unwrap().push(tx_hash.to_string());
        if let Some(message) = self.inclusion_failure.lock().unwrap().take() {
            return Err(TxflowError::Submission(message));
        }
        if std::mem::take(&mut *self.drop_next.lock().unwrap()) {
            return Err(TxflowError::Submission(DROPPED_FROM_MEMPOOL.to_string()));
        }
        Ok(match &self.receipt_hash {
            Some(hash) => hash.clone(),
            None => Some(tx_hash.to_string()),
        })
    }
}
