//! In-memory construction service (for testing and offline runs).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::{CreateTransactionRequest, TransactionBackend};
use txflow_types::{NetworkSummary, Result, TxflowError};

/// Scripted backend. Status replies are served from a queue; once it runs
/// dry every query answers `{"status": "pending"}`.
pub struct MemoryBackend {
    networks: Mutex<Vec<NetworkSummary>>,
    network_calls: Mutex<usize>,
    networks_failure: Mutex<Option<String>>,
    create_response: Mutex<Value>,
    create_failure: Mutex<Option<String>>,
    create_requests: Mutex<Vec<CreateTransactionRequest>>,
    status_replies: Mutex<VecDeque<Result<Value>>>,
    status_queries: Mutex<Vec<(String, String)>>,
    status_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            networks: Mutex::new(Vec::new()),
            network_calls: Mutex::new(0),
            networks_failure: Mutex::new(None),
            create_response: Mutex::new(json!({})),
            create_failure: Mutex::new(None),
            create_requests: Mutex::new(Vec::new()),
            status_replies: Mutex::new(VecDeque::new()),
            status_queries: Mutex::new(Vec::new()),
            status_gate: Mutex::new(None),
        }
    }

    pub fn with_networks(self, networks: &[(&str, &str)]) -> Self {
        *self.networks.lock().unwrap() = networks
            .iter()
            .map(|(id, name)| NetworkSummary {
                id: id.to_string(),
                name: name.to_string(),
            })
            .collect();
        self
    }

    pub fn fail_next_networks(&self, message: &str) {
        *self.networks_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn network_calls(&self) -> usize {
        *self.network_calls.lock().unwrap()
    }

    pub fn respond_to_create(&self, body: Value) {
        *self.create_response.lock().unwrap() = body;
    }

    pub fn fail_create(&self, message: &str) {
        *self.create_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn create_requests(&self) -> Vec<CreateTransactionRequest> {
        self.create_requests.lock().unwrap().clone()
    }

    /// Queue the body of the next status reply.
    pub fn push_status(&self, body: Value) {
        self.status_replies.lock().unwrap().push_back(Ok(body));
    }

    /// Queue a failed status reply.
    pub fn push_status_error(&self, message: &str) {
        self.status_replies
            .lock()
            .unwrap()
            .push_back(Err(TxflowError::Http(message.to_string())));
    }

    /// Every `(network_id, handle)` queried so far, in order.
    pub fn status_queries(&self) -> Vec<(String, String)> {
        self.status_queries.lock().unwrap().clone()
    }

    /// From now on, status replies wait until released.
    pub fn hold_status_replies(&self) {
        *self.status_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `count` held status replies through.
    pub fn release_status_replies(&self, count: usize) {
        if let Some(gate) = self.status_gate.lock().unwrap().as_ref() {
            gate.add_permits(count);
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionBackend for MemoryBackend {
    async fn networks(&self) -> Result<Vec<NetworkSummary>> {
        *self.network_calls.lock().unwrap() += 1;
        if let Some(message) = self.networks_failure.lock().unwrap().take() {
            return Err(TxflowError::Http(message));
        }
        Ok(self.networks.lock().unwrap().clone())
    }

    async fn create_transaction(&self, request: &CreateTransactionRequest) -> Result<Value> {
        self.create_requests.lock().unwrap().push(request.clone());
        if let Some(message) = self.create_failure.lock().unwrap().take() {
            return Err(TxflowError::Http(message));
        }
        Ok(self.create_response.lock().unwrap().clone())
    }

    async fn transaction_status(&self, network_id: &str, handle: &str) -> Result<Value> {
        self.status_queries
            .lock()
            .unwrap()
            .push((network_id.to_string(), handle.to_string()));

        let gate = self.status_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| TxflowError::Other(e.to_string()))?
                .forget();
        }

        self.status_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({ "status": "pending" })))
    }
}
