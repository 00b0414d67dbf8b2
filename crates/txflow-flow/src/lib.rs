//! Transfer flow: one form, two submission paths.
//!
//! Wires form input to the local signer or to the construction service, keeps
//! the result on display, and owns the status poller of delegated submissions.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use txflow_backend::TransactionBackend;
use txflow_chain::ChainConnector;
use txflow_keys::{derive_address, normalize_secret_input};
use txflow_poller::{PollConfig, PollEventHandler, PollPhase, PollState, StatusPoller};
use txflow_types::{
    Direction, Explorer, LocalReceipt, NetworkSummary, Result, SubmissionResult, TransferIntent,
    TxOverrides, DEFAULT_EXPLORER_TX_BASE,
};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8080";
pub const DEFAULT_RPC_URL: &str = "https://ethereum-sepolia-rpc.publicnode.com";

/// Flow configuration.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub backend_url: String,
    pub request_timeout_ms: u64,
    pub api_key: Option<String>,
    pub explorer_tx_base: String,
    /// Confirmations awaited by the local path.
    pub confirmations: usize,
    /// Initial value of the local form's RPC URL field.
    pub default_rpc_url: String,
    pub poll: PollConfig,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout_ms: 30_000,
            api_key: None,
            explorer_tx_base: DEFAULT_EXPLORER_TX_BASE.to_string(),
            confirmations: 1,
            default_rpc_url: DEFAULT_RPC_URL.to_string(),
            poll: PollConfig::default(),
        }
    }
}

/// Fields of the local (sign-and-broadcast) form.
#[derive(Clone, Default)]
pub struct LocalForm {
    pub rpc_url: String,
    /// Normalized secret; set through [`FlowController::set_secret_input`].
    secret_key: String,
    pub to_address: String,
    pub amount: String,
}

impl fmt::Debug for LocalForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalForm")
            .field("rpc_url", &self.rpc_url)
            .field("secret_key", &"<redacted>")
            .field("to_address", &self.to_address)
            .field("amount", &self.amount)
            .finish()
    }
}

/// Fields of the delegated (construction service) form.
#[derive(Debug, Clone, Default)]
pub struct DelegatedForm {
    pub network_id: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: String,
    pub overrides: TxOverrides,
}

/// What the flow currently shows besides the form itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowView {
    pub direction: Direction,
    /// Address derived from the secret input, when it is a well-formed key.
    pub derived_sender: Option<String>,
    pub local_receipt: Option<LocalReceipt>,
    pub submission: Option<SubmissionResult>,
    /// Banner message of the last failed attempt.
    pub error: Option<String>,
}

/// Result of [`FlowController::submit`], per direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    Local(LocalReceipt),
    Delegated(SubmissionResult),
}

/// Owns the state of one transfer flow.
pub struct FlowController {
    connector: Arc<dyn ChainConnector>,
    backend: Arc<dyn TransactionBackend>,
    explorer: Explorer,
    poller: StatusPoller,
    networks: Option<Vec<NetworkSummary>>,
    view: FlowView,
    pub local: LocalForm,
    pub delegated: DelegatedForm,
}

impl FlowController {
    pub fn new(
        config: &FlowConfig,
        connector: Arc<dyn ChainConnector>,
        backend: Arc<dyn TransactionBackend>,
    ) -> Self {
        Self {
            poller: StatusPoller::new(backend.clone(), config.poll.clone()),
            connector,
            backend,
            explorer: Explorer::new(&config.explorer_tx_base),
            networks: None,
            view: FlowView::default(),
            local: LocalForm {
                rpc_url: config.default_rpc_url.clone(),
                ..Default::default()
            },
            delegated: DelegatedForm::default(),
        }
    }

    /// Report poll progress to `handler`. Replaces the poller, so call it
    /// before the first delegated submission.
    pub fn with_poll_event_handler(mut self, handler: PollEventHandler) -> Self {
        let config = self.poller.config().clone();
        self.poller = StatusPoller::new(self.backend.clone(), config).with_event_handler(handler);
        self
    }

    pub fn view(&self) -> &FlowView {
        &self.view
    }

    pub fn direction(&self) -> Direction {
        self.view.direction
    }

    /// Switch direction without touching the network. Returns whether the
    /// direction changed.
    ///
    /// A change cancels the poller and clears every result on display; a
    /// status reply still in flight is discarded.
    pub fn switch_direction(&mut self, direction: Direction) -> bool {
        if self.view.direction == direction {
            return false;
        }
        self.poller.clear();
        self.view.local_receipt = None;
        self.view.submission = None;
        self.view.error = None;
        self.view.direction = direction;
        debug!(%direction, "direction switched");
        true
    }

    /// Switch direction and, for the delegated path, make sure the network
    /// catalog is loaded.
    pub async fn set_direction(&mut self, direction: Direction) {
        self.switch_direction(direction);
        if direction == Direction::Delegated {
            self.ensure_networks().await;
        }
    }

    /// Fetch the network catalog unless a non-empty one is already loaded.
    ///
    /// A failed or empty fetch is logged and leaves the catalog empty; the
    /// next call tries again. The first network becomes the selection when
    /// none is set.
    pub async fn ensure_networks(&mut self) -> &[NetworkSummary] {
        if self.networks.is_none() {
            match self.backend.networks().await {
                Ok(networks) if networks.is_empty() => {
                    warn!("backend returned an empty network catalog")
                }
                Ok(networks) => {
                    info!(count = networks.len(), "network catalog loaded");
                    if self.delegated.network_id.trim().is_empty() {
                        if let Some(first) = networks.first() {
                            self.delegated.network_id = first.id.clone();
                        }
                    }
                    self.networks = Some(networks);
                }
                Err(e) => warn!(error = %e, "failed to load network catalog"),
            }
        }
        self.networks()
    }

    pub fn networks(&self) -> &[NetworkSummary] {
        self.networks.as_deref().unwrap_or_default()
    }

    pub fn select_network(&mut self, network_id: &str) {
        self.delegated.network_id = network_id.to_string();
    }

    /// Store the secret as typed (normalized) and refresh the derived sender.
    pub fn set_secret_input(&mut self, raw: &str) {
        let secret = normalize_secret_input(raw);
        self.view.derived_sender = derive_address(&secret);
        self.local.secret_key = secret;
    }

    pub fn derived_sender(&self) -> Option<&str> {
        self.view.derived_sender.as_deref()
    }

    /// Submit the form of the current direction.
    pub async fn submit(&mut self) -> Result<Submitted> {
        match self.view.direction {
            Direction::Local => self.submit_local().await.map(Submitted::Local),
            Direction::Delegated => self.submit_delegated().await.map(Submitted::Delegated),
        }
    }

    /// Sign and broadcast the local form, then wait for inclusion.
    pub async fn submit_local(&mut self) -> Result<LocalReceipt> {
        self.view.error = None;
        self.view.local_receipt = None;

        let intent = TransferIntent::local(
            &self.local.rpc_url,
            &self.local.secret_key,
            &self.local.to_address,
            &self.local.amount,
        );
        match txflow_chain::submit_local(self.connector.as_ref(), &intent, &self.explorer).await {
            Ok(receipt) => {
                self.view.local_receipt = Some(receipt.clone());
                Ok(receipt)
            }
            Err(e) => {
                self.view.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Hand the delegated form to the construction service. Polling starts
    /// only when the response carries a handle.
    pub async fn submit_delegated(&mut self) -> Result<SubmissionResult> {
        self.poller.clear();
        self.view.error = None;
        self.view.submission = None;

        let network_id = self.delegated.network_id.clone();
        let intent = TransferIntent::delegated(
            &network_id,
            &self.delegated.from_address,
            &self.delegated.to_address,
            &self.delegated.amount,
        )
        .with_overrides(self.delegated.overrides.clone());

        match txflow_backend::submit_delegated(self.backend.as_ref(), &intent, &self.explorer).await
        {
            Ok(result) => {
                if let Some(ref handle) = result.handle {
                    self.poller
                        .start(network_id.trim(), handle, &result.initial_status);
                }
                self.view.submission = Some(result.clone());
                Ok(result)
            }
            Err(e) => {
                self.view.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn poll_state(&self) -> Option<PollState> {
        self.poller.snapshot()
    }

    pub fn poll_phase(&self) -> PollPhase {
        self.poller.phase()
    }

    /// Status to display: the poller's latest, else the submission's.
    pub fn displayed_status(&self) -> Option<String> {
        self.poller
            .snapshot()
            .map(|s| s.current_status)
            .or_else(|| self.view.submission.as_ref().map(|s| s.initial_status.clone()))
    }

    /// Handle to display: the poller may have learned a newer one.
    pub fn displayed_handle(&self) -> Option<String> {
        self.poller
            .snapshot()
            .map(|s| s.handle)
            .or_else(|| self.view.submission.as_ref().and_then(|s| s.handle.clone()))
    }

    /// Explorer link of the displayed delegated handle, if the network has one.
    pub fn delegated_explorer_url(&self) -> Option<String> {
        let handle = self.displayed_handle()?;
        self.explorer
            .tx_url_for_network(&self.delegated.network_id, &handle)
    }

    /// Suspend until the poller stops on its own.
    pub async fn wait_for_poll(&mut self) {
        self.poller.wait().await;
    }

    /// Stop polling and clear results, as when the flow is closed.
    pub fn teardown(&mut self) {
        self.poller.clear();
        self.view.local_receipt = None;
        self.view.submission = None;
        self.view.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use txflow_backend::MemoryBackend;
    use txflow_chain::MemoryConnector;
    use txflow_types::TxflowError;

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const KEY_ADDRESS: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";
    const FROM: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    const TO: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

    fn controller(
        connector: &Arc<MemoryConnector>,
        backend: &Arc<MemoryBackend>,
    ) -> FlowController {
        FlowController::new(&FlowConfig::default(), connector.clone(), backend.clone())
    }

    fn fill_delegated(flow: &mut FlowController) {
        flow.delegated.from_address = FROM.to_string();
        flow.delegated.to_address = TO.to_string();
        flow.delegated.amount = "0.01".to_string();
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_secret_input_derives_sender() {
        let backend = Arc::new(MemoryBackend::new());
        let connector = Arc::new(MemoryConnector::new());
        let mut flow = controller(&connector, &backend);

        flow.set_secret_input(&KEY[2..]);
        assert_eq!(flow.derived_sender(), Some(KEY_ADDRESS));
        assert_eq!(flow.local.secret_key, KEY);

        flow.set_secret_input("0x1234");
        assert_eq!(flow.derived_sender(), None);

        flow.set_secret_input("");
        assert_eq!(flow.derived_sender(), None);
        assert_eq!(flow.local.secret_key, "");
    }

    #[test]
    fn test_rpc_url_prefilled() {
        let backend = Arc::new(MemoryBackend::new());
        let connector = Arc::new(MemoryConnector::new());
        let flow = controller(&connector, &backend);
        assert_eq!(flow.local.rpc_url, DEFAULT_RPC_URL);
        assert_eq!(flow.direction(), Direction::Local);
    }

    #[tokio::test]
    async fn test_local_submission() {
        let backend = Arc::new(MemoryBackend::new());
        let connector = Arc::new(MemoryConnector::new());
        let mut flow = controller(&connector, &backend);
        flow.set_secret_input(KEY);
        flow.local.to_address = TO.to_string();
        flow.local.amount = "0.001".to_string();

        let receipt = match flow.submit().await.unwrap() {
            Submitted::Local(receipt) => receipt,
            other => panic!("unexpected submission: {other:?}"),
        };
        assert_eq!(
            receipt.explorer_url,
            format!("https://sepolia.etherscan.io/tx/{}", receipt.tx_hash)
        );
        assert_eq!(flow.view().local_receipt.as_ref(), Some(&receipt));
        assert_eq!(connector.sent().len(), 1);
        assert_eq!(connector.sent()[0].amount, "0.001");
    }

    #[tokio::test]
    async fn test_local_error_sets_banner() {
        let backend = Arc::new(MemoryBackend::new());
        let connector = Arc::new(MemoryConnector::new());
        let mut flow = controller(&connector, &backend);
        flow.local.rpc_url = String::new();
        flow.set_secret_input(KEY);
        flow.local.to_address = TO.to_string();
        flow.local.amount = "1".to_string();

        let err = flow.submit_local().await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(flow.view().error.as_deref(), Some("Please set a valid RPC URL."));
        assert_eq!(connector.call_count(), 0);

        flow.local.rpc_url = DEFAULT_RPC_URL.to_string();
        connector.fail_next_send("insufficient funds for gas * price + value");
        let err = flow.submit_local().await.unwrap_err();
        assert!(matches!(err, TxflowError::Submission(_)));
        assert!(flow.view().error.as_deref().unwrap().contains("insufficient funds"));

        // Resubmitting with the same form works and clears the banner.
        flow.submit_local().await.unwrap();
        assert_eq!(flow.view().error, None);
    }

    #[tokio::test]
    async fn test_networks_fetched_once() {
        let backend = Arc::new(
            MemoryBackend::new()
                .with_networks(&[("ethereum-sepolia", "Ethereum Sepolia"), ("polygon-amoy", "Amoy")]),
        );
        let connector = Arc::new(MemoryConnector::new());
        let mut flow = controller(&connector, &backend);
        assert_eq!(backend.network_calls(), 0);

        flow.set_direction(Direction::Delegated).await;
        assert_eq!(flow.networks().len(), 2);
        assert_eq!(flow.delegated.network_id, "ethereum-sepolia");

        flow.set_direction(Direction::Local).await;
        flow.set_direction(Direction::Delegated).await;
        assert_eq!(backend.network_calls(), 1);

        // A manual choice survives toggling.
        flow.select_network("polygon-amoy");
        flow.set_direction(Direction::Local).await;
        flow.set_direction(Direction::Delegated).await;
        assert_eq!(flow.delegated.network_id, "polygon-amoy");
    }

    #[tokio::test]
    async fn test_failed_network_fetch_is_retried() {
        let backend = Arc::new(MemoryBackend::new().with_networks(&[("ethereum-sepolia", "")]));
        backend.fail_next_networks("API Error: 503 Service Unavailable");
        let connector = Arc::new(MemoryConnector::new());
        let mut flow = controller(&connector, &backend);

        flow.set_direction(Direction::Delegated).await;
        assert!(flow.networks().is_empty());
        assert_eq!(flow.view().error, None);

        flow.set_direction(Direction::Local).await;
        flow.set_direction(Direction::Delegated).await;
        assert_eq!(backend.network_calls(), 2);
        assert_eq!(flow.networks().len(), 1);
        assert_eq!(flow.delegated.network_id, "ethereum-sepolia");
    }

    #[tokio::test]
    async fn test_empty_catalog_is_fetched_again() {
        let backend = Arc::new(MemoryBackend::new());
        let connector = Arc::new(MemoryConnector::new());
        let mut flow = controller(&connector, &backend);

        flow.set_direction(Direction::Delegated).await;
        assert!(flow.networks().is_empty());
        assert_eq!(flow.delegated.network_id, "");

        flow.set_direction(Direction::Local).await;
        flow.set_direction(Direction::Delegated).await;
        assert_eq!(backend.network_calls(), 2);

        flow.ensure_networks().await;
        assert_eq!(backend.network_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delegated_submission_polls_to_confirmation() {
        let backend = Arc::new(MemoryBackend::new().with_networks(&[("ethereum-sepolia", "Sepolia")]));
        backend.respond_to_create(json!({
            "metadata": { "transactionId": "abc", "execution": { "value": "pending" } }
        }));
        backend.push_status(json!({ "status": "pending" }));
        backend.push_status(json!({ "status": "CONFIRMED", "hash": "0xfinal" }));
        let connector = Arc::new(MemoryConnector::new());
        let mut flow = controller(&connector, &backend);

        flow.set_direction(Direction::Delegated).await;
        fill_delegated(&mut flow);
        let result = flow.submit_delegated().await.unwrap();
        assert_eq!(result.handle.as_deref(), Some("abc"));
        assert_eq!(flow.poll_phase(), PollPhase::Active);
        assert_eq!(flow.displayed_status().as_deref(), Some("pending"));

        flow.wait_for_poll().await;
        let state = flow.poll_state().unwrap();
        assert_eq!(state.phase, PollPhase::Terminal);
        assert_eq!(state.attempts_made, 2);
        assert_eq!(flow.displayed_status().as_deref(), Some("CONFIRMED"));
        assert_eq!(flow.displayed_handle().as_deref(), Some("0xfinal"));
        assert_eq!(
            flow.delegated_explorer_url().as_deref(),
            Some("https://sepolia.etherscan.io/tx/0xfinal")
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.status_queries().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_handle_means_no_polling() {
        let backend = Arc::new(MemoryBackend::new().with_networks(&[("xrpl-testnet", "XRPL")]));
        backend.respond_to_create(json!({ "status": "accepted", "message": "queued" }));
        let connector = Arc::new(MemoryConnector::new());
        let mut flow = controller(&connector, &backend);

        flow.set_direction(Direction::Delegated).await;
        fill_delegated(&mut flow);
        let result = flow.submit_delegated().await.unwrap();
        assert_eq!(result.handle, None);
        assert!(flow.poll_state().is_none());
        assert_eq!(flow.poll_phase(), PollPhase::Idle);
        assert_eq!(flow.displayed_status().as_deref(), Some("accepted"));
        assert_eq!(flow.delegated_explorer_url(), None);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(backend.status_queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_direction_switch_discards_inflight_reply() {
        let backend = Arc::new(MemoryBackend::new().with_networks(&[("ethereum-sepolia", "Sepolia")]));
        backend.respond_to_create(json!({ "transactionId": "tid-1", "status": "submitted" }));
        backend.hold_status_replies();
        backend.push_status(json!({ "status": "confirmed" }));
        let connector = Arc::new(MemoryConnector::new());
        let mut flow = controller(&connector, &backend);

        flow.set_direction(Direction::Delegated).await;
        fill_delegated(&mut flow);
        flow.submit_delegated().await.unwrap();

        tokio::time::sleep(Duration::from_millis(3_001)).await;
        settle().await;
        assert_eq!(backend.status_queries().len(), 1);

        // The query is in flight; switching away must drop its reply.
        flow.set_direction(Direction::Local).await;
        backend.release_status_replies(1);
        settle().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(flow.poll_state().is_none());
        assert_eq!(flow.view().submission, None);
        assert_eq!(flow.displayed_status(), None);
        assert_eq!(backend.status_queries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_submission_replaces_poller() {
        let backend = Arc::new(MemoryBackend::new().with_networks(&[("ethereum-sepolia", "Sepolia")]));
        backend.respond_to_create(json!({ "transactionId": "first" }));
        let connector = Arc::new(MemoryConnector::new());
        let mut flow = controller(&connector, &backend);

        flow.set_direction(Direction::Delegated).await;
        fill_delegated(&mut flow);
        flow.submit_delegated().await.unwrap();

        backend.respond_to_create(json!({ "transactionId": "second" }));
        flow.submit_delegated().await.unwrap();

        tokio::time::sleep(Duration::from_millis(3_001)).await;
        settle().await;
        assert_eq!(
            backend.status_queries(),
            vec![("ethereum-sepolia".to_string(), "second".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delegated_error_sets_banner() {
        let backend = Arc::new(MemoryBackend::new().with_networks(&[("ethereum-sepolia", "Sepolia")]));
        let connector = Arc::new(MemoryConnector::new());
        let mut flow = controller(&connector, &backend);
        flow.set_direction(Direction::Delegated).await;

        flow.delegated.from_address = "not-an-address".to_string();
        flow.delegated.to_address = TO.to_string();
        flow.delegated.amount = "1".to_string();
        flow.submit().await.unwrap_err();
        assert_eq!(flow.view().error.as_deref(), Some("Enter valid from/to addresses"));
        assert!(backend.create_requests().is_empty());

        fill_delegated(&mut flow);
        backend.fail_create("API Error: 500 Internal Server Error");
        flow.submit().await.unwrap_err();
        assert_eq!(
            flow.view().error.as_deref(),
            Some("API Error: 500 Internal Server Error")
        );
        assert!(flow.poll_state().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_polling() {
        let backend = Arc::new(MemoryBackend::new().with_networks(&[("ethereum-sepolia", "Sepolia")]));
        backend.respond_to_create(json!({ "transactionId": "tid" }));
        let connector = Arc::new(MemoryConnector::new());
        let mut flow = controller(&connector, &backend);
        flow.set_direction(Direction::Delegated).await;
        fill_delegated(&mut flow);
        flow.submit_delegated().await.unwrap();
        drop(flow);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(backend.status_queries().is_empty());
    }
}
