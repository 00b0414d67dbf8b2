//! txflow command line
//!
//! Drives the transfer flow from a terminal:
//! 1. `send-local` signs with a local key and broadcasts to an RPC endpoint
//! 2. `send-delegated` asks the backend to build and submit the transaction
//! 3. `status`, `networks`, `balance`, `ping` query the backend directly

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use txflow_backend::{resolve_status, BackendClient, TransactionBackend};
use txflow_chain::jsonrpc::{JsonRpcConfig, JsonRpcConnector};
use txflow_flow::{FlowConfig, FlowController, DEFAULT_BACKEND_URL, DEFAULT_RPC_URL};
use txflow_keys::{derive_address, normalize_secret_input};
use txflow_poller::{PollConfig, PollEvent};
use txflow_types::{Direction, TxOverrides, DEFAULT_EXPLORER_TX_BASE};

#[derive(Parser)]
#[command(name = "txflow")]
#[command(about = "Send value transfers by local signing or through the backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend base URL
    #[arg(long, env = "TXFLOW_BACKEND_URL", default_value = DEFAULT_BACKEND_URL)]
    backend_url: String,

    /// Backend API key, sent as X-API-Key
    #[arg(long, env = "TXFLOW_API_KEY")]
    api_key: Option<String>,

    /// Backend request timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,

    /// Explorer transaction URL base
    #[arg(long, default_value = DEFAULT_EXPLORER_TX_BASE)]
    explorer: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the address of a secret key
    Derive {
        /// Secret key, with or without 0x
        secret: String,
    },

    /// Sign locally and broadcast to a JSON-RPC endpoint
    SendLocal {
        #[arg(long, env = "TXFLOW_RPC_URL", default_value = DEFAULT_RPC_URL)]
        rpc_url: String,

        #[arg(long, env = "TXFLOW_PRIVATE_KEY", hide_env_values = true)]
        private_key: String,

        #[arg(long)]
        to: String,

        /// Amount in ETH
        #[arg(long)]
        amount: String,

        /// Confirmations to wait for
        #[arg(long, default_value_t = 1)]
        confirmations: usize,
    },

    /// Submit through the backend construction service
    SendDelegated(DelegatedArgs),

    /// List backend networks
    Networks,

    /// Query a transaction's status once
    Status { network: String, handle: String },

    /// Query an address balance
    Balance { network: String, address: String },

    /// Check the backend's connectivity
    Ping,
}

#[derive(Args)]
struct DelegatedArgs {
    /// Network id; defaults to the first network the backend lists
    #[arg(long)]
    network: Option<String>,

    #[arg(long)]
    from: String,

    #[arg(long)]
    to: String,

    /// Amount in the network's native unit
    #[arg(long)]
    amount: String,

    #[arg(long)]
    gas_limit: Option<String>,

    #[arg(long)]
    max_fee_per_gas: Option<String>,

    #[arg(long)]
    max_priority_fee_per_gas: Option<String>,

    #[arg(long)]
    nonce: Option<String>,

    /// Poll the status until it is final
    #[arg(long)]
    wait: bool,

    #[arg(long, default_value_t = 3_000)]
    poll_interval_ms: u64,

    #[arg(long, default_value_t = 20)]
    max_attempts: u32,
}

impl Cli {
    fn flow_config(&self) -> FlowConfig {
        FlowConfig {
            backend_url: self.backend_url.clone(),
            request_timeout_ms: self.timeout_ms,
            api_key: self.api_key.clone(),
            explorer_tx_base: self.explorer.clone(),
            ..Default::default()
        }
    }
}

fn backend(config: &FlowConfig) -> BackendClient {
    BackendClient::new(
        &config.backend_url,
        Some(config.request_timeout_ms),
        config.api_key.clone(),
    )
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "txflow=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.flow_config();

    match cli.command {
        Commands::Derive { secret } => {
            let secret = normalize_secret_input(&secret);
            match derive_address(&secret) {
                Some(address) => println!("{}", address),
                None => bail!("not a valid secret key"),
            }
        }
        Commands::SendLocal {
            rpc_url,
            private_key,
            to,
            amount,
            confirmations,
        } => {
            let config = FlowConfig {
                confirmations,
                default_rpc_url: rpc_url,
                ..config
            };
            handle_send_local(&config, &private_key, to, amount).await?;
        }
        Commands::SendDelegated(args) => {
            let config = FlowConfig {
                poll: PollConfig {
                    interval_ms: args.poll_interval_ms,
                    max_attempts: args.max_attempts,
                },
                ..config
            };
            handle_send_delegated(&config, args).await?;
        }
        Commands::Networks => {
            for network in backend(&config).networks().await? {
                println!("{}\t{}", network.id, network.name);
            }
        }
        Commands::Status { network, handle } => {
            let body = backend(&config)
                .transaction_status(&network, &handle)
                .await?;
            let update = resolve_status(&body);
            println!("status: {}", update.status);
            if let Some(handle) = update.handle {
                println!("handle: {}", handle);
            }
        }
        Commands::Balance { network, address } => {
            let body = backend(&config).balance(&network, &address).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Ping => {
            let body = backend(&config).test_connection().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

async fn handle_send_local(
    config: &FlowConfig,
    private_key: &str,
    to: String,
    amount: String,
) -> anyhow::Result<()> {
    let connector = JsonRpcConnector::new(JsonRpcConfig {
        confirmations: config.confirmations,
        ..Default::default()
    });
    let mut flow = FlowController::new(config, Arc::new(connector), Arc::new(backend(config)));

    flow.set_secret_input(private_key);
    if let Some(sender) = flow.derived_sender() {
        info!(sender, "signing locally");
    }
    flow.local.to_address = to;
    flow.local.amount = amount;

    let receipt = flow.submit_local().await.context("local transfer failed")?;
    println!("tx hash:  {}", receipt.tx_hash);
    println!("explorer: {}", receipt.explorer_url);
    Ok(())
}

async fn handle_send_delegated(config: &FlowConfig, args: DelegatedArgs) -> anyhow::Result<()> {
    let mut flow = FlowController::new(
        config,
        Arc::new(JsonRpcConnector::default()),
        Arc::new(backend(config)),
    )
    .with_poll_event_handler(Arc::new(|event: PollEvent| {
        if let PollEvent::Tick {
            attempt,
            status,
            handle,
        } = event
        {
            println!("[{}] {} {}", attempt, status, handle);
        }
    }));

    flow.set_direction(Direction::Delegated).await;
    if let Some(network) = args.network {
        flow.select_network(&network);
    }
    flow.delegated.from_address = args.from;
    flow.delegated.to_address = args.to;
    flow.delegated.amount = args.amount;
    flow.delegated.overrides = TxOverrides {
        gas_limit: args.gas_limit,
        max_fee_per_gas: args.max_fee_per_gas,
        max_priority_fee_per_gas: args.max_priority_fee_per_gas,
        nonce: args.nonce,
    };

    let result = flow
        .submit_delegated()
        .await
        .context("delegated transfer failed")?;
    println!("status:  {}", result.initial_status);
    match result.handle {
        Some(ref handle) => println!("handle:  {}", handle),
        None => println!("handle:  (none, status cannot be tracked)"),
    }
    if let Some(ref message) = result.message {
        println!("message: {}", message);
    }
    if let Some(ref url) = result.explorer_url {
        println!("explorer: {}", url);
    }

    if args.wait && result.handle.is_some() {
        flow.wait_for_poll().await;
        if let Some(state) = flow.poll_state() {
            println!(
                "final:   {} ({:?} after {} queries)",
                state.current_status, state.phase, state.attempts_made
            );
        }
        if let Some(url) = flow.delegated_explorer_url() {
            println!("explorer: {}", url);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_send_delegated_args() {
        let cli = Cli::try_parse_from([
            "txflow",
            "--backend-url",
            "http://backend:9000",
            "send-delegated",
            "--from",
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "--to",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "--amount",
            "0.01",
            "--gas-limit",
            "21000",
            "--wait",
        ])
        .unwrap();
        assert_eq!(cli.backend_url, "http://backend:9000");
        match cli.command {
            Commands::SendDelegated(args) => {
                assert!(args.wait);
                assert_eq!(args.network, None);
                assert_eq!(args.gas_limit.as_deref(), Some("21000"));
                assert_eq!(args.max_attempts, 20);
                assert_eq!(args.poll_interval_ms, 3_000);
            }
            _ => panic!("expected send-delegated"),
        }
    }

    #[test]
    fn test_status_args() {
        let cli = Cli::try_parse_from(["txflow", "status", "ethereum-sepolia", "0xabc"]).unwrap();
        match cli.command {
            Commands::Status { network, handle } => {
                assert_eq!(network, "ethereum-sepolia");
                assert_eq!(handle, "0xabc");
            }
            _ => panic!("expected status"),
        }
    }
}
