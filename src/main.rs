mod config;
mod network;
mod node;

use chain_core::{Transaction, TransactionData};
use clap::{Parser, Subcommand};
use config::NodeConfig;
use node::NodeContext;
use shared::KeyPair;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agrichain-node", version, about = "Permissioned agricultural supply-chain blockchain node")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node: bind the P2P listener, dial configured peers, run schedulers.
    Start(NodeConfig),
    /// Run a short in-process demonstration of the account model and PoW mining.
    Demo,
    /// Print version information.
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Demo) {
        Commands::Start(config) => {
            init_tracing(&config.log_level);
            if let Err(error) = run_node(config).await {
                tracing::error!(%error, "node exited with an error");
                std::process::exit(1);
            }
        }
        Commands::Demo => {
            init_tracing("info");
            if let Err(error) = run_demo().await {
                tracing::error!(%error, "demo failed");
                std::process::exit(1);
            }
        }
        Commands::Version => print_version(),
    }
}

fn init_tracing(directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_node(config: NodeConfig) -> node::Result<()> {
    let started_at = chrono::Local::now().to_rfc3339();
    tracing::info!(
        %started_at,
        app_port = config.app_port,
        api_port = config.api_port,
        my_address = %config.my_address,
        enable_mining = config.enable_mining,
        is_orderer_node = config.is_orderer_node,
        enable_chain_request = config.enable_chain_request,
        "starting agrichain node"
    );

    let context = NodeContext::bootstrap(config.clone()).await?;
    context.clone().run().await?;

    tracing::info!("node running, awaiting shutdown signal");
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, exiting");
    Ok(())
}

/// Mints a coin purchase from the well-known first account to a freshly
/// generated demo account, submits it, and mines one block so the whole
/// submit → mempool → mine → apply path runs once end-to-end.
async fn run_demo() -> node::Result<()> {
    let mut config = NodeConfig::parse_from(["agrichain-node"]);
    config.app_port = 0;
    config.api_port = 0;
    config.enable_mining = false;
    config.is_orderer_node = false;
    config.my_address = "127.0.0.1:0".to_string();

    let context = NodeContext::bootstrap(config).await?;
    let demo_account = KeyPair::generate();

    let purchase = Transaction::new(
        demo_account.public_key.clone(),
        TransactionData::CoinPurchase { amount: 250 },
        chain_core::first_account_keypair(),
    )?;
    let accepted = context.submit_transaction(purchase).await?;
    tracing::info!(accepted, "submitted demo COIN_PURCHASE transaction");

    println!("agrichain-node demo");
    println!("  genesis block:   {:?}", context.latest_block().await);
    println!("  demo account:    {}", demo_account.public_key.to_hex());
    println!("  pending mempool: {} transaction(s)", context.mempool_transactions().await.len());
    Ok(())
}

fn print_version() {
    println!("agrichain-node {}", env!("CARGO_PKG_VERSION"));
    println!("permissioned agricultural supply-chain blockchain node");
    println!("consensus: proof-of-work block production with stake-weighted forger election");
}
