//! Node configuration: CLI flags with environment-variable fallback (§6).

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Options recognized by the node, loaded via `clap` with environment
/// variable fallback — `PRIVATE_KEY` in particular is read from the
/// environment so it never appears as a bare CLI argument visible in a
/// process list.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// P2P listen port.
    #[arg(long, env = "APP_PORT", default_value_t = 7000)]
    pub app_port: u16,

    /// Local request-API listen port.
    #[arg(long, env = "API_PORT", default_value_t = 7001)]
    pub api_port: u16,

    /// Advertised peer address string (host:port) gossiped to other peers.
    #[arg(long, env = "MY_ADDRESS", default_value = "127.0.0.1:7000")]
    pub my_address: String,

    /// This node's signing key (hex-encoded ed25519 secret key bytes).
    /// Public key is derived from it. Never logged.
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Bootstrap peer addresses to dial at startup (comma-separated).
    #[arg(long, env = "PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Outbound connection cap.
    #[arg(long, env = "MAX_PEERS", default_value_t = 10)]
    pub max_peers: usize,

    /// Start in catch-up (chain-request) mode.
    #[arg(long, env = "ENABLE_CHAIN_REQUEST", default_value_t = false)]
    pub enable_chain_request: bool,

    /// Run the mining scheduler.
    #[arg(long, env = "ENABLE_MINING", default_value_t = false)]
    pub enable_mining: bool,

    /// Run the orderer scheduler and self-seed the staker table at genesis.
    #[arg(long, env = "IS_ORDERER_NODE", default_value_t = false)]
    pub is_orderer_node: bool,

    /// Start the local request API.
    #[arg(long, env = "ENABLE_API", default_value_t = true)]
    pub enable_api: bool,

    /// Tracing `EnvFilter` directive, e.g. `info` or `agrichain_node=debug`.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Mining scheduler tick interval, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub mining_interval_ms: u64,

    /// Orderer scheduler tick interval, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub orderer_interval_ms: u64,
}

impl NodeConfig {
    /// Parses configuration from CLI args with env-var fallback/defaults,
    /// the way the rest of the workspace wires its entrypoint.
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}
