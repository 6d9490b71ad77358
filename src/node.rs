//! Node orchestrator (C10): startup, the mining/orderer schedulers, and the
//! local request API that wires C2-C9 together into a running node.

use crate::config::NodeConfig;
use crate::network::{
    Inbound, Message, NetworkEngine, NetworkError, PeerDescriptor, RequestBlockData,
    StartMiningData,
};
use chain_consensus::{
    adjust_difficulty, mine_block, CancelToken, ConsensusError, StakerTable, SyncQueue,
};
use chain_core::{
    apply_block, first_account_keypair, mint_keypair, seed_genesis_state, Account, Block,
    ChainError, ChainStore, Mempool, Transaction, TransactionData,
};
use shared::{Amount, Hash256, KeyPair};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Crypto(#[from] shared::CryptoError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("invalid private key hex: {0}")]
    InvalidPrivateKey(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_millis() as i64
}

/// Whether this node is replaying history from peers or serving live
/// traffic (§4.10 startup modes, §4.9's `SEND_BLOCK` receiver action).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Live,
    CatchUp { current: u64 },
}

/// The shared, per-field-locked context every connection handler, scheduler
/// and local API call reads or mutates (§5's `chainInfo`-equivalent).
pub struct NodeContext {
    config: NodeConfig,
    keypair: KeyPair,
    my_public_key: String,
    store: ChainStore,
    apply_lock: Mutex<()>,
    mempool: Mutex<Mempool>,
    stakers: StakerTable,
    sync_queue: SyncQueue,
    sync_state: RwLock<SyncState>,
    latest_block: RwLock<Block>,
    network: Arc<NetworkEngine>,
    mining_cancel: Mutex<Option<CancelToken>>,
    currently_mining: AtomicBool,
}

impl NodeContext {
    /// Builds the node's identity, store and network engine and performs
    /// the Fresh/Resume startup (§4.10). Does not yet bind a socket or
    /// start the schedulers — call [`NodeContext::run`] for that.
    pub async fn bootstrap(config: NodeConfig) -> Result<Arc<Self>> {
        let keypair = match &config.private_key {
            Some(hex_key) => {
                let bytes = hex::decode(hex_key)
                    .map_err(|e| NodeError::InvalidPrivateKey(e.to_string()))?;
                KeyPair::from_private_bytes(bytes)?
            }
            None => {
                info!("no PRIVATE_KEY configured, generating an ephemeral node identity");
                KeyPair::generate()
            }
        };
        let my_public_key = keypair.public_key.to_hex();

        let store = ChainStore::new();
        let orderer_key = config.is_orderer_node.then(|| my_public_key.clone());

        if store.latest_block_number().is_none() {
            info!("fresh store: writing genesis block and seeding world state");
            seed_genesis_state(&store, orderer_key.as_deref())?;
            let genesis = Block::genesis();
            store.put_block(&genesis)?;
            apply_block(&store, &genesis)?;
        } else {
            info!(
                number = store.latest_block_number(),
                "resuming from an already-populated store"
            );
        }

        let stakers = StakerTable::from_store(&store);
        let latest_block = store
            .latest_block()?
            .expect("genesis is always written during bootstrap");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let my_descriptor =
            PeerDescriptor { public_key: my_public_key.clone(), ws_address: config.my_address.clone() };
        let network = NetworkEngine::new(my_descriptor, config.max_peers, inbound_tx);

        let sync_state = if config.enable_chain_request {
            SyncState::CatchUp { current: latest_block.number + 1 }
        } else {
            SyncState::Live
        };

        let context = Arc::new(Self {
            config,
            keypair,
            my_public_key,
            store,
            apply_lock: Mutex::new(()),
            mempool: Mutex::new(Mempool::default()),
            stakers,
            sync_queue: SyncQueue::default(),
            sync_state: RwLock::new(sync_state),
            latest_block: RwLock::new(latest_block),
            network,
            mining_cancel: Mutex::new(None),
            currently_mining: AtomicBool::new(false),
        });

        tokio::spawn(context.clone().dispatch_inbound(inbound_rx));
        Ok(context)
    }

    /// Binds the P2P listener, dials configured bootstrap peers, and
    /// starts whichever schedulers this node's configuration enables.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listen_addr = format!("0.0.0.0:{}", self.config.app_port);
        self.network.clone().listen(&listen_addr).await?;

        for peer in self.config.peers.clone() {
            if let Err(error) = self.network.connect(&peer).await {
                warn!(%peer, %error, "failed to dial bootstrap peer");
            }
        }

        if self.config.enable_chain_request {
            let context = self.clone();
            tokio::spawn(async move { context.kick_off_catch_up().await });
        }

        if self.config.enable_mining {
            tokio::spawn(self.clone().run_mining_scheduler());
        }

        if self.config.is_orderer_node {
            tokio::spawn(self.clone().run_orderer_scheduler());
        }

        Ok(())
    }

    // ---- local request API (§4.10) -------------------------------------

    /// Applies mempool admission to `tx` and, if accepted, broadcasts
    /// `CREATE_TRANSACTION` to the mesh. The sole function the core
    /// exposes to whatever submits transactions (§6).
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<bool> {
        let accepted = self.mempool.lock().await.admit(tx.clone(), &self.store)?;
        if accepted {
            self.network.broadcast(&Message::CreateTransaction(tx)).await;
        }
        Ok(accepted)
    }

    pub async fn latest_block(&self) -> Block {
        self.latest_block.read().await.clone()
    }

    pub fn block_by_number(&self, number: u64) -> Result<Option<Block>> {
        Ok(self.store.get_block_by_number(number)?)
    }

    pub fn block_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        Ok(self.store.get_block_by_hash(hash)?)
    }

    pub fn account(&self, public_key: &str) -> Result<Option<Account>> {
        Ok(self.store.get_account(public_key)?)
    }

    pub async fn mempool_transactions(&self) -> Vec<Transaction> {
        self.mempool.lock().await.transactions().to_vec()
    }

    // ---- inbound message dispatch (§4.9) --------------------------------

    async fn dispatch_inbound(self: Arc<Self>, mut inbound_rx: mpsc::UnboundedReceiver<Inbound>) {
        while let Some(Inbound { from, message }) = inbound_rx.recv().await {
            let context = self.clone();
            tokio::spawn(async move {
                context.handle_message(from, message).await;
            });
        }
    }

    async fn handle_message(self: Arc<Self>, from: Option<String>, message: Message) {
        match message {
            Message::Handshake(descriptors) => self.on_handshake(descriptors).await,
            Message::CreateTransaction(tx) => self.on_create_transaction(tx).await,
            Message::RequestBlock(data) => self.on_request_block(data).await,
            Message::SendBlock(block) => self.on_send_block(block).await,
            Message::PublishBlock(block) => self.on_publish_block(block).await,
            Message::StartMining(data) => self.on_start_mining(from, data).await,
        }
    }

    async fn on_handshake(&self, descriptors: Vec<PeerDescriptor>) {
        let known = self.network.peer_count().await;
        for descriptor in descriptors {
            if descriptor.public_key == self.my_public_key {
                continue;
            }
            if self.network.peer_count().await >= self.config.max_peers {
                debug!(max_peers = self.config.max_peers, "peer table full, not dialing gossiped peer");
                break;
            }
            if let Err(error) = self.network.connect(&descriptor.ws_address).await {
                debug!(%error, address = %descriptor.ws_address, "failed to dial gossiped peer");
            }
        }
        debug!(known_before = known, "processed handshake gossip");
    }

    async fn on_create_transaction(&self, tx: Transaction) {
        if !matches!(*self.sync_state.read().await, SyncState::Live) {
            debug!("ignoring CREATE_TRANSACTION while catching up");
            return;
        }
        match self.mempool.lock().await.admit(tx.clone(), &self.store) {
            Ok(true) => self.network.broadcast(&Message::CreateTransaction(tx)).await,
            Ok(false) => {}
            Err(error) => debug!(%error, "rejected incoming transaction"),
        }
    }

    async fn on_request_block(&self, data: RequestBlockData) {
        match self.store.get_block_by_number(data.block_number) {
            Ok(Some(block)) => {
                if let Err(error) =
                    self.network.send_to(&data.request_public_key, Message::SendBlock(block)).await
                {
                    debug!(%error, "could not answer REQUEST_BLOCK");
                }
            }
            Ok(None) => debug!(number = data.block_number, "REQUEST_BLOCK for unknown block"),
            Err(error) => error!(%error, "store error answering REQUEST_BLOCK"),
        }
    }

    async fn on_send_block(self: Arc<Self>, block: Block) {
        let current = match *self.sync_state.read().await {
            SyncState::CatchUp { current } => current,
            SyncState::Live => {
                debug!("ignoring SEND_BLOCK while live");
                return;
            }
        };
        if block.number != current {
            debug!(number = block.number, current, "SEND_BLOCK does not match current sync cursor");
            return;
        }
        let context = self.clone();
        self.sync_queue
            .add(block, move |candidate| {
                let context = context.clone();
                async move { context.verify_and_apply(&candidate).await }
            })
            .await;

        if self.sync_queue.is_empty().await {
            self.advance_or_finish_catch_up().await;
        }
    }

    async fn on_publish_block(self: Arc<Self>, block: Block) {
        if !self.network.mark_block_seen(&block.hash).await {
            debug!(hash = %block.hash, "duplicate PUBLISH_BLOCK, ignoring");
            return;
        }

        let live_or_past_genesis = match *self.sync_state.read().await {
            SyncState::Live => true,
            SyncState::CatchUp { current } => block.number < current,
        };
        if !live_or_past_genesis {
            return;
        }

        if let Some(cancel) = self.mining_cancel.lock().await.take() {
            cancel.cancel();
        }

        if self.verify_and_apply(&block).await {
            self.network.broadcast(&Message::PublishBlock(block)).await;
        }
    }

    async fn on_start_mining(self: Arc<Self>, from: Option<String>, data: StartMiningData) {
        debug!(orderer = %data.orderer_address, from = ?from, "received START_MINING");
        if self.mempool.lock().await.is_empty() {
            debug!("mempool empty, ignoring START_MINING");
            return;
        }
        if self.currently_mining.swap(true, Ordering::SeqCst) {
            debug!("already mining, ignoring START_MINING");
            return;
        }
        tokio::spawn(self.clone().run_mining_worker());
    }

    // ---- catch-up (§4.10) -----------------------------------------------

    async fn kick_off_catch_up(self: Arc<Self>) {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let current = match *self.sync_state.read().await {
            SyncState::CatchUp { current } => current,
            SyncState::Live => return,
        };
        self.request_block(current).await;
    }

    async fn request_block(&self, number: u64) {
        let request = Message::RequestBlock(RequestBlockData {
            block_number: number,
            request_public_key: self.my_public_key.clone(),
        });
        self.network.broadcast(&request).await;
    }

    async fn advance_or_finish_catch_up(self: Arc<Self>) {
        let latest = self.latest_block.read().await.number;
        let mut sync_state = self.sync_state.write().await;
        if let SyncState::CatchUp { current } = *sync_state {
            if current <= latest {
                let next = latest + 1;
                *sync_state = SyncState::CatchUp { current: next };
                drop(sync_state);
                self.request_block(next).await;
            }
        }
    }

    // ---- block verification / application --------------------------------

    async fn verify_and_apply(&self, block: &Block) -> bool {
        let _guard = self.apply_lock.lock().await;

        let previous = match self.store.get_block_by_number(block.number.saturating_sub(1)) {
            Ok(Some(previous)) => previous,
            _ => {
                debug!(number = block.number, "no local predecessor, rejecting block");
                return false;
            }
        };

        if let Err(error) = block.validate_against(&previous, now_ms()) {
            debug!(%error, number = block.number, "block failed structural validation");
            return false;
        }

        for tx in &block.data {
            if tx.is_coinbase() {
                continue;
            }
            if let Err(error) = tx.is_valid() {
                debug!(%error, "block contains an invalid transaction");
                return false;
            }
        }

        if let Err(error) = self.store.put_block(block) {
            error!(%error, "failed to persist block");
            return false;
        }
        if let Err(error) = apply_block(&self.store, block) {
            warn!(%error, number = block.number, "block failed world-state application");
            return false;
        }

        for tx in &block.data {
            if let TransactionData::Stake { amount } = &tx.data {
                self.stakers.update(&tx.to, *amount);
            }
        }

        {
            let mut mempool = self.mempool.lock().await;
            mempool.evict_committed(block);
            if let Err(error) = mempool.garbage_collect(&self.store) {
                warn!(%error, "garbage collection failed after block commit");
            }
        }

        *self.latest_block.write().await = block.clone();
        info!(number = block.number, hash = %block.hash, "block applied");
        true
    }

    // ---- mining scheduler (§4.10) -----------------------------------------

    async fn run_mining_scheduler(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_millis(self.config.mining_interval_ms));
        let mut last_seen_tip = self.latest_block.read().await.number;
        loop {
            ticker.tick().await;
            if !matches!(*self.sync_state.read().await, SyncState::Live) {
                continue;
            }
            let tip = self.latest_block.read().await.number;
            let advanced = tip != last_seen_tip;
            last_seen_tip = tip;
            if advanced {
                continue;
            }
            if self.mempool.lock().await.is_empty() {
                continue;
            }
            if self.currently_mining.swap(true, Ordering::SeqCst) {
                continue;
            }
            tokio::spawn(self.clone().run_mining_worker());
        }
    }

    /// Runs one mining attempt on its own task so a panic inside
    /// `mine_and_publish` cannot permanently wedge `currently_mining`: the
    /// spawned task's join result is observed here, a crash is logged as a
    /// `WorkerFailure`, and the flag is reset either way so the next
    /// scheduler tick (or `START_MINING`) spawns a fresh worker (§7).
    async fn run_mining_worker(self: Arc<Self>) {
        let context = self.clone();
        let handle = tokio::spawn(async move { context.mine_and_publish().await });
        if let Err(join_error) = handle.await {
            let error = ConsensusError::WorkerFailure(join_error.to_string());
            error!(%error, "mining worker crashed, will respawn on the next opportunity");
        }
        self.currently_mining.store(false, Ordering::SeqCst);
    }

    /// Builds the coinbase-prepended candidate, mines it, and — on success —
    /// applies it locally before broadcasting (§4.10 reward construction).
    async fn mine_and_publish(self: Arc<Self>) {
        let last_block = self.latest_block.read().await.clone();

        let reward = match Transaction::coinbase(&self.keypair.public_key) {
            Ok(tx) => tx,
            Err(error) => {
                error!(%error, "failed to build coinbase transaction");
                return;
            }
        };

        let pooled = self.mempool.lock().await.transactions().to_vec();
        let admissible = self.shadow_state_filter(&pooled).await;

        let mut txs = Vec::with_capacity(admissible.len() + 1);
        txs.push(reward);
        txs.extend(admissible);

        let cancel = CancelToken::new();
        *self.mining_cancel.lock().await = Some(cancel.clone());

        let mined = mine_block(&last_block, txs, &cancel).await;
        *self.mining_cancel.lock().await = None;

        if let Some(block) = mined {
            if self.network.mark_block_seen(&block.hash).await && self.verify_and_apply(&block).await
            {
                self.network.broadcast(&Message::PublishBlock(block)).await;
            }
        }
    }

    /// Pre-applies tentative debits against a shadow balance map so mining
    /// never includes a transaction that would overdraw once committed
    /// (§4.10's tentative-debit shadow state).
    async fn shadow_state_filter(&self, pooled: &[Transaction]) -> Vec<Transaction> {
        let mut shadow: HashMap<String, Amount> = HashMap::new();
        let mut admissible = Vec::with_capacity(pooled.len());
        for tx in pooled {
            let Some((from, amount)) = tx.debits_from() else {
                admissible.push(tx.clone());
                continue;
            };
            let balance = match shadow.get(from) {
                Some(balance) => *balance,
                None => match self.store.get_account(from) {
                    Ok(Some(account)) => account.balance,
                    _ => 0,
                },
            };
            if balance < amount {
                debug!(%from, amount, "skipping tentatively-unaffordable transaction");
                continue;
            }
            shadow.insert(from.to_string(), balance - amount);
            admissible.push(tx.clone());
        }
        admissible
    }

    // ---- orderer scheduler (§4.10) -----------------------------------------

    async fn run_orderer_scheduler(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_millis(self.config.orderer_interval_ms));
        loop {
            ticker.tick().await;
            if self.mempool.lock().await.is_empty() {
                continue;
            }
            let latest_hash = self.latest_block.read().await.hash.clone();
            let Ok(seed) = Hash256::try_from(latest_hash.as_str()) else {
                continue;
            };
            let Some(forger) = self.stakers.forger(&seed) else {
                continue;
            };
            if forger == self.my_public_key {
                if !self.currently_mining.swap(true, Ordering::SeqCst) {
                    tokio::spawn(self.clone().run_mining_worker());
                }
                continue;
            }
            let data = StartMiningData { orderer_address: self.config.my_address.clone() };
            if let Err(error) = self.network.send_to(&forger, Message::StartMining(data)).await {
                debug!(%forger, %error, "could not reach elected forger");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(port: u16) -> NodeConfig {
        NodeConfig {
            app_port: port,
            api_port: port + 1,
            my_address: format!("127.0.0.1:{port}"),
            private_key: None,
            peers: Vec::new(),
            max_peers: 4,
            enable_chain_request: false,
            enable_mining: false,
            is_orderer_node: false,
            enable_api: true,
            log_level: "info".into(),
            mining_interval_ms: 50,
            orderer_interval_ms: 50,
        }
    }

    #[tokio::test]
    async fn bootstrap_seeds_genesis_and_first_account() {
        let context = NodeContext::bootstrap(config(19101)).await.unwrap();
        assert_eq!(context.latest_block().await.number, 1);
        let first = first_account_keypair().public_key.to_hex();
        assert_eq!(
            context.account(&first).unwrap().unwrap().balance,
            chain_core::INITIAL_SUPPLY
        );
    }

    #[tokio::test]
    async fn submit_transaction_with_a_bad_signature_is_rejected() {
        let context = NodeContext::bootstrap(config(19102)).await.unwrap();
        let alice = KeyPair::generate();
        let mut tx = Transaction::new(
            alice.public_key.clone(),
            TransactionData::CoinPurchase { amount: 10 },
            first_account_keypair(),
        )
        .unwrap();
        tx.signature = hex::encode([0u8; 64]);
        let error = context.submit_transaction(tx).await.unwrap_err();
        assert!(matches!(error, NodeError::Chain(_)));
    }

    #[tokio::test]
    async fn submit_transaction_admits_and_broadcasts_a_valid_transfer() {
        let context = NodeContext::bootstrap(config(19103)).await.unwrap();
        let alice = KeyPair::generate();
        let tx = Transaction::new(
            alice.public_key.clone(),
            TransactionData::CoinPurchase { amount: 10 },
            first_account_keypair(),
        )
        .unwrap();
        assert!(context.submit_transaction(tx).await.unwrap());
        assert_eq!(context.mempool_transactions().await.len(), 1);
    }

    #[tokio::test]
    async fn run_mining_worker_resets_currently_mining_once_the_attempt_finishes() {
        let context = NodeContext::bootstrap(config(19105)).await.unwrap();
        context.currently_mining.store(true, Ordering::SeqCst);
        context.clone().run_mining_worker().await;
        assert!(!context.currently_mining.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn orderer_node_self_seeds_genesis_stake() {
        let mut cfg = config(19104);
        cfg.is_orderer_node = true;
        let context = NodeContext::bootstrap(cfg).await.unwrap();
        assert_eq!(context.stakers.stake_of(&context.my_public_key), 1);
    }
}
