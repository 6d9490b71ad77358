//! P2P protocol engine (C9): a direct, persistent, bidirectional TCP stream
//! per peer, framed as newline-delimited JSON and driven by a `tokio` event
//! loop. Peers are keyed by public key rather than address so a reconnect
//! deduplicates against an already-known peer.

use chain_core::{Block, Transaction};
use serde::{Deserialize, Serialize};
use shared::{BlockNumber, PublicKeyHex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("peer table is full ({max_peers} connections)")]
    PeerTableFull { max_peers: usize },
    #[error("peer {0} is not connected")]
    PeerNotConnected(String),
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("listen on {address} failed: {source}")]
    Listen {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// A peer's advertised identity, gossiped in `HANDSHAKE` payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerDescriptor {
    pub public_key: PublicKeyHex,
    pub ws_address: String,
}

/// `REQUEST_BLOCK` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestBlockData {
    pub block_number: BlockNumber,
    pub request_public_key: PublicKeyHex,
}

/// `START_MINING` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartMiningData {
    pub orderer_address: String,
}

/// Wire messages, one `{ "type", "data" }` object per line (§4.9, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    #[serde(rename = "HANDSHAKE")]
    Handshake(Vec<PeerDescriptor>),
    #[serde(rename = "CREATE_TRANSACTION")]
    CreateTransaction(Transaction),
    #[serde(rename = "REQUEST_BLOCK")]
    RequestBlock(RequestBlockData),
    #[serde(rename = "SEND_BLOCK")]
    SendBlock(Block),
    #[serde(rename = "PUBLISH_BLOCK")]
    PublishBlock(Block),
    #[serde(rename = "START_MINING")]
    StartMining(StartMiningData),
}

/// A message received from a peer, handed to the orchestrator for
/// dispatch. `from` is `None` until the connection's handshake completes.
#[derive(Debug)]
pub struct Inbound {
    pub from: Option<PublicKeyHex>,
    pub message: Message,
}

struct PeerHandle {
    ws_address: String,
    outbound: mpsc::UnboundedSender<Message>,
}

/// The node's view of its P2P mesh: the active peer table, the connection
/// cap, and the broadcast-dedup set. One instance is shared (via `Arc`)
/// between the listener, every connection task, and the schedulers that
/// originate unicasts (`REQUEST_BLOCK`, `START_MINING`).
pub struct NetworkEngine {
    my_descriptor: PeerDescriptor,
    max_peers: usize,
    peers: RwLock<HashMap<PublicKeyHex, PeerHandle>>,
    seen_blocks: RwLock<HashSet<String>>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl NetworkEngine {
    #[must_use]
    pub fn new(
        my_descriptor: PeerDescriptor,
        max_peers: usize,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) -> Arc<Self> {
        Arc::new(Self {
            my_descriptor,
            max_peers,
            peers: RwLock::new(HashMap::new()),
            seen_blocks: RwLock::new(HashSet::new()),
            inbound,
        })
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// The sender's own descriptor always comes first, so a `HANDSHAKE`
    /// recipient can identify the socket's peer unambiguously; anything
    /// after index 0 is gossip about other peers for the recipient to dial.
    pub async fn known_descriptors(&self) -> Vec<PeerDescriptor> {
        let mut descriptors = vec![self.my_descriptor.clone()];
        descriptors.extend(self.peers.read().await.iter().map(|(public_key, handle)| {
            PeerDescriptor { public_key: public_key.clone(), ws_address: handle.ws_address.clone() }
        }));
        descriptors
    }

    /// Marks a block hash as seen. Returns `true` the first time a given
    /// hash is observed so the caller only applies/rebroadcasts novel
    /// blocks, guarding against rebroadcast storms.
    pub async fn mark_block_seen(&self, hash: &str) -> bool {
        self.seen_blocks.write().await.insert(hash.to_string())
    }

    pub async fn broadcast(&self, message: &Message) {
        let peers = self.peers.read().await;
        for (public_key, handle) in peers.iter() {
            if handle.outbound.send(message.clone()).is_err() {
                debug!(%public_key, "dropped broadcast to disconnected peer");
            }
        }
    }

    pub async fn send_to(&self, public_key: &str, message: Message) -> Result<(), NetworkError> {
        let peers = self.peers.read().await;
        let handle = peers
            .get(public_key)
            .ok_or_else(|| NetworkError::PeerNotConnected(public_key.to_string()))?;
        handle
            .outbound
            .send(message)
            .map_err(|_| NetworkError::PeerNotConnected(public_key.to_string()))
    }

    async fn register_peer(
        &self,
        descriptor: PeerDescriptor,
    ) -> Result<mpsc::UnboundedReceiver<Message>, NetworkError> {
        if descriptor.public_key == self.my_descriptor.public_key {
            return Err(NetworkError::PeerTableFull { max_peers: self.max_peers });
        }
        let mut peers = self.peers.write().await;
        if peers.contains_key(&descriptor.public_key) {
            // Reconnect: replace the stale handle, keyed by public key so
            // the old socket's writer task quietly drops its sender.
        } else if peers.len() >= self.max_peers {
            return Err(NetworkError::PeerTableFull { max_peers: self.max_peers });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        peers.insert(
            descriptor.public_key.clone(),
            PeerHandle { ws_address: descriptor.ws_address, outbound: tx },
        );
        Ok(rx)
    }

    async fn remove_peer(&self, public_key: &str) {
        self.peers.write().await.remove(public_key);
        info!(%public_key, "peer disconnected");
    }

    /// Binds `listen_addr` and accepts inbound connections until the
    /// listener errors.
    pub async fn listen(self: Arc<Self>, listen_addr: &str) -> Result<(), NetworkError> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|source| NetworkError::Listen { address: listen_addr.to_string(), source })?;
        info!(%listen_addr, "p2p engine listening");
        let engine = self;
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!(%addr, "inbound connection accepted");
                        let engine = engine.clone();
                        tokio::spawn(async move {
                            engine.run_inbound_connection(stream).await;
                        });
                    }
                    Err(error) => {
                        warn!(%error, "accept failed");
                    }
                }
            }
        });
        Ok(())
    }

    /// Dials `address`, performs the handshake, and spawns the connection's
    /// read/write tasks. Returns once the handshake completes.
    pub async fn connect(self: &Arc<Self>, address: &str) -> Result<(), NetworkError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| NetworkError::Connect { address: address.to_string(), source })?;
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_outbound_connection(stream).await;
        });
        Ok(())
    }

    async fn run_outbound_connection(self: Arc<Self>, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half).lines();
        let mut writer = write_half;

        if write_line(&mut writer, &Message::Handshake(vec![self.my_descriptor.clone()]))
            .await
            .is_err()
        {
            warn!("failed to send handshake on outbound connection");
            return;
        }

        let first_line = match reader.next_line().await {
            Ok(Some(line)) => line,
            _ => {
                warn!("peer closed connection before handshake reply");
                return;
            }
        };
        let Some((peer, gossip)) = parse_handshake_peer(&first_line) else {
            warn!("malformed handshake reply, dropping connection");
            return;
        };
        self.forward_gossip(&peer, gossip);

        self.run_connection(peer, reader, writer).await;
    }

    async fn run_inbound_connection(self: Arc<Self>, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half).lines();
        let mut writer = write_half;

        let first_line = match reader.next_line().await {
            Ok(Some(line)) => line,
            _ => return,
        };
        let Some((peer, gossip)) = parse_handshake_peer(&first_line) else {
            debug!("malformed handshake on inbound connection, dropping");
            return;
        };
        self.forward_gossip(&peer, gossip);

        let known = self.known_descriptors().await;
        if write_line(&mut writer, &Message::Handshake(known)).await.is_err() {
            return;
        }

        self.run_connection(peer, reader, writer).await;
    }

    /// Hands a handshake's gossip descriptors (everything after the
    /// sender's own, index 0) to the orchestrator as an inbound message so
    /// they are dialed through the same policy (`MAX_PEERS`, self-exclusion)
    /// as every other protocol action, rather than connecting from inside
    /// the transport layer.
    fn forward_gossip(&self, from: &PeerDescriptor, gossip: Vec<PeerDescriptor>) {
        if gossip.is_empty() {
            return;
        }
        let _ = self
            .inbound
            .send(Inbound { from: Some(from.public_key.clone()), message: Message::Handshake(gossip) });
    }

    async fn run_connection(
        self: Arc<Self>,
        peer: PeerDescriptor,
        mut reader: tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
        mut writer: tokio::net::tcp::OwnedWriteHalf,
    ) {
        let public_key = peer.public_key.clone();
        let mut outbound_rx = match self.register_peer(peer).await {
            Ok(rx) => rx,
            Err(error) => {
                warn!(%public_key, %error, "rejecting peer connection");
                return;
            }
        };
        info!(%public_key, "peer connected");

        loop {
            tokio::select! {
                line = reader.next_line() => {
                    match line {
                        Ok(Some(line)) => self.dispatch_line(&public_key, &line).await,
                        _ => break,
                    }
                }
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(message) => {
                            if write_line(&mut writer, &message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        self.remove_peer(&public_key).await;
    }

    async fn dispatch_line(&self, from: &str, line: &str) {
        match serde_json::from_str::<Message>(line) {
            Ok(message) => {
                debug!(%from, ?message, "dispatching inbound message");
                let _ = self.inbound.send(Inbound { from: Some(from.to_string()), message });
            }
            Err(error) => {
                debug!(%from, %error, "dropping malformed message");
            }
        }
    }
}

/// Splits a `HANDSHAKE` line into the sender's own descriptor (always
/// index 0) and the gossip descriptors that follow it.
fn parse_handshake_peer(line: &str) -> Option<(PeerDescriptor, Vec<PeerDescriptor>)> {
    match serde_json::from_str::<Message>(line) {
        Ok(Message::Handshake(mut descriptors)) if !descriptors.is_empty() => {
            let peer = descriptors.remove(0);
            Some((peer, descriptors))
        }
        _ => None,
    }
}

async fn write_line(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    message: &Message,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(message).expect("message always serializes");
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(public_key: &str) -> PeerDescriptor {
        PeerDescriptor { public_key: public_key.to_string(), ws_address: "127.0.0.1:9".to_string() }
    }

    #[test]
    fn message_round_trips_through_json_with_tag_and_content() {
        let message = Message::RequestBlock(RequestBlockData {
            block_number: 7,
            request_public_key: "abc".to_string(),
        });
        let encoded = serde_json::to_string(&message).unwrap();
        assert!(encoded.contains("\"type\":\"REQUEST_BLOCK\""));
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        match decoded {
            Message::RequestBlock(data) => assert_eq!(data.block_number, 7),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_fails_to_parse_and_is_dropped_by_callers() {
        let raw = r#"{"type":"UNKNOWN","data":{}}"#;
        assert!(serde_json::from_str::<Message>(raw).is_err());
    }

    #[tokio::test]
    async fn peer_table_rejects_connections_past_max_peers() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = NetworkEngine::new(descriptor("self"), 1, tx);
        assert!(engine.register_peer(descriptor("a")).await.is_ok());
        assert!(matches!(
            engine.register_peer(descriptor("b")).await,
            Err(NetworkError::PeerTableFull { .. })
        ));
        assert_eq!(engine.peer_count().await, 1);
    }

    #[tokio::test]
    async fn reconnect_from_a_known_public_key_replaces_rather_than_doubles() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = NetworkEngine::new(descriptor("self"), 2, tx);
        engine.register_peer(descriptor("a")).await.unwrap();
        engine.register_peer(descriptor("a")).await.unwrap();
        assert_eq!(engine.peer_count().await, 1);
    }

    #[tokio::test]
    async fn mark_block_seen_is_true_only_on_first_observation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = NetworkEngine::new(descriptor("self"), 4, tx);
        assert!(engine.mark_block_seen("hash-one").await);
        assert!(!engine.mark_block_seen("hash-one").await);
    }

    #[tokio::test]
    async fn self_handshake_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = NetworkEngine::new(descriptor("self"), 4, tx);
        assert!(engine.register_peer(descriptor("self")).await.is_err());
    }

    #[tokio::test]
    async fn two_in_process_nodes_complete_a_real_tcp_handshake() {
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let engine_a = NetworkEngine::new(
            PeerDescriptor { public_key: "node-a".into(), ws_address: "127.0.0.1:0".into() },
            4,
            tx_a,
        );
        let engine_b = NetworkEngine::new(
            PeerDescriptor { public_key: "node-b".into(), ws_address: "127.0.0.1:18181".into() },
            4,
            tx_b,
        );

        engine_b.clone().listen("127.0.0.1:18181").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        engine_a.connect("127.0.0.1:18181").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(engine_a.peer_count().await, 1);
        assert_eq!(engine_b.peer_count().await, 1);
    }

    #[tokio::test]
    async fn known_descriptors_puts_self_first_ahead_of_connected_peers() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let engine = NetworkEngine::new(descriptor("self"), 4, tx);
        engine.register_peer(descriptor("a")).await.unwrap();
        let known = engine.known_descriptors().await;
        assert_eq!(known[0].public_key, "self");
        assert_eq!(known[1].public_key, "a");
    }

    #[tokio::test]
    async fn accepting_peers_gossip_is_forwarded_to_the_dialer_as_a_handshake_message() {
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let engine_a = NetworkEngine::new(descriptor("node-a"), 8, tx_a);
        let engine_b = NetworkEngine::new(descriptor("node-b"), 8, tx_b);

        // node-b is already connected to a third peer, node-c, before
        // node-a dials in; node-a should learn about node-c via gossip
        // rather than node-c's address ever reaching node-a directly.
        engine_b.register_peer(descriptor("node-c")).await.unwrap();

        engine_b.clone().listen("127.0.0.1:18182").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        engine_a.connect("127.0.0.1:18182").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(engine_a.peer_count().await, 1);

        let gossip = rx_a.recv().await.expect("gossip forwarded to node-a's inbound channel");
        assert_eq!(gossip.from.as_deref(), Some("node-b"));
        match gossip.message {
            Message::Handshake(descriptors) => {
                assert_eq!(descriptors.len(), 1);
                assert_eq!(descriptors[0].public_key, "node-c");
            }
            other => panic!("unexpected gossip message: {other:?}"),
        }
    }
}
