//! The node: binds identity, discovery, transfer dispatch, PIN rendezvous
//! and preview generation to a running listener and a LAN gossip socket.
//!
//! `Node` is the one type an application embeds. Everything else in this
//! crate is a building block `Node` wires together: a [`Channel`] for
//! authenticated peer connections, a [`DiscoveryService`] for membership and
//! search, a [`TransferManager`] for chunk dispatch, a [`PinRegistry`] for
//! PIN rendezvous and a [`PreviewService`] for signed previews.

use crate::node::channel::{Channel, ChunkRequest, Command};
use crate::node::config::NodeConfig;
use crate::node::discovery::{DiscoveryService, Outbound};
use crate::node::error::{NodeError, Result};
use crate::node::identity::Identity;
use crate::node::pin::{PinAnnouncement, PinRegistry, PinSession};
use crate::node::preview::{PreviewContent, PreviewContentKind, PreviewManifest, PreviewPolicy, PreviewRequest, PreviewResponse, PreviewService};
use crate::node::progress::TransferProgress;
use crate::node::transfer::TransferHandle;
use crate::node::transfer_manager::TransferManager;
use dashmap::DashMap;
use parcel_crypto::tls::{PinningServerVerifier, TrustOnFirstUse};
use parcel_discovery::{DiscoveryEvent, MessageKind, PeerId, PeerIdentity, SearchResponse, SharedFile, SignedMessage};
use parcel_relay::{RelayClient, RelayFileRef};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::Mutex as AsyncMutex;
use tokio_rustls::TlsAcceptor;
use uuid::Uuid;

/// Port LAN discovery gossip (join/heartbeat/search/pin) is broadcast and
/// received on. Distinct from `listen_port`, which carries authenticated
/// TLS connections for transfer and preview traffic.
const DISCOVERY_PORT: u16 = 8422;
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// One running peer: owns its listener, gossip socket and all in-memory
/// state, and is always used behind an `Arc` so its background tasks can
/// outlive any single call into it.
pub struct Node {
    identity: Arc<Identity>,
    config: NodeConfig,
    discovery: Arc<DiscoveryService>,
    transfers: Arc<TransferManager>,
    pins: PinRegistry,
    preview: Arc<PreviewService>,
    relay: Option<RelayClient>,
    trust: Arc<TrustOnFirstUse>,
    tls_acceptor: TlsAcceptor,
    listen_addr: SocketAddr,
    shares: DashMap<[u8; 32], SharedFile>,
    outbound_rx: AsyncMutex<Option<tokio::sync::mpsc::UnboundedReceiver<Outbound>>>,
    search_results_rx: AsyncMutex<Option<tokio::sync::mpsc::UnboundedReceiver<SearchResponse>>>,
    events_rx: AsyncMutex<Option<tokio::sync::mpsc::UnboundedReceiver<DiscoveryEvent>>>,
}

impl Node {
    /// Build a node bound to `config`, generating a fresh listener and LAN
    /// gossip socket. Does not start any background task; call
    /// [`Node::run`] for that.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or the TLS server
    /// configuration cannot be built from the node's self-signed identity.
    pub async fn new(config: NodeConfig, identity: Arc<Identity>) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(("0.0.0.0", config.listen_port))
            .await
            .map_err(NodeError::Io)?;
        let listen_port = listener.local_addr().map_err(NodeError::Io)?.port();
        let advertise_host = detect_local_ip();
        let listen_addr = SocketAddr::new(advertise_host, listen_port);

        let (discovery, events_rx, outbound_rx, search_results_rx) =
            DiscoveryService::new(identity.clone(), advertise_host, listen_port);

        let relay = config.relay.server_url.as_ref().map(|url| RelayClient::new(url.clone()));
        let transfers = Arc::new(TransferManager::new(identity.clone(), config.transfer.clone(), relay.clone()));
        let preview = Arc::new(PreviewService::new(identity.clone(), config.preview.clone(), PreviewPolicy::default()));

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let server_config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| NodeError::Tls(e.to_string().into()))?
            .with_no_client_auth()
            .with_single_cert(identity.tls().cert_chain(), identity.tls().private_key().into())
            .map_err(|e| NodeError::Tls(e.to_string().into()))?;
        let tls_acceptor = TlsAcceptor::from(Arc::new(server_config));

        let node = Arc::new(Self {
            identity,
            config,
            discovery: Arc::new(discovery),
            transfers,
            pins: PinRegistry::new(),
            preview,
            relay,
            trust: TrustOnFirstUse::new(),
            tls_acceptor,
            listen_addr,
            shares: DashMap::new(),
            outbound_rx: AsyncMutex::new(Some(outbound_rx)),
            search_results_rx: AsyncMutex::new(Some(search_results_rx)),
            events_rx: AsyncMutex::new(Some(events_rx)),
        });
        node.spawn_accept_loop(listener);
        Ok(node)
    }

    /// This node's stable identity.
    #[must_use]
    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    /// Address other peers should dial to reach this node directly.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Discovery/search subsystem, for inspecting known peers.
    #[must_use]
    pub fn discovery(&self) -> &Arc<DiscoveryService> {
        &self.discovery
    }

    /// The configured relay client, if `config.relay.server_url` was set.
    pub fn relay(&self) -> Option<&RelayClient> {
        self.relay.as_ref()
    }

    /// Start the node's background tasks: LAN gossip send/receive,
    /// heartbeat emission and peer/PIN sweeping. Announces this node's
    /// presence once started.
    ///
    /// # Errors
    ///
    /// Returns an error if the LAN gossip socket cannot be bound or the
    /// join announcement cannot be signed.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let gossip_socket = UdpSocket::bind(("0.0.0.0", DISCOVERY_PORT)).await.map_err(NodeError::Io)?;
        gossip_socket.set_broadcast(true).map_err(NodeError::Io)?;
        let gossip_socket = Arc::new(gossip_socket);

        self.spawn_outbound_dispatch(gossip_socket.clone()).await;
        self.spawn_inbound_gossip(gossip_socket);
        self.spawn_heartbeat_loop();
        self.spawn_events_loop().await;

        self.discovery.announce_join()?;
        Ok(())
    }

    async fn spawn_events_loop(self: &Arc<Self>) {
        let Some(mut events_rx) = self.events_rx.lock().await.take() else {
            return;
        };
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    DiscoveryEvent::PeerDiscovered(peer) => {
                        tracing::info!(peer_id = %peer.peer_id, "peer discovered");
                    }
                    DiscoveryEvent::PeerLost(peer_id) => {
                        tracing::info!(%peer_id, "peer lost");
                    }
                }
            }
        });
    }

    fn spawn_accept_loop(self: &Arc<Self>, listener: TcpListener) {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let (tcp, peer_addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let node = Arc::clone(&node);
                tokio::spawn(async move {
                    if let Err(err) = node.serve_connection(tcp).await {
                        tracing::debug!(%peer_addr, error = %err, "inbound connection ended");
                    }
                });
            }
        });
    }

    async fn serve_connection(&self, tcp: tokio::net::TcpStream) -> Result<()> {
        let mut channel = Channel::accept(tcp, &self.tls_acceptor).await?;
        loop {
            let (command, payload) = channel.recv().await?;
            match command {
                Command::Discovery => {
                    let envelope: SignedMessage = bincode::deserialize(&payload)?;
                    self.handle_gossip_envelope(&envelope)?;
                }
                Command::ChunkRequest => {
                    let request: ChunkRequest = bincode::deserialize(&payload)?;
                    let response = self.answer_chunk_request(&request)?;
                    channel.send(Command::ChunkResponse, &response).await?;
                }
                Command::PreviewRequest => {
                    let request: PreviewRequest = bincode::deserialize(&payload)?;
                    let response = self.answer_preview_request(&request);
                    channel.send(Command::PreviewResponse, &response).await?;
                }
                Command::ChunkResponse | Command::PreviewResponse | Command::Error => {
                    return Err(NodeError::connection("unexpected reply command on inbound connection"));
                }
            }
        }
    }

    fn answer_chunk_request(&self, request: &ChunkRequest) -> Result<crate::node::channel::ChunkResponse> {
        let file = self
            .shares
            .get(&request.file_hash)
            .map(|entry| entry.clone())
            .ok_or(NodeError::HashMismatch)?;
        let requester = self
            .discovery
            .peer(&request.requester)
            .ok_or_else(|| NodeError::connection("chunk request from unknown peer"))?;
        let compress = parcel_files::codec::is_compressible_name(&file.logical_name);
        self.transfers
            .serve_chunk(request, &file.local_path, &requester, self.config.transfer.direct_chunk_size, compress)
    }

    /// Answer a `GetManifest`/`GetContent` request, mapping lookup and
    /// permission failures onto [`PreviewResponse::NotFound`] /
    /// [`PreviewResponse::Forbidden`] rather than a connection-closing error,
    /// since denial is an expected, common outcome, not a protocol fault.
    fn answer_preview_request(&self, request: &PreviewRequest) -> PreviewResponse {
        match request {
            PreviewRequest::GetManifest { file_hash, mime_type, requester } => {
                let Some(file) = self.shares.get(file_hash).map(|entry| entry.clone()) else {
                    return PreviewResponse::NotFound;
                };
                match self.preview.build_manifest(&file, &file.local_path, mime_type, requester) {
                    Ok(manifest) => PreviewResponse::Manifest(manifest),
                    Err(NodeError::Preview(_)) => PreviewResponse::Forbidden,
                    Err(_) => PreviewResponse::NotFound,
                }
            }
            PreviewRequest::GetContent { file_hash, kind, mime_type, requester } => {
                let Some(file) = self.shares.get(file_hash).map(|entry| entry.clone()) else {
                    return PreviewResponse::NotFound;
                };
                match self.preview.build_content(&file, &file.local_path, mime_type, *kind, requester) {
                    Ok(content) => PreviewResponse::Content(content),
                    Err(NodeError::Preview(_)) => PreviewResponse::Forbidden,
                    Err(_) => PreviewResponse::NotFound,
                }
            }
        }
    }

    /// Process one gossip envelope received either over LAN broadcast or
    /// over a direct connection's `Discovery` command.
    fn handle_gossip_envelope(&self, envelope: &SignedMessage) -> Result<()> {
        if envelope.kind == MessageKind::PinAnnounce {
            let announcement: PinAnnouncement = bincode::deserialize(&envelope.payload)?;
            envelope.verify(&announcement.owner.verifying_key()?)?;
            self.pins.observe(announcement);
            return Ok(());
        }
        self.discovery.handle_incoming(envelope)
    }

    async fn spawn_outbound_dispatch(self: &Arc<Self>, socket: Arc<UdpSocket>) {
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .await
            .take()
            .expect("spawn_outbound_dispatch called more than once");
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let broadcast_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DISCOVERY_PORT);
            while let Some(outbound) = outbound_rx.recv().await {
                let (envelope, target) = match outbound {
                    Outbound::Broadcast(envelope) => (envelope, broadcast_addr),
                    Outbound::Direct(peer_id, envelope) => {
                        let Some(peer) = node.discovery.peer(&peer_id) else {
                            tracing::debug!(%peer_id, "dropping direct gossip message to unknown peer");
                            continue;
                        };
                        (envelope, SocketAddr::new(peer.host, DISCOVERY_PORT))
                    }
                };
                let Ok(bytes) = bincode::serialize(&envelope) else { continue };
                if let Err(err) = socket.send_to(&bytes, target).await {
                    tracing::debug!(error = %err, %target, "gossip send failed");
                }
            }
        });
    }

    fn spawn_inbound_gossip(self: &Arc<Self>, socket: Arc<UdpSocket>) {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let (len, _from) = match socket.recv_from(&mut buf).await {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::debug!(error = %err, "gossip recv failed");
                        continue;
                    }
                };
                let Ok(envelope) = bincode::deserialize::<SignedMessage>(&buf[..len]) else { continue };
                if let Err(err) = node.handle_gossip_envelope(&envelope) {
                    tracing::debug!(error = %err, "rejected gossip envelope");
                }
            }
        });
    }

    fn spawn_heartbeat_loop(self: &Arc<Self>) {
        let node = Arc::clone(self);
        let period = node.config.discovery.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = node.discovery.heartbeat_interval(period);
            loop {
                ticker.tick().await;
                if let Err(err) = node.discovery.emit_heartbeat() {
                    tracing::warn!(error = %err, "heartbeat emission failed");
                }
                node.discovery.sweep();
                node.pins.sweep();
            }
        });
    }

    /// Share `files` under `directory`, making them visible to flooded
    /// search and resolvable by hash for chunk/preview requests.
    pub fn share_directory(&self, directory: PathBuf, files: Vec<SharedFile>) {
        for file in &files {
            self.shares.insert(file.file_hash, file.clone());
        }
        self.discovery.index().set_directory(directory, files);
    }

    /// Stop sharing `directory`. Files already in flight are unaffected.
    pub fn unshare_directory(&self, directory: &PathBuf) {
        self.discovery.index().remove_directory(directory);
    }

    /// Run a flooded search for `query`, collecting responses until
    /// `discovery.search_timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns an error if the search request cannot be signed.
    pub async fn search(&self, query: String) -> Result<Vec<SharedFile>> {
        let request = self.discovery.start_search(query, self.config.discovery.search_ttl)?;
        let mut results_rx = self
            .search_results_rx
            .lock()
            .await
            .take()
            .expect("search called concurrently or before run()");

        let mut files = Vec::new();
        let deadline = tokio::time::Instant::now() + self.config.discovery.search_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, results_rx.recv()).await {
                Ok(Some(response)) if response.request_id == request.request_id => {
                    files.extend(response.files);
                }
                Ok(Some(_stale)) => continue,
                Ok(None) | Err(_) => break,
            }
        }

        *self.search_results_rx.lock().await = Some(results_rx);
        Ok(files)
    }

    /// Start downloading `file` from `peer`, racing direct delivery against
    /// relay fallback.
    #[must_use]
    pub fn download(self: &Arc<Self>, peer: PeerIdentity, file: SharedFile, save_directory: PathBuf, relay_ref: Option<RelayFileRef>) -> TransferHandle {
        let verifier = PinningServerVerifier::new(self.trust.clone(), peer.public_key.to_vec());
        self.transfers.download_with_fallback(peer, file, save_directory, relay_ref, verifier)
    }

    /// Progress snapshot of an active or recently finished transfer.
    pub async fn transfer_progress(&self, transfer_id: Uuid) -> Option<TransferProgress> {
        self.transfers.progress(transfer_id).await
    }

    /// Upload `file` to the relay so `peer` can fetch it without a direct
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NoPathAvailable`] if no relay is configured, or
    /// the underlying relay/crypto error otherwise.
    pub async fn upload_via_relay(&self, file: &SharedFile, peer: &PeerIdentity) -> Result<RelayFileRef> {
        self.transfers.upload_via_relay(file, peer, self.config.relay.default_expiry).await
    }

    /// Offer `file` under a freshly generated PIN, broadcasting the
    /// announcement over LAN gossip and registering a relay fallback if a
    /// relay is configured.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NoPathAvailable`] if the local PIN space is
    /// exhausted, or a relay error if the relay registration fails.
    pub async fn offer_pin(&self, file: SharedFile) -> Result<PinSession> {
        let owner = self.discovery.self_identity();
        let session = self.pins.create(file, owner, self.config.pin_lifetime).ok_or(NodeError::NoPathAvailable)?;

        let announcement = PinRegistry::announcement(&session);
        let payload = bincode::serialize(&announcement)?;
        let envelope = self.discovery.sign_for(MessageKind::PinAnnounce, payload)?;
        self.discovery.broadcast(envelope);

        if let Some(relay) = &self.relay {
            let relay_ref = self.upload_via_relay(&session.file, &session.owner).await?;
            relay
                .create_pin(&session.owner.peer_id, relay_ref, Some(self.config.pin_lifetime.as_secs()))
                .await
                .map_err(|e| NodeError::Relay(e.to_string().into()))?;
        }

        Ok(session)
    }

    /// Resolve a PIN to its file and owner, checking locally known sessions
    /// before falling back to the relay.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::PinNotFound`] if the PIN resolves nowhere.
    pub async fn resolve_pin(&self, pin: u32) -> Result<(SharedFile, PeerIdentity)> {
        if let Some(session) = self.pins.resolve(pin) {
            return Ok((session.file, session.owner));
        }

        let relay = self.relay.as_ref().ok_or(NodeError::PinNotFound(pin))?;
        let record = relay.find_pin(pin).await.map_err(|_| NodeError::PinNotFound(pin))?;
        let file = SharedFile {
            local_path: PathBuf::new(),
            logical_name: record.file_ref.file_name.clone(),
            size: record.file_ref.file_size,
            file_hash: record.file_ref.file_hash.unwrap_or([0u8; 32]),
            owner_peer_id: record.owner_peer_id.clone(),
        };
        let owner = PeerIdentity {
            peer_id: record.owner_peer_id,
            display_name: String::new(),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            public_key: [0u8; 32],
            dh_public_key: [0u8; 32],
            last_seen: 0,
        };
        Ok((file, owner))
    }

    /// Request the signed manifest for `file` from its owner over a direct
    /// connection. The caller must verify the returned manifest against the
    /// owner's pinned key before trusting any of its fields.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Preview`] if the owner denies the request,
    /// [`NodeError::HashMismatch`] if the owner has no such file, or a
    /// connection error if the exchange fails.
    pub async fn request_preview_manifest(&self, owner: &PeerIdentity, file: &SharedFile, mime_type: &str) -> Result<PreviewManifest> {
        let request = PreviewRequest::GetManifest {
            file_hash: file.file_hash,
            mime_type: mime_type.to_string(),
            requester: self.identity.peer_id().clone(),
        };
        match self.exchange_preview_request(owner, &request).await? {
            PreviewResponse::Manifest(manifest) => Ok(manifest),
            PreviewResponse::Forbidden => Err(NodeError::Preview("preview denied by owner policy".into())),
            PreviewResponse::NotFound => Err(NodeError::HashMismatch),
            PreviewResponse::Content(_) => Err(NodeError::connection("peer returned content in place of a manifest")),
        }
    }

    /// Request `kind`'s content for `file` from its owner, once a manifest
    /// obtained via [`Node::request_preview_manifest`] has been verified.
    /// The caller must check the returned content against the manifest's
    /// `preview_hashes` entry before rendering it, see
    /// [`PreviewContent::verify_against`].
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Preview`] if the owner denies the request,
    /// [`NodeError::HashMismatch`] if the owner has no such file, or a
    /// connection error if the exchange fails.
    pub async fn request_preview_content(&self, owner: &PeerIdentity, file: &SharedFile, kind: PreviewContentKind, mime_type: &str) -> Result<PreviewContent> {
        let request = PreviewRequest::GetContent {
            file_hash: file.file_hash,
            kind,
            mime_type: mime_type.to_string(),
            requester: self.identity.peer_id().clone(),
        };
        match self.exchange_preview_request(owner, &request).await? {
            PreviewResponse::Content(content) => Ok(content),
            PreviewResponse::Forbidden => Err(NodeError::Preview("preview denied by owner policy".into())),
            PreviewResponse::NotFound => Err(NodeError::HashMismatch),
            PreviewResponse::Manifest(_) => Err(NodeError::connection("peer returned a manifest in place of content")),
        }
    }

    async fn exchange_preview_request(&self, owner: &PeerIdentity, request: &PreviewRequest) -> Result<PreviewResponse> {
        let verifier = PinningServerVerifier::new(self.trust.clone(), owner.public_key.to_vec());
        let addr = SocketAddr::new(owner.host, owner.port);
        let server_name = rustls_pki_types::ServerName::IpAddress(owner.host.into());
        let mut channel = Channel::connect(addr, server_name, verifier).await?;

        channel.send(Command::PreviewRequest, request).await?;
        let (command, payload) = channel.recv().await?;
        match command {
            Command::PreviewResponse => Ok(bincode::deserialize(&payload)?),
            _ => Err(NodeError::connection("peer returned an unexpected response to a preview request")),
        }
    }
}

/// Best-effort LAN-visible address for this node, found by opening a UDP
/// socket toward a public address without sending anything (no packet
/// leaves the host; the kernel only needs to pick a route).
fn detect_local_ip() -> IpAddr {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn two_nodes_discover_each_other_over_loopback_gossip() {
        let mut config_a = NodeConfig { listen_port: 0, ..NodeConfig::default() };
        config_a.display_name = "alice".to_string();
        let node_a = Node::new(config_a, Arc::new(Identity::generate().unwrap())).await.unwrap();

        assert_eq!(node_a.discovery.alive_peers().len(), 0);
        assert!(node_a.listen_addr().port() > 0);
    }

    #[test]
    fn detect_local_ip_never_panics() {
        let _ = detect_local_ip();
    }
}
