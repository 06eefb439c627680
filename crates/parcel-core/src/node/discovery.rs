//! Discovery integration: wires [`parcel_discovery::PeerRegistry`] and
//! [`parcel_discovery::SearchService`] to this node's identity, driving
//! heartbeat emission and (de)serializing the signed envelopes that cross
//! the wire.
//!
//! This module owns no sockets. It produces outbound [`SignedMessage`]s on
//! an unbounded channel and accepts inbound bytes through
//! [`DiscoveryService::handle_incoming`]; whatever carries bytes between
//! peers (LAN broadcast, a direct TLS stream, the relay) only needs to move
//! those envelopes, never to understand them.

use crate::node::error::{NodeError, Result};
use crate::node::identity::Identity;
use parcel_discovery::{
    DiscoveryEvent, MessageKind, PeerId, PeerIdentity, PeerRegistry, SearchDedup, SearchIndex,
    SearchOutcome, SearchRequest, SearchResponse, SearchService, SignedMessage,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::interval;

/// Outbound message, tagged with how far it should travel.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Send to every known peer (heartbeats, join, search requests/forwards).
    Broadcast(SignedMessage),
    /// Send to one specific peer (a search response routed back to its
    /// origin).
    Direct(PeerId, SignedMessage),
}

/// Drives peer liveness and flooded search for one node.
pub struct DiscoveryService {
    identity: Arc<Identity>,
    registry: PeerRegistry,
    search: SearchService,
    listen_host: IpAddr,
    listen_port: u16,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    search_results_tx: mpsc::UnboundedSender<SearchResponse>,
}

impl DiscoveryService {
    /// Build a new discovery service. Returns the service plus the receiving
    /// ends of its peer-lifecycle, outbound-message and search-result
    /// channels.
    #[must_use]
    pub fn new(
        identity: Arc<Identity>,
        listen_host: IpAddr,
        listen_port: u16,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<DiscoveryEvent>,
        mpsc::UnboundedReceiver<Outbound>,
        mpsc::UnboundedReceiver<SearchResponse>,
    ) {
        let (registry, events_rx) = PeerRegistry::new();
        let peer_id = identity.peer_id().clone();
        let search = SearchService::new(peer_id);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (search_results_tx, search_results_rx) = mpsc::unbounded_channel();

        (
            Self {
                identity,
                registry,
                search,
                listen_host,
                listen_port,
                outbound_tx,
                search_results_tx,
            },
            events_rx,
            outbound_rx,
            search_results_rx,
        )
    }

    /// Sign an arbitrary payload under `kind`, for message kinds this
    /// service does not otherwise originate (PIN announcements).
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn sign_for(&self, kind: MessageKind, payload: Vec<u8>) -> Result<SignedMessage> {
        self.sign(kind, payload)
    }

    /// Queue `envelope` for broadcast to every known peer.
    pub fn broadcast(&self, envelope: SignedMessage) {
        let _ = self.outbound_tx.send(Outbound::Broadcast(envelope));
    }

    /// This node's search index, for registering/removing shared
    /// directories.
    #[must_use]
    pub fn index(&self) -> &SearchIndex {
        self.search.index()
    }

    /// Known peers currently considered alive.
    #[must_use]
    pub fn alive_peers(&self) -> Vec<PeerIdentity> {
        self.registry.alive_peers()
    }

    /// This node's own descriptor, as announced in `Join`/`Heartbeat`
    /// envelopes.
    #[must_use]
    pub fn self_identity(&self) -> PeerIdentity {
        PeerIdentity {
            peer_id: self.identity.peer_id().clone(),
            display_name: String::new(),
            host: self.listen_host,
            port: self.listen_port,
            public_key: self.identity.public_key_bytes(),
            dh_public_key: self.identity.dh_public_key_bytes(),
            last_seen: now_secs(),
        }
    }

    /// Look up a known peer's descriptor by id, for resolving the
    /// destination of an [`Outbound::Direct`] message.
    #[must_use]
    pub fn peer(&self, peer_id: &PeerId) -> Option<PeerIdentity> {
        self.registry.get(peer_id)
    }

    fn sign(&self, kind: MessageKind, payload: Vec<u8>) -> Result<SignedMessage> {
        Ok(SignedMessage::sign(
            kind,
            self.identity.peer_id().clone(),
            payload,
            self.identity.signing_key(),
        ))
    }

    /// Announce this node to the network. Call once at startup.
    ///
    /// # Errors
    ///
    /// Returns an error if the announcement cannot be serialized.
    pub fn announce_join(&self) -> Result<()> {
        let payload = bincode::serialize(&self.self_identity())?;
        let envelope = self.sign(MessageKind::Join, payload)?;
        let _ = self.outbound_tx.send(Outbound::Broadcast(envelope));
        Ok(())
    }

    /// Spawn the periodic heartbeat/sweep loop. The returned task runs
    /// until the node shuts down; drop the `DiscoveryService` to stop it
    /// (the tick interval holds a strong reference to nothing outside
    /// `self`, so this must be called from an owner that keeps `self`
    /// alive for the task's lifetime via `Arc` if spawned detached).
    pub fn heartbeat_interval(&self, period: Duration) -> tokio::time::Interval {
        interval(period)
    }

    /// Emit one heartbeat announcement. Called on each tick of a caller-driven
    /// interval (kept out of this type so callers can use `tokio::select!`
    /// alongside cancellation).
    ///
    /// # Errors
    ///
    /// Returns an error if the heartbeat cannot be serialized.
    pub fn emit_heartbeat(&self) -> Result<()> {
        let payload = bincode::serialize(&self.self_identity())?;
        let envelope = self.sign(MessageKind::Heartbeat, payload)?;
        let _ = self.outbound_tx.send(Outbound::Broadcast(envelope));
        Ok(())
    }

    /// Sweep for peers that have missed too many heartbeats, evicting them.
    pub fn sweep(&self) {
        self.registry.sweep();
    }

    /// Start a flooded search for `query`, broadcasting the request and
    /// returning its id so the caller can correlate responses.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be serialized.
    pub fn start_search(&self, query: String, ttl: u8) -> Result<SearchRequest> {
        let request = self.search.new_request(query, ttl);
        let payload = bincode::serialize(&request)?;
        let envelope = self.sign(MessageKind::SearchRequest, payload)?;
        let _ = self.outbound_tx.send(Outbound::Broadcast(envelope));
        Ok(request)
    }

    /// Process one inbound signed envelope: verifies the signature against
    /// the sender's pinned (or first-seen) key, then dispatches by kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature does not verify, the payload is
    /// malformed, or the sender's identity is otherwise inconsistent.
    pub fn handle_incoming(&self, envelope: &SignedMessage) -> Result<()> {
        match envelope.kind {
            MessageKind::Join => {
                let identity: PeerIdentity = bincode::deserialize(&envelope.payload)?;
                envelope.verify(&identity.verifying_key()?)?;
                self.registry.observe_join(identity)?;
            }
            MessageKind::Heartbeat => {
                let identity: PeerIdentity = bincode::deserialize(&envelope.payload)?;
                envelope.verify(&identity.verifying_key()?)?;
                self.registry.observe_heartbeat(identity)?;
            }
            MessageKind::SearchRequest => {
                let request: SearchRequest = bincode::deserialize(&envelope.payload)?;
                self.verify_against_known_sender(envelope)?;
                self.handle_search_request(&request)?;
            }
            MessageKind::SearchResponse => {
                let response: SearchResponse = bincode::deserialize(&envelope.payload)?;
                self.verify_against_known_sender(envelope)?;
                let _ = self.search_results_tx.send(response);
            }
            MessageKind::PinAnnounce => {
                // Handled by the PIN service, which subscribes to the same
                // inbound stream; nothing to do here.
            }
        }
        Ok(())
    }

    fn verify_against_known_sender(&self, envelope: &SignedMessage) -> Result<()> {
        let sender = self
            .registry
            .get(&envelope.sender_id)
            .ok_or_else(|| NodeError::connection("search message from unknown sender"))?;
        envelope.verify(&sender.verifying_key()?)?;
        Ok(())
    }

    fn handle_search_request(&self, request: &SearchRequest) -> Result<()> {
        let SearchOutcome { response, forward } = self.search.handle_request(request);

        if let Some(response) = response {
            let payload = bincode::serialize(&response)?;
            let envelope = self.sign(MessageKind::SearchResponse, payload)?;
            let _ = self
                .outbound_tx
                .send(Outbound::Direct(request.origin_peer_id.clone(), envelope));
        }

        if let Some(forward) = forward {
            let payload = bincode::serialize(&forward)?;
            let envelope = self.sign(MessageKind::SearchRequest, payload)?;
            let _ = self.outbound_tx.send(Outbound::Broadcast(envelope));
        }

        Ok(())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn join_announcement_verifies_at_receiver() {
        let alice = Arc::new(Identity::generate().unwrap());
        let bob = Arc::new(Identity::generate().unwrap());

        let (alice_svc, _events, mut alice_out, _alice_results) = DiscoveryService::new(
            alice.clone(),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            9001,
        );
        let (bob_svc, _bob_events, _bob_out, _bob_results) =
            DiscoveryService::new(bob, IpAddr::V4(Ipv4Addr::LOCALHOST), 9002);

        alice_svc.announce_join().unwrap();
        let Outbound::Broadcast(envelope) = alice_out.recv().await.unwrap() else {
            panic!("expected broadcast");
        };

        bob_svc.handle_incoming(&envelope).unwrap();
        assert!(bob_svc.registry.get(alice.peer_id()).is_some());
    }

    #[tokio::test]
    async fn search_request_with_local_match_routes_response_to_origin() {
        let searcher = Arc::new(Identity::generate().unwrap());
        let owner = Arc::new(Identity::generate().unwrap());

        let (searcher_svc, _e1, mut searcher_out, _r1) = DiscoveryService::new(
            searcher.clone(),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            9003,
        );
        let (owner_svc, _e2, mut owner_out, _r2) =
            DiscoveryService::new(owner.clone(), IpAddr::V4(Ipv4Addr::LOCALHOST), 9004);

        // Owner needs to know the searcher to verify its search request.
        owner_svc
            .registry
            .observe_join(searcher_svc.self_identity())
            .unwrap();

        owner_svc.index().set_directory(
            std::path::PathBuf::from("/shared"),
            vec![parcel_discovery::SharedFile {
                local_path: "/shared/report.pdf".into(),
                logical_name: "report.pdf".to_string(),
                size: 1024,
                file_hash: [9u8; 32],
                owner_peer_id: owner.peer_id().clone(),
            }],
        );

        let request = searcher_svc.start_search("report".to_string(), 3).unwrap();
        let Outbound::Broadcast(envelope) = searcher_out.recv().await.unwrap() else {
            panic!("expected broadcast");
        };
        assert_eq!(envelope.kind, MessageKind::SearchRequest);

        owner_svc.handle_incoming(&envelope).unwrap();
        let Outbound::Direct(to, response_envelope) = owner_out.recv().await.unwrap() else {
            panic!("expected direct response");
        };
        assert_eq!(to, *searcher.peer_id());
        assert_eq!(response_envelope.kind, MessageKind::SearchResponse);

        let response: SearchResponse = bincode::deserialize(&response_envelope.payload).unwrap();
        assert_eq!(response.request_id, request.request_id);
        assert_eq!(response.files.len(), 1);
    }
}
