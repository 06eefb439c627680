//! Peer liveness tracking.
//!
//! Every peer moves through `Unknown -> Seen -> Alive -> Stale -> Lost`.
//! `Seen` fires on a verified `Join`, `Alive` on the first heartbeat after
//! that, `Stale` after one missed heartbeat interval and `Lost` (which
//! evicts the peer) after three.

use crate::error::DiscoveryError;
use crate::types::{PeerId, PeerIdentity};
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Heartbeat interval used by [`PeerRegistry::sweep`] callers, in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Consecutive missed heartbeats after which a peer is evicted.
const MISSED_HEARTBEATS_UNTIL_LOST: u32 = 3;

/// A peer's liveness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Seen in a verified `Join` announcement but no heartbeat yet.
    Seen,
    /// Has sent at least one heartbeat within the current window.
    Alive,
    /// Missed exactly one heartbeat interval.
    Stale,
}

/// Liveness record for one known peer.
#[derive(Debug, Clone)]
struct PeerRecord {
    identity: PeerIdentity,
    state: PeerState,
    missed_heartbeats: u32,
}

/// A membership change worth notifying callers about.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A previously-unknown peer was verified and registered.
    PeerDiscovered(PeerIdentity),
    /// A peer missed three consecutive heartbeats and was evicted.
    PeerLost(PeerId),
}

/// Registry of known peers and their liveness state.
///
/// Cheaply cloneable; all clones share the same underlying map and event
/// channel.
#[derive(Clone)]
pub struct PeerRegistry {
    peers: std::sync::Arc<DashMap<PeerId, PeerRecord>>,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
}

impl PeerRegistry {
    /// Create an empty registry and the receiver for its discovery events.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers: std::sync::Arc::new(DashMap::new()),
                events: tx,
            },
            rx,
        )
    }

    /// Record a verified `Join` announcement.
    ///
    /// First contact registers the peer as `Seen`. A later `Join` from an
    /// already-known `peer_id` must carry the same public key, or it is
    /// rejected as [`DiscoveryError::IdentityMismatch`] rather than
    /// re-pinning silently.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::IdentityMismatch`] if `identity.public_key`
    /// does not match the key already pinned for `identity.peer_id`.
    pub fn observe_join(&self, identity: PeerIdentity) -> Result<(), DiscoveryError> {
        self.check_pin(&identity)?;
        if !self.peers.contains_key(&identity.peer_id) {
            let peer_id = identity.peer_id.clone();
            self.peers.insert(
                peer_id,
                PeerRecord {
                    identity: identity.clone(),
                    state: PeerState::Seen,
                    missed_heartbeats: 0,
                },
            );
            let _ = self.events.send(DiscoveryEvent::PeerDiscovered(identity));
        }
        Ok(())
    }

    /// Record a heartbeat from `identity`.
    ///
    /// Heartbeats from a peer this node has not seen a `Join` for still
    /// register it (as if `Join` and the heartbeat arrived together), since
    /// a late-joining listener should not refuse to ever mark a peer alive.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::IdentityMismatch`] on a pinned-key mismatch.
    pub fn observe_heartbeat(&self, identity: PeerIdentity) -> Result<(), DiscoveryError> {
        self.check_pin(&identity)?;
        let peer_id = identity.peer_id.clone();
        let is_new = !self.peers.contains_key(&peer_id);
        self.peers
            .entry(peer_id)
            .and_modify(|record| {
                record.identity.last_seen = identity.last_seen;
                record.state = PeerState::Alive;
                record.missed_heartbeats = 0;
            })
            .or_insert_with(|| PeerRecord {
                identity: identity.clone(),
                state: PeerState::Alive,
                missed_heartbeats: 0,
            });
        if is_new {
            let _ = self.events.send(DiscoveryEvent::PeerDiscovered(identity));
        }
        Ok(())
    }

    /// Advance every peer's missed-heartbeat count by one tick, transition
    /// states accordingly and evict peers that reach
    /// [`MISSED_HEARTBEATS_UNTIL_LOST`].
    ///
    /// Callers drive this from a `tokio::time::interval` at the heartbeat
    /// period; a peer that sent a heartbeat since the last sweep had its
    /// counter reset to zero and is skipped here.
    pub fn sweep(&self) {
        let mut lost = Vec::new();
        self.peers.retain(|peer_id, record| {
            record.missed_heartbeats += 1;
            match record.missed_heartbeats {
                0 => unreachable!("just incremented"),
                1 => {
                    record.state = PeerState::Stale;
                    true
                }
                n if n >= MISSED_HEARTBEATS_UNTIL_LOST => {
                    lost.push(peer_id.clone());
                    false
                }
                _ => true,
            }
        });
        for peer_id in lost {
            let _ = self.events.send(DiscoveryEvent::PeerLost(peer_id));
        }
    }

    /// Look up a peer's current identity.
    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<PeerIdentity> {
        self.peers.get(peer_id).map(|r| r.identity.clone())
    }

    /// Current liveness state of a peer, if known.
    #[must_use]
    pub fn state_of(&self, peer_id: &PeerId) -> Option<PeerState> {
        self.peers.get(peer_id).map(|r| r.state)
    }

    /// All peers currently in the `Alive` state.
    #[must_use]
    pub fn alive_peers(&self) -> Vec<PeerIdentity> {
        self.peers
            .iter()
            .filter(|r| r.state == PeerState::Alive)
            .map(|r| r.identity.clone())
            .collect()
    }

    fn check_pin(&self, identity: &PeerIdentity) -> Result<(), DiscoveryError> {
        if let Some(existing) = self.peers.get(&identity.peer_id) {
            if existing.identity.public_key != identity.public_key {
                return Err(DiscoveryError::IdentityMismatch(identity.peer_id.clone()));
            }
        }
        Ok(())
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn identity(id: &str) -> PeerIdentity {
        PeerIdentity {
            peer_id: PeerId(id.to_string()),
            display_name: id.to_string(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9000,
            public_key: [1u8; 32],
            dh_public_key: [2u8; 32],
            last_seen: 0,
        }
    }

    #[test]
    fn join_then_heartbeat_reaches_alive() {
        let (registry, mut events) = PeerRegistry::new();
        let peer = identity("peer-a");
        registry.observe_join(peer.clone()).unwrap();
        assert_eq!(registry.state_of(&peer.peer_id), Some(PeerState::Seen));

        registry.observe_heartbeat(peer.clone()).unwrap();
        assert_eq!(registry.state_of(&peer.peer_id), Some(PeerState::Alive));

        let first = events.try_recv().unwrap();
        assert!(matches!(first, DiscoveryEvent::PeerDiscovered(_)));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn mismatched_public_key_is_rejected() {
        let (registry, _events) = PeerRegistry::new();
        let peer = identity("peer-a");
        registry.observe_join(peer.clone()).unwrap();

        let mut impostor = peer;
        impostor.public_key = [9u8; 32];
        assert!(matches!(
            registry.observe_join(impostor),
            Err(DiscoveryError::IdentityMismatch(_))
        ));
    }

    #[test]
    fn three_missed_heartbeats_evicts() {
        let (registry, mut events) = PeerRegistry::new();
        let peer = identity("peer-a");
        registry.observe_heartbeat(peer.clone()).unwrap();
        let _ = events.try_recv();

        registry.sweep();
        assert_eq!(registry.state_of(&peer.peer_id), Some(PeerState::Stale));

        registry.sweep();
        assert_eq!(registry.state_of(&peer.peer_id), Some(PeerState::Stale));

        registry.sweep();
        assert_eq!(registry.state_of(&peer.peer_id), None);

        let event = events.try_recv().unwrap();
        assert!(matches!(event, DiscoveryEvent::PeerLost(_)));
    }

    #[test]
    fn heartbeat_resets_missed_counter() {
        let (registry, _events) = PeerRegistry::new();
        let peer = identity("peer-a");
        registry.observe_heartbeat(peer.clone()).unwrap();
        registry.sweep();
        assert_eq!(registry.state_of(&peer.peer_id), Some(PeerState::Stale));

        registry.observe_heartbeat(peer.clone()).unwrap();
        assert_eq!(registry.state_of(&peer.peer_id), Some(PeerState::Alive));
    }
}
