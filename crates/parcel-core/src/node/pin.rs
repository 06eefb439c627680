//! PIN rendezvous: a short numeric code a sender reads aloud (or pastes)
//! out of band, which a recipient enters to resolve directly to a file
//! reference, without either side having to know the other's peer id in
//! advance.
//!
//! A PIN resolves two ways depending on reachability: [`PinRegistry`] holds
//! sessions this node is offering or has heard announced over LAN
//! broadcast (carried as [`parcel_discovery::MessageKind::PinAnnounce`]
//! envelopes); the relay's `/api/pin` endpoints cover the case where
//! broadcast cannot reach the recipient at all.

use parcel_discovery::{PeerIdentity, SharedFile};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_PIN_ATTEMPTS: u32 = 32;
const PIN_MIN: u32 = 100_000;
const PIN_MAX: u32 = 999_999;

/// One PIN-to-file binding, either offered locally or learned from an
/// announcement.
#[derive(Debug, Clone)]
pub struct PinSession {
    /// The 6-digit PIN code.
    pub pin: u32,
    /// File the PIN resolves to.
    pub file: SharedFile,
    /// Identity of the peer offering the file.
    pub owner: PeerIdentity,
    /// Unix timestamp (seconds) the PIN was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) after which the PIN is no longer valid.
    pub expiry_at: u64,
}

impl PinSession {
    fn is_expired(&self, now: u64) -> bool {
        self.expiry_at <= now
    }
}

/// Wire payload for a `PinAnnounce` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinAnnouncement {
    /// The 6-digit PIN code.
    pub pin: u32,
    /// File the PIN resolves to.
    pub file: SharedFile,
    /// Identity of the peer offering the file.
    pub owner: PeerIdentity,
    /// Unix timestamp (seconds) after which the PIN is no longer valid.
    pub expiry_at: u64,
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Local PIN bookkeeping: sessions this node offers, and ones it has heard
/// announced by others over LAN broadcast.
#[derive(Clone)]
pub struct PinRegistry {
    inner: Arc<Mutex<HashMap<u32, PinSession>>>,
}

impl PinRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Offer `file` under a freshly generated PIN, retrying on collision up
    /// to [`MAX_PIN_ATTEMPTS`] times before giving up.
    ///
    /// # Errors
    ///
    /// Returns [`crate::node::error::NodeError::Preview`]-shaped exhaustion
    /// is not applicable here; instead returns `None` if no free code was
    /// found, which callers should treat as exhausted PIN space.
    #[must_use]
    pub fn create(&self, file: SharedFile, owner: PeerIdentity, lifetime: Duration) -> Option<PinSession> {
        let mut guard = self.inner.lock().expect("pin registry mutex poisoned");
        let now = now_secs();
        guard.retain(|_, session| !session.is_expired(now));

        let mut rng = rand::thread_rng();
        for _ in 0..MAX_PIN_ATTEMPTS {
            let pin = rng.gen_range(PIN_MIN..=PIN_MAX);
            if guard.contains_key(&pin) {
                continue;
            }
            let session = PinSession {
                pin,
                file: file.clone(),
                owner: owner.clone(),
                created_at: now,
                expiry_at: now + lifetime.as_secs(),
            };
            guard.insert(pin, session.clone());
            return Some(session);
        }
        None
    }

    /// Build the announcement payload for a session this node is offering,
    /// to be signed and broadcast by the caller as a `PinAnnounce` envelope.
    #[must_use]
    pub fn announcement(session: &PinSession) -> PinAnnouncement {
        PinAnnouncement {
            pin: session.pin,
            file: session.file.clone(),
            owner: session.owner.clone(),
            expiry_at: session.expiry_at,
        }
    }

    /// Record a PIN announcement heard from another peer over LAN
    /// broadcast, so a later [`Self::resolve`] call can find it without
    /// needing the relay.
    pub fn observe(&self, announcement: PinAnnouncement) {
        let now = now_secs();
        if announcement.expiry_at <= now {
            return;
        }
        let session = PinSession {
            pin: announcement.pin,
            file: announcement.file,
            owner: announcement.owner,
            created_at: now,
            expiry_at: announcement.expiry_at,
        };
        self.inner.lock().expect("pin registry mutex poisoned").insert(session.pin, session);
    }

    /// Resolve a PIN against locally known sessions (offered or
    /// announced). Callers fall back to the relay's `/api/pin/find` when
    /// this returns `None`.
    #[must_use]
    pub fn resolve(&self, pin: u32) -> Option<PinSession> {
        let guard = self.inner.lock().expect("pin registry mutex poisoned");
        let session = guard.get(&pin)?;
        if session.is_expired(now_secs()) {
            return None;
        }
        Some(session.clone())
    }

    /// Drop expired sessions. Call periodically alongside the discovery
    /// sweep.
    pub fn sweep(&self) {
        let now = now_secs();
        self.inner.lock().expect("pin registry mutex poisoned").retain(|_, session| !session.is_expired(now));
    }
}

impl Default for PinRegistry {
    fn default() -> Self {
        Self::new()
    }
}
