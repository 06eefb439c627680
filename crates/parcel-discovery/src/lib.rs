//! # parcel-discovery
//!
//! Peer membership and flooded file search for parcel-net.
//!
//! This crate provides:
//! - The shared discovery/search data model (`PeerIdentity`, `SharedFile`,
//!   `SignedMessage`, `SearchRequest`, `SearchResponse`)
//! - Peer liveness tracking with the `Unknown -> Seen -> Alive -> Stale ->
//!   Lost` state machine
//! - Local file indexing and flooded-search dedup/forwarding bookkeeping
//!
//! It does not own any network transport: callers (`parcel-core`) drive
//! sending and receiving bytes and call into this crate to decide what
//! those bytes mean and what happens next.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod membership;
pub mod search;
pub mod types;

pub use error::DiscoveryError;
pub use membership::{DiscoveryEvent, PeerRegistry, PeerState};
pub use search::{SearchDedup, SearchIndex, SearchOutcome, SearchService};
pub use types::{
    MessageKind, PeerId, PeerIdentity, SearchRequest, SearchResponse, SharedFile, SignedMessage,
};
