//! Local file index and flooded-search bookkeeping.
//!
//! This module owns the data a search touches — the local share index, the
//! per-request dedup set and the TTL-decrement rule — but not the network
//! fan-out itself. Sending a request to a peer and collecting replies needs
//! a transport, which this crate does not have; callers drive that part and
//! use [`SearchIndex`] and [`SearchDedup`] to decide what to do with what
//! arrives.

use crate::types::{PeerId, SearchRequest, SearchResponse, SharedFile};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

/// Maximum number of request ids remembered for dedup before the oldest is
/// evicted.
const DEDUP_CAPACITY: usize = 4096;

/// Per-directory index of locally shared files.
#[derive(Debug, Default)]
pub struct SearchIndex {
    by_directory: dashmap::DashMap<PathBuf, Vec<SharedFile>>,
}

impl SearchIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of files shared from `directory`.
    pub fn set_directory(&self, directory: PathBuf, files: Vec<SharedFile>) {
        self.by_directory.insert(directory, files);
    }

    /// Stop sharing `directory` entirely.
    pub fn remove_directory(&self, directory: &PathBuf) {
        self.by_directory.remove(directory);
    }

    /// Case-insensitive substring match against every shared file's logical
    /// name, across all shared directories.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<SharedFile> {
        let needle = query.to_lowercase();
        self.by_directory
            .iter()
            .flat_map(|entry| entry.value().clone())
            .filter(|file| file.logical_name.to_lowercase().contains(&needle))
            .collect()
    }
}

/// Bounded set of recently-seen request ids, so a flooded request is
/// processed at most once per node even if it arrives by more than one
/// path.
#[derive(Debug, Default)]
pub struct SearchDedup {
    inner: Mutex<DedupState>,
}

#[derive(Debug, Default)]
struct DedupState {
    order: VecDeque<Uuid>,
    seen: HashSet<Uuid>,
}

impl SearchDedup {
    /// Create an empty dedup set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as seen. Returns `true` if this is the first time it has
    /// been observed, `false` if it is a duplicate that should be dropped.
    pub fn mark_seen(&self, id: Uuid) -> bool {
        let mut state = self.inner.lock().expect("dedup mutex poisoned");
        if !state.seen.insert(id) {
            return false;
        }
        state.order.push_back(id);
        if state.order.len() > DEDUP_CAPACITY {
            if let Some(oldest) = state.order.pop_front() {
                state.seen.remove(&oldest);
            }
        }
        true
    }
}

/// Result of processing one incoming [`SearchRequest`] at a node.
pub struct SearchOutcome {
    /// Local matches to send back toward `request.origin_peer_id`, if any.
    pub response: Option<SearchResponse>,
    /// The request to forward on, with `ttl` decremented, if it should be
    /// flooded further. `None` when this node is a duplicate delivery or
    /// the request's TTL has been exhausted.
    pub forward: Option<SearchRequest>,
}

/// Ties a [`SearchIndex`] and [`SearchDedup`] together for one node.
pub struct SearchService {
    local_peer_id: PeerId,
    index: SearchIndex,
    dedup: SearchDedup,
}

impl SearchService {
    /// Create a search service for `local_peer_id`.
    #[must_use]
    pub fn new(local_peer_id: PeerId) -> Self {
        Self {
            local_peer_id,
            index: SearchIndex::new(),
            dedup: SearchDedup::new(),
        }
    }

    /// The local share index.
    #[must_use]
    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    /// Build a new, locally-originated search request.
    #[must_use]
    pub fn new_request(&self, query: String, ttl: u8) -> SearchRequest {
        SearchRequest {
            request_id: Uuid::new_v4(),
            origin_peer_id: self.local_peer_id.clone(),
            query,
            ttl,
        }
    }

    /// Process an incoming (possibly flooded) search request.
    ///
    /// Duplicate `request_id`s are dropped outright: no local match, no
    /// forward. Otherwise the local index is scanned and, if `ttl` is still
    /// positive, a decremented copy of the request is returned for the
    /// caller to flood to its other alive peers.
    pub fn handle_request(&self, request: &SearchRequest) -> SearchOutcome {
        if !self.dedup.mark_seen(request.request_id) {
            return SearchOutcome {
                response: None,
                forward: None,
            };
        }

        let matches = self.index.search(&request.query);
        let response = if matches.is_empty() {
            None
        } else {
            Some(SearchResponse {
                request_id: request.request_id,
                source_peer: self.local_peer_id.clone(),
                files: matches,
            })
        };

        let forward = if request.ttl > 0 {
            Some(SearchRequest {
                request_id: request.request_id,
                origin_peer_id: request.origin_peer_id.clone(),
                query: request.query.clone(),
                ttl: request.ttl - 1,
            })
        } else {
            None
        };

        SearchOutcome { response, forward }
    }
}
