//! Node orchestration layer for parcel-net.
//!
//! This module provides the high-level `Node` API that coordinates every
//! other crate in the workspace:
//! - Identity and transport security (Ed25519 + X25519 + self-signed TLS,
//!   via `parcel-crypto`)
//! - Peer discovery and flooded search (`parcel-discovery`)
//! - File chunking, reassembly and preview generation (`parcel-files`)
//! - Relay fallback for unreachable peers (`parcel-relay`)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Node                               │
//! │  (listener, LAN gossip socket, background tasks)         │
//! ├─────────────────────────────────────────────────────────┤
//! │ Discovery │ TransferManager │ PinRegistry │ PreviewService│
//! ├─────────────────────────────────────────────────────────┤
//! │ Identity/TLS (parcel-crypto) │ Chunking (parcel-files)   │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod config;
pub mod discovery;
pub mod error;
pub mod identity;
#[allow(clippy::module_inception)]
pub mod node;
pub mod pin;
pub mod preview;
pub mod progress;
pub mod transfer;
pub mod transfer_manager;

pub use channel::{Channel, ChunkRequest, ChunkResponse, Command};
pub use config::NodeConfig;
pub use discovery::{DiscoveryService, Outbound};
pub use error::NodeError;
pub use identity::Identity;
pub use node::Node;
pub use pin::{PinAnnouncement, PinRegistry, PinSession};
pub use preview::{PreviewContent, PreviewContentKind, PreviewManifest, PreviewPolicy, PreviewRequest, PreviewResponse, PreviewService};
pub use progress::TransferProgress;
pub use transfer::{TransferHandle, TransferState, TransferStatus};
pub use transfer_manager::TransferManager;
