//! # parcel-core
//!
//! Node orchestration for parcel-net: a peer-to-peer file sharing node with
//! authenticated discovery, resumable chunked transfer with direct/relayed
//! dispatch, flooded gossip search, PIN rendezvous and signed preview
//! manifests.
//!
//! This crate provides:
//! - **Node API**: the top-level orchestrator binding identity, discovery,
//!   transfer dispatch, PIN rendezvous and preview generation to a running
//!   listener and LAN gossip socket
//! - **Channel**: the authenticated TLS wire framing every direct exchange
//!   goes over
//! - **TransferManager**: direct-then-relay-fallback chunk dispatch with
//!   resumable `.part` reassembly
//! - **PinRegistry**: short-code rendezvous, resolved locally or via relay
//! - **PreviewService**: signed, permission-gated preview manifests
//!
//! ## Quick Start
//!
//! ```no_run
//! use parcel_core::{Identity, Node, NodeConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let identity = Arc::new(Identity::generate()?);
//!     let node = Node::new(NodeConfig::default(), identity).await?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Structure
//!
//! - [`node`]: identity, discovery integration, transfer dispatch, PIN
//!   rendezvous, preview generation and the `Node` orchestrator itself

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod node;

pub use node::{
    Channel, ChunkRequest, ChunkResponse, Command, DiscoveryService, Identity, Node, NodeConfig,
    NodeError, Outbound, PinAnnouncement, PinRegistry, PinSession, PreviewContent,
    PreviewContentKind, PreviewManifest, PreviewPolicy, PreviewService, TransferHandle,
    TransferManager, TransferProgress, TransferState, TransferStatus,
};
