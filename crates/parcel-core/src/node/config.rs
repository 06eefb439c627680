//! Node configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level node configuration, covering discovery, transfer, relay and
/// preview behavior.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Name advertised to other peers.
    pub display_name: String,

    /// Port to listen on for direct peer connections. `0` lets the OS
    /// assign one.
    pub listen_port: u16,

    /// Directory newly shared files are indexed from and downloads land in.
    pub download_dir: PathBuf,

    /// Discovery/heartbeat behavior.
    pub discovery: DiscoveryConfig,

    /// Direct and relayed transfer behavior.
    pub transfer: TransferConfig,

    /// Relay server connection settings.
    pub relay: RelayConfig,

    /// Preview generation limits.
    pub preview: PreviewConfig,

    /// PIN rendezvous lifetime.
    pub pin_lifetime: Duration,

    /// Structured logging configuration.
    pub logging: LoggingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            display_name: "parcel-node".to_string(),
            #[cfg(test)]
            listen_port: 0,
            #[cfg(not(test))]
            listen_port: 8420,
            download_dir: PathBuf::from("."),
            discovery: DiscoveryConfig::default(),
            transfer: TransferConfig::default(),
            relay: RelayConfig::default(),
            preview: PreviewConfig::default(),
            pin_lifetime: Duration::from_secs(600),
            logging: LoggingConfig::default(),
        }
    }
}

/// Discovery/heartbeat settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Interval between heartbeat announcements.
    pub heartbeat_interval: Duration,

    /// How long a peer may go unheard from before it is evicted. Expressed
    /// as a multiple of `heartbeat_interval` in the state machine, but
    /// configurable here for callers that drive the sweep on a wall clock.
    pub peer_timeout: Duration,

    /// Default time-to-live for locally-originated search requests.
    pub search_ttl: u8,

    /// Overall timeout for a client-side fan-out search.
    pub search_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            peer_timeout: Duration::from_secs(60),
            search_ttl: 3,
            search_timeout: Duration::from_secs(5),
        }
    }
}

/// Direct and relayed transfer settings.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Chunk size for direct peer-to-peer transfers.
    pub direct_chunk_size: usize,

    /// Chunk size for relay uploads.
    pub relay_chunk_size: usize,

    /// Maximum number of concurrently active transfers.
    pub max_concurrent_transfers: usize,

    /// Whether chunk payloads are compressed when the file type benefits.
    pub enable_resume: bool,

    /// Connection timeout for establishing a direct channel.
    pub connection_timeout: Duration,

    /// Per-chunk read/write timeout.
    pub operation_timeout: Duration,

    /// Timeout `downloadWithFallback` waits on the direct path before
    /// switching to the relayed path.
    pub fallback_timeout: Duration,

    /// Maximum retries for a transient relay upload/download failure.
    pub max_retries: u32,

    /// Fixed back-off between relay retries.
    pub retry_delay: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            direct_chunk_size: parcel_files::DEFAULT_CHUNK_SIZE,
            relay_chunk_size: parcel_files::DEFAULT_CHUNK_SIZE,
            max_concurrent_transfers: 10,
            enable_resume: true,
            connection_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(120),
            fallback_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Relay server connection settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base URL of the relay server, e.g. `https://relay.example.com`.
    pub server_url: Option<String>,

    /// Optional API key sent as `X-API-Key`.
    pub api_key: Option<String>,

    /// Whether to encrypt file contents before uploading to the relay.
    pub enable_encryption: bool,

    /// Default expiry applied to new relay uploads and PINs.
    pub default_expiry: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            enable_encryption: true,
            default_expiry: Duration::from_secs(600),
        }
    }
}

/// Preview generation limits, mirrored from `parcel_files::preview` defaults
/// so they can be overridden per node.
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Files larger than this only ever get a metadata-only preview.
    pub max_file_size: u64,
    /// Thumbnail bounding box.
    pub thumbnail_size: u32,
    /// Text snippet line cap.
    pub text_max_lines: usize,
    /// Text snippet character cap.
    pub text_max_chars: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_file_size: parcel_files::preview::DEFAULT_MAX_PREVIEW_FILE_SIZE,
            thumbnail_size: parcel_files::preview::DEFAULT_THUMBNAIL_SIZE,
            text_max_lines: parcel_files::preview::DEFAULT_TEXT_MAX_LINES,
            text_max_chars: parcel_files::preview::DEFAULT_TEXT_MAX_CHARS,
        }
    }
}

/// Structured logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive, e.g. `"info"` or
    /// `"parcel_core=debug,parcel_discovery=info"`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}
