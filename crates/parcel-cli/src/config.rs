//! On-disk configuration for the `parcel` CLI.
//!
//! `parcel_core::NodeConfig` has no serde support (its defaults embed
//! platform-specific fallbacks that don't round-trip cleanly), so this is a
//! separate, serializable mirror that the CLI loads from TOML and converts
//! with [`Config::to_node_config`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level CLI configuration, persisted as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity storage settings.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Node identity/listener settings.
    #[serde(default)]
    pub node: NodeSection,
    /// Discovery/heartbeat settings.
    #[serde(default)]
    pub discovery: DiscoverySection,
    /// Direct and relayed transfer settings.
    #[serde(default)]
    pub transfer: TransferSection,
    /// Relay server settings.
    #[serde(default)]
    pub relay: RelaySection,
    /// Preview generation limits.
    #[serde(default)]
    pub preview: PreviewSection,
    /// PIN lifetime, in seconds.
    #[serde(default = "default_pin_lifetime_secs")]
    pub pin_lifetime_secs: u64,
    /// Structured logging settings.
    #[serde(default)]
    pub logging: LoggingSection,
    /// Directories shared at daemon startup.
    #[serde(default)]
    pub shares: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            node: NodeSection::default(),
            discovery: DiscoverySection::default(),
            transfer: TransferSection::default(),
            relay: RelaySection::default(),
            preview: PreviewSection::default(),
            pin_lifetime_secs: default_pin_lifetime_secs(),
            logging: LoggingSection::default(),
            shares: Vec::new(),
        }
    }
}

/// Where the encrypted identity seed lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Path to the passphrase-encrypted Ed25519 seed.
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
        }
    }
}

/// Display name, listener port and download directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Name advertised to other peers.
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Port to listen on for direct connections. `0` lets the OS assign one.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Directory downloads land in and `share` scans relative to.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            listen_port: default_listen_port(),
            download_dir: default_download_dir(),
        }
    }
}

/// Heartbeat and search tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySection {
    /// Seconds between heartbeat announcements.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    /// Seconds a peer may go unheard from before it's evicted.
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    /// Time-to-live for locally-originated search requests.
    #[serde(default = "default_search_ttl")]
    pub search_ttl: u8,
    /// Seconds a client-side search fans out for before returning.
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_secs(),
            peer_timeout_secs: default_peer_timeout_secs(),
            search_ttl: default_search_ttl(),
            search_timeout_secs: default_search_timeout_secs(),
        }
    }
}

/// Chunking, concurrency and retry tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSection {
    /// Chunk size for direct peer-to-peer transfers, in bytes.
    #[serde(default = "default_chunk_size")]
    pub direct_chunk_size: usize,
    /// Chunk size for relay uploads, in bytes.
    #[serde(default = "default_chunk_size")]
    pub relay_chunk_size: usize,
    /// Maximum number of concurrently active transfers.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,
    /// Whether interrupted transfers resume from their `.part` file.
    #[serde(default = "default_true")]
    pub enable_resume: bool,
    /// Seconds to wait for a direct TLS connection to establish.
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    /// Per-chunk read/write timeout, in seconds.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    /// Seconds to wait on the direct path before falling back to relay.
    #[serde(default = "default_fallback_timeout_secs")]
    pub fallback_timeout_secs: u64,
    /// Maximum retries for a transient relay failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Milliseconds between relay retries.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            direct_chunk_size: default_chunk_size(),
            relay_chunk_size: default_chunk_size(),
            max_concurrent_transfers: default_max_concurrent(),
            enable_resume: true,
            connection_timeout_secs: default_connection_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            fallback_timeout_secs: default_fallback_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Relay server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelaySection {
    /// Base URL of the relay server, e.g. `https://relay.example.com`.
    #[serde(default)]
    pub server_url: Option<String>,
    /// Optional API key sent as `X-API-Key`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Whether to encrypt file contents before uploading to the relay.
    #[serde(default = "default_true")]
    pub enable_encryption: bool,
    /// Default expiry applied to new relay uploads and PINs, in seconds.
    #[serde(default = "default_relay_expiry_secs")]
    pub default_expiry_secs: u64,
}

/// Preview generation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewSection {
    /// Files larger than this only ever get a metadata-only preview.
    #[serde(default = "default_max_preview_size")]
    pub max_file_size: u64,
    /// Thumbnail bounding box, in pixels.
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
    /// Text snippet line cap.
    #[serde(default = "default_text_max_lines")]
    pub text_max_lines: usize,
    /// Text snippet character cap.
    #[serde(default = "default_text_max_chars")]
    pub text_max_chars: usize,
}

impl Default for PreviewSection {
    fn default() -> Self {
        Self {
            max_file_size: default_max_preview_size(),
            thumbnail_size: default_thumbnail_size(),
            text_max_lines: default_text_max_lines(),
            text_max_chars: default_text_max_chars(),
        }
    }
}

/// Structured logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `tracing` filter directive, e.g. `"info"` or `"parcel_core=debug"`.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_key_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("parcel/identity.key")
}

fn default_display_name() -> String {
    "parcel-node".to_string()
}

fn default_listen_port() -> u16 {
    8420
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_heartbeat_secs() -> u64 {
    15
}

fn default_peer_timeout_secs() -> u64 {
    60
}

fn default_search_ttl() -> u8 {
    3
}

fn default_search_timeout_secs() -> u64 {
    5
}

fn default_chunk_size() -> usize {
    parcel_files::DEFAULT_CHUNK_SIZE
}

fn default_max_concurrent() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_connection_timeout_secs() -> u64 {
    5
}

fn default_operation_timeout_secs() -> u64 {
    120
}

fn default_fallback_timeout_secs() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_relay_expiry_secs() -> u64 {
    600
}

fn default_max_preview_size() -> u64 {
    parcel_files::preview::DEFAULT_MAX_PREVIEW_FILE_SIZE
}

fn default_thumbnail_size() -> u32 {
    parcel_files::preview::DEFAULT_THUMBNAIL_SIZE
}

fn default_text_max_lines() -> usize {
    parcel_files::preview::DEFAULT_TEXT_MAX_LINES
}

fn default_text_max_chars() -> usize {
    parcel_files::preview::DEFAULT_TEXT_MAX_CHARS
}

fn default_pin_lifetime_secs() -> u64 {
    600
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Default config file path, `$XDG_CONFIG_HOME/parcel/config.toml` or
    /// platform equivalent.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("parcel/config.toml")
    }

    /// Load from the default path, writing out a fresh default config if
    /// none exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Validate configuration, catching mistakes before a node starts.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting found.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        let base_directive = self
            .logging
            .filter
            .split(',')
            .next()
            .unwrap_or(&self.logging.filter);
        if !valid_log_levels.contains(&base_directive.to_lowercase().as_str()) && !base_directive.contains('=') {
            anyhow::bail!(
                "invalid log filter '{}': expected one of {} or a tracing directive",
                self.logging.filter,
                valid_log_levels.join(", ")
            );
        }

        if self.transfer.direct_chunk_size == 0 || self.transfer.direct_chunk_size > 16 * 1024 * 1024 {
            anyhow::bail!("transfer.direct_chunk_size must be between 1 and 16MB");
        }
        if self.transfer.relay_chunk_size == 0 || self.transfer.relay_chunk_size > 16 * 1024 * 1024 {
            anyhow::bail!("transfer.relay_chunk_size must be between 1 and 16MB");
        }
        if self.transfer.max_concurrent_transfers == 0 || self.transfer.max_concurrent_transfers > 1000 {
            anyhow::bail!("transfer.max_concurrent_transfers must be between 1 and 1000");
        }

        if let Some(url) = &self.relay.server_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("relay.server_url '{url}' must start with http:// or https://");
            }
        }

        for dir in &self.shares {
            if !dir.is_dir() {
                anyhow::bail!("shares entry '{}' is not a directory", dir.display());
            }
        }

        Ok(())
    }

    /// Build the `parcel_core::NodeConfig` this configuration describes.
    #[must_use]
    pub fn to_node_config(&self) -> parcel_core::NodeConfig {
        parcel_core::NodeConfig {
            display_name: self.node.display_name.clone(),
            listen_port: self.node.listen_port,
            download_dir: self.node.download_dir.clone(),
            discovery: parcel_core::node::config::DiscoveryConfig {
                heartbeat_interval: Duration::from_secs(self.discovery.heartbeat_interval_secs),
                peer_timeout: Duration::from_secs(self.discovery.peer_timeout_secs),
                search_ttl: self.discovery.search_ttl,
                search_timeout: Duration::from_secs(self.discovery.search_timeout_secs),
            },
            transfer: parcel_core::node::config::TransferConfig {
                direct_chunk_size: self.transfer.direct_chunk_size,
                relay_chunk_size: self.transfer.relay_chunk_size,
                max_concurrent_transfers: self.transfer.max_concurrent_transfers,
                enable_resume: self.transfer.enable_resume,
                connection_timeout: Duration::from_secs(self.transfer.connection_timeout_secs),
                operation_timeout: Duration::from_secs(self.transfer.operation_timeout_secs),
                fallback_timeout: Duration::from_secs(self.transfer.fallback_timeout_secs),
                max_retries: self.transfer.max_retries,
                retry_delay: Duration::from_millis(self.transfer.retry_delay_ms),
            },
            relay: parcel_core::node::config::RelayConfig {
                server_url: self.relay.server_url.clone(),
                api_key: self.relay.api_key.clone(),
                enable_encryption: self.relay.enable_encryption,
                default_expiry: Duration::from_secs(self.relay.default_expiry_secs),
            },
            preview: parcel_core::node::config::PreviewConfig {
                max_file_size: self.preview.max_file_size,
                thumbnail_size: self.preview.thumbnail_size,
                text_max_lines: self.preview.text_max_lines,
                text_max_chars: self.preview.text_max_chars,
            },
            pin_lifetime: Duration::from_secs(self.pin_lifetime_secs),
            logging: parcel_core::node::config::LoggingConfig {
                filter: self.logging.filter.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_log_filter() {
        let mut config = Config::default();
        config.logging.filter = "shout".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_directive_style_log_filter() {
        let mut config = Config::default();
        config.logging.filter = "parcel_core=debug,parcel_discovery=info".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_oversized_chunk_size() {
        let mut config = Config::default();
        config.transfer.direct_chunk_size = 32 * 1024 * 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_relay_url_without_scheme() {
        let mut config = Config::default();
        config.relay.server_url = Some("relay.example.com".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trips() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.node.listen_port, deserialized.node.listen_port);
        assert_eq!(config.transfer.direct_chunk_size, deserialized.transfer.direct_chunk_size);
    }

    #[test]
    fn to_node_config_carries_settings_through() {
        let mut config = Config::default();
        config.node.display_name = "laptop".to_string();
        config.discovery.search_ttl = 7;
        let node_config = config.to_node_config();
        assert_eq!(node_config.display_name, "laptop");
        assert_eq!(node_config.discovery.search_ttl, 7);
    }
}
