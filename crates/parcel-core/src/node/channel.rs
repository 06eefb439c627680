//! The authenticated channel: a TLS 1.3 connection (self-signed,
//! first-contact-accept, key-pinned) carrying length-prefixed typed
//! messages, each tagged with a leading command byte.
//!
//! Wire format per message: `[1-byte command][4-byte big-endian length][payload]`.
//! The payload is `bincode`-encoded; callers match on [`Command`] to decide
//! what type to decode it as. This is the one wire contract every transfer,
//! discovery and preview exchange over a direct connection goes through.

use crate::node::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector, client::TlsStream as ClientTlsStream, server::TlsStream as ServerTlsStream};

/// Maximum single-message payload size accepted from a peer (16 MiB). Chunk
/// payloads travel well under this; it exists to bound an attacker's
/// ability to make a peer allocate an unbounded buffer.
const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// What kind of payload follows a frame's length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// A `parcel_discovery::SignedMessage` (join/heartbeat/search/pin).
    Discovery = 1,
    /// A [`ChunkRequest`].
    ChunkRequest = 2,
    /// A [`ChunkResponse`].
    ChunkResponse = 3,
    /// A preview manifest or content request, carried as bincode bytes
    /// understood by `crate::node::preview`.
    PreviewRequest = 4,
    /// Reply to a `PreviewRequest`.
    PreviewResponse = 5,
    /// An error reply in place of the expected response.
    Error = 6,
}

impl Command {
    fn from_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            1 => Command::Discovery,
            2 => Command::ChunkRequest,
            3 => Command::ChunkResponse,
            4 => Command::PreviewRequest,
            5 => Command::PreviewResponse,
            6 => Command::Error,
            other => return Err(NodeError::connection_owned(format!("unknown command byte {other}"))),
        })
    }
}

/// Request for one chunk of one transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRequest {
    /// Transfer this chunk belongs to, as known to the sender (the
    /// requester's local transfer id; the sender correlates by file hash on
    /// first request and may use its own id thereafter).
    pub transfer_id: uuid::Uuid,
    /// BLAKE3 hash of the file being transferred, so a sender with no
    /// matching local transfer id yet can still locate the file.
    pub file_hash: [u8; 32],
    /// Index of the requested chunk.
    pub chunk_index: u64,
    /// Peer id of the requester, so the sender can look up its DH public
    /// key and derive the matching chunk cipher.
    pub requester: parcel_discovery::PeerId,
}

/// Response carrying one encoded chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResponse {
    /// Echoes the request's chunk index.
    pub chunk_index: u64,
    /// The encoded, encrypted chunk record.
    pub record: parcel_files::codec::ChunkRecord,
}

/// Either side of an established TLS connection, generic over the
/// client/server stream type so the same framing code serves both.
pub enum Channel {
    /// Outbound connection this node initiated.
    Client(ClientTlsStream<TcpStream>),
    /// Inbound connection accepted from a peer.
    Server(ServerTlsStream<TcpStream>),
}

impl Channel {
    /// Connect to a peer at `addr`, verifying its certificate with `verifier`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection or TLS handshake fails.
    pub async fn connect(
        addr: std::net::SocketAddr,
        server_name: rustls_pki_types::ServerName<'static>,
        verifier: Arc<dyn rustls::client::danger::ServerCertVerifier>,
    ) -> Result<Self> {
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| NodeError::connection_owned(format!("tcp connect failed: {e}")))?;

        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| NodeError::Tls(format!("tls handshake failed: {e}").into()))?;

        Ok(Channel::Client(stream))
    }

    /// Accept an inbound TLS connection over an already-accepted TCP stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS handshake fails.
    pub async fn accept(tcp: TcpStream, acceptor: &TlsAcceptor) -> Result<Self> {
        let stream = acceptor
            .accept(tcp)
            .await
            .map_err(|e| NodeError::Tls(format!("tls accept failed: {e}").into()))?;
        Ok(Channel::Server(stream))
    }

    /// Write one typed message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the underlying write fails.
    pub async fn send<T: Serialize>(&mut self, command: Command, message: &T) -> Result<()> {
        let payload = bincode::serialize(message)?;
        write_frame(self, command, &payload).await
    }

    /// Read one typed message, returning its command tag and raw payload
    /// for the caller to decode.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection closes mid-frame, the command
    /// byte is unrecognized, or the declared length exceeds
    /// [`MAX_MESSAGE_SIZE`].
    pub async fn recv(&mut self) -> Result<(Command, Vec<u8>)> {
        read_frame(self).await
    }
}

async fn write_frame(channel: &mut Channel, command: Command, payload: &[u8]) -> Result<()> {
    if payload.len() as u64 > MAX_MESSAGE_SIZE as u64 {
        return Err(NodeError::connection_owned("outbound message exceeds max size"));
    }
    let mut header = [0u8; 5];
    header[0] = command as u8;
    header[1..5].copy_from_slice(&(payload.len() as u32).to_be_bytes());

    match channel {
        Channel::Client(s) => {
            s.write_all(&header).await.map_err(NodeError::Io)?;
            s.write_all(payload).await.map_err(NodeError::Io)?;
        }
        Channel::Server(s) => {
            s.write_all(&header).await.map_err(NodeError::Io)?;
            s.write_all(payload).await.map_err(NodeError::Io)?;
        }
    }
    Ok(())
}

async fn read_frame(channel: &mut Channel) -> Result<(Command, Vec<u8>)> {
    let mut header = [0u8; 5];
    read_exact_either(channel, &mut header).await?;

    let command = Command::from_byte(header[0])?;
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len > MAX_MESSAGE_SIZE {
        return Err(NodeError::connection_owned("inbound message exceeds max size"));
    }

    let mut payload = vec![0u8; len as usize];
    read_exact_either(channel, &mut payload).await?;
    Ok((command, payload))
}

async fn read_exact_either(channel: &mut Channel, buf: &mut [u8]) -> Result<()> {
    match channel {
        Channel::Client(s) => read_exact_dyn(s, buf).await,
        Channel::Server(s) => read_exact_dyn(s, buf).await,
    }
}

async fn read_exact_dyn<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut [u8]) -> Result<()> {
    stream.read_exact(buf).await.map_err(NodeError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_byte() {
        for cmd in [
            Command::Discovery,
            Command::ChunkRequest,
            Command::ChunkResponse,
            Command::PreviewRequest,
            Command::PreviewResponse,
            Command::Error,
        ] {
            assert_eq!(Command::from_byte(cmd as u8).unwrap() as u8, cmd as u8);
        }
    }

    #[test]
    fn unknown_command_byte_is_rejected() {
        assert!(Command::from_byte(99).is_err());
    }
}
