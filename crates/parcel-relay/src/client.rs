//! Reqwest-based client for talking to a relay server: chunked upload with
//! retry, range-resumable download, peer registry, search and PIN calls.

use crate::error::{RelayError, Result};
use crate::types::{HealthStatus, RelayFileEntry, RelayFileRef, RelayPeerRecord, RelayPinRecord, RelayUpload};
use parcel_discovery::PeerId;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default per-chunk retry budget before giving up on an upload.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Base delay for exponential backoff between chunk upload retries.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
/// Ceiling applied to the exponential backoff delay.
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// A relay client bound to one relay server's base URL.
#[derive(Clone)]
pub struct RelayClient {
    http: HttpClient,
    base_url: String,
    max_retries: u32,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

impl RelayClient {
    /// Build a client against `base_url` (e.g. `https://relay.example:7443`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
        }
    }

    /// Override the retry budget and backoff bounds used by
    /// [`Self::upload_chunk_with_retry`].
    #[must_use]
    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self.retry_max_delay = max_delay;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Upload the file's first chunk, creating the upload on the relay and
    /// returning its generated id along with the updated bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Request`] on transport failure or
    /// [`RelayError::UnexpectedStatus`] on a non-success response.
    pub async fn start_upload(
        &self,
        file_name: &str,
        total_size: u64,
        chunk_size: u64,
        sender_id: &PeerId,
        first_chunk: &[u8],
    ) -> Result<RelayUpload> {
        let response = self
            .http
            .post(self.url("/api/relay/upload"))
            .header("x-chunk-index", "0")
            .header("x-file-name", file_name)
            .header("x-sender-id", sender_id.0.as_str())
            .header("x-total-size", total_size.to_string())
            .header("x-chunk-size", chunk_size.to_string())
            .body(first_chunk.to_vec())
            .send()
            .await?;
        parse_json_response(response).await
    }

    /// Upload one chunk to an already-created upload, retrying with
    /// exponential backoff on transport failure or a 5xx response.
    ///
    /// # Errors
    ///
    /// Returns the last error encountered once the retry budget is spent.
    pub async fn upload_chunk_with_retry(
        &self,
        upload_id: Uuid,
        chunk_index: u64,
        data: &[u8],
    ) -> Result<RelayUpload> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_delay(attempt);
                debug!(upload_id = %upload_id, chunk_index, attempt, delay_ms = delay.as_millis() as u64, "retrying relay chunk upload");
                tokio::time::sleep(delay).await;
            }
            match self.upload_chunk(upload_id, chunk_index, data).await {
                Ok(upload) => return Ok(upload),
                Err(err) if Self::is_retryable(&err) && attempt < self.max_retries => {
                    warn!(upload_id = %upload_id, chunk_index, attempt, error = %err, "relay chunk upload failed, will retry");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.expect("loop always assigns an error before exhausting retries"))
    }

    async fn upload_chunk(&self, upload_id: Uuid, chunk_index: u64, data: &[u8]) -> Result<RelayUpload> {
        let response = self
            .http
            .post(self.url("/api/relay/upload"))
            .header("x-upload-id", upload_id.to_string())
            .header("x-chunk-index", chunk_index.to_string())
            .body(data.to_vec())
            .send()
            .await?;
        parse_json_response(response).await
    }

    fn is_retryable(err: &RelayError) -> bool {
        matches!(
            err,
            RelayError::Request(_) | RelayError::UnexpectedStatus(_) | RelayError::Io(_)
        )
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.retry_base_delay.as_millis() as u64;
        let scaled = base_ms.saturating_mul(1u64 << attempt.min(10));
        Duration::from_millis(scaled).min(self.retry_max_delay)
    }

    /// Fetch an upload's current bookkeeping record.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Request`]/[`RelayError::UnexpectedStatus`].
    pub async fn upload_status(&self, upload_id: Uuid) -> Result<RelayUpload> {
        let response = self.http.get(self.url(&format!("/api/relay/status/{upload_id}"))).send().await?;
        parse_json_response(response).await
    }

    /// Download the full file, or the portion starting at `resume_from`
    /// when resuming a partial download.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Request`]/[`RelayError::UnexpectedStatus`].
    pub async fn download(&self, upload_id: Uuid, resume_from: Option<u64>) -> Result<Vec<u8>> {
        let mut request = self.http.get(self.url(&format!("/api/relay/download/{upload_id}")));
        if let Some(offset) = resume_from {
            request = request.header("range", format!("bytes={offset}-"));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RelayError::UnexpectedStatus(response.status()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Query the relay's health endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Request`]/[`RelayError::UnexpectedStatus`].
    pub async fn health(&self) -> Result<HealthStatus> {
        let response = self.http.get(self.url("/api/relay/status/health")).send().await?;
        parse_json_response(response).await
    }

    /// Register or refresh this peer's presence with the relay.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Request`]/[`RelayError::UnexpectedStatus`].
    pub async fn register_peer(&self, record: &RelayPeerRecord) -> Result<()> {
        let response = self.http.post(self.url("/api/peers/register")).json(record).send().await?;
        expect_success(response).await
    }

    /// Send a heartbeat for an already-registered peer.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Request`]/[`RelayError::UnexpectedStatus`].
    pub async fn heartbeat(&self, peer_id: &PeerId) -> Result<()> {
        let response = self
            .http
            .post(self.url("/api/peers/heartbeat"))
            .query(&[("peerId", peer_id.0.as_str())])
            .send()
            .await?;
        expect_success(response).await
    }

    /// List peers currently registered with the relay.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Request`]/[`RelayError::UnexpectedStatus`].
    pub async fn list_peers(&self, exclude_peer_id: Option<&PeerId>) -> Result<Vec<RelayPeerRecord>> {
        let mut request = self.http.get(self.url("/api/peers/list"));
        if let Some(peer_id) = exclude_peer_id {
            request = request.query(&[("peerId", peer_id.0.as_str())]);
        }
        parse_json_response(request.send().await?).await
    }

    /// Publish this peer's shared file list to the relay's search index.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Request`]/[`RelayError::UnexpectedStatus`].
    pub async fn register_files(&self, peer_id: &PeerId, files: &[RelayFileEntry]) -> Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            #[serde(rename = "peerId")]
            peer_id: &'a PeerId,
            files: &'a [RelayFileEntry],
        }
        let response = self
            .http
            .post(self.url("/api/files/register"))
            .json(&Body { peer_id, files })
            .send()
            .await?;
        expect_success(response).await
    }

    /// Search the relay's flooded-search fallback index.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Request`]/[`RelayError::UnexpectedStatus`].
    pub async fn search(&self, query: &str, exclude_sender: Option<&PeerId>) -> Result<Vec<RelayFileEntry>> {
        let mut request = self.http.get(self.url("/api/files/search")).query(&[("q", query)]);
        if let Some(sender) = exclude_sender {
            request = request.query(&[("excludeSender", sender.0.as_str())]);
        }
        parse_json_response(request.send().await?).await
    }

    /// Create a PIN rendezvous record as a fallback for LAN broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Request`]/[`RelayError::UnexpectedStatus`].
    pub async fn create_pin(
        &self,
        owner_peer_id: &PeerId,
        file_ref: RelayFileRef,
        lifetime_secs: Option<u64>,
    ) -> Result<RelayPinRecord> {
        #[derive(Serialize)]
        struct Body {
            #[serde(rename = "ownerPeerId")]
            owner_peer_id: PeerId,
            #[serde(rename = "fileRef")]
            file_ref: RelayFileRef,
            #[serde(rename = "lifetimeSecs")]
            lifetime_secs: Option<u64>,
        }
        let response = self
            .http
            .post(self.url("/api/pin/create"))
            .json(&Body {
                owner_peer_id: owner_peer_id.clone(),
                file_ref,
                lifetime_secs,
            })
            .send()
            .await?;
        parse_json_response(response).await
    }

    /// Resolve a PIN code to its file reference.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PinNotFound`], mapped from a 404 response, or
    /// [`RelayError::Request`]/[`RelayError::UnexpectedStatus`] otherwise.
    pub async fn find_pin(&self, pin: u32) -> Result<RelayPinRecord> {
        let response = self
            .http
            .get(self.url("/api/pin/find"))
            .query(&[("pin", pin.to_string())])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RelayError::PinNotFound(pin));
        }
        parse_json_response(response).await
    }
}

async fn parse_json_response<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(RelayError::UnexpectedStatus(response.status()));
    }
    Ok(response.json::<T>().await?)
}

async fn expect_success(response: reqwest::Response) -> Result<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(RelayError::UnexpectedStatus(response.status()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_exponentially_and_saturates() {
        let client = RelayClient::new("http://localhost").with_retry_policy(
            8,
            Duration::from_millis(100),
            Duration::from_millis(900),
        );
        assert_eq!(client.retry_delay(0), Duration::from_millis(100));
        assert_eq!(client.retry_delay(1), Duration::from_millis(200));
        assert_eq!(client.retry_delay(2), Duration::from_millis(400));
        // Saturates at retry_max_delay rather than continuing to grow.
        assert_eq!(client.retry_delay(5), Duration::from_millis(900));
    }
}
