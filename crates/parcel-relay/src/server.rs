//! Axum router implementing the relay's HTTP API: chunked upload/download,
//! a peer registry, a flooded-search fallback index, and PIN rendezvous.

use crate::error::RelayError;
use crate::state::{RelayState, now_secs};
use crate::types::{
    HealthStatus, RelayFileEntry, RelayFileRef, RelayPeerRecord, RelayPinRecord, RelayUpload,
};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parcel_discovery::PeerId;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

/// Default lifetime applied to an upload when the uploader doesn't specify
/// one, in seconds.
const DEFAULT_UPLOAD_EXPIRY_SECS: u64 = 600;
/// Default PIN lifetime, in seconds.
const DEFAULT_PIN_LIFETIME_SECS: u64 = 600;

/// Build the relay's router over `state`.
#[must_use]
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/api/relay/upload", post(upload_chunk))
        .route("/api/relay/download/{upload_id}", get(download))
        .route("/api/relay/status/{upload_id}", get(upload_status))
        .route("/api/relay/status/health", get(health))
        .route("/api/peers/register", post(register_peer))
        .route("/api/peers/list", get(list_peers))
        .route("/api/peers/heartbeat", post(heartbeat))
        .route("/api/files/register", post(register_files))
        .route("/api/files/search", get(search_files))
        .route("/api/pin/create", post(create_pin))
        .route("/api/pin/find", get(find_pin))
        .with_state(state)
}

/// Default interval for sweeping expired uploads and pins.
pub const UPLOAD_AND_PIN_SWEEP_INTERVAL: Duration = Duration::from_secs(600);
/// Default interval for sweeping stale peers: peers churn much faster than
/// uploads or pins, so they're swept on their own, shorter cadence.
pub const PEER_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Run the upload/pin sweeper and the peer sweeper forever, each on its own
/// tick. Never returns; spawn with `tokio::spawn(run_sweepers(state))`.
pub async fn run_sweepers(state: RelayState) {
    run_sweepers_with_intervals(state, UPLOAD_AND_PIN_SWEEP_INTERVAL, PEER_SWEEP_INTERVAL).await;
}

/// [`run_sweepers`] with explicit intervals, for tests that can't afford to
/// wait on the real-world defaults.
pub async fn run_sweepers_with_intervals(state: RelayState, upload_and_pin_period: Duration, peer_period: Duration) {
    let mut upload_and_pin_ticker = tokio::time::interval(upload_and_pin_period);
    let mut peer_ticker = tokio::time::interval(peer_period);
    loop {
        tokio::select! {
            _ = upload_and_pin_ticker.tick() => {
                state.sweep_expired_uploads();
                state.sweep_expired_pins();
            }
            _ = peer_ticker.tick() => {
                state.sweep_stale_peers();
            }
        }
    }
}

struct AppError(RelayError);

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RelayError::UploadNotFound(_) | RelayError::PinNotFound(_) => StatusCode::NOT_FOUND,
            RelayError::UploadExpired(_) => StatusCode::GONE,
            RelayError::BadRequest(_) | RelayError::InvalidRange(_) => StatusCode::BAD_REQUEST,
            RelayError::PinSpaceExhausted => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::Io(_) | RelayError::Request(_) | RelayError::UnexpectedStatus(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.0.to_string()).into_response()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn require_header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, AppError> {
    header_str(headers, name).ok_or_else(|| AppError(RelayError::BadRequest(format!("missing header {name}"))))
}

/// Upload one chunk. The very first call for a transfer omits
/// `x-upload-id` and instead carries `x-file-name`, `x-total-size` and
/// `x-chunk-size`; the relay creates the upload and returns its generated
/// id in the response body. Every later chunk carries that `x-upload-id`.
async fn upload_chunk(
    State(state): State<RelayState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<RelayUpload>, AppError> {
    let chunk_index: u64 = require_header(&headers, "x-chunk-index")?
        .parse()
        .map_err(|_| AppError(RelayError::BadRequest("invalid x-chunk-index".to_string())))?;

    let upload_id = match header_str(&headers, "x-upload-id") {
        Some(raw) => Uuid::parse_str(raw)
            .map_err(|_| AppError(RelayError::BadRequest("invalid x-upload-id".to_string())))?,
        None => {
            let file_name = require_header(&headers, "x-file-name")?.to_string();
            let total_size: u64 = require_header(&headers, "x-total-size")?
                .parse()
                .map_err(|_| AppError(RelayError::BadRequest("invalid x-total-size".to_string())))?;
            let chunk_size: u64 = require_header(&headers, "x-chunk-size")?
                .parse()
                .map_err(|_| AppError(RelayError::BadRequest("invalid x-chunk-size".to_string())))?;
            state
                .create_upload(file_name, total_size, chunk_size, DEFAULT_UPLOAD_EXPIRY_SECS)?
                .upload_id
        }
    };

    let upload = state.write_chunk(upload_id, chunk_index, &body)?;
    Ok(Json(upload))
}

struct RangeSpec {
    start: u64,
    end: Option<u64>,
}

fn parse_range(header_value: &str, total: u64) -> Result<RangeSpec, RelayError> {
    let spec = header_value
        .strip_prefix("bytes=")
        .ok_or_else(|| RelayError::InvalidRange(header_value.to_string()))?;
    let (start_str, end_str) = spec
        .split_once('-')
        .ok_or_else(|| RelayError::InvalidRange(header_value.to_string()))?;
    let start: u64 = start_str
        .parse()
        .map_err(|_| RelayError::InvalidRange(header_value.to_string()))?;
    let end = if end_str.is_empty() {
        None
    } else {
        Some(end_str.parse().map_err(|_| RelayError::InvalidRange(header_value.to_string()))?)
    };
    if start >= total {
        return Err(RelayError::InvalidRange(header_value.to_string()));
    }
    Ok(RangeSpec { start, end })
}

async fn download(
    State(state): State<RelayState>,
    Path(upload_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let upload = state.get_upload(upload_id)?;
    state.record_download(upload_id).ok();

    let range = header_str(&headers, "range")
        .map(|value| parse_range(value, upload.stored_size))
        .transpose()?;

    let mut file = tokio::fs::File::open(state.upload_file_path(upload_id))
        .await
        .map_err(RelayError::Io)?;

    let (start, end, status) = match range {
        Some(r) => {
            let end = r.end.unwrap_or(upload.stored_size.saturating_sub(1)).min(upload.stored_size.saturating_sub(1));
            (r.start, end, StatusCode::PARTIAL_CONTENT)
        }
        None => (0, upload.stored_size.saturating_sub(1), StatusCode::OK),
    };

    file.seek(std::io::SeekFrom::Start(start)).await.map_err(RelayError::Io)?;
    let len = end.saturating_sub(start) + 1;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await.map_err(RelayError::Io)?;

    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len.to_string());
    if status == StatusCode::PARTIAL_CONTENT {
        response = response.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, upload.stored_size),
        );
    }
    Ok(response.body(Body::from(buf)).expect("valid response"))
}

async fn upload_status(
    State(state): State<RelayState>,
    Path(upload_id): Path<Uuid>,
) -> Result<Json<RelayUpload>, AppError> {
    Ok(Json(state.get_upload(upload_id)?))
}

async fn health(State(state): State<RelayState>) -> Json<HealthStatus> {
    let (active_uploads, active_peers) = state.counts();
    Json(HealthStatus {
        status: "ok".to_string(),
        active_uploads,
        active_peers,
    })
}

async fn register_peer(State(state): State<RelayState>, Json(mut record): Json<RelayPeerRecord>) {
    record.last_heartbeat = now_secs();
    state.upsert_peer(record);
}

#[derive(Deserialize)]
struct PeerListQuery {
    #[serde(rename = "peerId")]
    peer_id: Option<PeerId>,
}

async fn list_peers(
    State(state): State<RelayState>,
    Query(query): Query<PeerListQuery>,
) -> Json<Vec<RelayPeerRecord>> {
    Json(state.list_peers(query.peer_id.as_ref()))
}

#[derive(Deserialize)]
struct HeartbeatQuery {
    #[serde(rename = "peerId")]
    peer_id: PeerId,
}

async fn heartbeat(
    State(state): State<RelayState>,
    Query(query): Query<HeartbeatQuery>,
) -> Result<StatusCode, AppError> {
    if let Some(mut record) = state.list_peers(None).into_iter().find(|p| p.peer_id == query.peer_id) {
        record.last_heartbeat = now_secs();
        state.upsert_peer(record);
        Ok(StatusCode::OK)
    } else {
        Err(AppError(RelayError::BadRequest("peer not registered".to_string())))
    }
}

#[derive(Deserialize)]
struct RegisterFilesBody {
    #[serde(rename = "peerId")]
    peer_id: PeerId,
    files: Vec<RelayFileEntry>,
}

async fn register_files(State(state): State<RelayState>, Json(body): Json<RegisterFilesBody>) {
    state.register_files(body.peer_id, body.files);
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    #[serde(rename = "excludeSender")]
    exclude_sender: Option<PeerId>,
}

async fn search_files(
    State(state): State<RelayState>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<RelayFileEntry>> {
    Json(state.search_files(&query.q, query.exclude_sender.as_ref()))
}

#[derive(Deserialize)]
struct CreatePinBody {
    #[serde(rename = "ownerPeerId")]
    owner_peer_id: PeerId,
    #[serde(rename = "fileRef")]
    file_ref: RelayFileRef,
    #[serde(rename = "lifetimeSecs")]
    lifetime_secs: Option<u64>,
}

async fn create_pin(
    State(state): State<RelayState>,
    Json(body): Json<CreatePinBody>,
) -> Result<Json<RelayPinRecord>, AppError> {
    let lifetime = body.lifetime_secs.unwrap_or(DEFAULT_PIN_LIFETIME_SECS);
    Ok(Json(state.create_pin(body.file_ref, body.owner_peer_id, lifetime)?))
}

#[derive(Deserialize)]
struct FindPinQuery {
    pin: u32,
}

async fn find_pin(
    State(state): State<RelayState>,
    Query(query): Query<FindPinQuery>,
) -> Result<Json<RelayPinRecord>, AppError> {
    Ok(Json(state.find_pin(query.pin)?))
}
