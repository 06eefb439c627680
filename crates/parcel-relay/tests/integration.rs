//! End-to-end tests driving a real relay server over HTTP with
//! [`RelayClient`], rather than dispatching requests through the router
//! in-process. These exercise the parts unit tests in `src/` can't: actual
//! socket I/O, header round-tripping through `reqwest`, and resumable
//! range downloads.

use parcel_discovery::PeerId;
use parcel_relay::{RelayClient, RelayFileRef, RelayPeerRecord, RelayState};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

/// Bind the relay router to an ephemeral port and serve it on a background
/// task, returning a client already pointed at it.
async fn spawn_relay() -> (RelayClient, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let state = RelayState::new(dir.path().to_path_buf()).unwrap();
    let app = parcel_relay::router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = RelayClient::new(format!("http://{addr}"));
    (client, dir)
}

#[tokio::test]
async fn uploads_and_downloads_a_file_in_chunks() {
    let (client, _dir) = spawn_relay().await;
    let sender = PeerId("alice".to_string());

    let chunk_a = vec![1u8; 64];
    let chunk_b = vec![2u8; 32];
    let total_size = (chunk_a.len() + chunk_b.len()) as u64;

    let upload = client
        .start_upload("movie.mkv", total_size, chunk_a.len() as u64, &sender, &chunk_a)
        .await
        .unwrap();
    let upload = client.upload_chunk_with_retry(upload.upload_id, 1, &chunk_b).await.unwrap();
    assert_eq!(upload.stored_size, total_size);

    let downloaded = client.download(upload.upload_id, None).await.unwrap();
    assert_eq!(downloaded.len(), total_size as usize);
    assert_eq!(&downloaded[..64], chunk_a.as_slice());
    assert_eq!(&downloaded[64..], chunk_b.as_slice());
}

#[tokio::test]
async fn resumes_a_download_from_a_byte_offset() {
    let (client, _dir) = spawn_relay().await;
    let sender = PeerId("bob".to_string());
    let data = vec![9u8; 100];

    let upload = client.start_upload("blob.bin", 100, 100, &sender, &data).await.unwrap();
    let resumed = client.download(upload.upload_id, Some(40)).await.unwrap();
    assert_eq!(resumed.len(), 60);
    assert_eq!(resumed, &data[40..]);
}

#[tokio::test]
async fn reuploading_a_chunk_index_does_not_double_count_stored_size() {
    let (client, _dir) = spawn_relay().await;
    let sender = PeerId("carol".to_string());
    let chunk = vec![5u8; 16];

    let upload = client.start_upload("retry.bin", 32, 16, &sender, &chunk).await.unwrap();
    let retried = client.upload_chunk_with_retry(upload.upload_id, 0, &chunk).await.unwrap();
    assert_eq!(retried.stored_size, 16);
}

#[tokio::test]
async fn peer_registry_round_trips_through_register_and_list() {
    let (client, _dir) = spawn_relay().await;
    let peer_id = PeerId("dave".to_string());
    let record = RelayPeerRecord {
        peer_id: peer_id.clone(),
        display_name: "Dave's Laptop".to_string(),
        host: "192.0.2.10".to_string(),
        port: 8420,
        public_key: [0u8; 32],
        last_heartbeat: now_secs(),
    };

    client.register_peer(&record).await.unwrap();
    let peers = client.list_peers(None).await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].peer_id, peer_id);

    client.heartbeat(&peer_id).await.unwrap();
    let health = client.health().await.unwrap();
    assert_eq!(health.active_peers, 1);
}

#[tokio::test]
async fn pin_rendezvous_resolves_until_expiry_then_404s() {
    let (client, _dir) = spawn_relay().await;
    let owner = PeerId("erin".to_string());
    let file_ref = RelayFileRef {
        upload_id: uuid::Uuid::new_v4(),
        file_name: "report.pdf".to_string(),
        file_size: 4096,
        file_hash: None,
        download_url: "/api/relay/download/placeholder".to_string(),
        sender_id: owner.clone(),
        sender_name: Some("Erin".to_string()),
        recipient_id: None,
        encrypted: true,
        encryption_algorithm: Some("chacha20poly1305".to_string()),
        mime_type: Some("application/pdf".to_string()),
        expiry_at: now_secs() + 600,
        download_count: 0,
        max_downloads: None,
    };

    let created = client.create_pin(&owner, file_ref.clone(), Some(600)).await.unwrap();
    let found = client.find_pin(created.pin).await.unwrap();
    assert_eq!(found.file_ref.file_name, "report.pdf");

    let expired = client.create_pin(&owner, file_ref, Some(0)).await.unwrap();
    assert!(client.find_pin(expired.pin).await.is_err());
}

#[tokio::test]
async fn search_index_finds_files_by_substring_and_excludes_sender() {
    let (client, _dir) = spawn_relay().await;
    let owner = PeerId("frank".to_string());
    let files = vec![parcel_relay::RelayFileEntry {
        logical_name: "Quarterly-Report.pdf".to_string(),
        size: 2048,
        file_hash: [1u8; 32],
        owner_peer_id: owner.clone(),
    }];

    client.register_files(&owner, &files).await.unwrap();
    let hits = client.search("report", None).await.unwrap();
    assert_eq!(hits.len(), 1);

    let excluded = client.search("report", Some(&owner)).await.unwrap();
    assert!(excluded.is_empty());
}
