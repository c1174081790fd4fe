//! End-to-end tests of the reqwest backends against a fake axum server

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{post, put};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uploadkit::integrity::IntegrityVerifier;
use uploadkit::orchestrator::{
    ConfirmationBackend, ConfirmationError, ConfirmationKind, ConfirmationRequest,
    HttpConfirmationBackend, RunOptions,
};
use uploadkit::queue::{ReplayError, RequestExecutor};
use uploadkit::transfer::{
    DeferredStorageCall, HttpStorageBackend, HttpTransport, ObjectPayload, TransferClient,
    TransferConfig, TransferError, TransferOptions, TransferProgress,
};
use uploadkit::{CandidateFile, EntityContext, UploadOrchestrator, WorkflowKind};

#[derive(Default)]
struct FakeServer {
    base_url: Mutex<String>,
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    registrations: Mutex<Vec<Value>>,
}

type Shared = Arc<FakeServer>;

#[derive(Deserialize)]
struct KeyQuery {
    key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlBody {
    file_name: String,
    category: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmBody {
    object_key: String,
    integrity_tag: String,
    size: u64,
}

async fn upload_url(State(server): State<Shared>, Json(body): Json<UploadUrlBody>) -> Json<Value> {
    let base = server.base_url.lock().clone();
    let key = format!("{}/{}", body.category, body.file_name);
    Json(json!({
        "writeUrl": format!("{base}/put/{key}"),
        "objectKey": key,
        "publicReadUrl": format!("{base}/objects/{key}"),
        "expiresAt": Utc::now() + ChronoDuration::minutes(15),
    }))
}

async fn put_object(
    State(server): State<Shared>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let tag = IntegrityVerifier::calculate_tag(&body);
    server.objects.lock().insert(key, (body.to_vec(), content_type));

    (StatusCode::OK, [(header::ETAG, format!("\"{tag}\""))]).into_response()
}

async fn confirm(State(server): State<Shared>, Json(body): Json<ConfirmBody>) -> Response {
    let base = server.base_url.lock().clone();
    let objects = server.objects.lock();
    match objects.get(&body.object_key) {
        Some((content, _)) if content.len() as u64 == body.size => Json(json!({
            "objectKey": body.object_key,
            "publicReadUrl": format!("{base}/objects/{}", body.object_key),
            "integrityTag": body.integrity_tag,
            "byteLength": body.size,
            "completedAt": Utc::now(),
        }))
        .into_response(),
        Some(_) => (StatusCode::BAD_REQUEST, "size mismatch").into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn metadata(State(server): State<Shared>, Query(query): Query<KeyQuery>) -> Response {
    let objects = server.objects.lock();
    match objects.get(&query.key) {
        Some((content, content_type)) => Json(json!({
            "objectKey": query.key,
            "size": content.len(),
            "contentType": content_type,
            "integrityTag": IntegrityVerifier::calculate_tag(content),
            "lastModified": Utc::now(),
        }))
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_object(State(server): State<Shared>, Query(query): Query<KeyQuery>) -> StatusCode {
    match server.objects.lock().remove(&query.key) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

async fn register(State(server): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut registrations = server.registrations.lock();
    registrations.push(body.clone());
    Json(json!({
        "attachmentId": format!("att-{}", registrations.len()),
        "objectKey": body["objectKey"],
    }))
}

async fn import_unavailable() -> (StatusCode, &'static str) {
    (StatusCode::SERVICE_UNAVAILABLE, "import workers busy")
}

async fn spawn_server() -> (String, Shared) {
    let server: Shared = Arc::new(FakeServer::default());
    let app = Router::new()
        .route("/storage/upload-url", post(upload_url))
        .route("/storage/confirm", post(confirm))
        .route("/storage/objects/metadata", axum::routing::get(metadata))
        .route("/storage/objects", axum::routing::delete(delete_object))
        .route("/put/*key", put(put_object))
        .route("/attachments/register", post(register))
        .route("/imports/process", post(import_unavailable))
        .with_state(server.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    *server.base_url.lock() = base_url.clone();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (base_url, server)
}

fn client(base_url: &str) -> TransferClient {
    let backend = HttpStorageBackend::new(base_url, Duration::from_secs(5)).unwrap();
    TransferClient::new(
        Arc::new(backend),
        Arc::new(HttpTransport::default()),
        TransferConfig::default(),
    )
}

#[tokio::test]
async fn test_single_shot_over_http() {
    let (base_url, server) = spawn_server().await;
    let client = client(&base_url);
    let content: Vec<u8> = (0..200_000).map(|i| (i % 256) as u8).collect();
    let payload = ObjectPayload::new("scan.pdf", "application/pdf", content.clone());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let options = TransferOptions::new("documents")
        .on_progress(Arc::new(move |p: TransferProgress| sink.lock().push(p.uploaded_bytes)));

    let stored = client.transfer(&payload, &options).await.unwrap();

    assert_eq!(stored.object_key, "documents/scan.pdf");
    assert_eq!(stored.byte_length, 200_000);
    // The ETag header is the integrity tag
    assert_eq!(stored.integrity_tag, IntegrityVerifier::calculate_tag(&content));
    assert_eq!(seen.lock().last().copied(), Some(200_000));
    assert_eq!(server.objects.lock()["documents/scan.pdf"].0, content);

    let metadata = client.object_metadata(&stored.object_key).await.unwrap();
    assert_eq!(metadata.size, stored.byte_length);
    assert_eq!(metadata.content_type, "application/pdf");
}

#[tokio::test]
async fn test_delete_twice_over_http() {
    let (base_url, _server) = spawn_server().await;
    let client = client(&base_url);
    let payload = ObjectPayload::new("note.txt", "text/plain", b"remember".to_vec());
    let stored = client
        .transfer(&payload, &TransferOptions::new("documents"))
        .await
        .unwrap();

    client.delete_object(&stored.object_key).await.unwrap();
    let err = client.delete_object(&stored.object_key).await.unwrap_err();
    assert!(matches!(err, TransferError::NotFound(_)));

    let err = client.object_metadata(&stored.object_key).await.unwrap_err();
    assert!(matches!(err, TransferError::NotFound(_)));
}

#[tokio::test]
async fn test_confirmation_record_passed_through() {
    let (base_url, server) = spawn_server().await;
    let storage = client(&base_url);
    let confirmations =
        Arc::new(HttpConfirmationBackend::new(&base_url, Duration::from_secs(5)).unwrap());
    let orchestrator = UploadOrchestrator::new(Arc::new(storage), confirmations);

    let mut content = b"%PDF-1.4\n".to_vec();
    content.extend((0..4096).map(|i| (i % 200) as u8));
    let file = CandidateFile::new("contract.pdf", "application/pdf", content);

    let result = orchestrator
        .run(
            WorkflowKind::Document,
            &EntityContext::for_deal("deal-9").uploaded_by("u-1"),
            &file,
            &RunOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.confirmation["attachmentId"], "att-1");
    assert_eq!(result.confirmation["objectKey"], "documents/contract.pdf");

    let registrations = server.registrations.lock();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0]["context"]["dealId"], "deal-9");
    assert_eq!(registrations[0]["size"], file.size);
}

#[tokio::test]
async fn test_confirmation_rejected_by_server() {
    let (base_url, _server) = spawn_server().await;
    let backend = HttpConfirmationBackend::new(&base_url, Duration::from_secs(5)).unwrap();
    let request = ConfirmationRequest {
        kind: ConfirmationKind::TriggerImport,
        object_key: "imports/leads.csv".into(),
        payload: json!({ "objectKey": "imports/leads.csv" }),
    };

    let err = backend.confirm(&request).await.unwrap_err();
    match err {
        ConfirmationError::Rejected {
            status,
            message,
            object_key,
        } => {
            assert_eq!(status, 503);
            assert_eq!(message, "import workers busy");
            assert_eq!(object_key, "imports/leads.csv");
        }
        other => panic!("Expected rejection, got {other:?}"),
    }

    // Replayed, the same call is worth retrying later
    let replayed = backend.execute(&request.to_queued()).await;
    assert!(matches!(replayed, Err(ReplayError::Transient(_))));
}

#[tokio::test]
async fn test_replay_delete_over_http() {
    let (base_url, server) = spawn_server().await;
    let backend = HttpStorageBackend::new(&base_url, Duration::from_secs(5)).unwrap();
    server
        .objects
        .lock()
        .insert("documents/old.txt".into(), (b"old".to_vec(), "text/plain".into()));

    let delete = DeferredStorageCall::Delete {
        object_key: "documents/old.txt".into(),
    }
    .to_queued();

    backend.execute(&delete).await.unwrap();
    assert!(server.objects.lock().is_empty());

    // Now missing: a client error is not retried
    let again = backend.execute(&delete).await;
    assert!(matches!(again, Err(ReplayError::Permanent(_))));
}
