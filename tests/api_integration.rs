//! HTTP surface tests
//!
//! Requests go through the full router with a mocked peer address, so client
//! address extraction, country fallback and ingestion all run as in production.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use pinglog::analytics::{Event, EventLog, FileEventLog, PingRecorder};
use pinglog::api::{self, AppState};
use pinglog::config::{AnalyticsConfig, PayloadConfig};
use pinglog::storage::{IdentityStore, SqliteStorage, StorageError, StorageResult};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

const PAYLOAD: &str = r#"{"menu":["soup","bread"]}"#;

struct TestApp {
    router: Router,
    dir: tempfile::TempDir,
}

impl TestApp {
    fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    fn payload_path(&self) -> std::path::PathBuf {
        self.dir.path().join("data.json")
    }

    async fn today_events(&self) -> Vec<Event> {
        let log = FileEventLog::new(self.data_dir());
        let mut events = Vec::new();
        log.scan(Utc::now().date_naive(), &mut |event: Event| events.push(event))
            .await
            .unwrap();
        events
    }
}

async fn sqlite_identities() -> Arc<dyn IdentityStore> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

async fn build_app(identities: Arc<dyn IdentityStore>, write_payload: bool) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let analytics = AnalyticsConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let payload = PayloadConfig {
        data_json_path: dir.path().join("data.json"),
    };
    if write_payload {
        std::fs::write(&payload.data_json_path, PAYLOAD).unwrap();
    }

    let recorder = Arc::new(PingRecorder::from_config(&analytics, identities));
    let state = Arc::new(AppState {
        recorder,
        geoip: None,
        analytics,
        payload,
    });

    let peer: SocketAddr = "203.0.113.5:40000".parse().unwrap();
    let router = api::create_api_router(state).layer(MockConnectInfo(peer));

    TestApp { router, dir }
}

async fn get(router: &Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    get_with_headers(router, uri, &[]).await
}

async fn get_with_headers(
    router: &Router,
    uri: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let mut request = Request::builder().uri(uri);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    let response = router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body.to_vec())
}

#[tokio::test]
async fn test_data_json_serves_payload_and_records_ping() {
    let app = build_app(sqlite_identities().await, true).await;

    let (status, headers, body) = get(&app.router, "/data.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, PAYLOAD.as_bytes());
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");

    let events = app.today_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].identifier.len(), 16);
    assert!(events[0].identifier.chars().all(|c| c.is_ascii_hexdigit()));
    // No GeoIP database configured
    assert_eq!(events[0].country, "XX");

    // Served again, but suppressed by the dedup window
    let (status, _, _) = get(&app.router, "/data.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.today_events().await.len(), 1);
}

#[tokio::test]
async fn test_trusted_uid_is_logged_and_counted() {
    let app = build_app(sqlite_identities().await, true).await;

    let (status, _, _) = get(&app.router, "/data.json?uid=dev123").await;
    assert_eq!(status, StatusCode::OK);

    let events = app.today_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].identifier, "dev123");

    let (status, _, body) = get(&app.router, "/api/total_users").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_users"], 1);
}

#[tokio::test]
async fn test_repeated_uid_uses_first_value_and_serves_payload() {
    let app = build_app(sqlite_identities().await, true).await;

    let (status, _, body) = get(&app.router, "/data.json?uid=a&uid=b").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, PAYLOAD.as_bytes());

    let events = app.today_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].identifier, "a");
}

#[tokio::test]
async fn test_unrelated_query_parameters_are_ignored() {
    let app = build_app(sqlite_identities().await, true).await;

    let (status, _, body) = get(&app.router, "/data.json?v=2&uid=dev9&lang=nl").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, PAYLOAD.as_bytes());

    let events = app.today_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].identifier, "dev9");
}

#[tokio::test]
async fn test_missing_payload_returns_404_but_still_records() {
    let app = build_app(sqlite_identities().await, false).await;

    let (status, _, body) = get(&app.router, "/data.json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "data.json not found");

    assert_eq!(app.today_events().await.len(), 1);
}

#[tokio::test]
async fn test_forwarded_address_separates_clients() {
    let app = build_app(sqlite_identities().await, true).await;

    get_with_headers(&app.router, "/data.json", &[("x-forwarded-for", "198.51.100.1, 10.0.0.1")]).await;
    get_with_headers(&app.router, "/data.json", &[("x-forwarded-for", "198.51.100.2")]).await;

    let events = app.today_events().await;
    assert_eq!(events.len(), 2);
    assert_ne!(events[0].identifier, events[1].identifier);
}

#[tokio::test]
async fn test_debug_ip_reports_resolution() {
    let app = build_app(sqlite_identities().await, true).await;

    let (status, _, body) = get_with_headers(
        &app.router,
        "/debug/ip",
        &[("x-forwarded-for", "198.51.100.7, 10.0.0.1")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["raw_ip"], "198.51.100.7");
    assert_eq!(json["remote_addr"], "203.0.113.5");
    assert_eq!(json["x_forwarded_for"], "198.51.100.7, 10.0.0.1");
    assert_eq!(json["country"], "XX");
    assert_eq!(json["geoip_available"], false);
}

#[tokio::test]
async fn test_summary_endpoint_reflects_new_pings() {
    let app = build_app(sqlite_identities().await, true).await;

    get(&app.router, "/data.json?uid=alpha").await;
    get(&app.router, "/data.json?uid=beta").await;

    let (status, headers, body) = get(&app.router, "/api/summary?days=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");

    let json: Value = serde_json::from_slice(&body).unwrap();
    let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
    assert_eq!(json[&today]["unique_users"], 2);
    assert_eq!(json[&today]["countries"]["XX"], 2);
    assert!(app.data_dir().join("summary.json").exists());

    // A later ping makes the artifact stale and is picked up
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    get(&app.router, "/data.json?uid=gamma").await;
    let (_, _, body) = get(&app.router, "/api/summary").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json[&today]["unique_users"], 3);
}

#[tokio::test]
async fn test_health_reports_components() {
    let app = build_app(sqlite_identities().await, true).await;

    let (status, _, body) = get(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["geoip"], false);
    assert_eq!(json["data_json"], true);
    assert_eq!(json["users_db"], true);

    std::fs::remove_file(app.payload_path()).unwrap();
    let (_, _, body) = get(&app.router, "/health").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["data_json"], false);
}

struct UnavailableStore;

#[async_trait]
impl IdentityStore for UnavailableStore {
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn insert_if_absent(&self, _uid: &str, _first_seen: i64) -> StorageResult<bool> {
        Err(StorageError::Other(anyhow::anyhow!("database is locked")))
    }

    async fn count(&self) -> StorageResult<u64> {
        Err(StorageError::Other(anyhow::anyhow!("database is locked")))
    }
}

#[tokio::test]
async fn test_identity_store_failure_degrades_gracefully() {
    let app = build_app(Arc::new(UnavailableStore), true).await;

    // Payload still served, event still logged
    let (status, _, body) = get(&app.router, "/data.json?uid=dev123").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, PAYLOAD.as_bytes());
    assert_eq!(app.today_events().await.len(), 1);

    let (status, _, body) = get(&app.router, "/api/total_users").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_users"], 0);

    let (_, _, body) = get(&app.router, "/health").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["users_db"], false);
}
