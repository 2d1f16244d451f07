//! HTTP-level tests for the portal server.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use doc_portal::config::Config;
use doc_portal::dataset::Dataset;
use doc_portal::refresh::refresh_from_dataset;
use doc_portal::server::run_server;
use doc_portal::store::{MemoryStore, ProjectStore};
use doc_portal::worker::{shutdown_channel, ShutdownSender};

const DATASET: &str = r#"
ssdc-ms:
  - handle: SSDC-MS-001
    title: Level 1 Pipeline Overview
    project_id: ssdc-ms-001
    github_url: https://github.com/SPHEREx/ssdc-ms-001
    issues: 2
    commit_date: 2022-03-01T12:00:00Z
    ssdc_author: Jane Doe
    project_author: John Roe
    difficulty: Medium
    pipeline_level: L1
    diagram_index: 3
  - handle: SSDC-MS-010
    title: Spectral Calibration
    project_id: ssdc-ms-010
    github_url: https://github.com/SPHEREx/ssdc-ms-010
    issues: 9
    commit_date: 2022-04-01T12:00:00Z
    ssdc_author: Ada Lead
    project_author: Sam Contact
    difficulty: High
    pipeline_level: 2
    diagram_index: 7
  - handle: SSDC-MS-002
    title: Astrometry
    project_id: ssdc-ms-002
    github_url: https://github.com/SPHEREx/ssdc-ms-002
    commit_date: 2022-02-01T12:00:00Z
    ssdc_author: Grace Hopper
    project_author: Sam Contact
    difficulty: Low
    pipeline_level: L3
    diagram_index: 1
ssdc-if:
  - handle: SSDC-IF-001
    title: IRSA Interface
    project_id: ssdc-if-001
    github_url: https://github.com/SPHEREx/ssdc-if-001
    commit_date: 2022-01-01T00:00:00Z
    ssdc_author: Jane Doe
    interface_partner: IRSA
"#;

/// Find a free port by binding to port 0.
fn find_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Wait for the server to become ready by polling /health.
async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client
            .get(format!("http://127.0.0.1:{}/health", port))
            .send()
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Server did not start within 5 seconds");
}

struct TestServer {
    base: String,
    shutdown: ShutdownSender,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn stop(self) {
        self.shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

async fn start_server() -> TestServer {
    let port = find_free_port();
    let mut config = Config::default();
    config.server.bind = format!("127.0.0.1:{}", port);
    config.app.name = "test-portal".to_string();

    let store = Arc::new(MemoryStore::new());
    let dataset = Dataset::from_yaml_str(DATASET).unwrap();
    let summary = refresh_from_dataset(&dataset, "https://docs.example", store.as_ref(), true)
        .await
        .unwrap();
    store.record_refresh(&summary).await.unwrap();

    let (shutdown, token) = shutdown_channel();
    let handle = tokio::spawn(async move { run_server(&config, store, token).await });
    wait_for_server(port).await;

    TestServer {
        base: format!("http://127.0.0.1:{}", port),
        shutdown,
        handle,
    }
}

#[tokio::test]
async fn test_health() {
    let server = start_server().await;

    let resp = reqwest::get(format!("{}/health", server.base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    server.stop().await;
}

#[tokio::test]
async fn test_index_lists_series_counts() {
    let server = start_server().await;

    let resp = reqwest::get(format!("{}/", server.base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let html = resp.text().await.unwrap();
    assert!(html.contains("Pipeline Module Specifications"));
    assert!(html.contains("3 documents"));
    assert!(html.contains("1 documents"));
    assert!(html.contains("test-portal"));

    server.stop().await;
}

#[tokio::test]
async fn test_series_page_default_sort_is_natural_handle_order() {
    let server = start_server().await;

    let html = reqwest::get(format!("{}/ssdc-ms", server.base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let p1 = html.find("SSDC-MS-001").unwrap();
    let p2 = html.find("SSDC-MS-002").unwrap();
    let p10 = html.find("SSDC-MS-010").unwrap();
    assert!(p1 < p2 && p2 < p10);
    assert!(html.contains("L3"));

    server.stop().await;
}

#[tokio::test]
async fn test_series_page_sorts_by_column() {
    let server = start_server().await;

    let html = reqwest::get(format!("{}/ssdc-ms?sort=issues&order=desc", server.base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let p1 = html.find("SSDC-MS-001").unwrap();
    let p2 = html.find("SSDC-MS-002").unwrap();
    let p10 = html.find("SSDC-MS-010").unwrap();
    // 9 issues, then 2, then 0.
    assert!(p10 < p1 && p1 < p2);

    // Unknown columns fall back to handle ascending, whatever the order.
    let resp = reqwest::get(format!("{}/ssdc-ms?sort=bogus&order=desc", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let html = resp.text().await.unwrap();
    let p1 = html.find("SSDC-MS-001").unwrap();
    let p2 = html.find("SSDC-MS-002").unwrap();
    let p10 = html.find("SSDC-MS-010").unwrap();
    assert!(p1 < p2 && p2 < p10);

    server.stop().await;
}

#[tokio::test]
async fn test_empty_series_page() {
    let server = start_server().await;

    let resp = reqwest::get(format!("{}/ssdc-op", server.base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().contains("No documents"));

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_series_page_is_404() {
    let server = start_server().await;

    let resp = reqwest::get(format!("{}/ssdc-xx", server.base)).await.unwrap();
    assert_eq!(resp.status(), 404);
    let html = resp.text().await.unwrap();
    assert!(html.contains("Unknown series: ssdc-xx"));

    let resp = reqwest::get(format!("{}/ssdc-ms/extra/path", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn test_api_series() {
    let server = start_server().await;

    let resp = reqwest::get(format!("{}/api/series/ssdc-if", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["series"], "SSDC-IF");
    let docs = body["documents"].as_array().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["handle"], "SSDC-IF-001");
    assert_eq!(docs[0]["details"]["series"], "SSDC-IF");
    assert_eq!(docs[0]["details"]["interface_partner_name"], "IRSA");
    assert_eq!(docs[0]["url"], "https://docs.example/ssdc-if-001");

    server.stop().await;
}

#[tokio::test]
async fn test_api_unknown_series() {
    let server = start_server().await;

    let resp = reqwest::get(format!("{}/api/series/ssdc-xx", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    // Unrouted paths under /api keep the JSON error contract.
    let resp = reqwest::get(format!("{}/api/foo/bar", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("application/json"));
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
    assert!(body["error"]["message"].as_str().unwrap().contains("/api/foo/bar"));

    server.stop().await;
}

#[tokio::test]
async fn test_api_metadata() {
    let server = start_server().await;

    let body: serde_json::Value = reqwest::get(format!("{}/api/metadata", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["name"], "test-portal");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["repository_url"].as_str().unwrap().starts_with("https://"));

    server.stop().await;
}

#[tokio::test]
async fn test_stylesheet() {
    let server = start_server().await;

    let resp = reqwest::get(format!("{}/static/portal.css", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/css"));

    server.stop().await;
}
