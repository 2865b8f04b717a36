//! Client tests against a local mock Firestore.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use serial_test::serial;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::types::ToFirestoreValue;

const DOCS: &str = "/v1/projects/test-project/databases/testdb/documents";

fn test_config() -> FirestoreConfig {
    FirestoreConfig {
        project_id: "test-project".to_string(),
        database_id: "testdb".to_string(),
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        retry: RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        emulator_host: None,
    }
}

async fn client(server: &MockServer) -> FirestoreClient {
    FirestoreClient::with_origin(test_config(), &server.uri()).unwrap()
}

#[test]
fn test_error_from_http_status() {
    assert!(matches!(FirestoreError::from_http_status(429, "x"), FirestoreError::RateLimited(_)));
    assert!(matches!(FirestoreError::from_http_status(503, "x"), FirestoreError::ServerError(503, _)));
    assert!(matches!(FirestoreError::from_http_status(404, "x"), FirestoreError::NotFound(_)));
    assert!(matches!(FirestoreError::from_http_status(409, "x"), FirestoreError::AlreadyExists(_)));
    assert!(matches!(FirestoreError::from_http_status(400, "x"), FirestoreError::RequestFailed(_)));

    assert!(FirestoreError::from_http_status(502, "x").is_retryable());
    assert!(FirestoreError::from_http_status(429, "x").is_retryable());
    assert!(!FirestoreError::from_http_status(403, "x").is_retryable());
    assert_eq!(FirestoreError::RateLimited(1000).http_status(), Some(429));
    assert_eq!(FirestoreError::RateLimited(1000).retry_after_ms(), Some(1000));
}

#[tokio::test]
async fn test_get_document_found_and_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{DOCS}/events/e1")))
        .and(header("authorization", "Bearer owner"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "projects/test-project/databases/testdb/documents/events/e1",
            "fields": {"user_id": {"stringValue": "u1"}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{DOCS}/events/missing")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client(&server).await;
    let doc = client.get_document("events", "e1").await.unwrap().unwrap();
    assert_eq!(doc.id(), Some("e1"));
    assert_eq!(doc.get::<String>("user_id").as_deref(), Some("u1"));

    assert!(client.get_document("events", "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_document_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{DOCS}/rois")))
        .and(query_param("documentId", "r1"))
        .respond_with(ResponseTemplate::new(409).set_body_string("ALREADY_EXISTS"))
        .mount(&server)
        .await;

    let client = client(&server).await;
    let mut fields = HashMap::new();
    fields.insert("name".to_string(), "door".to_firestore_value());
    let err = client.create_document("rois", "r1", fields).await.unwrap_err();
    assert!(matches!(err, FirestoreError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_delete_missing_is_ok() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(format!("{DOCS}/rois/gone")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    client(&server).await.delete_document("rois", "gone").await.unwrap();
}

#[tokio::test]
async fn test_run_query_skips_rows_without_documents() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{DOCS}:runQuery")))
        .and(body_partial_json(json!({
            "structuredQuery": {"from": [{"collectionId": "events"}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"readTime": "2024-01-01T00:00:00Z"},
            {"document": {"name": "x/events/a", "fields": {}}, "readTime": "2024-01-01T00:00:00Z"}
        ])))
        .mount(&server)
        .await;

    let docs = client(&server)
        .await
        .run_query(StructuredQuery::collection("events").limit(5))
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id(), Some("a"));
}

#[tokio::test]
async fn test_list_all_documents_follows_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{DOCS}/whitelist")))
        .and(query_param("pageToken", "next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [{"name": "x/whitelist/bob", "fields": {}}]
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{DOCS}/whitelist")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [{"name": "x/whitelist/alice", "fields": {}}],
            "nextPageToken": "next"
        })))
        .with_priority(2)
        .mount(&server)
        .await;

    let docs = client(&server).await.list_all_documents("whitelist").await.unwrap();
    let ids: Vec<_> = docs.iter().filter_map(|d| d.id()).collect();
    assert_eq!(ids, vec!["alice", "bob"]);
}

#[tokio::test]
async fn test_retry_recovers_from_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{DOCS}/events/e1")))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{DOCS}/events/e1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "x/events/e1"})))
        .with_priority(2)
        .mount(&server)
        .await;

    let client = client(&server).await;
    let doc = client
        .with_retry("get_event", || client.get_document("events", "e1"))
        .await
        .unwrap();
    assert!(doc.is_some());
}

#[tokio::test]
async fn test_unauthorized_without_expiry_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{DOCS}/events/e1")))
        .respond_with(ResponseTemplate::new(401).set_body_string("PERMISSION"))
        .mount(&server)
        .await;

    let err = client(&server).await.get_document("events", "e1").await.unwrap_err();
    assert!(matches!(err, FirestoreError::AuthError(_)));
}

fn clear_env() {
    for var in [
        "GCP_PROJECT_ID",
        "FIREBASE_PROJECT_ID",
        "FIRESTORE_DATABASE_ID",
        "FIRESTORE_CONNECT_TIMEOUT_SECS",
        "FIRESTORE_RETRY_BASE_MS",
        "FIRESTORE_EMULATOR_HOST",
    ] {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_config_requires_project_id() {
    clear_env();
    assert!(FirestoreConfig::from_env().is_err());

    std::env::set_var("GCP_PROJECT_ID", "  ");
    assert!(FirestoreConfig::from_env().is_err());
    clear_env();
}

#[test]
#[serial]
fn test_config_prefers_gcp_project_id() {
    clear_env();
    std::env::set_var("GCP_PROJECT_ID", "gcp-project");
    std::env::set_var("FIREBASE_PROJECT_ID", "firebase-project");
    let config = FirestoreConfig::from_env().unwrap();
    assert_eq!(config.project_id, "gcp-project");
    assert_eq!(config.database_id, "(default)");
    assert!(config.emulator_host.is_none());
    clear_env();
}

#[test]
#[serial]
fn test_config_parses_overrides() {
    clear_env();
    std::env::set_var("FIREBASE_PROJECT_ID", "p");
    std::env::set_var("FIRESTORE_CONNECT_TIMEOUT_SECS", "not-a-number");
    std::env::set_var("FIRESTORE_RETRY_BASE_MS", "50");
    std::env::set_var("FIRESTORE_EMULATOR_HOST", "localhost:8080");
    let config = FirestoreConfig::from_env().unwrap();
    assert_eq!(config.connect_timeout, Duration::from_secs(5));
    assert_eq!(config.retry.base_delay_ms, 50);
    assert_eq!(config.emulator_host.as_deref(), Some("localhost:8080"));
    clear_env();
}
