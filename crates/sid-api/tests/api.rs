//! Router-level tests driven through `tower::ServiceExt::oneshot`.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::{json, Value};

use common::*;
use sid_api::services::{SinkError, SubscriberSink};
use sid_models::DEFAULT_PLACEHOLDER_BASE_URL;

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl SubscriberSink for RecordingSink {
    async fn send(&self, message: Arc<str>) -> Result<(), SinkError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_detect_requires_auth() {
    let app = app(state(Some(two_people())));

    let (status, body) = send(&app, detect_request(None, &frame_jpeg())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["detail"].is_string());

    let (status, _) = send(&app, detect_request(Some("nope"), &frame_jpeg())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_detect_rejects_undecodable_frame() {
    let app = app(state(Some(two_people())));
    let (status, body) = send(&app, detect_request(Some(TOKEN), b"definitely not an image")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_detect_rejects_missing_file_field() {
    let app = app(state(Some(two_people())));
    let body = multipart_body(&[("other", None, b"hello".as_slice())]);
    let (status, _) = send(&app, multipart_request("/api/detect", Some(TOKEN), body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_detect_without_detector_is_unavailable() {
    let app = app(state(None));
    let (status, _) = send(&app, detect_request(Some(TOKEN), &frame_jpeg())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_detect_returns_placeholder_and_broadcasts() {
    let state = state(Some(two_people()));
    let sink = Arc::new(RecordingSink::default());
    state.hub.register(sink.clone()).await;
    let app = app(state);

    let (status, body) = send(&app, detect_request(Some(TOKEN), &frame_jpeg())).await;
    assert_eq!(status, StatusCode::OK);

    let detections = body["detections"].as_array().unwrap();
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0]["label"], "person");
    assert_eq!(detections[0]["face_id"], "unknown");
    assert_eq!(detections[0]["alert"], true);
    assert_eq!(body["alert"], true);

    let image_url = body["image_url"].as_str().unwrap();
    assert!(image_url.starts_with(DEFAULT_PLACEHOLDER_BASE_URL));
    assert!(image_url.contains(body["timestamp"].as_str().unwrap()));

    assert!(eventually(|| sink.messages.lock().unwrap().len() == 1).await);
    let message: Value = serde_json::from_str(&sink.messages.lock().unwrap()[0]).unwrap();
    assert_eq!(message["type"], "detection");
    assert_eq!(message["data"]["user_id"], USER);
    assert_eq!(message["data"]["image_url"], image_url);
}

#[tokio::test]
async fn test_detect_with_nobody_is_not_broadcast() {
    let state = state(Some(Vec::new()));
    let sink = Arc::new(RecordingSink::default());
    state.hub.register(sink.clone()).await;
    let app = app(state);

    let (status, body) = send(&app, detect_request(Some(TOKEN), &frame_jpeg())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["detections"], json!([]));
    assert_eq!(body["alert"], false);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sink.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_detect_commits_evidence_in_background() {
    let records = Arc::new(MemoryRecordStore::default());
    let blobs = Arc::new(MemoryBlobStore::default());
    let state = state(Some(two_people()))
        .with_records(records.clone())
        .with_blobs(blobs.clone())
        .start_persistence();
    let persistence = state.persistence.clone();
    let app = app(state);

    let (status, body) = send(&app, detect_request(Some(TOKEN), &frame_jpeg())).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["image_url"]
        .as_str()
        .unwrap()
        .starts_with(DEFAULT_PLACEHOLDER_BASE_URL));

    persistence.shutdown(Duration::from_secs(5)).await;

    let keys: Vec<String> = blobs
        .objects
        .lock()
        .unwrap()
        .iter()
        .map(|(key, _)| key.clone())
        .collect();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with(&format!("detections/{}/", USER)));

    let events = records.events.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].user_id, USER);
    assert_eq!(events[0].detections.len(), 2);
    assert_eq!(
        events[0].image_url.as_deref(),
        Some(format!("https://cdn.test/{}", keys[0]).as_str())
    );
}

#[tokio::test]
async fn test_persistence_failure_does_not_change_response() {
    let records = Arc::new(MemoryRecordStore::failing());
    let state = state(Some(two_people()))
        .with_records(records.clone())
        .with_blobs(Arc::new(MemoryBlobStore::default()))
        .start_persistence();
    let persistence = state.persistence.clone();
    let app = app(state);

    let (status, body) = send(&app, detect_request(Some(TOKEN), &frame_jpeg())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["detections"].as_array().unwrap().len(), 2);

    persistence.shutdown(Duration::from_secs(5)).await;
    assert!(records.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_detect_scoped_to_roi() {
    let records = Arc::new(MemoryRecordStore::default());
    let app = app(state(Some(two_people())).with_records(records.clone()));

    // Covers the right-hand person only
    let roi = json!({"x": 30, "y": 0, "width": 34, "height": 48, "name": "door"});
    let (status, stored) = send(&app, request("POST", "/api/roi", Some(TOKEN), Some(roi))).await;
    assert_eq!(status, StatusCode::OK);
    let roi_id = stored["roi_id"].as_str().unwrap();

    let uri = format!("/api/detect?roi_id={}", roi_id);
    let body = multipart_body(&[("file", Some("frame.jpg"), frame_jpeg().as_slice())]);
    let (status, body) = send(&app, multipart_request(&uri, Some(TOKEN), body)).await;
    assert_eq!(status, StatusCode::OK);
    let detections = body["detections"].as_array().unwrap();
    assert_eq!(detections.len(), 1);
    assert!(detections[0]["bbox"]["x1"].as_f64().unwrap() >= 30.0);

    let body = multipart_body(&[("file", Some("frame.jpg"), frame_jpeg().as_slice())]);
    let (status, _) = send(
        &app,
        multipart_request("/api/detect?roi_id=missing", Some(TOKEN), body),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_detect_with_roi_needs_store() {
    let app = app(state(Some(two_people())));
    let body = multipart_body(&[("file", Some("frame.jpg"), frame_jpeg().as_slice())]);
    let (status, _) = send(
        &app,
        multipart_request("/api/detect?roi_id=roi1", Some(TOKEN), body),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_store_routes_unavailable_without_store() {
    let app = app(state(Some(two_people())));

    for (method, uri) in [
        ("GET", "/api/events"),
        ("GET", "/api/events/evt1"),
        ("GET", "/api/roi"),
        ("DELETE", "/api/roi/roi1"),
    ] {
        let (status, _) = send(&app, request(method, uri, Some(TOKEN), None)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{} {}", method, uri);
    }
}

#[tokio::test]
async fn test_list_events() {
    let records = Arc::new(MemoryRecordStore::default());
    records.seed_event("e1", USER, false);
    records.seed_event("e2", USER, true);
    records.seed_event("e3", OTHER_USER, true);
    let app = app(state(Some(two_people())).with_records(records));

    let (status, body) = send(&app, request("GET", "/api/events", Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["e2", "e1"]);

    let (status, body) = send(
        &app,
        request("GET", "/api/events?alert_only=true&limit=10", Some(TOKEN), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["event_id"], "e2");
}

#[tokio::test]
async fn test_list_events_limit_bounds() {
    let app = app(state(Some(two_people())).with_records(Arc::new(MemoryRecordStore::default())));

    for limit in ["0", "101", "-5"] {
        let uri = format!("/api/events?limit={}", limit);
        let (status, _) = send(&app, request("GET", &uri, Some(TOKEN), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "limit={}", limit);
    }

    let (status, _) = send(&app, request("GET", "/api/events?limit=100", Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_get_event_is_owner_scoped() {
    let records = Arc::new(MemoryRecordStore::default());
    records.seed_event("e1", USER, true);
    let app = app(state(Some(two_people())).with_records(records));

    let (status, body) = send(&app, request("GET", "/api/events/e1", Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event_id"], "e1");

    let (status, _) = send(&app, request("GET", "/api/events/e1", Some(OTHER_TOKEN), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, request("GET", "/api/events/bad.id", Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_roi_lifecycle() {
    let app = app(state(Some(two_people())).with_records(Arc::new(MemoryRecordStore::default())));

    let roi = json!({"x": 0, "y": 0, "width": 100, "height": 50});
    let (status, stored) = send(&app, request("POST", "/api/roi", Some(TOKEN), Some(roi))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["user_id"], USER);
    assert_eq!(stored["roi"]["name"], "default");
    let roi_id = stored["roi_id"].as_str().unwrap().to_string();

    let (_, mine) = send(&app, request("GET", "/api/roi", Some(TOKEN), None)).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    let (_, theirs) = send(&app, request("GET", "/api/roi", Some(OTHER_TOKEN), None)).await;
    assert!(theirs.as_array().unwrap().is_empty());

    let uri = format!("/api/roi/{}", roi_id);
    let (status, _) = send(&app, request("DELETE", &uri, Some(OTHER_TOKEN), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, request("DELETE", &uri, Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["roi_id"], roi_id.as_str());

    let (status, _) = send(&app, request("DELETE", &uri, Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_roi_validates_dimensions() {
    let records = Arc::new(MemoryRecordStore::default());
    let app = app(state(Some(two_people())).with_records(records.clone()));

    let roi = json!({"x": 0, "y": 0, "width": 0, "height": 50});
    let (status, _) = send(&app, request("POST", "/api/roi", Some(TOKEN), Some(roi))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(records.rois.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_whitelist_unavailable_without_matcher() {
    let app = app(state(Some(two_people())));

    let (status, _) = send(&app, request("GET", "/api/whitelist", Some(TOKEN), None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let body = multipart_body(&[
        ("identity", None, b"alice".as_slice()),
        ("files", Some("a.jpg"), frame_jpeg().as_slice()),
    ]);
    let (status, _) = send(&app, multipart_request("/api/whitelist", Some(TOKEN), body)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_root_status_reports_components() {
    let app = app(state(Some(two_people())));
    let (status, body) = send(&app, request("GET", "/", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "online");
    assert_eq!(body["models"]["detector"], true);
    assert_eq!(body["models"]["matcher"], false);
    assert_eq!(body["models"]["storage"], false);
}

#[tokio::test]
async fn test_health_and_readiness() {
    let app = app(state(Some(two_people())));
    let (status, _) = send(&app, request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, request("GET", "/ready", None, None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["detector"]["status"], "ok");
    assert_eq!(body["checks"]["record_store"]["status"], "error");

    let app = common::app(
        state(Some(two_people())).with_records(Arc::new(MemoryRecordStore::default())),
    );
    let (status, body) = send(&app, request("GET", "/ready", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_responses_carry_security_headers() {
    use tower::ServiceExt;

    let response = app(state(None))
        .oneshot(request("GET", "/health", None, None))
        .await
        .unwrap();
    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert!(headers.contains_key("x-request-id"));
}
