//! Shared fixtures and request helpers for API tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use image::{Rgb, RgbImage};
use serde_json::Value;
use tower::ServiceExt;

pub use sid_api::test_support::{MemoryBlobStore, MemoryRecordStore};
use sid_api::{create_router, ApiConfig, AppState, StaticTokenVerifier};
use sid_models::{BoundingBox, PersonDetection};
use sid_vision::{
    encode_jpeg, DetectionPipeline, FramePreprocessor, PersonDetector, PipelineSettings,
    PreprocessConfig, VisionResult,
};

pub const TOKEN: &str = "test_token";
pub const USER: &str = "test_user_123";
pub const OTHER_TOKEN: &str = "other_token";
pub const OTHER_USER: &str = "other_user";

const BOUNDARY: &str = "sid-test-boundary";

/// Returns the same people for every frame.
pub struct FixedDetector(pub Vec<PersonDetection>);

impl PersonDetector for FixedDetector {
    fn detect(&self, _frame: &RgbImage, threshold: f32) -> VisionResult<Vec<PersonDetection>> {
        Ok(self.0.iter().copied().filter(|d| d.confidence >= threshold).collect())
    }
}

pub fn two_people() -> Vec<PersonDetection> {
    vec![
        PersonDetection::new(BoundingBox::new(4.0, 4.0, 20.0, 40.0), 0.91),
        PersonDetection::new(BoundingBox::new(30.0, 6.0, 50.0, 44.0), 0.77),
    ]
}

pub fn pipeline(detector: Option<Vec<PersonDetection>>) -> Arc<DetectionPipeline> {
    let detector: Option<Arc<dyn PersonDetector>> =
        detector.map(|d| Arc::new(FixedDetector(d)) as Arc<dyn PersonDetector>);
    Arc::new(DetectionPipeline::new(
        FramePreprocessor::new(PreprocessConfig::default()),
        detector,
        None,
        PipelineSettings::default(),
    ))
}

pub fn state(detector: Option<Vec<PersonDetection>>) -> AppState {
    let verifier = StaticTokenVerifier::new(HashMap::from([
        (TOKEN.to_string(), USER.to_string()),
        (OTHER_TOKEN.to_string(), OTHER_USER.to_string()),
    ]));
    AppState::from_parts(ApiConfig::default(), pipeline(detector), Arc::new(verifier))
}

pub fn app(state: AppState) -> Router {
    create_router(state, None)
}

pub fn frame_jpeg() -> Vec<u8> {
    encode_jpeg(&RgbImage::from_pixel(64, 48, Rgb([130, 130, 130])), 90).unwrap()
}

/// `(field name, filename, bytes)`
pub fn multipart_body(fields: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, bytes) in fields {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            ),
        }
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_request(uri: &str, token: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body)).unwrap()
}

pub fn detect_request(token: Option<&str>, frame: &[u8]) -> Request<Body> {
    multipart_request(
        "/api/detect",
        token,
        multipart_body(&[("file", Some("frame.jpg"), frame)]),
    )
}

pub fn request(method: &str, uri: &str, token: Option<&str>, json: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match json {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
