use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use food_classifier_lib::ml::{Classify, Detect};
use food_classifier_lib::server::{build_router, AppState};
use food_classifier_lib::types::{ClassificationResult, DetectionResult};

const BOUNDARY: &str = "food-test-boundary";

#[derive(Default)]
struct Counters {
    detector: AtomicUsize,
    classifier: AtomicUsize,
}

struct StubDetector {
    prob_food: f32,
    counters: Arc<Counters>,
}

impl Detect for StubDetector {
    fn detect(&self, image: &[u8]) -> anyhow::Result<DetectionResult> {
        self.counters.detector.fetch_add(1, Ordering::SeqCst);
        if image.is_empty() {
            anyhow::bail!("画像をデコードできません");
        }
        Ok(DetectionResult::from_prob_food(self.prob_food))
    }
}

struct StubClassifier {
    counters: Arc<Counters>,
}

impl Classify for StubClassifier {
    fn classify(&self, _image: &[u8]) -> anyhow::Result<ClassificationResult> {
        self.counters.classifier.fetch_add(1, Ordering::SeqCst);
        Ok(ClassificationResult {
            label: "sushi".to_string(),
            confidence: 0.6,
            index: 4,
        })
    }

    fn num_classes(&self) -> usize {
        5
    }
}

fn app(prob_food: f32) -> (Router, Arc<Counters>) {
    app_with_limit(prob_food, 1024 * 1024)
}

fn app_with_limit(prob_food: f32, body_limit_bytes: usize) -> (Router, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let state = AppState::new(
        Arc::new(StubDetector { prob_food, counters: counters.clone() }),
        Arc::new(StubClassifier { counters: counters.clone() }),
    );
    (build_router(Arc::new(state), body_limit_bytes), counters)
}

fn multipart_body(field: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"a.png\"\r\nContent-Type: image/png\r\n\r\n",
            field
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn text_field_body(field: &str, value: &str) -> Vec<u8> {
    format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"{f}\"\r\n\r\n{v}\r\n--{b}--\r\n",
        b = BOUNDARY,
        f = field,
        v = value
    )
    .into_bytes()
}

fn predict_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn missing_image_field_is_bad_request() {
    let (app, counters) = app(0.9);
    let response = app
        .oneshot(predict_request("/api/predict/", multipart_body("photo", b"bytes")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await, serde_json::json!({ "error": "No image uploaded" }));
    assert_eq!(counters.detector.load(Ordering::SeqCst), 0);
    assert_eq!(counters.classifier.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_multipart_request_is_bad_request() {
    let (app, counters) = app(0.9);
    let request = Request::builder()
        .method("POST")
        .uri("/api/predict/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No image uploaded");
    assert_eq!(counters.detector.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn food_image_is_classified() {
    let (app, counters) = app(0.8);
    let response = app
        .oneshot(predict_request("/api/predict/", multipart_body("image", b"fake-image")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["label"], "Food");
    assert_eq!(json["guess"], "sushi");
    assert_eq!(json["is_food"], true);
    assert_eq!(json["classifier"]["index"], 4);
    assert!((json["confidence"].as_f64().unwrap() - 0.6).abs() < 1e-6);
    assert_eq!(counters.classifier.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn non_food_image_skips_classifier() {
    let (app, counters) = app(0.25);
    let response = app
        .oneshot(predict_request("/api/predict", multipart_body("image", b"fake-image")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["label"], "Non-Food");
    assert!(json["guess"].is_null());
    assert!(json["classifier"].is_null());
    assert_eq!(json["confidence"], json["detector"]["prob_non_food"]);
    assert_eq!(counters.detector.load(Ordering::SeqCst), 1);
    assert_eq!(counters.classifier.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn inference_failure_is_server_error() {
    let (app, _) = app(0.9);
    let response = app
        .oneshot(predict_request("/api/predict/", multipart_body("image", b"")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json_body(response).await["error"].is_string());
}

#[tokio::test]
async fn text_part_named_image_is_not_an_upload() {
    let (app, counters) = app(0.9);
    let response = app
        .oneshot(predict_request("/api/predict/", text_field_body("image", "hello")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No image uploaded");
    assert_eq!(counters.detector.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn oversized_upload_is_payload_too_large() {
    let (app, counters) = app_with_limit(0.9, 256);
    let response = app
        .oneshot(predict_request("/api/predict/", multipart_body("image", &vec![7u8; 4096])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(counters.detector.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn health_reports_class_count() {
    let (app, _) = app(0.9);
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["classes"], 5);
    assert!(json["version"].is_string());
}
