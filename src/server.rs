//! 推論 HTTP サーバー
//!
//! - `POST /api/predict/`（`/api/predict` も可）: multipart の `image` フィールドを判定
//! - `GET /health`: 稼働状況

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::error::PredictError;
use crate::ml::{Classify, Detect};
use crate::pipeline;
use crate::types::PredictionResponse;

/// 画像を受け取る multipart フィールド名
pub const IMAGE_FIELD: &str = "image";

/// サーバー共有状態（起動時に構築し、以後変更しない）
pub struct AppState {
    pub detector: Arc<dyn Detect>,
    pub classifier: Arc<dyn Classify>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(detector: Arc<dyn Detect>, classifier: Arc<dyn Classify>) -> Self {
        Self {
            detector,
            classifier,
            started_at: Instant::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;

/// ヘルスチェックのレスポンス
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// 分類器のクラス数
    pub classes: usize,
}

/// ルーターを構築
pub fn build_router(state: SharedState, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/predict/", post(predict))
        .route("/api/predict", post(predict))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        classes: state.classifier.num_classes(),
    })
}

async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, PredictError> {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            warn!("multipart ではないリクエスト: {}", rejection);
            return Err(PredictError::MissingImage);
        }
    };

    let image = read_image_field(&mut multipart).await?;
    debug!("画像を受信しました ({} bytes)", image.len());

    // 推論は CPU/GPU を占有するのでブロッキングスレッドで行う
    let response = tokio::task::spawn_blocking(move || {
        pipeline::predict(state.detector.as_ref(), state.classifier.as_ref(), &image)
    })
    .await
    .map_err(|e| anyhow::anyhow!("推論タスクが異常終了しました: {}", e))??;

    Ok(Json(response))
}

/// `image` ファイルパートのバイト列を取り出す
///
/// ファイル名の無い（テキスト）パートや他のフィールドは読み捨てる。
async fn read_image_field(multipart: &mut Multipart) -> Result<Vec<u8>, PredictError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(IMAGE_FIELD) || field.file_name().is_none() {
            continue;
        }
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(bytes.to_vec());
    }
    Err(PredictError::MissingImage)
}

fn multipart_error(e: MultipartError) -> PredictError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!("アップロードがサイズ上限を超えました: {}", e);
        PredictError::PayloadTooLarge
    } else {
        PredictError::InvalidMultipart(e.body_text())
    }
}
