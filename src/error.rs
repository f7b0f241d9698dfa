//! HTTP 境界のエラー型

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// 推論APIのエラー
#[derive(Error, Debug)]
pub enum PredictError {
    /// `image` フィールドが無い
    #[error("No image uploaded")]
    MissingImage,

    /// multipart 本文を読めない
    #[error("invalid multipart body: {0}")]
    InvalidMultipart(String),

    /// アップロードがサイズ上限を超えた
    #[error("Uploaded file is too large")]
    PayloadTooLarge,

    /// デコード・推論の失敗
    #[error("{0:#}")]
    Inference(#[from] anyhow::Error),
}

impl PredictError {
    pub fn status(&self) -> StatusCode {
        match self {
            PredictError::MissingImage | PredictError::InvalidMultipart(_) => StatusCode::BAD_REQUEST,
            PredictError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            PredictError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("推論エラー: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
