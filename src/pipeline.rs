//! 二段階推論パイプライン
//!
//! 検出器で食べ物かどうかを判定し、食べ物の場合のみ分類器でカテゴリを推定する。

use anyhow::Result;
use tracing::info;

use crate::ml::{Classify, Detect};
use crate::types::{PredictionResponse, FOOD_LABEL, NON_FOOD_LABEL};

/// 画像1枚を判定する
///
/// 食べ物でなければ分類器は呼ばない。信頼度は食べ物なら分類器の最大確率、
/// そうでなければ P(non-food)。
pub fn predict(detector: &dyn Detect, classifier: &dyn Classify, image: &[u8]) -> Result<PredictionResponse> {
    let detection = detector.detect(image)?;

    let response = if detection.is_food {
        let classification = classifier.classify(image)?;
        PredictionResponse {
            label: FOOD_LABEL.to_string(),
            guess: Some(classification.label.clone()),
            is_food: true,
            confidence: classification.confidence,
            detector: detection,
            classifier: Some(classification),
        }
    } else {
        PredictionResponse {
            label: NON_FOOD_LABEL.to_string(),
            guess: None,
            is_food: false,
            confidence: detection.prob_non_food,
            detector: detection,
            classifier: None,
        }
    };

    info!(
        "判定: {} guess={:?} confidence={:.4} (P(food)={:.4})",
        response.label, response.guess, response.confidence, response.detector.prob_food
    );
    Ok(response)
}
