use serde::{Deserialize, Serialize};

use crate::model::ClassIndexTable;

/// 食べ物と判定する P(food) の下限（この値ちょうどは食べ物）
pub const FOOD_THRESHOLD: f32 = 0.5;

/// 検出器の判定結果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub is_food: bool,
    pub prob_food: f32,
    pub prob_non_food: f32,
}

impl DetectionResult {
    /// P(food) から判定結果を組み立てる
    pub fn from_prob_food(prob_food: f32) -> Self {
        let prob_food = if prob_food.is_nan() { 0.0 } else { prob_food.clamp(0.0, 1.0) };
        Self {
            is_food: prob_food >= FOOD_THRESHOLD,
            prob_food,
            prob_non_food: 1.0 - prob_food,
        }
    }
}

/// 分類器の結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f32,
    pub index: usize,
}

impl ClassificationResult {
    /// 確率ベクトルの argmax を表のラベルに対応付ける
    ///
    /// 同率の場合は先頭のインデックスを採用する。
    pub fn from_probabilities(probs: &[f32], table: &ClassIndexTable) -> anyhow::Result<Self> {
        let (index, confidence) = probs
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((i, p)),
            })
            .ok_or_else(|| anyhow::anyhow!("分類器の出力が空です"))?;

        Ok(Self {
            label: table.label_or_placeholder(index),
            confidence,
            index,
        })
    }
}

/// `/api/predict/` のレスポンス
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    /// "Food" または "Non-Food"
    pub label: String,
    /// 料理カテゴリ（食べ物以外なら null）
    pub guess: Option<String>,
    pub is_food: bool,
    pub confidence: f32,
    pub detector: DetectionResult,
    pub classifier: Option<ClassificationResult>,
}

pub const FOOD_LABEL: &str = "Food";
pub const NON_FOOD_LABEL: &str = "Non-Food";
