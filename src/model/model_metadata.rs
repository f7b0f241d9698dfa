//! モデルメタデータの定義と永続化
//!
//! tar.gz形式でモデルと関連するメタデータを保存・読み込みします。
//! 推論側はこのメタデータからネットワーク構成を復元してから重みを読み込むため、
//! 学習時のハイパーパラメータのうち構造に関わるものはすべてここに記録します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::FoodNetConfig;

/// モデルの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// 食べ物 / 食べ物以外 の二値判定（sigmoid 1ユニット）
    Detector,
    /// 料理カテゴリの多クラス分類（softmax）
    Classifier,
}

impl ModelKind {
    /// モデルファイル名のデフォルト語幹
    pub fn default_stem(&self) -> &'static str {
        match self {
            ModelKind::Detector => "food_detector_model",
            ModelKind::Classifier => "food_classifier_model",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Detector => write!(f, "detector"),
            ModelKind::Classifier => write!(f, "classifier"),
        }
    }
}

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 検出器か分類器か
    pub kind: ModelKind,

    /// 出力インデックス順のクラスラベル
    /// 分類器: ["pizza", "ramen", "sushi", ...]
    /// 検出器: [負例クラス, 正例クラス]（インデックス1が sigmoid 出力に対応）
    pub class_labels: Vec<String>,

    /// 検出器の正例クラス名（通常 "food"）
    #[serde(default)]
    pub positive_class: Option<String>,

    /// モデル入力サイズ（正方形、通常224）
    pub image_size: u32,

    /// 出力ユニット数（検出器は1）
    pub output_units: usize,

    /// ヘッドの中間層ユニット数
    pub hidden_units: usize,

    /// バックボーンの基本チャネル数
    pub base_filters: usize,

    /// 事前学習済みバックボーンを凍結して学習したか
    #[serde(default)]
    pub backbone_frozen: bool,

    /// 学習エポック数
    pub num_epochs: u32,

    /// 検証データでの正解率（0.0〜1.0）
    #[serde(default)]
    pub validation_accuracy: Option<f32>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        kind: ModelKind,
        class_labels: Vec<String>,
        positive_class: Option<String>,
        image_size: u32,
        net: &FoodNetConfig,
        backbone_frozen: bool,
        num_epochs: u32,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            kind,
            class_labels,
            positive_class,
            image_size,
            output_units: net.output_units,
            hidden_units: net.hidden_units,
            base_filters: net.base_filters,
            backbone_frozen,
            num_epochs,
            validation_accuracy: None,
            trained_at,
        }
    }

    /// 記録された構成からネットワーク設定を復元
    pub fn net_config(&self) -> FoodNetConfig {
        FoodNetConfig::new(self.output_units)
            .with_hidden_units(self.hidden_units)
            .with_base_filters(self.base_filters)
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
