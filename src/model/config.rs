//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、サーバー、学習設定をJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 推論サーバー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// バインドするホスト
    pub host: String,
    /// 待ち受けポート
    pub port: u16,
    /// アップロードサイズ上限（バイト）
    pub body_limit_bytes: usize,
    /// 検出器モデル（tar.gz）のパス
    pub detector_model_path: PathBuf,
    /// 分類器モデル（tar.gz）のパス
    pub classifier_model_path: PathBuf,
    /// クラスインデックス表（JSON）のパス
    pub class_indices_path: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            body_limit_bytes: 20 * 1024 * 1024,
            detector_model_path: PathBuf::from("models/food_detector_model.tar.gz"),
            classifier_model_path: PathBuf::from("models/food_classifier_model.tar.gz"),
            class_indices_path: PathBuf::from("models/food_class_indices.json"),
        }
    }
}

/// 学習時のデータ拡張設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationSettings {
    /// 最大回転角（±度）
    pub rotation_degrees: f32,
    /// ズーム幅（1.0 ± zoom_range）
    pub zoom_range: f32,
    /// 左右反転の確率
    pub horizontal_flip_prob: f32,
}

impl Default for AugmentationSettings {
    fn default() -> Self {
        Self {
            rotation_degrees: 20.0,
            zoom_range: 0.2,
            horizontal_flip_prob: 0.5,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    /// トレーニングデータの割合
    pub train_ratio: f32,
    /// モデル入力サイズ（正方形）
    pub image_size: u32,
    /// バックボーンの基本チャネル数
    pub base_filters: usize,
    /// ヘッドの中間層ユニット数
    pub hidden_units: usize,
    /// 事前学習済みバックボーンの重み（burn レコード）
    pub backbone_path: Option<PathBuf>,
    /// データ拡張
    pub augmentation: AugmentationSettings,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 15,
            batch_size: 32,
            num_workers: 0,
            learning_rate: 1e-4,
            seed: 42,
            train_ratio: 0.8,
            image_size: crate::ml::IMAGE_SIZE,
            base_filters: 32,
            hidden_units: 128,
            backbone_path: None,
            augmentation: AugmentationSettings::default(),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// サーバー設定
    pub server: ServerSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
}

impl AppConfig {
    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、読めない場合はデフォルト設定を返す
    pub fn load_from_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定情報をログに出力
    pub fn log_summary(&self) {
        info!("計算デバイス: {}", self.device_type);
        info!("待ち受け: {}:{}", self.server.host, self.server.port);
        info!("検出器モデル: {}", self.server.detector_model_path.display());
        info!("分類器モデル: {}", self.server.classifier_model_path.display());
        info!("クラスインデックス: {}", self.server.class_indices_path.display());
    }
}
