//! モデル推論機能

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};

use crate::ml::{preprocess_image_bytes, FoodNet};
use crate::model::{load_model_with_metadata, ClassIndexTable, ModelKind, ModelMetadata};
use crate::types::{ClassificationResult, DetectionResult};

/// 食べ物かどうかを判定する
pub trait Detect: Send + Sync {
    fn detect(&self, image: &[u8]) -> Result<DetectionResult>;
}

/// 料理カテゴリを分類する
pub trait Classify: Send + Sync {
    fn classify(&self, image: &[u8]) -> Result<ClassificationResult>;

    /// 分類可能なクラス数
    fn num_classes(&self) -> usize;
}

/// 推論エンジン
///
/// 読み込んだモデルは以後変更しない。`forward` の間だけモデルの複製を持ち、
/// ロックは複製を取る間だけ保持する。
pub struct InferenceEngine<B: Backend> {
    model: Mutex<FoodNet<B>>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let model_path = model_path.as_ref();
        let (metadata, model_binary) = load_model_with_metadata(model_path)
            .context(format!("モデルを読み込めません: {}", model_path.display()))?;

        let model = metadata.net_config().init::<B>(&device);

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model.load_record(record);

        info!(
            "{} を読み込みました: {} ({} クラス, 入力 {}x{}, {} パラメータ)",
            metadata.kind,
            model_path.display(),
            metadata.class_labels.len(),
            metadata.image_size,
            metadata.image_size,
            model.num_params()
        );

        Ok(Self::from_parts(model, metadata, device))
    }

    /// 初期化済みモデルから作成
    pub fn from_parts(model: FoodNet<B>, metadata: ModelMetadata, device: B::Device) -> Self {
        Self {
            model: Mutex::new(model),
            metadata,
            device,
        }
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn output_units(&self) -> Result<usize> {
        Ok(self.snapshot()?.output_units())
    }

    /// 読み込んだモデルの複製を取得
    pub fn snapshot(&self) -> Result<FoodNet<B>> {
        let model = self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("モデルのロックが破損しています"))?;
        Ok(model.clone())
    }

    /// 画像バイト列から確率ベクトルを得る
    pub fn probabilities(&self, image: &[u8]) -> Result<Vec<f32>> {
        let size = self.metadata.image_size as usize;
        let image_data = preprocess_image_bytes(image, self.metadata.image_size)?;

        // Tensorに変換 [1, 3, size, size]
        let tensor = Tensor::<B, 1>::from_floats(image_data.as_slice(), &self.device)
            .reshape([1, 3, size, size]);

        let probs = self.snapshot()?.probabilities(tensor);
        probs
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))
    }
}

/// 二値検出器（出力1ユニット = P(food)）
pub struct FoodDetector<B: Backend> {
    engine: InferenceEngine<B>,
}

impl<B: Backend> FoodDetector<B> {
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        Self::new(InferenceEngine::load(model_path, device)?)
    }

    pub fn new(engine: InferenceEngine<B>) -> Result<Self> {
        let metadata = engine.metadata();
        if metadata.kind != ModelKind::Detector {
            anyhow::bail!("検出器ではないモデルです (種類: {})", metadata.kind);
        }
        let units = engine.output_units()?;
        if units != 1 {
            anyhow::bail!("検出器の出力ユニット数は1である必要があります (実際: {})", units);
        }
        Ok(Self { engine })
    }
}

impl<B: Backend> Detect for FoodDetector<B> {
    fn detect(&self, image: &[u8]) -> Result<DetectionResult> {
        let probs = self.engine.probabilities(image)?;
        let prob_food = *probs
            .first()
            .ok_or_else(|| anyhow::anyhow!("検出器の出力が空です"))?;
        let result = DetectionResult::from_prob_food(prob_food);
        debug!("検出結果: P(food)={:.4} is_food={}", result.prob_food, result.is_food);
        Ok(result)
    }
}

/// 多クラス分類器
pub struct FoodClassifier<B: Backend> {
    engine: InferenceEngine<B>,
    table: ClassIndexTable,
}

impl<B: Backend> FoodClassifier<B> {
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        table: ClassIndexTable,
        device: B::Device,
    ) -> Result<Self> {
        Self::new(InferenceEngine::load(model_path, device)?, table)
    }

    /// クラスインデックス表と出力層の整合性を確認して作成
    pub fn new(engine: InferenceEngine<B>, table: ClassIndexTable) -> Result<Self> {
        let metadata = engine.metadata();
        if metadata.kind != ModelKind::Classifier {
            anyhow::bail!("分類器ではないモデルです (種類: {})", metadata.kind);
        }

        table.ensure_matches_output(engine.output_units()?)?;

        if !metadata.class_labels.is_empty() && metadata.class_labels != table.labels() {
            warn!(
                "クラスインデックス表のラベル順がモデルの学習時と異なります: 表={:?} モデル={:?}",
                table.labels(),
                metadata.class_labels
            );
        }

        Ok(Self { engine, table })
    }
}

impl<B: Backend> Classify for FoodClassifier<B> {
    fn classify(&self, image: &[u8]) -> Result<ClassificationResult> {
        let probs = self.engine.probabilities(image)?;
        let result = ClassificationResult::from_probabilities(&probs, &self.table)?;
        debug!(
            "分類結果: {} (index={}, confidence={:.4})",
            result.label, result.index, result.confidence
        );
        Ok(result)
    }

    fn num_classes(&self) -> usize {
        self.table.len()
    }
}

/// 学習済みモデルを重みバイナリに変換
pub fn model_to_bytes<B: Backend>(model: FoodNet<B>) -> Result<Vec<u8>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    recorder
        .record(model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))
}
