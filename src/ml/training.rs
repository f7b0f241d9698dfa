//! モデル学習機能
//!
//! クラスごとのディレクトリに分かれた画像データセットから、
//! 凍結したバックボーン + 新しい分類ヘッドを学習します（転移学習）。

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use burn::{
    backend::{Autodiff, Wgpu},
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::Module,
    record::{DefaultFileRecorder, FullPrecisionSettings},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::ml::{model_to_bytes, open_rgb, resize_square, to_chw_unit, Augmenter, BackboneConfig, FoodNet, FoodNetConfig};
use crate::model::{next_versioned_path, save_model_with_metadata, ClassIndexTable, DeviceType, ModelKind, ModelMetadata, TrainingSettings};

/// 学習データとして扱う拡張子
const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// 学習データセット（パスのリストのみ保持）
#[derive(Debug, Clone)]
pub struct FoodDataset {
    samples: Vec<(PathBuf, usize)>, // (画像パス, クラスID)
    class_names: Vec<String>,
    // データセット分割用のインデックス範囲
    start_idx: usize,
    end_idx: usize,
}

impl FoodDataset {
    /// ディレクトリから学習データを読み込む
    ///
    /// サブディレクトリ名がクラス名。クラスIDは名前順の位置。
    pub fn from_directory(data_dir: &Path) -> Result<Self> {
        let mut class_names = Vec::new();
        for entry in std::fs::read_dir(data_dir)
            .context(format!("データセットを開けません: {}", data_dir.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                let class_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| anyhow::anyhow!("Invalid directory name: {:?}", path))?
                    .to_string();
                class_names.push(class_name);
            }
        }
        class_names.sort();

        if class_names.is_empty() {
            anyhow::bail!("クラスディレクトリが見つかりません: {}", data_dir.display());
        }

        let mut samples = Vec::new();
        let mut empty_classes = Vec::new();

        for (class_id, class_name) in class_names.iter().enumerate() {
            let mut paths: Vec<PathBuf> = std::fs::read_dir(data_dir.join(class_name))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_image_file(path))
                .collect();
            paths.sort();

            if paths.is_empty() {
                empty_classes.push(class_name.clone());
            }
            info!("  クラス {}: {} ({} 枚)", class_id, class_name, paths.len());
            samples.extend(paths.into_iter().map(|p| (p, class_id)));
        }

        if !empty_classes.is_empty() {
            anyhow::bail!(
                "以下のクラスディレクトリに画像が1枚もありません: {}",
                empty_classes.join(", ")
            );
        }

        info!("{} クラスから {} 枚を読み込みました", class_names.len(), samples.len());

        let len = samples.len();
        Ok(Self {
            samples,
            class_names,
            start_idx: 0,
            end_idx: len,
        })
    }

    /// 二値ラベルへ付け替える（正例クラス = 1、もう一方 = 0）
    ///
    /// クラスはちょうど2つでなければならない。付け替え後のクラス名は [負例, 正例]。
    pub fn into_binary(self, positive_class: &str) -> Result<Self> {
        if self.class_names.len() != 2 {
            anyhow::bail!(
                "検出器の学習には2クラスが必要です (検出: {}: {})",
                self.class_names.len(),
                self.class_names.join(", ")
            );
        }
        let positive_id = self
            .class_names
            .iter()
            .position(|name| name == positive_class)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "正例クラス '{}' のディレクトリがありません (検出: {})",
                    positive_class,
                    self.class_names.join(", ")
                )
            })?;
        let negative = self.class_names[1 - positive_id].clone();

        let samples = self
            .samples
            .into_iter()
            .map(|(path, id)| (path, usize::from(id == positive_id)))
            .collect();

        Ok(Self {
            samples,
            class_names: vec![negative, positive_class.to_string()],
            start_idx: self.start_idx,
            end_idx: self.end_idx,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// クラスごとのサンプル数（範囲内のみ）
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.class_names.len()];
        for (_, label) in &self.samples[self.start_idx..self.end_idx] {
            counts[*label] += 1;
        }
        counts
    }

    /// データセットを学習用と検証用に分割
    ///
    /// クラスごとにシャッフルし、`floor(n * (1 - train_ratio))` 枚を検証用、残りを学習用にする。
    /// どのクラスも最低1枚は学習用に残る。
    pub fn split(self, train_ratio: f32, seed: u64) -> (Self, Self) {
        use rand::seq::SliceRandom;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut train_samples = Vec::new();
        let mut val_samples = Vec::new();

        for class_id in 0..self.class_names.len() {
            let mut group: Vec<(PathBuf, usize)> = self.samples[self.start_idx..self.end_idx]
                .iter()
                .filter(|(_, label)| *label == class_id)
                .cloned()
                .collect();
            group.shuffle(&mut rng);

            let train_len = group.len() - validation_count(group.len(), train_ratio);
            val_samples.extend(group.split_off(train_len));
            train_samples.extend(group);
        }

        let train_len = train_samples.len();
        let total_len = train_len + val_samples.len();
        train_samples.extend(val_samples);

        let train_dataset = Self {
            samples: train_samples.clone(),
            class_names: self.class_names.clone(),
            start_idx: 0,
            end_idx: train_len,
        };

        let val_dataset = Self {
            samples: train_samples,
            class_names: self.class_names,
            start_idx: train_len,
            end_idx: total_len,
        };

        (train_dataset, val_dataset)
    }
}

/// クラス内の検証用枚数
fn validation_count(n: usize, train_ratio: f32) -> usize {
    // f32 の誤差で 0.2 * 10 が 1 にならないよう、比率を丸めてから掛ける
    let val_ratio = ((1.0 - train_ratio as f64).clamp(0.0, 1.0) * 1e6).round() / 1e6;
    let count = (n as f64 * val_ratio).floor() as usize;
    count.min(n.saturating_sub(1))
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug)]
pub struct FoodItem {
    pub path: PathBuf,
    pub label: usize,
}

impl Dataset<FoodItem> for FoodDataset {
    fn get(&self, index: usize) -> Option<FoodItem> {
        let actual_index = self.start_idx + index;
        if actual_index >= self.end_idx {
            return None;
        }

        let (path, label) = self.samples.get(actual_index)?;
        Some(FoodItem {
            path: path.clone(),
            label: *label,
        })
    }

    fn len(&self) -> usize {
        self.end_idx - self.start_idx
    }
}

/// バッチャー
///
/// 学習用はアイテムごとにデータ拡張を適用する。乱数はシードと通し番号から作るので
/// 同じシード・同じ順序なら同じ拡張になる。
#[derive(Clone)]
pub struct FoodBatcher<B: Backend> {
    device: B::Device,
    image_size: u32,
    augmenter: Option<Augmenter>,
    seed: u64,
    counter: Arc<AtomicU64>,
}

impl<B: Backend> FoodBatcher<B> {
    /// データ拡張なし（検証用）
    pub fn new(device: B::Device, image_size: u32) -> Self {
        Self {
            device,
            image_size,
            augmenter: None,
            seed: 0,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// データ拡張あり（学習用）
    pub fn with_augmentation(mut self, augmenter: Augmenter, seed: u64) -> Self {
        self.augmenter = Some(augmenter);
        self.seed = seed;
        self
    }

    fn load_item(&self, item: &FoodItem) -> Result<Vec<f32>> {
        let img = resize_square(&open_rgb(&item.path)?, self.image_size);
        let img = match &self.augmenter {
            Some(augmenter) => {
                let n = self.counter.fetch_add(1, Ordering::Relaxed);
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(n));
                augmenter.augment(&img, &mut rng)
            }
            None => img,
        };
        Ok(to_chw_unit(&img))
    }
}

impl<B: Backend> Batcher<B, FoodItem, FoodBatch<B>> for FoodBatcher<B> {
    fn batch(&self, items: Vec<FoodItem>, _device: &B::Device) -> FoodBatch<B> {
        let batch_size = items.len();
        let size = self.image_size as usize;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            match self.load_item(&item) {
                Ok(image_data) => all_pixels.extend_from_slice(&image_data),
                Err(e) => {
                    warn!("画像読み込み失敗 {}: {:#}", item.path.display(), e);
                    // エラーの場合はゼロで埋める
                    all_pixels.extend(std::iter::repeat(0.0f32).take(3 * size * size));
                }
            }
            targets_vec.push(item.label as i64);
        }

        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        FoodBatch { images, targets }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct FoodBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: burn::tensor::backend::AutodiffBackend> burn::train::TrainStep<FoodBatch<B>, burn::train::ClassificationOutput<B>> for FoodNet<B> {
    fn step(&self, batch: FoodBatch<B>) -> burn::train::TrainOutput<burn::train::ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        burn::train::TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> burn::train::ValidStep<FoodBatch<B>, burn::train::ClassificationOutput<B>> for FoodNet<B> {
    fn step(&self, batch: FoodBatch<B>) -> burn::train::ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 学習タスク
#[derive(Debug, Clone)]
pub struct TrainingTask {
    pub kind: ModelKind,
    /// クラスごとのサブディレクトリを持つデータセット
    pub data_dir: PathBuf,
    /// モデルの出力先ディレクトリ
    pub output_dir: PathBuf,
    /// 出力ファイル名の語幹（`<stem>_v<N>.tar.gz`）
    pub model_stem: String,
    /// 検出器の正例クラス名
    pub positive_class: String,
    pub settings: TrainingSettings,
    /// 学習に使う burn バックエンド
    pub device_type: DeviceType,
}

impl TrainingTask {
    pub fn new(kind: ModelKind, data_dir: PathBuf, output_dir: PathBuf, settings: TrainingSettings) -> Self {
        Self {
            kind,
            data_dir,
            output_dir,
            model_stem: kind.default_stem().to_string(),
            positive_class: "food".to_string(),
            settings,
            device_type: DeviceType::Wgpu,
        }
    }
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model_path: PathBuf,
    pub class_indices_path: Option<PathBuf>,
    pub class_labels: Vec<String>,
    pub validation_accuracy: Option<f32>,
    pub num_params: usize,
}

/// 事前学習済みバックボーンを適用して凍結する
///
/// 重みファイルが無い場合はネットワーク全体を学習する。
pub fn prepare_model<B: Backend>(
    net_config: &FoodNetConfig,
    backbone_path: Option<&Path>,
    device: &B::Device,
) -> Result<(FoodNet<B>, bool)> {
    let model = net_config.init::<B>(device);

    match backbone_path {
        Some(path) => {
            let backbone = BackboneConfig::new()
                .with_base_filters(net_config.base_filters)
                .init::<B>(device)
                .load_file(path, &DefaultFileRecorder::<FullPrecisionSettings>::new(), device)
                .map_err(|e| anyhow::anyhow!("バックボーン重みの読み込みエラー ({}): {:?}", path.display(), e))?;
            info!("事前学習済みバックボーンを読み込みました: {}", path.display());
            Ok((model.with_backbone(backbone).freeze_backbone(), true))
        }
        None => {
            warn!("事前学習済みバックボーンが指定されていません。ネットワーク全体を学習します");
            Ok((model, false))
        }
    }
}

/// 学習済みモデルのバックボーンを重みファイルとして書き出す
///
/// 書き出したファイルは `training.backbone_path` に指定して次の学習で凍結して使える。
/// 実際に書き込んだパス（拡張子 `.mpk` 付き）を返す。
pub fn save_backbone<B: Backend>(model: &FoodNet<B>, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create parent directory: {:?}", parent))?;
        }
    }
    let recorder = DefaultFileRecorder::<FullPrecisionSettings>::new();
    model
        .backbone()
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| anyhow::anyhow!("バックボーン重みの書き出しエラー ({}): {:?}", path.display(), e))?;

    let written = path.with_extension("mpk");
    info!("バックボーンを書き出しました: {}", written.display());
    Ok(written)
}

/// 検証データでの正解率を計算
pub fn evaluate_accuracy<B: Backend>(
    model: &FoodNet<B>,
    dataset: &FoodDataset,
    batcher: &FoodBatcher<B>,
    device: &B::Device,
    batch_size: usize,
) -> Option<f32> {
    let total = dataset.len();
    if total == 0 {
        return None;
    }

    let mut correct = 0.0f32;
    let mut start = 0;
    while start < total {
        let end = (start + batch_size.max(1)).min(total);
        let items: Vec<FoodItem> = (start..end).filter_map(|i| dataset.get(i)).collect();
        let n = items.len();
        let batch = batcher.batch(items, device);

        let output = model.forward_classification(batch.images, batch.targets.clone()).output;
        let predictions = output.argmax(1).reshape([n]);
        let hits = predictions.equal(batch.targets).float().sum().into_scalar();
        correct += hits.elem::<f32>();

        start = end;
    }

    Some(correct / total as f32)
}

/// モデル学習を実行（`device_type` に応じてバックエンドを選ぶ）
pub fn train_model(task: &TrainingTask) -> Result<TrainingReport> {
    match task.device_type {
        DeviceType::Wgpu => {
            info!("GPU (WGPU) モードで学習を開始します");
            train_with_backend::<Autodiff<Wgpu>>(task, WgpuDevice::DiscreteGpu(0))
        }
        DeviceType::Cpu => {
            info!("CPU (NdArray) モードで学習を開始します");
            train_with_backend::<Autodiff<NdArray>>(task, NdArrayDevice::Cpu)
        }
    }
}

fn train_with_backend<B: AutodiffBackend>(task: &TrainingTask, device: B::Device) -> Result<TrainingReport> {
    use burn::{
        data::dataloader::DataLoaderBuilder,
        optim::AdamConfig,
        train::{
            metric::{AccuracyMetric, LossMetric},
            LearnerBuilder, LearningStrategy,
        },
    };

    let settings = &task.settings;
    info!("{} の学習データを読み込みます: {}", task.kind, task.data_dir.display());

    let dataset = FoodDataset::from_directory(&task.data_dir)?;
    let dataset = match task.kind {
        ModelKind::Detector => dataset.into_binary(&task.positive_class)?,
        ModelKind::Classifier => dataset,
    };
    let class_labels = dataset.class_names().to_vec();
    check_unique(&class_labels)?;

    // 学習/検証データに分割
    let (dataset_train, dataset_val) = dataset.split(settings.train_ratio, settings.seed);
    info!("学習データ: {} 枚 / 検証データ: {} 枚", dataset_train.len(), dataset_val.len());
    if dataset_train.is_empty() {
        anyhow::bail!("学習データが見つかりません");
    }

    let output_units = match task.kind {
        ModelKind::Detector => 1,
        ModelKind::Classifier => class_labels.len(),
    };
    let net_config = FoodNetConfig::new(output_units)
        .with_hidden_units(settings.hidden_units)
        .with_base_filters(settings.base_filters);
    info!(
        "モデル設定: 出力 {} ユニット, 入力 {}x{}, バックボーン基本チャネル {}",
        output_units, settings.image_size, settings.image_size, settings.base_filters
    );

    debug!("使用デバイス: {:?}", device);

    let augmenter = Augmenter::new(settings.augmentation.clone());
    let batcher_train = FoodBatcher::<B>::new(device.clone(), settings.image_size)
        .with_augmentation(augmenter, settings.seed);
    let batcher_val = FoodBatcher::<B::InnerBackend>::new(device.clone(), settings.image_size);

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(settings.batch_size)
        .shuffle(settings.seed)
        .num_workers(settings.num_workers)
        .build(dataset_train);

    let dataloader_val = DataLoaderBuilder::new(batcher_val.clone())
        .batch_size(settings.batch_size)
        .num_workers(settings.num_workers)
        .build(dataset_val.clone());

    let (model, backbone_frozen) =
        prepare_model::<B>(&net_config, settings.backbone_path.as_deref(), &device)?;

    // アーティファクトディレクトリ（学習ログ用の一時領域）
    let artifact_dir = std::env::temp_dir().join(format!("food_classifier_training_{}", task.kind));
    std::fs::create_dir_all(&artifact_dir)?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    info!(
        "エポック数: {}, バッチサイズ: {}, 学習率: {}",
        settings.num_epochs, settings.batch_size, settings.learning_rate
    );

    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(settings.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), settings.learning_rate);

    let model_trained = learner.fit(dataloader_train, dataloader_val);
    let trained_model = model_trained.model;
    let num_params = trained_model.num_params();
    info!("学習が完了しました (パラメータ数: {})", num_params);

    let validation_accuracy =
        evaluate_accuracy(&trained_model, &dataset_val, &batcher_val, &device, settings.batch_size);
    match validation_accuracy {
        Some(acc) => info!("Validation Accuracy: {:.2}%", acc * 100.0),
        None => warn!("検証データが無いため正解率を計算できません"),
    }

    let positive_class = match task.kind {
        ModelKind::Detector => Some(task.positive_class.clone()),
        ModelKind::Classifier => None,
    };
    let mut metadata = ModelMetadata::new(
        task.kind,
        class_labels.clone(),
        positive_class,
        settings.image_size,
        &net_config,
        backbone_frozen,
        settings.num_epochs as u32,
    );
    metadata.validation_accuracy = validation_accuracy;

    let model_binary = model_to_bytes(trained_model)?;
    let versioned = next_versioned_path(&task.output_dir, &task.model_stem)?;
    let model_path = save_model_with_metadata(&versioned, &metadata, &model_binary)?;

    let class_indices_path = match task.kind {
        ModelKind::Classifier => {
            let path = task.output_dir.join("food_class_indices.json");
            ClassIndexTable::from_labels(class_labels.clone()).save(&path)?;
            info!("クラスインデックス表を保存しました: {}", path.display());
            Some(path)
        }
        ModelKind::Detector => None,
    };

    std::fs::remove_dir_all(&artifact_dir).ok();

    Ok(TrainingReport {
        model_path,
        class_indices_path,
        class_labels,
        validation_accuracy,
        num_params,
    })
}

fn check_unique(labels: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for label in labels {
        if !seen.insert(label) {
            anyhow::bail!("クラス名が重複しています: {}", label);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray;

    fn make_dataset(name: &str, classes: &[(&str, usize)]) -> PathBuf {
        let root = std::env::temp_dir().join(format!("food_dataset_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        for (class, count) in classes {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..*count {
                let img = RgbImage::from_pixel(12, 10, Rgb([(i * 20) as u8, 100, 30]));
                img.save(dir.join(format!("img_{}.png", i))).unwrap();
            }
            std::fs::write(dir.join("notes.txt"), b"ignored").unwrap();
        }
        root
    }

    #[test]
    fn test_classes_sorted_by_name() {
        let root = make_dataset("sorted", &[("sushi", 2), ("curry", 3), ("pizza", 1)]);
        let dataset = FoodDataset::from_directory(&root).unwrap();

        assert_eq!(dataset.class_names(), &["curry", "pizza", "sushi"]);
        assert_eq!(dataset.len(), 6);
        assert_eq!(dataset.class_counts(), vec![3, 1, 2]);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_empty_class_is_error() {
        let root = make_dataset("empty", &[("curry", 2), ("pizza", 0)]);
        let err = FoodDataset::from_directory(&root).unwrap_err();
        assert!(err.to_string().contains("pizza"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_binary_relabel_marks_positive_class() {
        // 名前順では "food" < "non_food" だが、正例は常に 1
        let root = make_dataset("binary", &[("food", 3), ("non_food", 2)]);
        let dataset = FoodDataset::from_directory(&root).unwrap().into_binary("food").unwrap();

        assert_eq!(dataset.class_names(), &["non_food", "food"]);
        assert_eq!(dataset.class_counts(), vec![2, 3]);
        let food_item = (0..dataset.len())
            .filter_map(|i| dataset.get(i))
            .find(|item| item.path.parent().unwrap().ends_with("food"))
            .unwrap();
        assert_eq!(food_item.label, 1);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_binary_relabel_requires_two_classes() {
        let root = make_dataset("three", &[("a", 1), ("b", 1), ("food", 1)]);
        let dataset = FoodDataset::from_directory(&root).unwrap();
        assert!(dataset.into_binary("food").is_err());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_binary_relabel_requires_positive_dir() {
        let root = make_dataset("nopos", &[("cats", 1), ("dogs", 1)]);
        let dataset = FoodDataset::from_directory(&root).unwrap();
        assert!(dataset.into_binary("food").is_err());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_split_80_20_per_class() {
        let root = make_dataset("split", &[("a", 10), ("b", 5)]);
        let dataset = FoodDataset::from_directory(&root).unwrap();
        let (train, val) = dataset.split(0.8, 42);

        assert_eq!(train.class_counts(), vec![8, 4]);
        assert_eq!(val.class_counts(), vec![2, 1]);

        let train_paths: HashSet<PathBuf> = (0..train.len()).map(|i| train.get(i).unwrap().path).collect();
        for i in 0..val.len() {
            assert!(!train_paths.contains(&val.get(i).unwrap().path));
        }
        assert!(val.get(3).is_none());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_split_keeps_single_image_class_in_training() {
        let root = make_dataset("single", &[("a", 1), ("b", 9)]);
        for seed in 0..50 {
            let dataset = FoodDataset::from_directory(&root).unwrap();
            let (train, val) = dataset.split(0.8, seed);
            assert_eq!(train.class_counts()[0], 1, "seed {}", seed);
            assert_eq!(val.class_counts(), vec![0, 1], "seed {}", seed);
        }
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_validation_count() {
        assert_eq!(validation_count(10, 0.8), 2);
        assert_eq!(validation_count(5, 0.8), 1);
        assert_eq!(validation_count(4, 0.8), 0);
        assert_eq!(validation_count(1, 0.8), 0);
        assert_eq!(validation_count(3, 0.0), 2);
    }

    #[test]
    fn test_split_is_reproducible() {
        let root = make_dataset("repro", &[("a", 5), ("b", 5)]);
        let (a, _) = FoodDataset::from_directory(&root).unwrap().split(0.8, 7);
        let (b, _) = FoodDataset::from_directory(&root).unwrap().split(0.8, 7);
        for i in 0..a.len() {
            assert_eq!(a.get(i).unwrap().path, b.get(i).unwrap().path);
        }
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_batcher_shapes_and_missing_file() {
        let root = make_dataset("batch", &[("a", 2)]);
        let batcher = FoodBatcher::<TestBackend>::new(NdArrayDevice::Cpu, 16);
        let items = vec![
            FoodItem { path: root.join("a/img_0.png"), label: 0 },
            FoodItem { path: root.join("a/missing.png"), label: 1 },
        ];
        let batch = batcher.batch(items, &NdArrayDevice::Cpu);

        assert_eq!(batch.images.dims(), [2, 3, 16, 16]);
        assert_eq!(batch.targets.dims(), [2]);

        // 読めない画像はゼロ埋め
        let pixels = batch.images.into_data().to_vec::<f32>().unwrap();
        assert!(pixels[3 * 16 * 16..].iter().all(|v| *v == 0.0));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_evaluate_accuracy_range() {
        let root = make_dataset("eval", &[("a", 2), ("b", 2)]);
        let dataset = FoodDataset::from_directory(&root).unwrap();
        let device = NdArrayDevice::Cpu;
        let model = FoodNetConfig::new(2)
            .with_base_filters(4)
            .with_hidden_units(8)
            .init::<TestBackend>(&device);
        let batcher = FoodBatcher::<TestBackend>::new(device, 32);

        let acc = evaluate_accuracy(&model, &dataset, &batcher, &device, 3).unwrap();
        assert!((0.0..=1.0).contains(&acc));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_prepare_model_without_backbone_is_trainable() {
        let net = FoodNetConfig::new(2).with_base_filters(4);
        let (_, frozen) = prepare_model::<TestBackend>(&net, None, &NdArrayDevice::Cpu).unwrap();
        assert!(!frozen);
    }

    #[test]
    fn test_exported_backbone_reloads_frozen() {
        let device = NdArrayDevice::Cpu;
        let net = FoodNetConfig::new(2).with_base_filters(4).with_hidden_units(8);
        let source = net.init::<TestBackend>(&device);

        let dir = std::env::temp_dir().join(format!("food_backbone_{}", std::process::id()));
        let written = save_backbone(&source, &dir.join("backbone")).unwrap();
        assert!(written.exists());

        let (model, frozen) = prepare_model::<TestBackend>(&net, Some(&written), &device).unwrap();
        assert!(frozen);

        let images = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device) * 0.3;
        let expected = source.backbone().forward(images.clone()).into_data().to_vec::<f32>().unwrap();
        let actual = model.backbone().forward(images).into_data().to_vec::<f32>().unwrap();
        assert_eq!(expected, actual);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_prepare_model_missing_backbone_file_fails() {
        let net = FoodNetConfig::new(2).with_base_filters(4);
        let path = std::env::temp_dir().join("food_classifier_no_such_backbone");
        assert!(prepare_model::<TestBackend>(&net, Some(&path), &NdArrayDevice::Cpu).is_err());
    }
}
