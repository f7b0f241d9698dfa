//! 学習用バイナリ共通のコマンドライン引数

use clap::Args;
use std::path::PathBuf;
use tracing::info;

use crate::ml::{train_model, TrainingReport, TrainingTask};
use crate::model::{AppConfig, DeviceType, ModelKind};

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// クラスごとのサブディレクトリを持つデータセット
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// モデルの出力先ディレクトリ
    #[arg(short, long, default_value = "models")]
    pub output_dir: PathBuf,

    /// 設定ファイル
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// エポック数
    #[arg(long)]
    pub epochs: Option<usize>,

    /// バッチサイズ
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// 学習率
    #[arg(long)]
    pub learning_rate: Option<f64>,

    /// 事前学習済みバックボーンの重み（burn レコード）
    #[arg(long)]
    pub backbone: Option<PathBuf>,

    /// NdArray (CPU) バックエンドで学習する
    #[arg(long)]
    pub cpu: bool,
}

impl TrainArgs {
    /// 設定ファイルと引数から学習タスクを組み立てる
    pub fn into_task(self, kind: ModelKind, default_data_dir: &str) -> TrainingTask {
        let config = AppConfig::load_from_or_default(&self.config);
        let mut settings = config.training;

        if let Some(epochs) = self.epochs {
            settings.num_epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }
        if let Some(lr) = self.learning_rate {
            settings.learning_rate = lr;
        }
        if self.backbone.is_some() {
            settings.backbone_path = self.backbone;
        }

        let data_dir = self.data_dir.unwrap_or_else(|| PathBuf::from(default_data_dir));
        let mut task = TrainingTask::new(kind, data_dir, self.output_dir, settings);
        task.device_type = if self.cpu { DeviceType::Cpu } else { config.device_type };
        task
    }
}

/// 学習を実行して結果をログに出す
pub fn run_training(task: TrainingTask) -> anyhow::Result<TrainingReport> {
    let report = train_model(&task)?;

    info!("モデルを保存しました: {}", report.model_path.display());
    if let Some(path) = &report.class_indices_path {
        info!("クラスインデックス表: {}", path.display());
    }
    info!("クラス: {}", report.class_labels.join(", "));
    if let Some(acc) = report.validation_accuracy {
        info!("検証正解率: {:.2}%", acc * 100.0);
    }

    Ok(report)
}
