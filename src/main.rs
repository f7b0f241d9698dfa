//! 食べ物判定・分類サーバー

use clap::Parser;
use std::path::PathBuf;

use food_classifier_lib::model::{AppConfig, DeviceType};

/// Food detection and classification server
#[derive(Parser, Debug)]
#[command(name = "food_classifier")]
#[command(version)]
#[command(about = "HTTP server for two-stage food detection and classification")]
struct Cli {
    /// 設定ファイル
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// 検出器モデル（tar.gz）
    #[arg(long)]
    detector_model: Option<PathBuf>,

    /// 分類器モデル（tar.gz）
    #[arg(long)]
    classifier_model: Option<PathBuf>,

    /// クラスインデックス表（JSON）
    #[arg(long)]
    class_indices: Option<PathBuf>,

    /// NdArray (CPU) バックエンドで推論する
    #[arg(long)]
    cpu: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    food_classifier_lib::init_tracing();

    let mut config = AppConfig::load_from_or_default(&cli.config);

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(path) = cli.detector_model {
        config.server.detector_model_path = path;
    }
    if let Some(path) = cli.classifier_model {
        config.server.classifier_model_path = path;
    }
    if let Some(path) = cli.class_indices {
        config.server.class_indices_path = path;
    }
    if cli.cpu {
        config.device_type = DeviceType::Cpu;
    }

    food_classifier_lib::run(config).await
}
