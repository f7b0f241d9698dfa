#![recursion_limit = "256"]

pub mod types;
pub mod error;
pub mod model;
pub mod ml;
pub mod pipeline;
pub mod server;
pub mod cli;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use burn::tensor::backend::Backend;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::{Wgpu, WgpuDevice};

use crate::ml::{FoodClassifier, FoodDetector};
use crate::model::{AppConfig, ClassIndexTable, DeviceType, ServerSettings};
use crate::server::{build_router, AppState};

/// ログ出力を初期化（`RUST_LOG` が無ければ info）
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// 起動時にモデルとクラスインデックス表を読み込む
///
/// 表の件数と分類器の出力ユニット数が一致しなければ失敗する。
pub fn load_state(config: &AppConfig) -> Result<AppState> {
    match config.device_type {
        DeviceType::Wgpu => load_models::<Wgpu>(&config.server, WgpuDevice::default()),
        DeviceType::Cpu => load_models::<NdArray>(&config.server, NdArrayDevice::Cpu),
    }
}

fn load_models<B: Backend>(settings: &ServerSettings, device: B::Device) -> Result<AppState> {
    info!("使用デバイス: {:?}", device);

    let table = ClassIndexTable::load(&settings.class_indices_path)?;
    info!(
        "クラスインデックス表を読み込みました: {} ({} クラス)",
        settings.class_indices_path.display(),
        table.len()
    );

    let detector = FoodDetector::<B>::load(&settings.detector_model_path, device.clone())
        .context("検出器の初期化に失敗しました")?;
    let classifier = FoodClassifier::<B>::load(&settings.classifier_model_path, table, device)
        .context("分類器の初期化に失敗しました")?;

    Ok(AppState::new(Arc::new(detector), Arc::new(classifier)))
}

/// 推論サーバーを起動
pub async fn run(config: AppConfig) -> Result<()> {
    config.log_summary();

    let state = load_state(&config)?;
    let app = build_router(Arc::new(state), config.server.body_limit_bytes);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("待ち受けアドレスが不正です")?;
    info!("サーバーを起動します: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("{} にバインドできません", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
