//! モデルアーカイブのメタデータを表示

use clap::Parser;
use std::path::PathBuf;

use burn_ndarray::{NdArray, NdArrayDevice};

use food_classifier_lib::ml::{save_backbone, InferenceEngine};
use food_classifier_lib::model::{load_metadata, print_metadata_info, ClassIndexTable, ModelKind};

/// Print the metadata stored in a model archive
#[derive(Parser, Debug)]
#[command(name = "inspect_model")]
#[command(version)]
struct Cli {
    /// モデル（tar.gz）
    model: PathBuf,

    /// 分類器の場合、整合性を確認するクラスインデックス表
    #[arg(long)]
    class_indices: Option<PathBuf>,

    /// バックボーンの重みを書き出す（`training.backbone_path` に指定して再利用する）
    #[arg(long)]
    export_backbone: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    food_classifier_lib::init_tracing();

    let metadata = load_metadata(&cli.model)?;
    print_metadata_info(&metadata);

    if let Some(path) = cli.class_indices {
        if metadata.kind != ModelKind::Classifier {
            anyhow::bail!("クラスインデックス表は分類器モデルにのみ対応します (種類: {})", metadata.kind);
        }
        let table = ClassIndexTable::load(&path)?;
        table.ensure_matches_output(metadata.output_units)?;
        if table.labels() == metadata.class_labels.as_slice() {
            println!("✓ クラスインデックス表はモデルと一致しています");
        } else {
            println!("⚠ クラス数は一致しますが、ラベルの並びがモデルの学習時と異なります");
        }
    }

    if let Some(out) = cli.export_backbone {
        let engine = InferenceEngine::<NdArray>::load(&cli.model, NdArrayDevice::Cpu)?;
        let written = save_backbone(&engine.snapshot()?, &out)?;
        println!("✓ バックボーンを書き出しました: {}", written.display());
    }

    Ok(())
}
