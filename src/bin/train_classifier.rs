//! 料理カテゴリ分類器の学習

use clap::Parser;

use food_classifier_lib::cli::{run_training, TrainArgs};
use food_classifier_lib::model::ModelKind;

/// Train the food sub-category classifier
#[derive(Parser, Debug)]
#[command(name = "train_classifier")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    args: TrainArgs,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    food_classifier_lib::init_tracing();

    let task = cli.args.into_task(ModelKind::Classifier, "data/classifier");
    run_training(task)?;
    Ok(())
}
