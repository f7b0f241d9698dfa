//! 食べ物 / 食べ物以外 検出器の学習

use clap::Parser;

use food_classifier_lib::cli::{run_training, TrainArgs};
use food_classifier_lib::model::ModelKind;

/// Train the binary food / non-food detector
#[derive(Parser, Debug)]
#[command(name = "train_detector")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    args: TrainArgs,

    /// 正例（食べ物）クラスのディレクトリ名
    #[arg(long, default_value = "food")]
    positive_class: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    food_classifier_lib::init_tracing();

    let mut task = cli.args.into_task(ModelKind::Detector, "data/detector");
    task.positive_class = cli.positive_class;
    run_training(task)?;
    Ok(())
}
