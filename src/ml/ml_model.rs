//! 機械学習モデルの共通定義
//!
//! 事前学習済みバックボーン + 分類ヘッドの構成を提供します。
//! 検出器と分類器は同じネットワークで、出力ユニット数だけが異なります。
//! - 出力1ユニット: sigmoid（二値、P(正例)）
//! - 出力Nユニット: softmax（多クラス）

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::{BinaryCrossEntropyLossConfig, CrossEntropyLossConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{
        activation::{sigmoid, softmax},
        backend::Backend,
        Int, Tensor,
    },
    train::ClassificationOutput,
};

/// モデル設定
#[derive(Config, Debug)]
pub struct FoodNetConfig {
    /// 出力ユニット数（検出器は1、分類器はクラス数）
    pub output_units: usize,
    /// ヘッド中間層のユニット数
    #[config(default = 128)]
    pub hidden_units: usize,
    /// バックボーンの基本チャネル数
    #[config(default = 32)]
    pub base_filters: usize,
}

impl FoodNetConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> FoodNet<B> {
        let backbone = BackboneConfig::new()
            .with_base_filters(self.base_filters)
            .init(device);
        let feature_dim = backbone.feature_dim();

        FoodNet {
            backbone,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: LinearConfig::new(feature_dim, self.hidden_units).init(device),
            fc2: LinearConfig::new(self.hidden_units, self.output_units).init(device),
            activation: Relu::new(),
        }
    }
}

/// バックボーン設定
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// ステムのチャネル数（以降の段はこの倍数）
    #[config(default = 32)]
    pub base_filters: usize,
}

impl BackboneConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        let b = self.base_filters;

        // (入力, 出力, ストライド)
        let plan = [
            (b, 2 * b, 1),
            (2 * b, 4 * b, 2),
            (4 * b, 4 * b, 1),
            (4 * b, 8 * b, 2),
            (8 * b, 8 * b, 1),
            (8 * b, 16 * b, 2),
        ];

        Backbone {
            stem: Conv2dConfig::new([3, b], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            blocks: plan
                .iter()
                .map(|&(c_in, c_out, stride)| SeparableBlock::new(c_in, c_out, stride, device))
                .collect(),
            activation: Relu::new(),
            feature_dim: 16 * b,
        }
    }
}

/// 深さ方向分離畳み込みブロック（depthwise 3x3 + pointwise 1x1）
#[derive(Module, Debug)]
pub struct SeparableBlock<B: Backend> {
    depthwise: Conv2d<B>,
    pointwise: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> SeparableBlock<B> {
    fn new(c_in: usize, c_out: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            depthwise: Conv2dConfig::new([c_in, c_in], [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_groups(c_in)
                .init(device),
            pointwise: Conv2dConfig::new([c_in, c_out], [1, 1]).init(device),
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.depthwise.forward(x));
        self.activation.forward(self.pointwise.forward(x))
    }
}

/// 特徴抽出バックボーン（MobileNet系）
///
/// 入力 [batch, 3, H, W] → 特徴マップ [batch, 16*base, H/32, W/32]
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    stem: Conv2d<B>,
    blocks: Vec<SeparableBlock<B>>,
    activation: Relu,
    feature_dim: usize,
}

impl<B: Backend> Backbone<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.stem.forward(images));
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }

    /// 出力特徴マップのチャネル数
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }
}

/// 食べ物判定・分類用モデル
///
/// # アーキテクチャ
/// - Backbone（凍結可能）
/// - Global Average Pooling
/// - FC: feature_dim -> hidden + ReLU
/// - FC: hidden -> output_units
/// - sigmoid（1ユニット）/ softmax（複数ユニット）
#[derive(Module, Debug)]
pub struct FoodNet<B: Backend> {
    backbone: Backbone<B>,
    pool: AdaptiveAvgPool2d,
    fc1: Linear<B>,
    fc2: Linear<B>,
    activation: Relu,
}

impl<B: Backend> FoodNet<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - ロジット [batch_size, output_units]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.backbone.forward(images);
        let x = self.pool.forward(x);

        let [_, c, _, _] = x.dims();
        let x = x.reshape([batch_size, c]);

        let x = self.activation.forward(self.fc1.forward(x));
        self.fc2.forward(x)
    }

    /// 出力ユニット数
    pub fn output_units(&self) -> usize {
        // Linear の重みは [d_input, d_output]
        self.fc2.weight.dims()[1]
    }

    pub fn is_binary(&self) -> bool {
        self.output_units() == 1
    }

    /// 確率を返す（二値は sigmoid、多クラスは softmax）
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let logits = self.forward(images);
        if self.is_binary() {
            sigmoid(logits)
        } else {
            softmax(logits, 1)
        }
    }

    /// バックボーンの勾配計算を止める
    pub fn freeze_backbone(mut self) -> Self {
        self.backbone = self.backbone.no_grad();
        self
    }

    /// バックボーンを差し替える（事前学習済み重みの適用用）
    pub fn with_backbone(mut self, backbone: Backbone<B>) -> Self {
        self.backbone = backbone;
        self
    }

    pub fn backbone(&self) -> &Backbone<B> {
        &self.backbone
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// 多クラスはクロスエントロピー、二値は logits 入力の二値クロスエントロピー。
    /// 二値の場合も正解率メトリクスが使えるよう、出力は [0, logit] の2列にして返す
    /// （argmax が 1 ⇔ logit > 0）。
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let device = output.device();

        if self.is_binary() {
            let [batch_size, _] = output.dims();
            let loss = BinaryCrossEntropyLossConfig::new()
                .with_logits(true)
                .init(&device)
                .forward(output.clone().reshape([batch_size]), targets.clone());
            let two_column = Tensor::cat(vec![output.zeros_like(), output], 1);
            ClassificationOutput::new(loss, two_column, targets)
        } else {
            let loss = CrossEntropyLossConfig::new()
                .init(&device)
                .forward(output.clone(), targets.clone());
            ClassificationOutput::new(loss, output, targets)
        }
    }
}
