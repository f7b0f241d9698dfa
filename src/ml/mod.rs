pub mod ml_model;
pub mod preprocess;
pub mod augmentation;
pub mod training;
pub mod inference;

pub use ml_model::{Backbone, BackboneConfig, FoodNet, FoodNetConfig};
pub use preprocess::{decode_rgb, open_rgb, preprocess_image_bytes, resize_square, to_chw_unit, IMAGE_SIZE};
pub use augmentation::Augmenter;
pub use training::{save_backbone, train_model, FoodBatcher, FoodDataset, TrainingReport, TrainingTask};
pub use inference::{model_to_bytes, Classify, Detect, FoodClassifier, FoodDetector, InferenceEngine};
