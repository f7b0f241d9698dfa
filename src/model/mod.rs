pub mod model_metadata;
pub mod model_storage;
pub mod class_index;
pub mod config;

pub use model_metadata::{ModelKind, ModelMetadata};
pub use model_storage::{save_model_with_metadata, load_metadata, load_model_with_metadata, next_versioned_path, print_metadata_info};
pub use class_index::ClassIndexTable;
pub use config::{AppConfig, AugmentationSettings, DeviceType, ServerSettings, TrainingSettings};
