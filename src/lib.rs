pub mod arch;
pub mod data;
pub mod error;
pub mod optimization;
pub mod persist;
pub mod precision;
pub mod report;
pub mod training;

pub use arch::{Layer, LayerSpec, Padding, Sequential};
pub use data::{load_directory, train_val_split, DataError, ImageDataset};
pub use error::{MlErr, Result};
pub use training::{ClassWeights, FitConfig, History, Trainer};
