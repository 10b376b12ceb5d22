mod history;
mod schedule;
mod trainer;

pub use history::History;
pub use schedule::{EarlyStopping, ReduceLrOnPlateau};
pub use trainer::{evaluate, ClassWeights, FitConfig, Trainer};
