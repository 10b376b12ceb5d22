mod adam;
mod optimizer;

pub use adam::{Adam, AdamW};
pub use optimizer::{Optimizer, ParamTensor};
