pub mod layers;
pub mod loss;
mod sequential;

pub use layers::{Layer, LayerSpec, Padding};
pub use sequential::Sequential;
