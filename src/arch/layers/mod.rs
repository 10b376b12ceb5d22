mod act;
mod conv;
mod dense;
mod dropout;
mod norm;
mod pool;
mod shape;

pub use act::{Relu, Softmax};
pub use conv::{Conv2d, Padding};
pub use dense::Dense;
pub use dropout::Dropout;
pub use norm::BatchNorm2d;
pub use pool::{GlobalAvgPool, MaxPool2d};
pub use shape::Flatten;

use ndarray::{Array2, Array4, ArrayD, Ix2, Ix4};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{MlErr, Result};
use crate::optimization::ParamTensor;

/// One stage of a sequential network.
///
/// Layers own their parameters, accumulate their own gradients during
/// `backward`, and cache whatever forward metadata the backward pass needs.
pub enum Layer {
    Conv2d(Conv2d),
    BatchNorm2d(BatchNorm2d),
    MaxPool2d(MaxPool2d),
    GlobalAvgPool(GlobalAvgPool),
    Flatten(Flatten),
    Dense(Dense),
    Dropout(Dropout),
    Relu(Relu),
    Softmax(Softmax),
}

impl Layer {
    pub fn conv2d<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        padding: Padding,
        rng: &mut R,
    ) -> Self {
        Layer::Conv2d(Conv2d::new(in_channels, out_channels, kernel, padding, rng))
    }

    pub fn batch_norm2d(channels: usize) -> Self {
        Layer::BatchNorm2d(BatchNorm2d::new(channels))
    }

    pub fn max_pool2d(size: (usize, usize)) -> Self {
        Layer::MaxPool2d(MaxPool2d::new(size))
    }

    pub fn global_avg_pool() -> Self {
        Layer::GlobalAvgPool(GlobalAvgPool::new())
    }

    pub fn flatten() -> Self {
        Layer::Flatten(Flatten::new())
    }

    pub fn dense<R: Rng + ?Sized>(dim: (usize, usize), rng: &mut R) -> Self {
        Layer::Dense(Dense::new(dim, rng))
    }

    pub fn dropout(rate: f32, seed: u64) -> Self {
        Layer::Dropout(Dropout::new(rate, seed))
    }

    pub fn relu() -> Self {
        Layer::Relu(Relu::new())
    }

    pub fn softmax() -> Self {
        Layer::Softmax(Softmax::new())
    }

    pub fn forward(&mut self, x: ArrayD<f32>, train: bool) -> Result<ArrayD<f32>> {
        match self {
            Layer::Conv2d(l) => l.forward(x, train),
            Layer::BatchNorm2d(l) => l.forward(x, train),
            Layer::MaxPool2d(l) => l.forward(x, train),
            Layer::GlobalAvgPool(l) => l.forward(x, train),
            Layer::Flatten(l) => l.forward(x, train),
            Layer::Dense(l) => l.forward(x, train),
            Layer::Dropout(l) => l.forward(x, train),
            Layer::Relu(l) => l.forward(x, train),
            Layer::Softmax(l) => l.forward(x, train),
        }
    }

    pub fn backward(&mut self, d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        match self {
            Layer::Conv2d(l) => l.backward(d),
            Layer::BatchNorm2d(l) => l.backward(d),
            Layer::MaxPool2d(l) => l.backward(d),
            Layer::GlobalAvgPool(l) => l.backward(d),
            Layer::Flatten(l) => l.backward(d),
            Layer::Dense(l) => l.backward(d),
            Layer::Dropout(l) => l.backward(d),
            Layer::Relu(l) => l.backward(d),
            Layer::Softmax(l) => l.backward(d),
        }
    }

    /// Trainable tensors paired with their gradients, in a stable order.
    pub fn params_mut(&mut self) -> Vec<ParamTensor<'_>> {
        match self {
            Layer::Conv2d(l) => l.params_mut(),
            Layer::BatchNorm2d(l) => l.params_mut(),
            Layer::Dense(l) => l.params_mut(),
            _ => Vec::new(),
        }
    }

    /// Everything persistence and snapshotting must carry: trainable
    /// parameters plus batch-norm running estimates.
    pub fn state_tensors(&self) -> Vec<&ArrayD<f32>> {
        match self {
            Layer::Conv2d(l) => l.state_tensors(),
            Layer::BatchNorm2d(l) => l.state_tensors(),
            Layer::Dense(l) => l.state_tensors(),
            _ => Vec::new(),
        }
    }

    pub fn state_tensors_mut(&mut self) -> Vec<&mut ArrayD<f32>> {
        match self {
            Layer::Conv2d(l) => l.state_tensors_mut(),
            Layer::BatchNorm2d(l) => l.state_tensors_mut(),
            Layer::Dense(l) => l.state_tensors_mut(),
            _ => Vec::new(),
        }
    }

    /// The amount of trainable parameters this layer has.
    pub fn param_count(&self) -> usize {
        match self {
            Layer::Conv2d(l) => l.param_count(),
            Layer::BatchNorm2d(l) => l.param_count(),
            Layer::Dense(l) => l.param_count(),
            _ => 0,
        }
    }

    /// Multiplies every accumulated gradient by `factor`. Used to undo loss
    /// scaling before the optimizer step.
    pub fn scale_grads(&mut self, factor: f32) {
        match self {
            Layer::Conv2d(l) => l.scale_grads(factor),
            Layer::BatchNorm2d(l) => l.scale_grads(factor),
            Layer::Dense(l) => l.scale_grads(factor),
            _ => {}
        }
    }

    /// A serializable description of this layer's configuration.
    pub fn spec(&self) -> LayerSpec {
        match self {
            Layer::Conv2d(l) => LayerSpec::Conv2d {
                in_channels: l.in_channels(),
                out_channels: l.out_channels(),
                kernel: l.kernel(),
                padding: l.padding(),
            },
            Layer::BatchNorm2d(l) => LayerSpec::BatchNorm2d {
                channels: l.channels(),
            },
            Layer::MaxPool2d(l) => LayerSpec::MaxPool2d { size: l.size() },
            Layer::GlobalAvgPool(_) => LayerSpec::GlobalAvgPool,
            Layer::Flatten(_) => LayerSpec::Flatten,
            Layer::Dense(l) => LayerSpec::Dense { dim: l.dim() },
            Layer::Dropout(l) => LayerSpec::Dropout { rate: l.rate() },
            Layer::Relu(_) => LayerSpec::Relu,
            Layer::Softmax(_) => LayerSpec::Softmax,
        }
    }

    /// Rebuilds a layer from its spec. Parameters come out freshly
    /// initialized and are expected to be overwritten from persisted state.
    pub fn from_spec(spec: &LayerSpec) -> Self {
        use rand::{rngs::StdRng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(0);
        match *spec {
            LayerSpec::Conv2d {
                in_channels,
                out_channels,
                kernel,
                padding,
            } => Layer::conv2d(in_channels, out_channels, kernel, padding, &mut rng),
            LayerSpec::BatchNorm2d { channels } => Layer::batch_norm2d(channels),
            LayerSpec::MaxPool2d { size } => Layer::max_pool2d(size),
            LayerSpec::GlobalAvgPool => Layer::global_avg_pool(),
            LayerSpec::Flatten => Layer::flatten(),
            LayerSpec::Dense { dim } => Layer::dense(dim, &mut rng),
            LayerSpec::Dropout { rate } => Layer::dropout(rate, 0),
            LayerSpec::Relu => Layer::relu(),
            LayerSpec::Softmax => Layer::softmax(),
        }
    }
}

/// Architecture description of a single layer, as stored in saved models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LayerSpec {
    Conv2d {
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        padding: Padding,
    },
    BatchNorm2d {
        channels: usize,
    },
    MaxPool2d {
        size: (usize, usize),
    },
    GlobalAvgPool,
    Flatten,
    Dense {
        dim: (usize, usize),
    },
    Dropout {
        rate: f32,
    },
    Relu,
    Softmax,
}

pub(crate) fn to_rank4(what: &'static str, x: ArrayD<f32>) -> Result<Array4<f32>> {
    let got = x.ndim();
    x.into_dimensionality::<Ix4>().map_err(|_| MlErr::RankMismatch {
        what,
        got,
        expected: 4,
    })
}

pub(crate) fn to_rank2(what: &'static str, x: ArrayD<f32>) -> Result<Array2<f32>> {
    let got = x.ndim();
    x.into_dimensionality::<Ix2>().map_err(|_| MlErr::RankMismatch {
        what,
        got,
        expected: 2,
    })
}
