/// Transmitter: message index -> power-normalized (2, n) signal
///
/// embedding (M x M) -> ELU -> single-channel map of length M -> conv ->
/// ReLU -> flatten -> dense 2n -> (2, n) -> average power normalization

use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor};
use rand::Rng;

use crate::layers::{elu, power_normalize, Conv1d, Dense, Embedding};
use crate::params::{ParamGroup, ParamRegistry};

pub const TRANSMITTER_FILTERS: usize = 16;
pub const TRANSMITTER_KERNEL: usize = 5;

#[derive(Clone, Debug)]
pub struct Transmitter {
    embedding: Embedding,
    conv: Conv1d,
    dense: Dense,
    m: usize,
    n: usize,
}

impl Transmitter {
    pub fn new<R: Rng>(registry: &mut ParamRegistry<R>, m: usize, n: usize) -> Self {
        let group = ParamGroup::Transmitter;
        Self {
            embedding: Embedding::new(registry, "transmitter/embedding", group, m, m),
            conv: Conv1d::new(registry, "transmitter/conv", group, [1, TRANSMITTER_FILTERS], TRANSMITTER_KERNEL),
            dense: Dense::new(registry, "transmitter/dense", group, TRANSMITTER_FILTERS * m, 2 * n),
            m,
            n,
        }
    }

    /// one_hot: [Batch, M] -> signal [Batch, 2, n]
    pub fn encode<B: Backend>(&self, params: &[Tensor<B, 1>], one_hot: Tensor<B, 2>) -> Tensor<B, 3> {
        let batch_size = one_hot.dims()[0];

        let x = elu(self.embedding.forward(params, one_hot));
        let x = relu(self.conv.forward(params, x.reshape([batch_size, 1, self.m])));
        let x = self.dense.forward(params, x.reshape([batch_size, TRANSMITTER_FILTERS * self.m]));

        power_normalize(x.reshape([batch_size, 2, self.n]))
    }
}
