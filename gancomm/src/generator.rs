/// Generator network: clean signal -> worst-case perturbation direction
///
/// Two convolutions, each followed by ReLU and batch normalization, then a
/// dense projection back to (2, n) and the transmitter's power
/// normalization. Batch normalization always uses the statistics of the
/// current batch, also when the network is only evaluated.

use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor};
use rand::Rng;

use crate::layers::{power_normalize, BatchStatsNorm, Conv1d, Dense};
use crate::params::{ParamGroup, ParamRegistry};

pub const GENERATOR_FILTERS: usize = 128;
pub const GENERATOR_KERNEL: usize = 5;

#[derive(Clone, Debug)]
pub struct Generator {
    conv1: Conv1d,
    norm1: BatchStatsNorm,
    conv2: Conv1d,
    norm2: BatchStatsNorm,
    dense: Dense,
    n: usize,
}

impl Generator {
    pub fn new<R: Rng>(registry: &mut ParamRegistry<R>, n: usize) -> Self {
        let group = ParamGroup::Generator;
        Self {
            conv1: Conv1d::new(registry, "generator/conv1", group, [2, GENERATOR_FILTERS], GENERATOR_KERNEL),
            norm1: BatchStatsNorm::new(registry, "generator/bn1", group, GENERATOR_FILTERS),
            conv2: Conv1d::new(registry, "generator/conv2", group, [GENERATOR_FILTERS, GENERATOR_FILTERS], GENERATOR_KERNEL),
            norm2: BatchStatsNorm::new(registry, "generator/bn2", group, GENERATOR_FILTERS),
            dense: Dense::new(registry, "generator/dense", group, GENERATOR_FILTERS * n, 2 * n),
            n,
        }
    }

    /// signal: [Batch, 2, n] (I/Q as channels) -> [Batch, 2, n]
    pub fn generate<B: Backend>(&self, params: &[Tensor<B, 1>], signal: Tensor<B, 3>) -> Tensor<B, 3> {
        let batch_size = signal.dims()[0];

        let x = self.norm1.forward(params, relu(self.conv1.forward(params, signal)));
        let x = self.norm2.forward(params, relu(self.conv2.forward(params, x)));
        let x = self.dense.forward(params, x.reshape([batch_size, GENERATOR_FILTERS * self.n]));

        power_normalize(x.reshape([batch_size, 2, self.n]))
    }
}

/// Batch mean of the generator output, the single direction used on the
/// perturbed path: [Batch, 2, n] -> [1, 2, n]
pub fn batch_direction<B: Backend>(generated: Tensor<B, 3>) -> Tensor<B, 3> {
    generated.mean_dim(0)
}
