/// Receiver ("discriminator"): received signal -> logits over M messages
///
/// The (2, n) signal is read as a single-channel 2 x n image: two
/// convolutions with ReLU, dropout, flatten, dense 2M with ReLU, dense M.
///
/// `decode` is a pure function of the parameter slice and its input; the
/// clean and the perturbed path of a training step call it with the same
/// slice and therefore read the same weights.

use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor};
use rand::Rng;

use crate::layers::{Conv2d, Dense};
use crate::params::{ParamGroup, ParamRegistry};

pub const RECEIVER_FILTERS: [usize; 2] = [16, 8];
pub const RECEIVER_KERNEL: [usize; 2] = [3, 3];

#[derive(Clone, Debug)]
pub struct Receiver {
    conv1: Conv2d,
    conv2: Conv2d,
    dense1: Dense,
    dense2: Dense,
    n: usize,
}

impl Receiver {
    pub fn new<R: Rng>(registry: &mut ParamRegistry<R>, m: usize, n: usize) -> Self {
        let group = ParamGroup::Discriminator;
        let [f1, f2] = RECEIVER_FILTERS;
        Self {
            conv1: Conv2d::new(registry, "receiver/conv1", group, [1, f1], RECEIVER_KERNEL),
            conv2: Conv2d::new(registry, "receiver/conv2", group, [f1, f2], RECEIVER_KERNEL),
            dense1: Dense::new(registry, "receiver/dense1", group, f2 * 2 * n, 2 * m),
            dense2: Dense::new(registry, "receiver/logits", group, 2 * m, m),
            n,
        }
    }

    /// Shape of the dropout mask for a batch: [Batch, F2, 2, n]
    pub fn dropout_shape(&self, batch_size: usize) -> [usize; 4] {
        [batch_size, RECEIVER_FILTERS[1], 2, self.n]
    }

    /// received: [Batch, 2, n] -> logits [Batch, M]
    ///
    /// `dropout_mask` holds the already rescaled keep mask; `None` disables
    /// dropout (evaluation or a zero rate).
    pub fn decode<B: Backend>(
        &self,
        params: &[Tensor<B, 1>],
        received: Tensor<B, 3>,
        dropout_mask: Option<Tensor<B, 4>>,
    ) -> Tensor<B, 2> {
        let batch_size = received.dims()[0];

        let x = relu(self.conv1.forward(params, received.reshape([batch_size, 1, 2, self.n])));
        let x = relu(self.conv2.forward(params, x));
        let x = match dropout_mask {
            Some(mask) => x * mask,
            None => x,
        };
        let x = x.reshape([batch_size, RECEIVER_FILTERS[1] * 2 * self.n]);
        let x = relu(self.dense1.forward(params, x));

        self.dense2.forward(params, x)
    }
}
