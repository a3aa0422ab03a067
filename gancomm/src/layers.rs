/// Layer handles over the flat parameter store
///
/// A layer only remembers which parameters it owns and their shapes. Its
/// `forward` reads the current values from a parameter slice, so the same
/// layer runs unchanged on the plain backend (evaluation) and on an
/// autodiff backend (training).

use burn::tensor::module::{conv1d, conv2d};
use burn::tensor::ops::ConvOptions;
use burn::tensor::{backend::Backend, Tensor};
use rand::Rng;

use crate::params::{Init, ParamGroup, ParamId, ParamRegistry};

/// Batch norm epsilon
pub const BATCH_NORM_EPSILON: f32 = 1e-3;

fn param<B: Backend, const D: usize>(params: &[Tensor<B, 1>], id: ParamId, shape: [usize; D]) -> Tensor<B, D> {
    params[id.index()].clone().reshape(shape)
}

/// Fully connected layer, `x @ W + b`
#[derive(Clone, Debug)]
pub struct Dense {
    weight: ParamId,
    bias: ParamId,
    d_input: usize,
    d_output: usize,
}

impl Dense {
    pub fn new<R: Rng>(registry: &mut ParamRegistry<R>, name: &str, group: ParamGroup, d_input: usize, d_output: usize) -> Self {
        let weight = registry.register(
            &format!("{}/kernel", name),
            group,
            &[d_input, d_output],
            Init::GlorotUniform { fan_in: d_input, fan_out: d_output },
        );
        let bias = registry.register(&format!("{}/bias", name), group, &[d_output], Init::Constant(0.0));
        Self { weight, bias, d_input, d_output }
    }

    /// x: [Batch, d_input] -> [Batch, d_output]
    pub fn forward<B: Backend>(&self, params: &[Tensor<B, 1>], x: Tensor<B, 2>) -> Tensor<B, 2> {
        let weight = param(params, self.weight, [self.d_input, self.d_output]);
        let bias = param(params, self.bias, [1, self.d_output]);
        x.matmul(weight) + bias
    }
}

/// Learned lookup table, applied to one-hot rows
#[derive(Clone, Debug)]
pub struct Embedding {
    weight: ParamId,
    num_embeddings: usize,
    d_model: usize,
}

impl Embedding {
    pub fn new<R: Rng>(registry: &mut ParamRegistry<R>, name: &str, group: ParamGroup, num_embeddings: usize, d_model: usize) -> Self {
        let weight = registry.register(
            &format!("{}/table", name),
            group,
            &[num_embeddings, d_model],
            Init::GlorotUniform { fan_in: num_embeddings, fan_out: d_model },
        );
        Self { weight, num_embeddings, d_model }
    }

    /// one_hot: [Batch, num_embeddings] -> [Batch, d_model]
    pub fn forward<B: Backend>(&self, params: &[Tensor<B, 1>], one_hot: Tensor<B, 2>) -> Tensor<B, 2> {
        one_hot.matmul(param(params, self.weight, [self.num_embeddings, self.d_model]))
    }
}

/// 1-D convolution, stride 1, length-preserving zero padding (odd kernel)
#[derive(Clone, Debug)]
pub struct Conv1d {
    weight: ParamId,
    bias: ParamId,
    channels: [usize; 2],
    kernel_size: usize,
}

impl Conv1d {
    pub fn new<R: Rng>(
        registry: &mut ParamRegistry<R>,
        name: &str,
        group: ParamGroup,
        channels: [usize; 2],
        kernel_size: usize,
    ) -> Self {
        let [channels_in, channels_out] = channels;
        let weight = registry.register(
            &format!("{}/kernel", name),
            group,
            &[channels_out, channels_in, kernel_size],
            Init::GlorotUniform {
                fan_in: channels_in * kernel_size,
                fan_out: channels_out * kernel_size,
            },
        );
        let bias = registry.register(&format!("{}/bias", name), group, &[channels_out], Init::Constant(0.0));
        Self { weight, bias, channels, kernel_size }
    }

    /// x: [Batch, C_in, L] -> [Batch, C_out, L]
    pub fn forward<B: Backend>(&self, params: &[Tensor<B, 1>], x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [channels_in, channels_out] = self.channels;
        let weight = param(params, self.weight, [channels_out, channels_in, self.kernel_size]);
        let bias = param(params, self.bias, [channels_out]);
        let options = ConvOptions::new([1], [self.kernel_size / 2], [1], 1);
        conv1d(x, weight, Some(bias), options)
    }
}

/// 2-D convolution, stride 1, size-preserving zero padding (odd kernel)
#[derive(Clone, Debug)]
pub struct Conv2d {
    weight: ParamId,
    bias: ParamId,
    channels: [usize; 2],
    kernel_size: [usize; 2],
}

impl Conv2d {
    pub fn new<R: Rng>(
        registry: &mut ParamRegistry<R>,
        name: &str,
        group: ParamGroup,
        channels: [usize; 2],
        kernel_size: [usize; 2],
    ) -> Self {
        let [channels_in, channels_out] = channels;
        let [kh, kw] = kernel_size;
        let weight = registry.register(
            &format!("{}/kernel", name),
            group,
            &[channels_out, channels_in, kh, kw],
            Init::GlorotUniform {
                fan_in: channels_in * kh * kw,
                fan_out: channels_out * kh * kw,
            },
        );
        let bias = registry.register(&format!("{}/bias", name), group, &[channels_out], Init::Constant(0.0));
        Self { weight, bias, channels, kernel_size }
    }

    /// x: [Batch, C_in, H, W] -> [Batch, C_out, H, W]
    pub fn forward<B: Backend>(&self, params: &[Tensor<B, 1>], x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [channels_in, channels_out] = self.channels;
        let [kh, kw] = self.kernel_size;
        let weight = param(params, self.weight, [channels_out, channels_in, kh, kw]);
        let bias = param(params, self.bias, [channels_out]);
        let options = ConvOptions::new([1, 1], [kh / 2, kw / 2], [1, 1], 1);
        conv2d(x, weight, Some(bias), options)
    }
}

/// Batch normalization that always normalizes with the statistics of the
/// batch it is given, in evaluation as well as in training.
#[derive(Clone, Debug)]
pub struct BatchStatsNorm {
    gamma: ParamId,
    beta: ParamId,
    channels: usize,
}

impl BatchStatsNorm {
    pub fn new<R: Rng>(registry: &mut ParamRegistry<R>, name: &str, group: ParamGroup, channels: usize) -> Self {
        let gamma = registry.register(&format!("{}/gamma", name), group, &[channels], Init::Constant(1.0));
        let beta = registry.register(&format!("{}/beta", name), group, &[channels], Init::Constant(0.0));
        Self { gamma, beta, channels }
    }

    /// x: [Batch, C, L], statistics per channel over batch and length
    pub fn forward<B: Backend>(&self, params: &[Tensor<B, 1>], x: Tensor<B, 3>) -> Tensor<B, 3> {
        let mean = x.clone().mean_dim(0).mean_dim(2);
        let centered = x - mean;
        let variance = centered.clone().powf_scalar(2.0).mean_dim(0).mean_dim(2);
        let normalized = centered / variance.add_scalar(BATCH_NORM_EPSILON).sqrt();

        let gamma = param(params, self.gamma, [1, self.channels, 1]);
        let beta = param(params, self.beta, [1, self.channels, 1]);
        normalized * gamma + beta
    }
}

/// Exponential linear unit, `x` for x > 0 and `exp(x) - 1` otherwise
pub fn elu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clone().clamp_min(0.0) + x.clamp_max(0.0).exp().sub_scalar(1.0)
}

/// Rescale a batch of signals to `mean(x^2) = 0.5` over the whole batch
///
/// x: [Batch, 2, n]
pub fn power_normalize<B: Backend>(x: Tensor<B, 3>) -> Tensor<B, 3> {
    let power = x.clone().powf_scalar(2.0).mean().mul_scalar(2.0).sqrt();
    x / power.reshape([1, 1, 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_approx_eq_tensor, assert_power_normalized};
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray;

    #[test]
    fn test_conv_preserves_length() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(0);
        let mut registry = ParamRegistry::new(&mut rng);
        let conv = Conv1d::new(&mut registry, "c", ParamGroup::Generator, [2, 8], 5);
        let conv2 = Conv2d::new(&mut registry, "c2", ParamGroup::Discriminator, [1, 4], [3, 3]);
        let store = registry.build::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 3>::ones([3, 2, 7], &device);
        assert_eq!(conv.forward(store.values(), x).dims(), [3, 8, 7]);

        let x = Tensor::<TestBackend, 4>::ones([3, 1, 2, 7], &device);
        assert_eq!(conv2.forward(store.values(), x).dims(), [3, 4, 2, 7]);
    }

    #[test]
    fn test_embedding_selects_rows() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(0);
        let mut registry = ParamRegistry::new(&mut rng);
        let embedding = Embedding::new(&mut registry, "e", ParamGroup::Transmitter, 4, 3);
        let store = registry.build::<TestBackend>(&device);

        let one_hot = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.0f32, 0.0, 1.0, 0.0], [1, 4]),
            &device,
        );
        let row = embedding.forward(store.values(), one_hot);
        let table = store.values()[0].clone().reshape([4, 3]);
        let expected = table.slice([2..3, 0..3]);
        assert_approx_eq_tensor(&row, &expected, 1e-6, "embedding row 2");
    }

    #[test]
    fn test_batch_stats_norm_zero_mean_unit_variance() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(0);
        let mut registry = ParamRegistry::new(&mut rng);
        let norm = BatchStatsNorm::new(&mut registry, "bn", ParamGroup::Generator, 4);
        let store = registry.build::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 3>::random([16, 4, 5], Distribution::Normal(3.0, 2.0), &device);
        let y = norm.forward(store.values(), x);

        let mean: f32 = y.clone().mean_dim(0).mean_dim(2).abs().max().into_scalar();
        let var: f32 = y.powf_scalar(2.0).mean_dim(0).mean_dim(2).mean().into_scalar();
        assert!(mean < 1e-4, "channel mean {}", mean);
        assert!((var - 1.0).abs() < 1e-2, "channel variance {}", var);
    }

    #[test]
    fn test_elu() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([-1.0, 0.0, 2.0], &device);
        let expected = Tensor::<TestBackend, 1>::from_floats([(-1.0f32).exp() - 1.0, 0.0, 2.0], &device);
        assert_approx_eq_tensor(&elu(x), &expected, 1e-6, "elu");
    }

    #[test]
    fn test_power_normalize() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::random([8, 2, 7], Distribution::Normal(0.3, 4.0), &device);
        assert_power_normalized(&power_normalize(x), 1e-5, "normalized batch");
    }
}
