/// Autoencoder composition: transmitter, channel, generator and receiver
///
/// All randomness of a pass (messages, channel noise, dropout masks) is drawn
/// up front into a `BatchSample`. The forward pass is then a deterministic
/// function of (parameters, batch), which lets the consensus step evaluate
/// the same batch at several parameter points.

use burn::tensor::activation::log_softmax;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};
use rand::Rng;

use crate::channel::{self, AwgnChannel, Perturbation};
use crate::config::{ForwardOptions, ModelConfig};
use crate::error::{Error, Result};
use crate::generator::{batch_direction, Generator};
use crate::params::{ParamId, ParamRegistry, ParamStore};
use crate::receiver::Receiver;
use crate::transmitter::Transmitter;

/// The three networks of the system, as handles into one parameter store
#[derive(Clone, Debug)]
pub struct Autoencoder {
    config: ModelConfig,
    transmitter: Transmitter,
    generator: Generator,
    receiver: Receiver,
}

impl Autoencoder {
    /// Declare and initialize every parameter
    pub fn new<B: Backend, R: Rng>(config: &ModelConfig, rng: &mut R, device: &B::Device) -> (Self, ParamStore<B>) {
        let (m, n) = (config.m(), config.n);
        let mut registry = ParamRegistry::new(rng);

        let transmitter = Transmitter::new(&mut registry, m, n);
        let generator = Generator::new(&mut registry, n);
        let receiver = Receiver::new(&mut registry, m, n);

        let model = Self { config: config.clone(), transmitter, generator, receiver };
        (model, registry.build(device))
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn transmitter(&self) -> &Transmitter {
        &self.transmitter
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Draw the messages, noise and dropout masks of one pass
    pub fn sample_batch<R: Rng>(&self, rng: &mut R, options: &ForwardOptions) -> Result<BatchSample> {
        let (m, n) = (self.config.m(), self.config.n);
        let batch_size = options.batch_size;

        let messages: Vec<usize> = (0..batch_size).map(|_| rng.gen_range(0..m)).collect();

        let sigma = self.config.ebno_to_sigma(options.ebno_db);
        let noise = AwgnChannel::new(sigma)?.sample(rng, batch_size * 2 * n);

        let dropout_shape = self.receiver.dropout_shape(batch_size);
        let (dropout_clean, dropout_perturbed) = if options.is_training && options.dropout_rate > 0.0 {
            let len: usize = dropout_shape.iter().product();
            (
                Some(dropout_mask(rng, len, options.dropout_rate)),
                Some(dropout_mask(rng, len, options.dropout_rate)),
            )
        } else {
            (None, None)
        };

        Ok(BatchSample {
            messages,
            m,
            n,
            noise,
            perturbation: options.perturbation.clone(),
            dropout_shape,
            dropout_clean,
            dropout_perturbed,
            ep: options.ep,
        })
    }

    /// Clean signals for the given messages
    pub fn transmit<B: Backend>(&self, params: &[Tensor<B, 1>], messages: &[usize], device: &B::Device) -> Tensor<B, 3> {
        self.transmitter.encode(params, one_hot(messages, self.config.m(), device))
    }

    /// Full training-graph forward pass
    pub fn forward<B: Backend>(&self, params: &[Tensor<B, 1>], batch: &BatchTensors<B>) -> ForwardPass<B> {
        let signal = self.transmitter.encode(params, batch.one_hot.clone());
        let generated = self.generator.generate(params, signal.clone());
        let direction = batch_direction(generated.clone());

        let received = channel::apply(signal.clone(), batch.noise.clone(), batch.perturbation.clone());
        let perturbed = channel::perturb(received.clone(), direction.clone(), batch.ep);

        let logits_clean = self.receiver.decode(params, received, batch.dropout_clean.clone());
        let logits_perturbed = self.receiver.decode(params, perturbed, batch.dropout_perturbed.clone());

        ForwardPass { signal, generated, direction, logits_clean, logits_perturbed }
    }

    /// Receiver logits of the clean-plus-noise path only
    pub fn decode_clean<B: Backend>(&self, params: &[Tensor<B, 1>], batch: &BatchTensors<B>) -> Tensor<B, 2> {
        let signal = self.transmitter.encode(params, batch.one_hot.clone());
        let received = channel::apply(signal, batch.noise.clone(), batch.perturbation.clone());
        self.receiver.decode(params, received, batch.dropout_clean.clone())
    }

    /// Batch mean of the generator output for the batch's messages
    pub fn generator_direction<B: Backend>(&self, params: &[Tensor<B, 1>], batch: &BatchTensors<B>) -> Tensor<B, 3> {
        let signal = self.transmitter.encode(params, batch.one_hot.clone());
        batch_direction(self.generator.generate(params, signal))
    }
}

fn dropout_mask<R: Rng>(rng: &mut R, len: usize, rate: f32) -> Vec<f32> {
    let keep = 1.0 - rate;
    (0..len)
        .map(|_| if rng.gen::<f32>() < keep { 1.0 / keep } else { 0.0 })
        .collect()
}

/// One-hot rows for the given messages: [Batch, M]
pub fn one_hot<B: Backend>(messages: &[usize], m: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut values = vec![0.0f32; messages.len() * m];
    for (row, &message) in messages.iter().enumerate() {
        values[row * m + message] = 1.0;
    }
    Tensor::from_data(TensorData::new(values, [messages.len(), m]), device)
}

/// Randomness of one pass, kept on the host
#[derive(Clone, Debug)]
pub struct BatchSample {
    messages: Vec<usize>,
    m: usize,
    n: usize,
    noise: Vec<f32>,
    perturbation: Perturbation,
    dropout_shape: [usize; 4],
    dropout_clean: Option<Vec<f32>>,
    dropout_perturbed: Option<Vec<f32>>,
    ep: f32,
}

impl BatchSample {
    pub fn messages(&self) -> &[usize] {
        &self.messages
    }

    pub fn batch_size(&self) -> usize {
        self.messages.len()
    }

    /// Upload the sample to `device` on backend `B`
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> BatchTensors<B> {
        let batch_size = self.batch_size();
        let mask = |values: &Option<Vec<f32>>| {
            values
                .as_ref()
                .map(|v| Tensor::from_data(TensorData::new(v.clone(), self.dropout_shape), device))
        };

        BatchTensors {
            one_hot: one_hot(&self.messages, self.m, device),
            noise: Tensor::from_data(TensorData::new(self.noise.clone(), [batch_size, 2, self.n]), device),
            perturbation: self.perturbation.to_tensor(device),
            dropout_clean: mask(&self.dropout_clean),
            dropout_perturbed: mask(&self.dropout_perturbed),
            ep: self.ep,
        }
    }
}

/// A `BatchSample` on a backend
#[derive(Clone, Debug)]
pub struct BatchTensors<B: Backend> {
    pub one_hot: Tensor<B, 2>,
    pub noise: Tensor<B, 3>,
    pub perturbation: Tensor<B, 3>,
    pub dropout_clean: Option<Tensor<B, 4>>,
    pub dropout_perturbed: Option<Tensor<B, 4>>,
    pub ep: f32,
}

/// Intermediate results of `Autoencoder::forward`
#[derive(Clone, Debug)]
pub struct ForwardPass<B: Backend> {
    /// Transmitter output [Batch, 2, n]
    pub signal: Tensor<B, 3>,
    /// Generator output [Batch, 2, n]
    pub generated: Tensor<B, 3>,
    /// Batch mean of the generator output [1, 2, n]
    pub direction: Tensor<B, 3>,
    pub logits_clean: Tensor<B, 2>,
    pub logits_perturbed: Tensor<B, 2>,
}

impl<B: Backend> ForwardPass<B> {
    pub fn losses(&self, one_hot: &Tensor<B, 2>) -> Losses<B> {
        let loss_real = cross_entropy(self.logits_clean.clone(), one_hot.clone());
        let loss_noise = cross_entropy(self.logits_perturbed.clone(), one_hot.clone());

        Losses {
            cross_entropy: loss_real.clone(),
            d_loss: loss_real + loss_noise.clone(),
            g_loss: loss_noise.neg(),
        }
    }
}

/// Scalar losses of a pass, each a [1] tensor
#[derive(Clone, Debug)]
pub struct Losses<B: Backend> {
    /// Reconstruction cross-entropy of the clean path
    pub cross_entropy: Tensor<B, 1>,
    /// Clean-path plus perturbed-path cross-entropy
    pub d_loss: Tensor<B, 1>,
    /// Negative perturbed-path cross-entropy
    pub g_loss: Tensor<B, 1>,
}

/// Which loss a gradient is taken of
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Objective {
    Reconstruction,
    Discriminator,
    Generator,
}

impl<B: Backend> Losses<B> {
    pub fn select(self, objective: Objective) -> Tensor<B, 1> {
        match objective {
            Objective::Reconstruction => self.cross_entropy,
            Objective::Discriminator => self.d_loss,
            Objective::Generator => self.g_loss,
        }
    }
}

/// Mean softmax cross-entropy between logits and one-hot labels
pub fn cross_entropy<B: Backend>(logits: Tensor<B, 2>, one_hot: Tensor<B, 2>) -> Tensor<B, 1> {
    (log_softmax(logits, 1) * one_hot).sum_dim(1).mean().neg()
}

/// Fraction of rows whose arg-max differs from the sent message
pub fn block_error_rate<B: Backend>(logits: Tensor<B, 2>, messages: &[usize]) -> Result<f32> {
    let [batch_size, m] = logits.dims();
    let values = logits
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| Error::TensorData(format!("{:?}", e)))?;

    let errors = values
        .chunks(m)
        .zip(messages.iter())
        .filter(|(row, message)| argmax(row) != **message)
        .count();

    Ok(errors as f32 / batch_size as f32)
}

/// Index of the first maximum
fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_val), (i, &v)| {
            if v > best_val {
                (i, v)
            } else {
                (best, best_val)
            }
        })
        .0
}

/// Gradients of `objective` with respect to the parameters `wrt`
///
/// The stored values are lifted onto the autodiff backend `B`, the batch is
/// run forward and the chosen loss is differentiated. An entry is `None`
/// when the loss does not depend on that parameter.
pub fn objective_gradients<B: AutodiffBackend>(
    model: &Autoencoder,
    values: &[Tensor<B::InnerBackend, 1>],
    batch: &BatchTensors<B>,
    objective: Objective,
    wrt: &[ParamId],
) -> (f32, Vec<Option<Tensor<B::InnerBackend, 1>>>) {
    use burn::tensor::ElementConversion;

    let lifted: Vec<Tensor<B, 1>> = values
        .iter()
        .map(|v| Tensor::from_inner(v.clone()).require_grad())
        .collect();

    let pass = model.forward(&lifted, batch);
    let loss = pass.losses(&batch.one_hot).select(objective);
    let loss_value: f32 = loss.clone().into_scalar().elem();

    let grads = loss.backward();
    let gradients = wrt.iter().map(|id| lifted[id.index()].grad(&grads)).collect();

    (loss_value, gradients)
}
