/// AWGN channel with an additive attacker perturbation
///
/// The received signal is `x + noise + p` where `p` is an attack vector of
/// shape (2, n) shared by every element of the batch. A second, perturbed
/// received signal adds `ep` times the batch mean of the generator output.
///
/// Also synthesizes the evaluation attacks: PSR scaling (synchronous),
/// circular shift (non-synchronous) and power-matched Gaussian jamming.

use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::Rng;
use rand_distr::{Distribution, Normal, StandardNormal};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{Error, Result};

/// Added to the squared norm when scaling an attack vector
pub const PERTURBATION_NORM_GUARD: f32 = 1e-8;

/// AWGN noise source
#[derive(Debug, Clone)]
pub struct AwgnChannel {
    distr: Normal<f32>,
}

impl AwgnChannel {
    /// Channel with per-dimension noise standard deviation `sigma`
    pub fn new(sigma: f32) -> Result<Self> {
        let distr = Normal::new(0.0, sigma).map_err(|_| Error::Noise(sigma))?;
        Ok(Self { distr })
    }

    /// Draw `len` noise samples
    pub fn sample<R: Rng>(&self, rng: &mut R, len: usize) -> Vec<f32> {
        (0..len).map(|_| self.distr.sample(rng)).collect()
    }
}

/// `signal + noise + perturbation`, the perturbation broadcast over the batch
///
/// signal, noise: [Batch, 2, n]
/// perturbation: [1, 2, n]
pub fn apply<B: Backend>(
    signal: Tensor<B, 3>,
    noise: Tensor<B, 3>,
    perturbation: Tensor<B, 3>,
) -> Tensor<B, 3> {
    signal + noise + perturbation
}

/// Perturbed received signal `received + ep * direction`
///
/// direction: [1, 2, n], one generator direction for the whole batch
pub fn perturb<B: Backend>(
    received: Tensor<B, 3>,
    direction: Tensor<B, 3>,
    ep: f32,
) -> Tensor<B, 3> {
    received + direction.mul_scalar(ep)
}

/// Random offset for the non-synchronous attack
///
/// `ceil(U(0, n))`, an integer in the closed range [0, n]
pub fn random_shift<R: Rng>(rng: &mut R, n: usize) -> usize {
    rng.gen_range(0.0..n as f64).ceil() as usize
}

/// Attack vector of shape (2, n), stored row-major (I row, then Q row)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Perturbation {
    n: usize,
    values: Vec<f32>,
}

impl Perturbation {
    /// The no-attack vector
    pub fn zeros(n: usize) -> Self {
        Self { n, values: vec![0.0; 2 * n] }
    }

    pub fn from_values(n: usize, values: Vec<f32>) -> Result<Self> {
        if values.len() != 2 * n {
            return Err(Error::PerturbationShape { expected: 2 * n, actual: values.len() });
        }
        Ok(Self { n, values })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean norm over all 2n entries
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Scale so that `||p||^2 / n` equals the linear PSR
    ///
    /// The unit signal power makes `n` the energy of one transmitted block.
    pub fn scaled_to_psr(&self, psr_db: f32) -> Self {
        let psr = 10f32.powf(psr_db / 10.0);
        let energy = self.values.iter().map(|v| v * v).sum::<f32>();
        let scale = (psr * self.n as f32 / (energy + PERTURBATION_NORM_GUARD)).sqrt();
        self.scaled(scale)
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            n: self.n,
            values: self.values.iter().map(|v| v * factor).collect(),
        }
    }

    /// Circular shift of the flattened vector: entry `i` moves to `i + shift`
    pub fn rolled(&self, shift: usize) -> Self {
        let len = self.values.len();
        let mut values = vec![0.0; len];
        for (i, &v) in self.values.iter().enumerate() {
            values[(i + shift) % len] = v;
        }
        Self { n: self.n, values }
    }

    /// Gaussian jammer with the same norm as `self`
    pub fn jamming<R: Rng>(&self, rng: &mut R) -> Self {
        let noise: Vec<f32> = (0..self.values.len())
            .map(|_| StandardNormal.sample(rng))
            .collect();
        let noise_norm = noise.iter().map(|v| v * v).sum::<f32>().sqrt();
        let factor = self.norm() / noise_norm;
        Self {
            n: self.n,
            values: noise.into_iter().map(|v| v * factor).collect(),
        }
    }

    /// Upload as a [1, 2, n] tensor, ready to broadcast over a batch
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        Tensor::from_data(TensorData::new(self.values.clone(), [1, 2, self.n]), device)
    }

    /// Read back a [1, 2, n] tensor, e.g. a generator mean
    pub fn from_tensor<B: Backend>(tensor: Tensor<B, 3>) -> Result<Self> {
        let [_, _, n] = tensor.dims();
        let values = tensor
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| Error::TensorData(format!("{:?}", e)))?;
        Self::from_values(n, values)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let loaded: Perturbation = serde_json::from_reader(reader)?;
        Self::from_values(loaded.n, loaded.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray;

    fn ramp(n: usize) -> Perturbation {
        Perturbation::from_values(n, (0..2 * n).map(|i| i as f32 - 3.0).collect()).unwrap()
    }

    #[test]
    fn test_rolled_shift_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let shift = random_shift(&mut rng, 7);
            assert!(shift <= 7, "shift {} out of [0, 7]", shift);
        }
    }

    #[test]
    fn test_roll_moves_entries_forward() {
        let p = Perturbation::from_values(2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(p.rolled(1).values(), &[4.0, 1.0, 2.0, 3.0]);
        assert_eq!(p.rolled(4).values(), p.values());
        assert_eq!(p.rolled(0).values(), p.values());
    }

    #[test]
    fn test_psr_scaling() {
        let p = ramp(7).scaled_to_psr(-6.0);
        let psr = 10f32.powf(-0.6);
        assert_relative_eq!(p.norm().powi(2) / 7.0, psr, epsilon = 1e-5);
    }

    #[test]
    fn test_zero_perturbation_scales_to_zero() {
        let p = Perturbation::zeros(7).scaled_to_psr(0.0);
        assert!(p.values().iter().all(|&v| v == 0.0));
        assert!(p.norm().is_finite());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let err = Perturbation::from_values(7, vec![0.0; 13]).unwrap_err();
        assert!(matches!(err, Error::PerturbationShape { expected: 14, actual: 13 }));
    }

    #[test]
    fn test_zero_sigma_channel_is_silent() {
        let channel = AwgnChannel::new(0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(channel.sample(&mut rng, 64).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_apply_broadcasts_perturbation() {
        let device = Default::default();
        let signal = Tensor::<TestBackend, 3>::ones([3, 2, 2], &device);
        let noise = Tensor::<TestBackend, 3>::zeros([3, 2, 2], &device);
        let p = Perturbation::from_values(2, vec![0.5, -0.5, 1.0, 0.0]).unwrap();

        let received = apply(signal, noise, p.to_tensor::<TestBackend>(&device));
        assert_eq!(received.dims(), [3, 2, 2]);

        let values: Vec<f32> = received.into_data().to_vec().unwrap();
        for row in values.chunks(4) {
            assert_eq!(row, &[1.5, 0.5, 2.0, 1.0]);
        }
    }

    #[test]
    fn test_zero_ep_leaves_signal() {
        let device = Default::default();
        let received = Tensor::<TestBackend, 3>::ones([2, 2, 3], &device);
        let direction = Tensor::<TestBackend, 3>::ones([1, 2, 3], &device);
        let perturbed = perturb(received.clone(), direction, 0.0);
        let diff: f32 = (perturbed - received).abs().sum().into_scalar();
        assert_eq!(diff, 0.0);
    }

    proptest! {
        #[test]
        fn prop_jamming_matches_norm(
            values in prop::collection::vec(-5.0f32..5.0, 14),
            psr_db in -20.0f32..10.0,
            seed in any::<u64>(),
        ) {
            let p = Perturbation::from_values(7, values).unwrap();
            prop_assume!(p.norm() > 1e-3);
            let scaled = p.scaled_to_psr(psr_db);
            let mut rng = StdRng::seed_from_u64(seed);
            let jammer = scaled.jamming(&mut rng);
            prop_assert!((jammer.norm() - scaled.norm()).abs() <= 1e-4 * scaled.norm().max(1.0));
        }

        #[test]
        fn prop_roll_preserves_norm(
            values in prop::collection::vec(-5.0f32..5.0, 14),
            shift in 0usize..=7,
        ) {
            let p = Perturbation::from_values(7, values).unwrap();
            prop_assert!((p.rolled(shift).norm() - p.norm()).abs() < 1e-4);
        }
    }
}
