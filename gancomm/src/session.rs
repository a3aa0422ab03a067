/// Training and evaluation session
///
/// A `Session` owns everything one run needs: the model, its parameters,
/// both optimizers and the random source. Dropping it releases all of it.

use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::channel::{random_shift, Perturbation};
use crate::config::{AdversarialSettings, ForwardOptions, ModelConfig, Schedule};
use crate::consensus::{ConsensusOptimizer, ConsensusUpdate};
use crate::error::Result;
use crate::model::{block_error_rate, objective_gradients, Autoencoder, BatchSample, Objective};
use crate::optim::{Adam, Optimizer};
use crate::params::ParamStore;

/// Learning-rate factor of the consensus step
pub const CONSENSUS_LR_SCALE: f32 = 0.1;

/// Learning-rate factor of the reconstruction step
pub const RECONSTRUCTION_LR_SCALE: f32 = 10.0;

type Inner<B> = <B as AutodiffBackend>::InnerBackend;

/// Losses observed during one `train_step`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepLosses {
    pub cross_entropy: f32,
    pub d_loss: f32,
    pub g_loss: f32,
    pub regularizer: f32,
}

impl StepLosses {
    pub fn is_finite(&self) -> bool {
        self.cross_entropy.is_finite()
            && self.d_loss.is_finite()
            && self.g_loss.is_finite()
            && self.regularizer.is_finite()
    }
}

/// One validation measurement taken during `train`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub phase: usize,
    pub step: usize,
    pub bler: f32,
}

/// Result of a full training schedule
#[derive(Clone, Debug)]
pub struct TrainingOutcome {
    /// Generator mean captured at the last validation
    pub attack_vector: Perturbation,
    pub reports: Vec<ValidationReport>,
}

/// BLER per Eb/No point for each attack scenario
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttackBler {
    pub ebno_db: Vec<f32>,
    pub no_attack: Vec<f32>,
    pub synchronous: Vec<f32>,
    pub non_synchronous: Vec<f32>,
    pub jamming: Vec<f32>,
}

impl AttackBler {
    fn zeros(ebnodbs: &[f32]) -> Self {
        let zeros = vec![0.0; ebnodbs.len()];
        Self {
            ebno_db: ebnodbs.to_vec(),
            no_attack: zeros.clone(),
            synchronous: zeros.clone(),
            non_synchronous: zeros.clone(),
            jamming: zeros,
        }
    }
}

/// Model, parameters, optimizer state and randomness of one run
pub struct Session<B: AutodiffBackend> {
    model: Autoencoder,
    params: ParamStore<Inner<B>>,
    consensus: ConsensusOptimizer<Inner<B>>,
    reconstruction: Adam<Inner<B>>,
    rng: StdRng,
    device: B::Device,
}

impl<B: AutodiffBackend> Session<B> {
    /// Build and initialize a fresh model, seeded from `config.seed`
    pub fn new(config: ModelConfig, device: B::Device) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let (model, params) = Autoencoder::new::<Inner<B>, _>(&config, &mut rng, &device);

        info!(
            "k = {}, n = {}, M = {}: {} parameters in {} tensors",
            config.k,
            config.n,
            config.m(),
            params.num_scalars(),
            params.len()
        );

        Self {
            model,
            params,
            consensus: ConsensusOptimizer::default(),
            reconstruction: Adam::default_params(),
            rng,
            device,
        }
    }

    /// Build a session and restore its parameters from `path`
    pub fn with_checkpoint<P: AsRef<Path>>(config: ModelConfig, device: B::Device, path: P) -> Result<Self> {
        let mut session = Self::new(config, device);
        session.load(path)?;
        Ok(session)
    }

    pub fn config(&self) -> &ModelConfig {
        self.model.config()
    }

    pub fn model(&self) -> &Autoencoder {
        &self.model
    }

    pub fn params(&self) -> &ParamStore<Inner<B>> {
        &self.params
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Write all parameters to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.params.save(&path)?;
        info!("saved {} parameters to {}", self.params.len(), path.as_ref().display());
        Ok(())
    }

    /// Restore all parameters from `path`
    ///
    /// Optimizer state is not part of a checkpoint.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.params.load(&path, &self.device)?;
        info!("restored {} parameters from {}", self.params.len(), path.as_ref().display());
        Ok(())
    }

    /// Transmitted signals for `messages`, [Batch, 2, n]
    pub fn transmit(&self, messages: &[usize]) -> Tensor<Inner<B>, 3> {
        self.model.transmit(self.params.values(), messages, &self.device)
    }

    /// Draw one batch from the session's random source
    pub fn sample_batch(&mut self, options: &ForwardOptions) -> Result<BatchSample> {
        self.model.sample_batch(&mut self.rng, options)
    }

    /// Consensus update of receiver and generator on `sample`
    pub fn consensus_step(&mut self, sample: &BatchSample, lr: f32) -> ConsensusUpdate<Inner<B>> {
        let batch = sample.to_tensors::<B>(&self.device);
        self.consensus.step(&self.model, &mut self.params, &batch, lr)
    }

    /// Adam step on the clean reconstruction loss, returning that loss
    ///
    /// Only the transmitter and receiver reach the clean loss; the generator
    /// gets no gradient and is left alone.
    pub fn reconstruction_step(&mut self, sample: &BatchSample, lr: f32) -> f32 {
        let batch = sample.to_tensors::<B>(&self.device);
        let ids: Vec<_> = self.params.ids().collect();
        let (loss, grads) = objective_gradients(&self.model, self.params.values(), &batch, Objective::Reconstruction, &ids);

        let gradients = ids
            .into_iter()
            .zip(grads)
            .filter_map(|(id, grad)| grad.map(|g| (id, g)))
            .collect();
        self.reconstruction.step(&mut self.params, gradients, lr);
        loss
    }

    /// One training iteration: the consensus step, then the reconstruction
    /// step, each on its own freshly drawn batch
    pub fn train_step(&mut self, options: &ForwardOptions) -> Result<StepLosses> {
        let sample = self.sample_batch(options)?;
        let update = self.consensus_step(&sample, options.learning_rate * CONSENSUS_LR_SCALE);

        let sample = self.sample_batch(options)?;
        let cross_entropy = self.reconstruction_step(&sample, options.learning_rate * RECONSTRUCTION_LR_SCALE);

        let losses = StepLosses {
            cross_entropy,
            d_loss: update.d_loss,
            g_loss: update.g_loss,
            regularizer: update.regularizer,
        };
        if !losses.is_finite() {
            warn!("non-finite loss after step {}: {:?}", self.reconstruction.step_count(), losses);
        }
        Ok(losses)
    }

    /// Block error rate of the clean path on one fresh batch
    pub fn test_step(&mut self, options: &ForwardOptions) -> Result<f32> {
        let sample = self.sample_batch(options)?;
        let batch = sample.to_tensors::<Inner<B>>(&self.device);
        let logits = self.model.decode_clean(self.params.values(), &batch);
        block_error_rate(logits, sample.messages())
    }

    /// Batch mean of the generator output on one fresh batch
    pub fn generator_mean(&mut self, options: &ForwardOptions) -> Result<Perturbation> {
        let sample = self.sample_batch(options)?;
        let batch = sample.to_tensors::<Inner<B>>(&self.device);
        let direction = self.model.generator_direction(self.params.values(), &batch);
        Perturbation::from_tensor(direction)
    }

    /// Run every phase of `schedule`
    ///
    /// Validation runs at step 0 of each phase and every `interval` steps
    /// after. The returned attack vector is the generator mean from the last
    /// validation, or zeros if none ran.
    pub fn train(&mut self, settings: &AdversarialSettings, schedule: &Schedule) -> Result<TrainingOutcome> {
        let mut attack_vector = Perturbation::zeros(self.config().n);
        let mut reports = Vec::new();

        for (phase, (training, validation)) in schedule.phases()?.enumerate() {
            info!(
                "Batch Size: {}, Learning Rate: {:.0e}, EbNodB: {}, Iterations: {}",
                training.batch_size, training.learning_rate, training.ebno_db, training.iterations
            );
            let train_options = settings.options(training.batch_size, training.ebno_db, training.learning_rate);
            let val_options = settings.options(validation.batch_size, validation.ebno_db, training.learning_rate);

            for step in 0..training.iterations {
                let losses = self.train_step(&train_options)?;
                debug!(
                    "phase {} step {}: ce {:.5}, d_loss {:.5}, g_loss {:.5}, reg {:.5}",
                    phase, step, losses.cross_entropy, losses.d_loss, losses.g_loss, losses.regularizer
                );

                if step % validation.interval == 0 {
                    let bler = self.test_step(&val_options)?;
                    attack_vector = self.generator_mean(&val_options)?;
                    info!(
                        "phase {} step {}: BLER {:.5}, generator mean {:?}",
                        phase,
                        step,
                        bler,
                        attack_vector.values()
                    );
                    reports.push(ValidationReport { phase, step, bler });
                }
            }
        }

        Ok(TrainingOutcome { attack_vector, reports })
    }

    /// Average BLER over `iterations` batches at each Eb/No, for no attack
    /// and the three attacks derived from `perturbation` at `psr_db`
    ///
    /// Each iteration draws one shift and one jammer, shared by all Eb/No
    /// points of that iteration.
    pub fn bler_sim_attack(
        &mut self,
        settings: &AdversarialSettings,
        perturbation: &Perturbation,
        psr_db: f32,
        ebnodbs: &[f32],
        batch_size: usize,
        iterations: usize,
    ) -> Result<AttackBler> {
        let n = self.config().n;
        let none = Perturbation::zeros(n);
        let synchronous = perturbation.scaled_to_psr(psr_db);
        let mut result = AttackBler::zeros(ebnodbs);
        let weight = 1.0 / iterations.max(1) as f32;

        for iteration in 0..iterations {
            let shift = random_shift(&mut self.rng, n);
            let non_synchronous = synchronous.rolled(shift);
            let jamming = synchronous.jamming(&mut self.rng);

            for (i, &ebno_db) in ebnodbs.iter().enumerate() {
                let options = settings.options(batch_size, ebno_db, 0.0);
                result.no_attack[i] += weight * self.test_step(&options.with_perturbation(none.clone()))?;
                result.synchronous[i] += weight * self.test_step(&options.with_perturbation(synchronous.clone()))?;
                result.non_synchronous[i] += weight * self.test_step(&options.with_perturbation(non_synchronous.clone()))?;
                result.jamming[i] += weight * self.test_step(&options.with_perturbation(jamming.clone()))?;
            }
            debug!("attack simulation iteration {} done (shift {})", iteration, shift);
        }

        Ok(result)
    }
}

impl<B: AutodiffBackend> Drop for Session<B> {
    fn drop(&mut self) {
        debug!(
            "closing session after {} reconstruction and {} consensus steps",
            self.reconstruction.step_count(),
            self.consensus.step_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TrainingPhase, ValidationPhase};
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    fn session(seed: u64) -> Session<TestBackend> {
        Session::new(ModelConfig::new(2, 3, seed), Default::default())
    }

    fn tiny_schedule(iterations: usize, interval: usize) -> Schedule {
        Schedule {
            training: vec![TrainingPhase { batch_size: 8, learning_rate: 1e-3, ebno_db: 6.0, iterations }],
            validation: vec![ValidationPhase { batch_size: 16, ebno_db: 6.0, interval }],
        }
    }

    #[test]
    fn test_train_step_reports_finite_losses() {
        let mut s = session(0);
        let settings = AdversarialSettings::new(3);
        let losses = s.train_step(&settings.options(8, 6.0, 1e-3)).unwrap();
        assert!(losses.is_finite());
        assert!(losses.cross_entropy > 0.0);
        assert!(losses.g_loss < 0.0);
        assert!(losses.regularizer >= 0.0);
    }

    #[test]
    fn test_validation_cadence() {
        let mut s = session(1);
        let outcome = s.train(&AdversarialSettings::new(3), &tiny_schedule(5, 2)).unwrap();
        let steps: Vec<usize> = outcome.reports.iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![0, 2, 4]);
        assert!(outcome.reports.iter().all(|r| (0.0..=1.0).contains(&r.bler)));
        assert_eq!(outcome.attack_vector.n(), 3);
        assert!(outcome.attack_vector.norm() > 0.0);
    }

    #[test]
    fn test_no_validation_returns_zero_vector() {
        let mut s = session(2);
        let outcome = s.train(&AdversarialSettings::new(3), &tiny_schedule(0, 1)).unwrap();
        assert!(outcome.reports.is_empty());
        assert_eq!(outcome.attack_vector, Perturbation::zeros(3));
    }

    #[test]
    fn test_mismatched_schedule_is_rejected() {
        let mut s = session(3);
        let mut schedule = tiny_schedule(1, 1);
        schedule.validation.clear();
        assert!(s.train(&AdversarialSettings::new(3), &schedule).is_err());
    }

    #[test]
    fn test_attack_simulation_shapes() {
        let mut s = session(4);
        let mut settings = AdversarialSettings::new(3);
        settings.is_training = false;
        let p = Perturbation::from_values(3, vec![1.0, -1.0, 0.5, 0.0, 0.25, -0.5]).unwrap();

        let result = s.bler_sim_attack(&settings, &p, -2.0, &[0.0, 4.0, 8.0], 16, 2).unwrap();
        for curve in [&result.no_attack, &result.synchronous, &result.non_synchronous, &result.jamming] {
            assert_eq!(curve.len(), 3);
            assert!(curve.iter().all(|b| (0.0..=1.0).contains(b)));
        }
        assert_eq!(result.ebno_db, vec![0.0, 4.0, 8.0]);
    }
}
