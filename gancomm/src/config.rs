/// Model, schedule and per-pass configuration
///
/// `ModelConfig` fixes the code dimensions, `Schedule` is the list of
/// training phases with their paired validation phases, and
/// `ForwardOptions` carries the runtime inputs every forward pass reads.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::channel::Perturbation;
use crate::error::{Error, Result};

/// Code dimensions of the autoencoder
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Bits per message
    pub k: usize,

    /// Channel uses per message
    pub n: usize,

    /// Seed for initialization and all sampled randomness
    pub seed: u64,
}

impl ModelConfig {
    pub fn new(k: usize, n: usize, seed: u64) -> Self {
        Self { k, n, seed }
    }

    /// Number of distinct messages, M = 2^k
    pub fn m(&self) -> usize {
        1 << self.k
    }

    pub fn bits_per_symbol(&self) -> f32 {
        self.k as f32 / self.n as f32
    }

    /// Convert Eb/No in dB to the per-dimension noise standard deviation
    pub fn ebno_to_sigma(&self, ebno_db: f32) -> f32 {
        let ebno = 10f32.powf(ebno_db / 10.0);
        1.0 / (2.0 * self.bits_per_symbol() * ebno).sqrt()
    }
}

/// One training phase: constant batch size, learning rate and Eb/No
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingPhase {
    pub batch_size: usize,
    pub learning_rate: f32,
    pub ebno_db: f32,
    pub iterations: usize,
}

/// Validation settings paired with a training phase
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationPhase {
    pub batch_size: usize,
    pub ebno_db: f32,
    /// Validate every `interval` training steps
    pub interval: usize,
}

/// Ordered training phases, each with its validation phase
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub training: Vec<TrainingPhase>,
    pub validation: Vec<ValidationPhase>,
}

impl Schedule {
    /// Read a schedule from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let schedule: Schedule = serde_json::from_reader(reader)?;
        schedule.validate()?;
        Ok(schedule)
    }

    /// Short schedule used by the demos: a coarse phase followed by a
    /// fine-tuning phase at a lower learning rate and larger batch.
    pub fn default_for_demo() -> Self {
        Self {
            training: vec![
                TrainingPhase { batch_size: 64, learning_rate: 1e-3, ebno_db: 7.0, iterations: 200 },
                TrainingPhase { batch_size: 128, learning_rate: 1e-4, ebno_db: 7.0, iterations: 200 },
            ],
            validation: vec![
                ValidationPhase { batch_size: 1000, ebno_db: 7.0, interval: 50 },
                ValidationPhase { batch_size: 1000, ebno_db: 7.0, interval: 50 },
            ],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.training.len() != self.validation.len() {
            return Err(Error::Schedule(format!(
                "{} training phases but {} validation phases",
                self.training.len(),
                self.validation.len()
            )));
        }
        if let Some(index) = self.validation.iter().position(|v| v.interval == 0) {
            return Err(Error::Schedule(format!(
                "validation phase {} has a zero interval",
                index
            )));
        }
        Ok(())
    }

    /// Training phases zipped with their validation phases
    pub fn phases(&self) -> Result<impl Iterator<Item = (&TrainingPhase, &ValidationPhase)>> {
        self.validate()?;
        Ok(self.training.iter().zip(self.validation.iter()))
    }
}

/// Settings shared by every pass of a training or evaluation run
#[derive(Clone, Debug)]
pub struct AdversarialSettings {
    /// Gates receiver dropout
    pub is_training: bool,

    /// Receiver dropout rate in [0, 1)
    pub dropout_rate: f32,

    /// Externally supplied attack vector added on both receiver paths
    pub perturbation: Perturbation,

    /// Strength of the generator direction on the perturbed path
    pub ep: f32,
}

impl AdversarialSettings {
    pub fn new(n: usize) -> Self {
        Self {
            is_training: true,
            dropout_rate: 0.0,
            perturbation: Perturbation::zeros(n),
            ep: 1.0,
        }
    }

    pub fn options(&self, batch_size: usize, ebno_db: f32, learning_rate: f32) -> ForwardOptions {
        ForwardOptions {
            is_training: self.is_training,
            dropout_rate: self.dropout_rate,
            perturbation: self.perturbation.clone(),
            batch_size,
            ebno_db,
            learning_rate,
            ep: self.ep,
        }
    }
}

/// Runtime inputs of a single forward pass
#[derive(Clone, Debug)]
pub struct ForwardOptions {
    pub is_training: bool,
    pub dropout_rate: f32,
    pub perturbation: Perturbation,
    pub batch_size: usize,
    pub ebno_db: f32,
    /// Zero for evaluation-only passes
    pub learning_rate: f32,
    pub ep: f32,
}

impl ForwardOptions {
    /// Replace the attack vector, keeping everything else
    pub fn with_perturbation(&self, perturbation: Perturbation) -> Self {
        Self { perturbation, ..self.clone() }
    }

    pub fn with_ebno(&self, ebno_db: f32) -> Self {
        Self { ebno_db, ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_message_count_and_rate() {
        let config = ModelConfig::new(4, 7, 0);
        assert_eq!(config.m(), 16);
        assert_relative_eq!(config.bits_per_symbol(), 4.0 / 7.0);
    }

    #[test]
    fn test_ebno_to_sigma() {
        let config = ModelConfig::new(4, 4, 0);
        // 0 dB at one bit per channel use gives 1/sqrt(2)
        assert_relative_eq!(config.ebno_to_sigma(0.0), std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-6);
        // +10 dB shrinks sigma by sqrt(10)
        let ratio = config.ebno_to_sigma(0.0) / config.ebno_to_sigma(10.0);
        assert_relative_eq!(ratio, 10f32.sqrt(), epsilon = 1e-4);
    }

    #[test]
    fn test_schedule_length_mismatch() {
        let mut schedule = Schedule::default_for_demo();
        schedule.validation.pop();
        assert!(matches!(schedule.validate(), Err(Error::Schedule(_))));
    }

    #[test]
    fn test_schedule_zero_interval() {
        let mut schedule = Schedule::default_for_demo();
        schedule.validation[1].interval = 0;
        assert!(schedule.phases().is_err());
    }

    #[test]
    fn test_schedule_json() {
        let json = r#"{
            "training": [{"batch_size": 32, "learning_rate": 0.001, "ebno_db": 5.0, "iterations": 10}],
            "validation": [{"batch_size": 100, "ebno_db": 5.0, "interval": 5}]
        }"#;
        let schedule: Schedule = serde_json::from_str(json).unwrap();
        assert!(schedule.validate().is_ok());
        assert_eq!(schedule.training[0].iterations, 10);
        assert_eq!(schedule.validation[0].interval, 5);
    }
}
