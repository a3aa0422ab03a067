/// Tagged parameter store
///
/// Every trainable tensor lives here as a flat 1-D tensor together with its
/// name, logical shape and the group it was tagged with at creation. The
/// networks are pure functions of a slice of these tensors, so the same
/// values can be read twice in one step (the receiver's clean and perturbed
/// paths) or lifted onto an autodiff backend for gradient computation.

use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{Error, Result};

/// Owner of a parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamGroup {
    /// Encoder parameters, trained by the reconstruction step only
    Transmitter,
    /// Receiver parameters
    Discriminator,
    /// Perturbation generator parameters
    Generator,
}

/// Position of a parameter in its store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParamId(usize);

impl ParamId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub group: ParamGroup,
    pub shape: Vec<usize>,
}

impl ParamSpec {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Initial values of a parameter
#[derive(Clone, Copy, Debug)]
pub enum Init {
    /// U(-limit, limit) with limit = sqrt(6 / (fan_in + fan_out))
    GlorotUniform { fan_in: usize, fan_out: usize },
    Constant(f32),
}

impl Init {
    fn sample<R: Rng>(self, rng: &mut R, numel: usize) -> Vec<f32> {
        match self {
            Init::GlorotUniform { fan_in, fan_out } => {
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                (0..numel).map(|_| rng.gen_range(-limit..limit)).collect()
            }
            Init::Constant(value) => vec![value; numel],
        }
    }
}

/// Collects parameter declarations and their initial values
pub struct ParamRegistry<'r, R: Rng> {
    rng: &'r mut R,
    specs: Vec<ParamSpec>,
    values: Vec<Vec<f32>>,
}

impl<'r, R: Rng> ParamRegistry<'r, R> {
    pub fn new(rng: &'r mut R) -> Self {
        Self { rng, specs: Vec::new(), values: Vec::new() }
    }

    pub fn register(&mut self, name: &str, group: ParamGroup, shape: &[usize], init: Init) -> ParamId {
        let spec = ParamSpec { name: name.to_string(), group, shape: shape.to_vec() };
        let values = init.sample(&mut *self.rng, spec.numel());
        self.specs.push(spec);
        self.values.push(values);
        ParamId(self.specs.len() - 1)
    }

    /// Upload the declared parameters to `device`
    pub fn build<B: Backend>(self, device: &B::Device) -> ParamStore<B> {
        let values = self
            .values
            .into_iter()
            .map(|v| {
                let len = v.len();
                Tensor::from_data(TensorData::new(v, [len]), device)
            })
            .collect();
        ParamStore { specs: self.specs, values }
    }
}

/// Flat parameter tensors with their tags
#[derive(Clone, Debug)]
pub struct ParamStore<B: Backend> {
    specs: Vec<ParamSpec>,
    values: Vec<Tensor<B, 1>>,
}

impl<B: Backend> ParamStore<B> {
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    pub fn spec(&self, id: ParamId) -> &ParamSpec {
        &self.specs[id.0]
    }

    pub fn values(&self) -> &[Tensor<B, 1>] {
        &self.values
    }

    pub fn get(&self, id: ParamId) -> &Tensor<B, 1> {
        &self.values[id.0]
    }

    pub fn set(&mut self, id: ParamId, value: Tensor<B, 1>) {
        self.values[id.0] = value;
    }

    pub fn ids(&self) -> impl Iterator<Item = ParamId> {
        (0..self.specs.len()).map(ParamId)
    }

    /// Parameters tagged with `group`, in creation order
    pub fn group(&self, group: ParamGroup) -> Vec<ParamId> {
        self.ids().filter(|id| self.specs[id.0].group == group).collect()
    }

    pub fn num_scalars(&self) -> usize {
        self.specs.iter().map(ParamSpec::numel).sum()
    }

    /// Write every parameter, bit-exact, as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut params = Vec::with_capacity(self.len());
        for (spec, value) in self.specs.iter().zip(self.values.iter()) {
            let data = value
                .clone()
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| Error::TensorData(format!("{:?}", e)))?;
            params.push(StoredParam {
                spec: spec.clone(),
                bits: data.into_iter().map(f32::to_bits).collect(),
            });
        }

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &Checkpoint { params })?;
        Ok(())
    }

    /// Replace every value with the one stored at `path`
    ///
    /// The checkpoint must declare the same parameters, in the same order
    /// and with the same shapes and groups, as this store.
    pub fn load<P: AsRef<Path>>(&mut self, path: P, device: &B::Device) -> Result<()> {
        let reader = BufReader::new(File::open(path)?);
        let checkpoint: Checkpoint = serde_json::from_reader(reader)?;

        if checkpoint.params.len() != self.len() {
            return Err(Error::CheckpointMismatch(format!(
                "expected {} parameters, found {}",
                self.len(),
                checkpoint.params.len()
            )));
        }

        let mut values = Vec::with_capacity(self.len());
        for (spec, stored) in self.specs.iter().zip(checkpoint.params) {
            if stored.spec != *spec {
                return Err(Error::CheckpointMismatch(format!(
                    "parameter '{}' {:?} does not match stored '{}' {:?}",
                    spec.name, spec.shape, stored.spec.name, stored.spec.shape
                )));
            }
            if stored.bits.len() != spec.numel() {
                return Err(Error::CheckpointMismatch(format!(
                    "parameter '{}' has {} stored values, expected {}",
                    spec.name,
                    stored.bits.len(),
                    spec.numel()
                )));
            }
            let data: Vec<f32> = stored.bits.into_iter().map(f32::from_bits).collect();
            let len = data.len();
            values.push(Tensor::from_data(TensorData::new(data, [len]), device));
        }

        self.values = values;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredParam {
    spec: ParamSpec,
    bits: Vec<u32>,
}

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    params: Vec<StoredParam>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray;

    fn small_store(seed: u64) -> ParamStore<TestBackend> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut registry = ParamRegistry::new(&mut rng);
        registry.register("tx_w", ParamGroup::Transmitter, &[4, 4], Init::GlorotUniform { fan_in: 4, fan_out: 4 });
        registry.register("rx_w", ParamGroup::Discriminator, &[3, 2], Init::GlorotUniform { fan_in: 3, fan_out: 2 });
        registry.register("rx_b", ParamGroup::Discriminator, &[2], Init::Constant(0.0));
        registry.register("gen_gamma", ParamGroup::Generator, &[5], Init::Constant(1.0));
        registry.build(&Default::default())
    }

    #[test]
    fn test_groups_in_creation_order() {
        let store = small_store(0);
        let d: Vec<usize> = store.group(ParamGroup::Discriminator).iter().map(|id| id.index()).collect();
        assert_eq!(d, vec![1, 2]);
        assert_eq!(store.group(ParamGroup::Generator).len(), 1);
        assert_eq!(store.num_scalars(), 16 + 6 + 2 + 5);
    }

    #[test]
    fn test_glorot_bounds() {
        let store = small_store(3);
        let limit = (6.0f32 / 8.0).sqrt();
        let values: Vec<f32> = store.values()[0].clone().into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| v.abs() <= limit));
        let gamma: Vec<f32> = store.values()[3].clone().into_data().to_vec().unwrap();
        assert_eq!(gamma, vec![1.0; 5]);
    }

    #[test]
    fn test_save_load_bit_exact() {
        let path = std::env::temp_dir().join("gancomm_params_roundtrip.json");
        let original = small_store(11);
        original.save(&path).unwrap();

        let mut restored = small_store(12);
        restored.load(&path, &Default::default()).unwrap();

        for (a, b) in original.values().iter().zip(restored.values()) {
            let a: Vec<f32> = a.clone().into_data().to_vec().unwrap();
            let b: Vec<f32> = b.clone().into_data().to_vec().unwrap();
            let a_bits: Vec<u32> = a.into_iter().map(f32::to_bits).collect();
            let b_bits: Vec<u32> = b.into_iter().map(f32::to_bits).collect();
            assert_eq!(a_bits, b_bits);
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_rejects_other_layout() {
        let path = std::env::temp_dir().join("gancomm_params_mismatch.json");
        small_store(1).save(&path).unwrap();

        let mut rng = StdRng::seed_from_u64(0);
        let mut registry = ParamRegistry::new(&mut rng);
        registry.register("tx_w", ParamGroup::Transmitter, &[4, 4], Init::Constant(0.0));
        let mut other: ParamStore<TestBackend> = registry.build(&Default::default());

        let err = other.load(&path, &Default::default()).unwrap_err();
        assert!(matches!(err, Error::CheckpointMismatch(_)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_checkpoint_is_io_error() {
        let mut store = small_store(0);
        let err = store.load("/nonexistent/gancomm.json", &Default::default()).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
