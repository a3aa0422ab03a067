/// Optimizers over the flat parameter store
///
/// Both keep one state slot per parameter, created on the first update that
/// parameter receives. Parameters without a gradient in a step are left
/// untouched, state included.

use burn::tensor::{backend::Backend, Tensor};

use crate::params::{ParamId, ParamStore};

/// Gradient for one parameter
pub type ParamGradient<B> = (ParamId, Tensor<B, 1>);

/// Trait for optimization algorithms
pub trait Optimizer<B: Backend> {
    /// Apply all `gradients` in one step with learning rate `lr`
    fn step(&mut self, params: &mut ParamStore<B>, gradients: Vec<ParamGradient<B>>, lr: f32);

    /// Number of steps taken so far
    fn step_count(&self) -> u64;
}

/// Adam
///
/// m_t = β1 m + (1 - β1) g
/// v_t = β2 v + (1 - β2) g²
/// θ_t = θ - lr_t m_t / (√v_t + ε), lr_t = lr √(1 - β2^t) / (1 - β1^t)
#[derive(Clone, Debug)]
pub struct Adam<B: Backend> {
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    moments: Vec<Option<(Tensor<B, 1>, Tensor<B, 1>)>>,
}

impl<B: Backend> Adam<B> {
    pub fn new(beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self { beta1, beta2, epsilon, t: 0, moments: Vec::new() }
    }

    /// β1 = 0.9, β2 = 0.999, ε = 1e-8
    pub fn default_params() -> Self {
        Self::new(0.9, 0.999, 1e-8)
    }
}

impl<B: Backend> Optimizer<B> for Adam<B> {
    fn step(&mut self, params: &mut ParamStore<B>, gradients: Vec<ParamGradient<B>>, lr: f32) {
        if self.moments.len() < params.len() {
            self.moments.resize(params.len(), None);
        }
        self.t += 1;

        let lr_t = lr * (1.0 - self.beta2.powi(self.t as i32)).sqrt() / (1.0 - self.beta1.powi(self.t as i32));

        for (id, grad) in gradients {
            let (m, v) = match self.moments[id.index()].take() {
                Some(state) => state,
                None => (grad.zeros_like(), grad.zeros_like()),
            };

            let m_t = m.mul_scalar(self.beta1) + grad.clone().mul_scalar(1.0 - self.beta1);
            let v_t = v.mul_scalar(self.beta2) + grad.powf_scalar(2.0).mul_scalar(1.0 - self.beta2);

            let update = m_t.clone() / v_t.clone().sqrt().add_scalar(self.epsilon);
            params.set(id, params.get(id).clone() - update.mul_scalar(lr_t));

            self.moments[id.index()] = Some((m_t, v_t));
        }
    }

    fn step_count(&self) -> u64 {
        self.t
    }
}

/// RMSProp without momentum
///
/// ms_t = ρ ms + (1 - ρ) g²
/// θ_t = θ - lr g / √(ms_t + ε)
///
/// The mean square starts at one, so early steps are not blown up by a
/// near-zero running average.
#[derive(Clone, Debug)]
pub struct RmsProp<B: Backend> {
    decay: f32,
    epsilon: f32,
    t: u64,
    mean_square: Vec<Option<Tensor<B, 1>>>,
}

impl<B: Backend> RmsProp<B> {
    pub fn new(decay: f32, epsilon: f32) -> Self {
        Self { decay, epsilon, t: 0, mean_square: Vec::new() }
    }

    /// ρ = 0.9, ε = 1e-10
    pub fn default_params() -> Self {
        Self::new(0.9, 1e-10)
    }
}

impl<B: Backend> Optimizer<B> for RmsProp<B> {
    fn step(&mut self, params: &mut ParamStore<B>, gradients: Vec<ParamGradient<B>>, lr: f32) {
        if self.mean_square.len() < params.len() {
            self.mean_square.resize(params.len(), None);
        }
        self.t += 1;

        for (id, grad) in gradients {
            let ms = match self.mean_square[id.index()].take() {
                Some(ms) => ms,
                None => grad.ones_like(),
            };

            let ms_t = ms.mul_scalar(self.decay) + grad.clone().powf_scalar(2.0).mul_scalar(1.0 - self.decay);
            let update = grad / ms_t.clone().add_scalar(self.epsilon).sqrt();
            params.set(id, params.get(id).clone() - update.mul_scalar(lr));

            self.mean_square[id.index()] = Some(ms_t);
        }
    }

    fn step_count(&self) -> u64 {
        self.t
    }
}
