/// Consensus optimization of the receiver/generator game
///
/// The receiver minimizes `d_loss = CE(clean) + CE(perturbed)` while the
/// generator minimizes `g_loss = -CE(perturbed)`. Plain simultaneous
/// gradient descent on such a game tends to orbit its equilibrium. Consensus
/// optimization adds the gradient of
///
///   reg = 0.5 * ||v||²,  v = (∇_d d_loss, ∇_g g_loss)
///
/// to both players' gradients, `v + α ∇reg`, and applies the result in one
/// RMSProp step.
///
/// `∇reg = Jᵀv` is a second-order quantity. Since `v_d` is the gradient of
/// the scalar `d_loss`, its block of `Jᵀv` is the Hessian-vector product
/// `H_D (v_d, 0)`, and likewise `H_G (0, v_g)` for the generator. Each is
/// evaluated as a central difference of first-order gradients taken at
/// parameters shifted by `±h` along the unit direction of the gradient,
/// with the batch (messages, noise, dropout masks) held fixed.
///
/// On a smooth game the estimate agrees with a finite difference of `reg`
/// itself to within a few percent. The autoencoder is piecewise linear
/// through its ReLUs, and a probe of length `h` routinely crosses
/// activation boundaries; there the two gradients belong to different
/// linear pieces and the estimate is only a rough, step-dependent
/// smoothing of `Jᵀv` that can even change sign with `h`. The regularizer
/// term is damping, not an exact gradient, on the real model.

use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use log::{debug, warn};

use crate::model::{objective_gradients, Autoencoder, BatchTensors, Objective};
use crate::optim::{Optimizer, ParamGradient, RmsProp};
use crate::params::{ParamGroup, ParamId, ParamStore};

/// Weight of the regularizer gradient
pub const CONSENSUS_ALPHA: f32 = 0.1;

/// Distance, in parameter space, of the finite-difference probes
pub const JACOBIAN_PROBE_STEP: f32 = 1e-3;

/// First-order gradients of the two players' objectives at any parameter
/// point, all evaluated on the same fixed data
pub trait GameGradients<B: Backend> {
    /// Value of `objective` at `values` and its gradient for each of `wrt`,
    /// `None` where the objective does not depend on that parameter
    fn gradients(&self, values: &[Tensor<B, 1>], objective: Objective, wrt: &[ParamId]) -> (f32, Vec<Option<Tensor<B, 1>>>);
}

/// The autoencoder game on one batch
pub struct AutoencoderGame<'a, AD: AutodiffBackend> {
    pub model: &'a Autoencoder,
    pub batch: &'a BatchTensors<AD>,
}

impl<AD: AutodiffBackend> GameGradients<AD::InnerBackend> for AutoencoderGame<'_, AD> {
    fn gradients(
        &self,
        values: &[Tensor<AD::InnerBackend, 1>],
        objective: Objective,
        wrt: &[ParamId],
    ) -> (f32, Vec<Option<Tensor<AD::InnerBackend, 1>>>) {
        objective_gradients(self.model, values, self.batch, objective, wrt)
    }
}

/// Result of one consensus computation
#[derive(Clone, Debug)]
pub struct ConsensusUpdate<B: Backend> {
    pub d_loss: f32,
    pub g_loss: f32,
    /// 0.5 * squared norm of the joint gradient
    pub regularizer: f32,
    /// `grad + α Jᵀv` for every variable whose second-order term exists
    pub gradients: Vec<ParamGradient<B>>,
    /// Variables left out of the update
    pub skipped: Vec<ParamId>,
}

/// Joint receiver/generator optimizer
#[derive(Clone, Debug)]
pub struct ConsensusOptimizer<B: Backend> {
    alpha: f32,
    probe_step: f32,
    rmsprop: RmsProp<B>,
}

impl<B: Backend> Default for ConsensusOptimizer<B> {
    fn default() -> Self {
        Self::new(CONSENSUS_ALPHA, JACOBIAN_PROBE_STEP)
    }
}

impl<B: Backend> ConsensusOptimizer<B> {
    pub fn new(alpha: f32, probe_step: f32) -> Self {
        Self { alpha, probe_step, rmsprop: RmsProp::default_params() }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn step_count(&self) -> u64 {
        self.rmsprop.step_count()
    }

    /// Compute the adjusted gradients for `batch` without touching `params`
    pub fn adjusted_gradients<AD>(
        &self,
        model: &Autoencoder,
        params: &ParamStore<B>,
        batch: &BatchTensors<AD>,
    ) -> ConsensusUpdate<B>
    where
        AD: AutodiffBackend<InnerBackend = B>,
    {
        self.adjusted_gradients_of(&AutoencoderGame { model, batch }, params)
    }

    /// Compute the adjusted gradients and apply them in one RMSProp step
    pub fn step<AD>(
        &mut self,
        model: &Autoencoder,
        params: &mut ParamStore<B>,
        batch: &BatchTensors<AD>,
        lr: f32,
    ) -> ConsensusUpdate<B>
    where
        AD: AutodiffBackend<InnerBackend = B>,
    {
        self.step_on(&AutoencoderGame { model, batch }, params, lr)
    }

    /// Adjusted gradients of any game over the receiver and generator groups
    pub fn adjusted_gradients_of<G: GameGradients<B>>(&self, game: &G, params: &ParamStore<B>) -> ConsensusUpdate<B> {
        let d_vars = params.group(ParamGroup::Discriminator);
        let g_vars = params.group(ParamGroup::Generator);
        let variables: Vec<ParamId> = d_vars.iter().chain(g_vars.iter()).copied().collect();

        let (d_loss, d_grads) = game.gradients(params.values(), Objective::Discriminator, &d_vars);
        let (g_loss, g_grads) = game.gradients(params.values(), Objective::Generator, &g_vars);

        let d_direction = defined(&d_vars, &d_grads);
        let g_direction = defined(&g_vars, &g_grads);
        let grads: Vec<Option<Tensor<B, 1>>> = d_grads.into_iter().chain(g_grads).collect();

        let regularizer = 0.5 * grads.iter().flatten().map(squared_norm).sum::<f32>();

        let jacobian_d = self.hessian_vector_product(game, params, Objective::Discriminator, &d_direction, &variables);
        let jacobian_g = self.hessian_vector_product(game, params, Objective::Generator, &g_direction, &variables);

        let mut gradients = Vec::with_capacity(variables.len());
        let mut skipped = Vec::new();

        for (((id, grad), jd), jg) in variables.iter().zip(grads).zip(jacobian_d).zip(jacobian_g) {
            let jacobian = match (jd, jg) {
                (Some(a), Some(b)) => Some(a + b),
                (a, b) => a.or(b),
            };
            match (grad, jacobian) {
                (Some(grad), Some(jacobian)) => gradients.push((*id, grad + jacobian.mul_scalar(self.alpha))),
                _ => skipped.push(*id),
            }
        }

        debug!(
            "consensus: d_loss {:.5}, g_loss {:.5}, reg {:.5}, {} updated, {} skipped",
            d_loss,
            g_loss,
            regularizer,
            gradients.len(),
            skipped.len()
        );

        ConsensusUpdate { d_loss, g_loss, regularizer, gradients, skipped }
    }

    /// `adjusted_gradients_of`, then one RMSProp step over the updated variables
    pub fn step_on<G: GameGradients<B>>(&mut self, game: &G, params: &mut ParamStore<B>, lr: f32) -> ConsensusUpdate<B> {
        let update = self.adjusted_gradients_of(game, params);
        self.rmsprop.step(params, update.gradients.clone(), lr);
        update
    }

    /// `H_objective · direction`, restricted to `variables`
    ///
    /// `direction` only covers the parameters it names; every other
    /// coordinate of the direction is zero.
    fn hessian_vector_product<G: GameGradients<B>>(
        &self,
        game: &G,
        params: &ParamStore<B>,
        objective: Objective,
        direction: &[ParamGradient<B>],
        variables: &[ParamId],
    ) -> Vec<Option<Tensor<B, 1>>> {
        let norm = direction.iter().map(|(_, v)| squared_norm(v)).sum::<f32>().sqrt();

        if !norm.is_finite() || norm == 0.0 {
            if !norm.is_finite() {
                warn!("non-finite {:?} gradient norm, dropping its second-order term", objective);
            }
            let (_, base) = game.gradients(params.values(), objective, variables);
            return base.into_iter().map(|g| g.map(|g| g.zeros_like())).collect();
        }

        let eps = self.probe_step / norm;
        let plus = shifted(params.values(), direction, eps);
        let minus = shifted(params.values(), direction, -eps);

        let (_, grads_plus) = game.gradients(&plus, objective, variables);
        let (_, grads_minus) = game.gradients(&minus, objective, variables);

        grads_plus
            .into_iter()
            .zip(grads_minus)
            .map(|(p, m)| match (p, m) {
                (Some(p), Some(m)) => Some((p - m).div_scalar(2.0 * eps)),
                _ => None,
            })
            .collect()
    }
}

fn defined<B: Backend>(ids: &[ParamId], grads: &[Option<Tensor<B, 1>>]) -> Vec<ParamGradient<B>> {
    ids.iter()
        .zip(grads)
        .filter_map(|(id, g)| g.clone().map(|g| (*id, g)))
        .collect()
}

fn shifted<B: Backend>(values: &[Tensor<B, 1>], direction: &[ParamGradient<B>], scale: f32) -> Vec<Tensor<B, 1>> {
    let mut values = values.to_vec();
    for (id, v) in direction {
        values[id.index()] = values[id.index()].clone() + v.clone().mul_scalar(scale);
    }
    values
}

fn squared_norm<B: Backend>(tensor: &Tensor<B, 1>) -> f32 {
    tensor.clone().powf_scalar(2.0).sum().into_scalar().elem()
}
