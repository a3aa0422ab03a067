//! GanComm - Adversarially Trained Communication Autoencoder
//!
//! An end-to-end learned physical layer: a transmitter network maps k-bit
//! messages to n complex channel uses, an AWGN channel adds noise and an
//! attacker perturbation, and a receiver network classifies the received
//! block back into one of M = 2^k messages.
//!
//! A generator network learns a universal perturbation against the receiver.
//! Receiver and generator are trained jointly with consensus optimization,
//! interleaved with plain reconstruction training of the autoencoder. The
//! learned perturbation is then evaluated as a synchronous, non-synchronous
//! and jamming attack over a range of Eb/No.

pub mod error;
pub mod config;
pub mod params;
pub mod layers;
pub mod channel;
pub mod transmitter;
pub mod generator;
pub mod receiver;
pub mod model;
pub mod optim;
pub mod consensus;
pub mod session;
pub mod test_utils;

pub use error::{Error, Result};
pub use config::{AdversarialSettings, ForwardOptions, ModelConfig, Schedule, TrainingPhase, ValidationPhase};
pub use params::{ParamGroup, ParamId, ParamStore};
pub use channel::{AwgnChannel, Perturbation};
pub use model::{block_error_rate, cross_entropy, Autoencoder, BatchSample, Objective};
pub use optim::{Adam, Optimizer, RmsProp};
pub use consensus::{AutoencoderGame, ConsensusOptimizer, ConsensusUpdate, GameGradients, CONSENSUS_ALPHA};
pub use session::{AttackBler, Session, StepLosses, TrainingOutcome, ValidationReport};
pub use test_utils::{assert_approx_eq_tensor, assert_identical_tensor, assert_power_normalized, max_abs_diff};
