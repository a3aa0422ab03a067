/// Consensus Step Probe
/// Runs a handful of training steps and prints how the game losses and the
/// consensus regularizer evolve from one step to the next.

use burn::backend::{Autodiff, NdArray};
use gancomm::{AdversarialSettings, ModelConfig, Session};

type Backend = Autodiff<NdArray>;

fn main() -> gancomm::Result<()> {
    env_logger::init();

    let config = ModelConfig::new(2, 4, 7);
    let mut session = Session::<Backend>::new(config, Default::default());
    let settings = AdversarialSettings::new(4);
    let options = settings.options(32, 6.0, 1e-3);

    println!("step   cross-entropy     d_loss     g_loss   regularizer    BLER");
    for step in 0..20 {
        let losses = session.train_step(&options)?;
        let bler = session.test_step(&options)?;
        println!(
            "{:4}   {:13.5}   {:8.5}   {:8.5}   {:11.6}   {:.4}",
            step, losses.cross_entropy, losses.d_loss, losses.g_loss, losses.regularizer, bler
        );
    }

    Ok(())
}
