use burn::backend::Autodiff;
use clap::{Parser, Subcommand};
use gancomm::{AdversarialSettings, ModelConfig, Perturbation, Schedule, Session};
use log::{error, info};
use std::path::PathBuf;

#[cfg(feature = "wgpu")]
type MyBackend = Autodiff<burn::backend::Wgpu>;

#[cfg(not(feature = "wgpu"))]
type MyBackend = Autodiff<burn::backend::NdArray>;

#[derive(Parser, Debug)]
#[command(name = "gancomm", version, about = "Adversarially trained communication autoencoder")]
struct Cli {
    /// Bits per message
    #[arg(short, default_value_t = 4, global = true)]
    k: usize,

    /// Channel uses per message
    #[arg(short, default_value_t = 7, global = true)]
    n: usize,

    #[arg(long, default_value_t = 0, global = true)]
    seed: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the autoencoder jointly with the perturbation generator
    Train {
        /// Schedule JSON; the built-in demo schedule if omitted
        #[arg(long)]
        schedule: Option<PathBuf>,

        /// Start from this checkpoint instead of a fresh initialization
        #[arg(long)]
        resume: Option<PathBuf>,

        #[arg(long, default_value = "gancomm_params.json")]
        checkpoint: PathBuf,

        /// Where to write the learned attack vector
        #[arg(long, default_value = "gancomm_attack.json")]
        attack: PathBuf,

        #[arg(long, default_value_t = 0.0)]
        dropout: f32,

        /// Strength of the generator direction during training
        #[arg(long, default_value_t = 1.0)]
        ep: f32,
    },

    /// Measure BLER under the four attack scenarios
    Evaluate {
        #[arg(long, default_value = "gancomm_params.json")]
        checkpoint: PathBuf,

        /// Attack vector; the generator mean of one batch if omitted
        #[arg(long)]
        attack: Option<PathBuf>,

        /// Perturbation-to-signal ratio in dB
        #[arg(long, default_value_t = -6.0, allow_negative_numbers = true)]
        psr: f32,

        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        ebno_min: f32,

        #[arg(long, default_value_t = 10.0)]
        ebno_max: f32,

        #[arg(long, default_value_t = 1.0, value_parser = positive_step)]
        ebno_step: f32,

        #[arg(long, default_value_t = 1000)]
        batch_size: usize,

        #[arg(long, default_value_t = 10)]
        iterations: usize,
    },
}

/// Eb/No sweep increment; must be a finite number above zero
fn positive_step(s: &str) -> Result<f32, String> {
    let step: f32 = s.parse().map_err(|e| format!("{}", e))?;
    if step.is_finite() && step > 0.0 {
        Ok(step)
    } else {
        Err(format!("step must be a positive number, got {}", s))
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> gancomm::Result<()> {
    let config = ModelConfig::new(cli.k, cli.n, cli.seed);
    let device = Default::default();

    match cli.command {
        Command::Train { schedule, resume, checkpoint, attack, dropout, ep } => {
            let schedule = match schedule {
                Some(path) => Schedule::from_json_file(path)?,
                None => Schedule::default_for_demo(),
            };
            let mut session = match resume {
                Some(path) => Session::<MyBackend>::with_checkpoint(config, device, path)?,
                None => Session::<MyBackend>::new(config, device),
            };

            let mut settings = AdversarialSettings::new(cli.n);
            settings.dropout_rate = dropout;
            settings.ep = ep;

            let outcome = session.train(&settings, &schedule)?;
            session.save(&checkpoint)?;
            outcome.attack_vector.save(&attack)?;
            info!("attack vector written to {}", attack.display());

            println!();
            println!("Validation BLER:");
            println!("  phase   step      BLER");
            for report in &outcome.reports {
                println!("  {:5}  {:5}  {:8.5}", report.phase, report.step, report.bler);
            }
        }

        Command::Evaluate { checkpoint, attack, psr, ebno_min, ebno_max, ebno_step, batch_size, iterations } => {
            let mut session = Session::<MyBackend>::with_checkpoint(config, device, checkpoint)?;

            let mut settings = AdversarialSettings::new(cli.n);
            settings.is_training = false;

            let perturbation = match attack {
                Some(path) => Perturbation::load(path)?,
                None => session.generator_mean(&settings.options(batch_size, ebno_max, 0.0))?,
            };

            let steps = ((ebno_max - ebno_min) / ebno_step).floor().max(0.0) as usize;
            let ebnodbs: Vec<f32> = (0..=steps).map(|i| ebno_min + i as f32 * ebno_step).collect();

            let result = session.bler_sim_attack(&settings, &perturbation, psr, &ebnodbs, batch_size, iterations)?;

            println!();
            println!("BLER at PSR {} dB ({} x {} blocks per point):", psr, iterations, batch_size);
            println!("  Eb/No   no attack   synchronous   non-sync    jamming");
            for (i, ebno) in result.ebno_db.iter().enumerate() {
                println!(
                    "  {:5.1}   {:9.5}   {:11.5}   {:8.5}   {:8.5}",
                    ebno, result.no_attack[i], result.synchronous[i], result.non_synchronous[i], result.jamming[i]
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluate(step: &str) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(["gancomm", "evaluate", "--ebno-step", step])
    }

    #[test]
    fn test_ebno_step_must_be_positive() {
        assert!(evaluate("0").is_err());
        assert!(evaluate("-1").is_err());
        assert!(evaluate("nan").is_err());
        assert!(evaluate("inf").is_err());

        match evaluate("0.5").unwrap().command {
            Command::Evaluate { ebno_step, .. } => assert_eq!(ebno_step, 0.5),
            other => panic!("parsed {:?}", other),
        }
    }
}
