/// Attack Robustness Report
/// Trains a small (k = 4, n = 7) system on the built-in schedule and compares
/// the BLER of the four attack scenarios across Eb/No.

use burn::backend::{Autodiff, NdArray};
use gancomm::{AdversarialSettings, ModelConfig, Schedule, Session};

type Backend = Autodiff<NdArray>;

fn main() -> gancomm::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("\n╔═══════════════════════════════════════════════════════════╗");
    println!("║  GanComm Attack Robustness Report                         ║");
    println!("╚═══════════════════════════════════════════════════════════╝\n");

    let config = ModelConfig::new(4, 7, 42);
    println!("Configuration:");
    println!("  • k = {} bits, n = {} channel uses, M = {}", config.k, config.n, config.m());
    println!("  • Rate: {:.3} bits per channel use\n", config.bits_per_symbol());

    let mut session = Session::<Backend>::new(config, Default::default());
    let settings = AdversarialSettings::new(7);
    let outcome = session.train(&settings, &Schedule::default_for_demo())?;

    if let Some(last) = outcome.reports.last() {
        println!("Final validation BLER: {:.5}", last.bler);
    }
    println!("Attack vector norm: {:.4}\n", outcome.attack_vector.norm());

    let mut eval = settings.clone();
    eval.is_training = false;
    let ebnodbs: Vec<f32> = (0..=10).map(|e| e as f32).collect();

    for psr_db in [-10.0, -6.0, -2.0] {
        let result = session.bler_sim_attack(&eval, &outcome.attack_vector, psr_db, &ebnodbs, 1000, 5)?;

        println!("PSR {} dB", psr_db);
        println!("───────────────────────────────────────────────────────────");
        println!("  Eb/No   no attack   synchronous   non-sync    jamming");
        for (i, ebno) in result.ebno_db.iter().enumerate() {
            println!(
                "  {:5.1}   {:9.5}   {:11.5}   {:8.5}   {:8.5}",
                ebno, result.no_attack[i], result.synchronous[i], result.non_synchronous[i], result.jamming[i]
            );
        }
        println!();
    }

    Ok(())
}
