use fhe_msr::he::noise_tracker::{NoiseTracker, NoiseTrackerParams};
use fhe_msr::msr::engine::EngineConfig;
use fhe_msr::msr::harness::run_msr;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

// Random shapes and forced shard sizes on the test ring, until a trial fails.
fn main() {
    env_logger::init();
    let mut rng = ChaCha20Rng::from_entropy();
    let params = NoiseTrackerParams::TEST;
    for round in 0_u64.. {
        let ctx = match NoiseTracker::with_seed(&params, round) {
            Ok(ctx) => ctx,
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        };
        let rows = rng.gen_range(1_usize..=24);
        let cols = rng.gen_range(1_usize..=16);
        let slot_capacity = rng.gen_range(cols..=64);
        let config = EngineConfig {
            slot_capacity: Some(slot_capacity),
            ..EngineConfig::default()
        };
        match run_msr(&ctx, config, rows, cols, 1, &mut rng) {
            Ok(result) if result.failures == 0 => {}
            Ok(_) => {
                eprintln!("round {round} failed: {rows}x{cols}, {slot_capacity} slots");
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("round {round}: {rows}x{cols} ({slot_capacity} slots): {e}");
                std::process::exit(1);
            }
        }
    }
}
