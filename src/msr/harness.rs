use std::time::{Duration, Instant};

use clap::Parser;
use itertools::Itertools;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::error::Result;
use crate::he::he::HeContext;
use crate::he::noise_tracker::{NoiseTracker, NoiseTrackerParams};
use crate::math::matrix::PlainMatrix;
use crate::msr::engine::{EngineConfig, MsrEngine};
use crate::msr::msr::Stats;
use crate::msr::oracle;
use crate::msr::reduction::TotalSumStrategy;

/// Trials with a larger error against the plaintext reference are reported as failures.
pub const HARNESS_TOLERANCE: f64 = 1e-3;

pub struct RunResult {
    pub all_trial_times: Vec<Stats<Duration>>,
    /// Largest absolute error against the plaintext reference, per trial.
    pub max_errors: Vec<f64>,
    pub failures: usize,
}

///
/// Runs `trials` MSR computations on random `rows x cols` matrices with entries in `[0, 10)`,
/// checking each against the plaintext reference.
///
pub fn run_msr<C: HeContext, R: Rng>(
    ctx: &C,
    config: EngineConfig,
    rows: usize,
    cols: usize,
    trials: usize,
    rng: &mut R,
) -> Result<RunResult> {
    eprintln!("Running MSR...");
    eprintln!("========");
    ctx.print_summary();
    let engine = MsrEngine::with_config(ctx, config)?;
    let shape = engine.shape(rows, cols)?;
    eprintln!(
        "{rows}x{cols} matrix in {} shard(s) of {} rows ({} slots per shard)",
        shape.shard_count,
        shape.rows_per_shard,
        engine.slot_capacity()
    );
    eprintln!("Config: {:?}", engine.config());
    eprintln!("========");

    let mut all_trial_times = Vec::with_capacity(trials);
    let mut max_errors = Vec::with_capacity(trials);
    let mut failures = 0;

    for trial in 0..trials {
        eprintln!("Running trial {trial}");
        let matrix = PlainMatrix::rand_uniform(rng, rows, cols, 0_f64, 10_f64);
        let mut trial_times = Stats::new();

        let begin = Instant::now();
        let stats = engine.calculate_msr_timed(&matrix, Some(&mut trial_times))?;
        let end = Instant::now();
        trial_times.add("total", trial_times.total());

        eprintln!("Trial times:");
        for (stat, value) in trial_times.as_vec() {
            eprintln!("    {}: {:?}", stat, value);
        }
        eprintln!("Trial time (end-to-end): {:?}", end - begin);

        let expected = oracle::reference_statistics(&matrix)?;
        let error = stats.max_abs_diff(&expected).unwrap_or(f64::INFINITY);
        if !(error < HARNESS_TOLERANCE) {
            failures += 1;
            eprintln!("**** **** **** **** ERROR **** **** **** ****");
            eprintln!("error against the plaintext reference: {error:e}");
            eprintln!("computed global MSR = {}", stats.global_msr);
            eprintln!("actual global MSR = {}", expected.global_msr);
        } else {
            eprintln!("Max error: {error:e}");
        }
        all_trial_times.push(trial_times);
        max_errors.push(error);
        eprintln!("========");
    }

    Ok(RunResult {
        all_trial_times,
        max_errors,
        failures,
    })
}

/// Mean and standard deviation (in nanoseconds) of every stage across trials.
pub fn summarize(all_trial_times: &[Stats<Duration>]) -> Vec<(&'static str, u64, u64)> {
    let trial_times = all_trial_times.iter().map(|tt| tt.as_vec()).collect_vec();
    let Some(first) = trial_times.first() else {
        return Vec::new();
    };
    let stat_names = first.iter().map(|x| x.0).collect_vec();

    stat_names
        .iter()
        .copied()
        .enumerate()
        .map(|(stat_i, stat_name)| {
            let mut sum = 0_f64;
            let mut sum_sq = 0_f64;
            for tt in trial_times.iter() {
                let value = tt[stat_i].1.as_nanos() as f64;
                sum += value;
                sum_sq += value.powi(2);
            }
            let mean = sum / trial_times.len() as f64;
            let variance = sum_sq / trial_times.len() as f64 - mean.powi(2);
            let stddev = variance.max(0_f64).sqrt();
            (stat_name, mean.round() as u64, stddev.round() as u64)
        })
        .collect()
}

#[macro_export]
macro_rules! generate_main {
    ($params: expr) => {
        fn main() {
            $crate::msr::harness::harness_main(&$params);
        }
    };
}

#[derive(Parser, Debug)]
struct Args {
    /// Matrix rows.
    rows: usize,
    /// Matrix columns.
    cols: usize,
    trials: usize,
    /// Slots per shard; lower than the ring's slot count to force sharding.
    #[arg(long)]
    slot_capacity: Option<usize>,
    /// Compute full sums by row and column sums instead of the cumulative add.
    #[arg(long)]
    composed: bool,
    /// Process shards one at a time.
    #[arg(long)]
    sequential: bool,
    /// Seed for the matrices and the encryption noise.
    #[arg(long)]
    seed: Option<u64>,
}

pub fn harness_main(params: &NoiseTrackerParams) {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = harness(params, &args) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn harness(params: &NoiseTrackerParams, args: &Args) -> Result<()> {
    let seed = match args.seed {
        Some(seed) => seed,
        None => ChaCha20Rng::from_entropy().gen(),
    };
    eprintln!("Seed: {seed}");
    let ctx = NoiseTracker::with_seed(params, seed)?;
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let config = EngineConfig {
        slot_capacity: args.slot_capacity,
        total_sum: if args.composed {
            TotalSumStrategy::Composed
        } else {
            TotalSumStrategy::Native
        },
        parallel: !args.sequential,
    };

    let run_result = run_msr(&ctx, config, args.rows, args.cols, args.trials, &mut rng)?;

    let summary = summarize(&run_result.all_trial_times);
    eprintln!("Summary times:");
    for (stat_name, mean, stddev) in summary.iter().copied() {
        eprintln!(
            "    {}: {:?} mean, {:?} stddev ({:.3}%)",
            stat_name,
            Duration::from_nanos(mean),
            Duration::from_nanos(stddev),
            100_f64 * stddev as f64 / mean.max(1) as f64,
        );
    }
    let worst = run_result.max_errors.iter().copied().fold(0_f64, f64::max);
    eprintln!(
        "Max error over {} trial(s): {worst:e} ({} failure(s))",
        run_result.max_errors.len(),
        run_result.failures
    );

    eprintln!("mean, stddev in CSV format (times in nanoseconds):");
    eprintln!("{}", summary.iter().map(|x| x.0).join(", "));
    eprintln!("{}", summary.iter().map(|x| x.1.to_string()).join(", "));
    eprintln!("{}", summary.iter().map(|x| x.2.to_string()).join(", "));
    Ok(())
}
