//! The encrypted residue and MSR pipeline.
//!
//! With `L` the level of fresh ciphertexts, the means sit at `L - 1`, the packed data is
//! switched down to `L - 1` for the residue, the squared residue sits at `L - 2` and the MSR
//! broadcasts at `L - 3`.

use std::time::{Duration, Instant};

use log::{debug, info, log_enabled, Level};

use crate::error::{MsrError, Result};
use crate::he::he::HeContext;
use crate::math::matrix::{PlainMatrix, Selection};
use crate::msr::assembly::{assemble_means, assemble_statistics, DecryptedShards};
use crate::msr::broadcast::{col_mean, data_mean, row_mean, ShardCombine};
use crate::msr::msr::{MeanStatistics, ResidueSignal, ResidueStatistics, Stats};
use crate::msr::packing::{pack, Shape, ShardedCiphertext};
use crate::msr::reduction::TotalSumStrategy;
use crate::msr::scale::ScaleManager;

/// Rescales on the way from fresh data to the MSR broadcasts.
pub const MSR_LEVELS: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Slots per shard, at most the context's capacity. `None` uses the full capacity.
    pub slot_capacity: Option<usize>,
    pub total_sum: TotalSumStrategy,
    /// Process shards on the rayon thread pool.
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            slot_capacity: None,
            total_sum: TotalSumStrategy::Native,
            parallel: true,
        }
    }
}

/// Broadcast means of one packed matrix, all at one level.
pub struct Means<Ct> {
    pub row: ShardedCiphertext<Ct>,
    pub col: ShardedCiphertext<Ct>,
    pub data: ShardedCiphertext<Ct>,
}

pub struct MsrEngine<'a, C: HeContext> {
    ctx: &'a C,
    config: EngineConfig,
}

impl<'a, C: HeContext> MsrEngine<'a, C> {
    pub fn new(ctx: &'a C) -> Self {
        MsrEngine {
            ctx,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(ctx: &'a C, config: EngineConfig) -> Result<Self> {
        if let Some(cap) = config.slot_capacity {
            if cap == 0 || cap > ctx.slot_capacity() {
                return Err(MsrError::InvalidParameter {
                    param: "slot_capacity",
                    constraint: format!("must be in 1..={}, got {cap}", ctx.slot_capacity()),
                });
            }
        }
        Ok(MsrEngine { ctx, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn slot_capacity(&self) -> usize {
        self.config
            .slot_capacity
            .unwrap_or_else(|| self.ctx.slot_capacity())
    }

    /// Layout a `rows x cols` matrix would get.
    pub fn shape(&self, rows: usize, cols: usize) -> Result<Shape> {
        Shape::new(rows, cols, self.slot_capacity())
    }

    /// Degenerate and oversized matrices are rejected before the depth budget is looked at.
    fn check_input(&self, matrix: &PlainMatrix) -> Result<()> {
        self.shape(matrix.rows(), matrix.cols()).map(|_| ())
    }

    fn check_depth(&self, levels: usize, operation: &'static str) -> Result<()> {
        if self.ctx.max_level() < levels {
            return Err(MsrError::LevelExhausted {
                operation,
                level: self.ctx.max_level(),
            });
        }
        Ok(())
    }

    pub fn encrypt_matrix(
        &self,
        matrix: &PlainMatrix,
    ) -> Result<(ShardedCiphertext<C::Ciphertext>, Shape)> {
        if matrix.is_empty() {
            return Err(MsrError::EmptyInput {
                rows: matrix.rows(),
                cols: matrix.cols(),
            });
        }
        pack(self.ctx, matrix, self.slot_capacity(), self.config.parallel)
    }

    /// Row, column and data means, combined across shards under encryption.
    pub fn means(
        &self,
        x: &ShardedCiphertext<C::Ciphertext>,
        shape: &Shape,
    ) -> Result<Means<C::Ciphertext>> {
        let parallel = self.config.parallel;
        let combine = ShardCombine::Homomorphic;
        Ok(Means {
            row: row_mean(self.ctx, x, shape, parallel)?,
            col: col_mean(self.ctx, x, shape, combine, parallel)?,
            data: data_mean(self.ctx, x, shape, combine, self.config.total_sum, parallel)?,
        })
    }

    /// `x - row mean - col mean + data mean`, at the level of the means.
    pub fn residues(
        &self,
        x: &ShardedCiphertext<C::Ciphertext>,
        means: &Means<C::Ciphertext>,
    ) -> Result<ShardedCiphertext<C::Ciphertext>> {
        let sm = ScaleManager::new(self.ctx);
        let parallel = self.config.parallel;
        let (level, _) = sm.check_uniform(&means.row)?;
        for m in [&means.col, &means.data] {
            if sm.check_uniform(m)?.0 != level {
                return Err(MsrError::invariant("means at different levels"));
            }
        }
        let ctx = self.ctx;
        let x = sm.align_all(x, level, parallel)?;
        let x = x.try_zip_map(&means.row, parallel, |a, b| ctx.sub(a, b))?;
        let x = x.try_zip_map(&means.col, parallel, |a, b| ctx.sub(a, b))?;
        x.try_zip_map(&means.data, parallel, |a, b| ctx.add(a, b))
    }

    pub fn calculate_means(&self, matrix: &PlainMatrix) -> Result<MeanStatistics> {
        self.check_input(matrix)?;
        self.check_depth(1, "means")?;
        let (x, shape) = self.encrypt_matrix(matrix)?;
        let means = self.means(&x, &shape)?;
        assemble_means(
            self.ctx,
            &shape,
            &means.row,
            &means.col,
            &means.data,
            self.config.parallel,
        )
    }

    pub fn calculate_residues(&self, matrix: &PlainMatrix) -> Result<PlainMatrix> {
        self.check_input(matrix)?;
        self.check_depth(1, "residues")?;
        let (x, shape) = self.encrypt_matrix(matrix)?;
        let means = self.means(&x, &shape)?;
        let residues = self.residues(&x, &means)?;
        let parallel = self.config.parallel;
        let decrypted = DecryptedShards::decrypt(self.ctx, &residues, &shape, parallel)?;
        decrypted.matrix()
    }

    pub fn calculate_msr(&self, matrix: &PlainMatrix) -> Result<ResidueStatistics> {
        self.calculate_msr_timed(matrix, None)
    }

    /// Like [`Self::calculate_msr`], also recording the duration of every stage.
    pub fn calculate_msr_timed(
        &self,
        matrix: &PlainMatrix,
        time_stats: Option<&mut Stats<Duration>>,
    ) -> Result<ResidueStatistics> {
        self.check_input(matrix)?;
        self.check_depth(MSR_LEVELS, "mean squared residue")?;
        let ctx = self.ctx;
        let parallel = self.config.parallel;
        let sm = ScaleManager::new(ctx);

        let i0 = Instant::now();
        let (x, shape) = self.encrypt_matrix(matrix)?;
        let i1 = Instant::now();

        let means = self.means(&x, &shape)?;
        let i2 = Instant::now();

        let residues = self.residues(&x, &means)?;
        let i3 = Instant::now();

        let squared = residues.try_map(parallel, |r| ctx.mul(r, r))?;
        let squared = sm.rescale_all(&squared, parallel)?;
        let i4 = Instant::now();

        let combine = ShardCombine::PerShard;
        let row_msr = row_mean(ctx, &squared, &shape, parallel)?;
        let col_msr = col_mean(ctx, &squared, &shape, combine, parallel)?;
        let global_msr = data_mean(
            ctx,
            &squared,
            &shape,
            combine,
            self.config.total_sum,
            parallel,
        )?;
        let i5 = Instant::now();

        if log_enabled!(Level::Debug) {
            for (name, x) in [("row", &row_msr), ("col", &col_msr), ("total", &global_msr)] {
                let (level, scale_bits) = sm.check_uniform(x)?;
                debug!("{name} MSR at level {level}, scale 2^{scale_bits}");
            }
        }

        let stats = assemble_statistics(
            ctx,
            &shape,
            &row_msr,
            &col_msr,
            &global_msr,
            combine,
            parallel,
        )?;
        let i6 = Instant::now();

        info!(
            "MSR of {}x{} in {} shard(s)",
            shape.rows, shape.cols, shape.shard_count
        );
        info!("(*) msr pack: {:?}", i1 - i0);
        info!("(*) msr means: {:?}", i2 - i1);
        info!("(*) msr residues: {:?}", i3 - i2);
        info!("(*) msr square: {:?}", i4 - i3);
        info!("(*) msr reduce: {:?}", i5 - i4);
        info!("(*) msr assemble: {:?}", i6 - i5);

        if let Some(time_stats) = time_stats {
            time_stats.add("pack", i1 - i0);
            time_stats.add("means", i2 - i1);
            time_stats.add("residues", i3 - i2);
            time_stats.add("square", i4 - i3);
            time_stats.add("reduce", i5 - i4);
            time_stats.add("assemble", i6 - i5);
        }

        Ok(stats)
    }
}

impl<'a, C: HeContext> ResidueSignal for MsrEngine<'a, C> {
    fn residue_statistics(
        &self,
        data: &PlainMatrix,
        selection: &Selection,
    ) -> Result<ResidueStatistics> {
        self.calculate_msr(&data.select(selection)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::he::insecure::InsecureContext;
    use crate::he::noise_tracker::{NoiseTracker, NoiseTrackerParams};
    use crate::msr::oracle::{self, PlainReference};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    const EPS: f64 = 1e-9;

    fn config(slot_capacity: usize) -> EngineConfig {
        EngineConfig {
            slot_capacity: Some(slot_capacity),
            ..EngineConfig::default()
        }
    }

    fn assert_close(actual: &ResidueStatistics, expected: &ResidueStatistics, eps: f64) {
        let diff = actual
            .max_abs_diff(expected)
            .expect("statistics of different shapes");
        assert!(
            diff < eps,
            "difference {diff}\nactual = {actual:?}\nexpected = {expected:?}"
        );
    }

    /// Absolute error scaled by the magnitude of the expected statistics.
    fn relative_diff(actual: &ResidueStatistics, expected: &ResidueStatistics) -> f64 {
        let scale = expected
            .row_msr
            .iter()
            .chain(expected.col_msr.iter())
            .fold(expected.global_msr.abs(), |acc, x| acc.max(x.abs()))
            .max(1_f64);
        actual.max_abs_diff(expected).unwrap_or(f64::INFINITY) / scale
    }

    #[test]
    fn test_small_matrix() {
        let ctx = InsecureContext::new(8);
        let engine = MsrEngine::new(&ctx);

        let m = PlainMatrix::from_rows(&[[1_f64, 2_f64], [3_f64, 4_f64]]).unwrap();
        let means = engine.calculate_means(&m).unwrap();
        assert!((means.data_mean - 2.5).abs() < EPS);
        assert!((means.row_means[0] - 1.5).abs() < EPS);
        assert!((means.row_means[1] - 3.5).abs() < EPS);
        assert!((means.col_means[0] - 2_f64).abs() < EPS);
        assert!((means.col_means[1] - 3_f64).abs() < EPS);
        let stats = engine.calculate_msr(&m).unwrap();
        assert!(stats.global_msr.abs() < EPS);

        let m = PlainMatrix::from_rows(&[[1_f64, 2_f64], [3_f64, 5_f64]]).unwrap();
        let residues = engine.calculate_residues(&m).unwrap();
        for (r, e) in residues.as_slice().iter().zip([0.25, -0.25, -0.25, 0.25]) {
            assert!((r - e).abs() < EPS);
        }
        let stats = engine.calculate_msr(&m).unwrap();
        let expected = ResidueStatistics {
            global_msr: 0.0625,
            row_msr: vec![0.0625, 0.0625],
            col_msr: vec![0.0625, 0.0625],
        };
        assert_close(&stats, &expected, EPS);
    }

    #[test]
    fn test_constant_matrix() {
        let ctx = InsecureContext::new(64);
        let m = PlainMatrix::from_fn(5, 7, |_, _| 3.25);
        for cap in [64, 16, 7] {
            let engine = MsrEngine::with_config(&ctx, config(cap)).unwrap();
            let stats = engine.calculate_msr(&m).unwrap();
            assert_eq!(stats.row_msr.len(), 5);
            assert_eq!(stats.col_msr.len(), 7);
            assert!(stats.global_msr.abs() < EPS);
            assert!(stats.row_msr.iter().all(|v| v.abs() < EPS));
            assert!(stats.col_msr.iter().all(|v| v.abs() < EPS));
        }
    }

    #[test]
    fn test_sharding_invariance() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let m = PlainMatrix::rand_uniform(&mut rng, 6, 4, -5_f64, 5_f64);
        let expected = oracle::reference_statistics(&m).unwrap();
        let ctx = InsecureContext::new(32);

        // 24 values: one, two and three shards.
        for (cap, shards) in [(32, 1), (12, 2), (8, 3)] {
            let engine = MsrEngine::with_config(&ctx, config(cap)).unwrap();
            assert_eq!(engine.shape(6, 4).unwrap().shard_count, shards);
            let stats = engine.calculate_msr(&m).unwrap();
            assert_close(&stats, &expected, 1e-9);
        }
    }

    #[test]
    fn test_uneven_shards() {
        // 7 rows in shards of 3, 3 and 1 row.
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let m = PlainMatrix::rand_uniform(&mut rng, 7, 3, 0_f64, 10_f64);
        let ctx = InsecureContext::new(16);
        let engine = MsrEngine::with_config(&ctx, config(9)).unwrap();
        let shape = engine.shape(7, 3).unwrap();
        assert_eq!(shape.shard_count, 3);
        assert_eq!(shape.valid_rows(2), 1);

        assert_close(
            &engine.calculate_msr(&m).unwrap(),
            &oracle::reference_statistics(&m).unwrap(),
            1e-9,
        );
        let means = engine.calculate_means(&m).unwrap();
        let expected = oracle::reference_means(&m).unwrap();
        assert!(means.max_abs_diff(&expected).unwrap() < 1e-9);
        let residues = engine.calculate_residues(&m).unwrap();
        assert_eq!(residues.rows(), 7);
        let expected = oracle::residues(&m);
        for (a, e) in residues.as_slice().iter().zip(expected.as_slice()) {
            assert!((a - e).abs() < 1e-9);
        }
    }

    #[test]
    fn test_total_sum_strategies_agree() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let m = PlainMatrix::rand_uniform(&mut rng, 5, 3, -1_f64, 1_f64);
        let ctx = InsecureContext::new(16);
        let native = MsrEngine::with_config(&ctx, config(6)).unwrap();
        let composed = MsrEngine::with_config(
            &ctx,
            EngineConfig {
                total_sum: TotalSumStrategy::Composed,
                ..config(6)
            },
        )
        .unwrap();
        assert_close(
            &native.calculate_msr(&m).unwrap(),
            &composed.calculate_msr(&m).unwrap(),
            1e-9,
        );

        let no_native = ctx.clone().without_cumulative_add();
        let fallback = MsrEngine::with_config(&no_native, config(6)).unwrap();
        assert_close(
            &fallback.calculate_msr(&m).unwrap(),
            &oracle::reference_statistics(&m).unwrap(),
            1e-9,
        );
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        let m = PlainMatrix::rand_uniform(&mut rng, 9, 4, 0_f64, 3_f64);
        let ctx = InsecureContext::new(16);
        let sequential = MsrEngine::with_config(
            &ctx,
            EngineConfig {
                parallel: false,
                ..config(16)
            },
        )
        .unwrap();
        let parallel = MsrEngine::with_config(&ctx, config(16)).unwrap();
        assert_eq!(
            sequential.calculate_msr(&m).unwrap(),
            parallel.calculate_msr(&m).unwrap()
        );
    }

    #[test]
    fn test_errors() {
        let ctx = InsecureContext::new(8);
        let engine = MsrEngine::new(&ctx);
        assert!(matches!(
            engine.calculate_msr(&PlainMatrix::zero(0, 2)),
            Err(MsrError::EmptyInput { rows: 0, cols: 2 })
        ));
        assert!(matches!(
            engine.calculate_msr(&PlainMatrix::zero(2, 9)),
            Err(MsrError::Capacity { len: 9, .. })
        ));
        assert!(matches!(
            MsrEngine::with_config(&ctx, config(9)),
            Err(MsrError::InvalidParameter { .. })
        ));

        let shallow = InsecureContext::new(8).with_max_level(2);
        let engine = MsrEngine::new(&shallow);
        let m = PlainMatrix::from_fn(2, 2, |r, c| (r + c) as f64);
        assert!(matches!(
            engine.calculate_msr(&m),
            Err(MsrError::LevelExhausted { .. })
        ));
        // Means alone fit into two levels.
        assert!(engine.calculate_means(&m).is_ok());
    }

    #[test]
    fn test_empty_input_on_shallow_context() {
        let ctx = InsecureContext::new(8).with_max_level(0);
        let engine = MsrEngine::new(&ctx);
        let empty = PlainMatrix::zero(0, 3);
        assert!(matches!(
            engine.calculate_msr(&empty),
            Err(MsrError::EmptyInput { rows: 0, cols: 3 })
        ));
        assert!(matches!(
            engine.calculate_means(&empty),
            Err(MsrError::EmptyInput { .. })
        ));
        assert!(matches!(
            engine.calculate_residues(&PlainMatrix::zero(2, 0)),
            Err(MsrError::EmptyInput { .. })
        ));
        assert!(matches!(
            engine.calculate_msr(&PlainMatrix::zero(1, 9)),
            Err(MsrError::Capacity { .. })
        ));
    }

    #[test]
    fn test_levels() {
        let ctx = InsecureContext::new(16).with_max_level(3);
        let engine = MsrEngine::new(&ctx);
        let m = PlainMatrix::from_fn(3, 3, |r, c| (r * c) as f64);
        let (x, shape) = engine.encrypt_matrix(&m).unwrap();
        let means = engine.means(&x, &shape).unwrap();
        let residues = engine.residues(&x, &means).unwrap();
        let sm = ScaleManager::new(&ctx);
        assert_eq!(sm.check_uniform(&residues).unwrap().0, 2);
        // Exactly enough depth for the full pipeline.
        assert!(engine.calculate_msr(&m).is_ok());
    }

    #[test]
    fn test_timing_stats() {
        let ctx = InsecureContext::new(16);
        let engine = MsrEngine::new(&ctx);
        let m = PlainMatrix::from_fn(3, 3, |r, c| (r + 2 * c) as f64);
        let mut stats = Stats::new();
        engine.calculate_msr_timed(&m, Some(&mut stats)).unwrap();
        let names: Vec<_> = stats.as_vec().into_iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec!["pack", "means", "residues", "square", "reduce", "assemble"]
        );
    }

    #[test]
    fn test_noise_tracker() {
        let ctx = NoiseTracker::with_seed(&NoiseTrackerParams::TEST, 17).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let m = PlainMatrix::rand_uniform(&mut rng, 10, 6, 0_f64, 10_f64);
        let expected = oracle::reference_statistics(&m).unwrap();
        for cap in [64, 30, 18] {
            let engine = MsrEngine::with_config(&ctx, config(cap)).unwrap();
            let stats = engine.calculate_msr(&m).unwrap();
            let diff = relative_diff(&stats, &expected);
            assert!(diff < 1e-3, "cap {cap}: relative error {diff}");
        }
    }

    #[test]
    fn test_residue_signal() {
        let ctx = InsecureContext::new(16);
        let engine = MsrEngine::new(&ctx);
        let m = PlainMatrix::from_fn(4, 4, |r, c| ((r * 7 + c * 3) % 5) as f64);
        let sel = Selection::from_masks(&[true, true, false, true], &[false, true, true, true]);
        assert_close(
            &engine.residue_statistics(&m, &sel).unwrap(),
            &PlainReference.residue_statistics(&m, &sel).unwrap(),
            1e-9,
        );
        let wrong = Selection::all(3, 4);
        assert!(matches!(
            engine.residue_statistics(&m, &wrong),
            Err(MsrError::ShapeMismatch { .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_matches_oracle(
            rows in 1_usize..7,
            cols in 1_usize..5,
            cap in 4_usize..33,
            values in prop::collection::vec(-50_f64..50_f64, 28),
        ) {
            prop_assume!(cols <= cap);
            let m = PlainMatrix::from_fn(rows, cols, |r, c| values[r * 4 + c]);
            let ctx = InsecureContext::new(32);
            let engine = MsrEngine::with_config(&ctx, config(cap)).unwrap();
            let stats = engine.calculate_msr(&m).unwrap();
            let expected = oracle::reference_statistics(&m).unwrap();
            prop_assert!(relative_diff(&stats, &expected) < 1e-9);
        }
    }
}
