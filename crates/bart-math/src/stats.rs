//! Indexed mean/variance reductions.
//!
//! The sampler's leaf updates reduce residual values over a leaf's
//! observation-index slice, optionally weighted. `Reducer` owns an
//! optional rayon thread pool and dispatches large reductions across it;
//! small slices and pool-less reducers run sequentially. All reductions
//! read shared slices and produce scalars, so workers never contend.

use bart_core::{ObsIndex, Real};
use rayon::prelude::*;

/// Below this many indices a reduction always runs sequentially; the
/// split/join overhead dominates on short slices.
const PARALLEL_CUTOFF: usize = 4096;

/// Dispatches indexed reductions, in parallel when a pool is held.
pub struct Reducer {
    pool: Option<rayon::ThreadPool>,
}

impl std::fmt::Debug for Reducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reducer")
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

impl Reducer {
    /// Create a reducer running on `num_threads` workers.
    ///
    /// `num_threads <= 1` yields a sequential reducer. Thread-pool
    /// construction failure is not fatal: the reducer degrades to
    /// sequential execution with a logged warning.
    pub fn new(num_threads: usize) -> Self {
        if num_threads <= 1 {
            return Self { pool: None };
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
        {
            Ok(pool) => Self { pool: Some(pool) },
            Err(e) => {
                log::warn!("thread pool creation failed ({e}); running single-threaded");
                Self { pool: None }
            }
        }
    }

    /// Number of worker threads in use (1 when sequential).
    pub fn num_threads(&self) -> usize {
        self.pool.as_ref().map_or(1, |p| p.current_num_threads())
    }

    /// Weighted mean of `values` over `indices`.
    ///
    /// Returns `(mean, n_eff)` where `n_eff` is the weight sum, or the
    /// index count when `weights` is `None`. An empty index slice yields
    /// `(0.0, 0.0)`.
    pub fn indexed_mean(
        &self,
        values: &[Real],
        weights: Option<&[Real]>,
        indices: &[ObsIndex],
    ) -> (Real, Real) {
        let (sum_w, sum_wx) = match (&self.pool, indices.len() >= PARALLEL_CUTOFF) {
            (Some(pool), true) => pool.install(|| {
                indices
                    .par_iter()
                    .map(|&i| {
                        let w = weights.map_or(1.0, |w| w[i as usize]);
                        (w, w * values[i as usize])
                    })
                    .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1))
            }),
            _ => indices.iter().fold((0.0, 0.0), |acc, &i| {
                let w = weights.map_or(1.0, |w| w[i as usize]);
                (acc.0 + w, acc.1 + w * values[i as usize])
            }),
        };
        if sum_w == 0.0 {
            (0.0, 0.0)
        } else {
            (sum_wx / sum_w, sum_w)
        }
    }

    /// Weighted mean and sum of squared deviations about that mean.
    ///
    /// Returns `(mean, ssd, n_eff)` with `ssd = Σ wᵢ (xᵢ − mean)²`.
    pub fn indexed_mean_ssd(
        &self,
        values: &[Real],
        weights: Option<&[Real]>,
        indices: &[ObsIndex],
    ) -> (Real, Real, Real) {
        let (mean, n_eff) = self.indexed_mean(values, weights, indices);
        if n_eff == 0.0 {
            return (0.0, 0.0, 0.0);
        }
        let ssd = match (&self.pool, indices.len() >= PARALLEL_CUTOFF) {
            (Some(pool), true) => pool.install(|| {
                indices
                    .par_iter()
                    .map(|&i| {
                        let w = weights.map_or(1.0, |w| w[i as usize]);
                        let d = values[i as usize] - mean;
                        w * d * d
                    })
                    .sum()
            }),
            _ => indices
                .iter()
                .map(|&i| {
                    let w = weights.map_or(1.0, |w| w[i as usize]);
                    let d = values[i as usize] - mean;
                    w * d * d
                })
                .sum(),
        };
        (mean, ssd, n_eff)
    }

    /// Weighted sum of squares of `values` over all positions.
    pub fn weighted_sum_of_squares(&self, values: &[Real], weights: Option<&[Real]>) -> Real {
        match (&self.pool, values.len() >= PARALLEL_CUTOFF) {
            (Some(pool), true) => pool.install(|| {
                values
                    .par_iter()
                    .enumerate()
                    .map(|(i, &x)| weights.map_or(1.0, |w| w[i]) * x * x)
                    .sum()
            }),
            _ => values
                .iter()
                .enumerate()
                .map(|(i, &x)| weights.map_or(1.0, |w| w[i]) * x * x)
                .sum(),
        }
    }
}
