//! End-node (leaf) priors: integrated likelihoods and posterior draws.
//!
//! Two families exist. The constant-mean model puts `Normal(0, 1/τ)` on
//! the leaf mean; the linear-regression model puts independent
//! `Normal(0, 1/λᵢ)` priors on per-leaf regression coefficients over the
//! augmented row `[1, x]`. Both integrate the leaf parameter out in
//! closed form, which is what lets a structural proposal be scored
//! before any parameter is drawn.

use crate::data::Data;
use crate::node::LeafScratch;
use bart_core::{ObsIndex, Real, Size};
use bart_math::linalg::{
    cholesky_upper, dot, log_diagonal_sum, solve_upper_in_place,
    solve_upper_transposed_in_place,
};
use bart_math::rng::MersenneTwister;
use bart_math::stats::Reducer;
use nalgebra::DMatrix;

/// Everything a leaf computation reads: the tree's partial residuals,
/// weights, the current residual standard deviation, and the reducer.
pub struct LeafContext<'a> {
    /// Training data (row access for the linear-regression model).
    pub data: &'a Data,
    /// Partial residuals of the tree being updated, length n.
    pub residuals: &'a [Real],
    /// Observation weights, when present.
    pub weights: Option<&'a [Real]>,
    /// Residual standard deviation, scaled space.
    pub sigma: Real,
    /// Reduction dispatcher.
    pub reducer: &'a Reducer,
}

/// A leaf-parameter prior with closed-form integrated likelihood.
pub trait EndNodePrior: std::fmt::Debug {
    /// Scratch for a leaf that has not been prepared yet.
    fn empty_scratch(&self) -> LeafScratch;

    /// Recompute a leaf's scratch from its observations; afterwards the
    /// scratch holds the pre-draw sufficient statistics (residual mean,
    /// or `R` and `R⁻ᵀXᵀy`).
    fn prepare(&self, ctx: &LeafContext, indices: &[ObsIndex]) -> LeafScratch;

    /// Log-likelihood of the leaf's residuals with the leaf parameter
    /// integrated out. `-inf` for an empty leaf.
    fn integrated_log_likelihood(&self, ctx: &LeafContext, indices: &[ObsIndex]) -> Real;

    /// Replace the prepared statistics in `scratch` with a draw from the
    /// leaf-parameter posterior.
    fn draw_posterior(&self, rng: &mut MersenneTwister, sigma: Real, scratch: &mut LeafScratch);

    /// The leaf's fitted value for a predictor row.
    fn fitted_value(&self, scratch: &LeafScratch, row: &[Real]) -> Real;

    /// Number of per-leaf parameters (for persistence).
    fn num_parameters(&self) -> Size;

    /// Extract the drawn parameters.
    fn parameters(&self, scratch: &LeafScratch) -> Vec<Real>;

    /// Rebuild a scratch from persisted parameters.
    fn scratch_with_parameters(&self, parameters: &[Real]) -> LeafScratch;
}

// ─── Constant-mean model ─────────────────────────────────────────────────

/// `μ ~ Normal(0, 1/τ)` on the leaf mean, `τ` derived from `k`.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanNormalPrior {
    tau: Real,
}

impl MeanNormalPrior {
    /// Derive `τ` from the shrinkage parameter `k`, the ensemble size,
    /// and the response kind: `σ_μ = (binary ? 3.0 : 0.5) / (k √T)`.
    pub fn new(k: Real, num_trees: Size, binary: bool) -> Self {
        let numerator = if binary { 3.0 } else { 0.5 };
        let sigma_mu = numerator / (k * (num_trees as Real).sqrt());
        Self {
            tau: 1.0 / (sigma_mu * sigma_mu),
        }
    }

    /// The prior precision on leaf means.
    pub fn tau(&self) -> Real {
        self.tau
    }
}

impl EndNodePrior for MeanNormalPrior {
    fn empty_scratch(&self) -> LeafScratch {
        LeafScratch::MeanNormal {
            mu: 0.0,
            num_effective_obs: 0.0,
        }
    }

    fn prepare(&self, ctx: &LeafContext, indices: &[ObsIndex]) -> LeafScratch {
        let (mean, n_eff) = ctx.reducer.indexed_mean(ctx.residuals, ctx.weights, indices);
        LeafScratch::MeanNormal {
            mu: mean,
            num_effective_obs: n_eff,
        }
    }

    fn integrated_log_likelihood(&self, ctx: &LeafContext, indices: &[ObsIndex]) -> Real {
        let (mean, ssd, n_eff) =
            ctx.reducer
                .indexed_mean_ssd(ctx.residuals, ctx.weights, indices);
        if n_eff <= 0.0 {
            return Real::NEG_INFINITY;
        }
        let s2 = ctx.sigma * ctx.sigma;
        let data_precision = n_eff / s2;
        0.5 * (self.tau / (self.tau + data_precision)).ln() - 0.5 * ssd / s2
            - 0.5 * (self.tau * n_eff * mean * mean) / (s2 * (self.tau + data_precision))
    }

    fn draw_posterior(&self, rng: &mut MersenneTwister, sigma: Real, scratch: &mut LeafScratch) {
        let LeafScratch::MeanNormal {
            mu,
            num_effective_obs,
        } = scratch
        else {
            panic!("scratch does not belong to the constant-mean model");
        };
        let s2 = sigma * sigma;
        let data_precision = *num_effective_obs / s2;
        let posterior_precision = self.tau + data_precision;
        let posterior_mean = data_precision * *mu / posterior_precision;
        *mu = posterior_mean + rng.next_normal() / posterior_precision.sqrt();
    }

    fn fitted_value(&self, scratch: &LeafScratch, _row: &[Real]) -> Real {
        match scratch {
            LeafScratch::MeanNormal { mu, .. } => *mu,
            LeafScratch::LinReg { .. } => {
                panic!("scratch does not belong to the constant-mean model")
            }
        }
    }

    fn num_parameters(&self) -> Size {
        1
    }

    fn parameters(&self, scratch: &LeafScratch) -> Vec<Real> {
        match scratch {
            LeafScratch::MeanNormal { mu, .. } => vec![*mu],
            LeafScratch::LinReg { .. } => {
                panic!("scratch does not belong to the constant-mean model")
            }
        }
    }

    fn scratch_with_parameters(&self, parameters: &[Real]) -> LeafScratch {
        LeafScratch::MeanNormal {
            mu: parameters[0],
            num_effective_obs: 0.0,
        }
    }
}

// ─── Linear-regression model ─────────────────────────────────────────────

/// `β ~ Normal(0, diag(1/λ))` on per-leaf regression coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct LinRegPrior {
    /// Coefficient prior precisions λ, length `numPredictors + 1`.
    precisions: Vec<Real>,
}

impl LinRegPrior {
    /// Create from coefficient prior precisions (intercept first).
    pub fn new(precisions: Vec<Real>) -> Self {
        Self { precisions }
    }

    /// Assemble `R = chol(XᵀX + Λσ²)`, `θ = R⁻ᵀXᵀy`, and `yᵀy` over the
    /// leaf's (weighted) augmented rows. `None` when the posterior
    /// precision fails to factor.
    fn decompose(
        &self,
        ctx: &LeafContext,
        indices: &[ObsIndex],
    ) -> Option<(DMatrix<Real>, Vec<Real>, Real)> {
        let k = self.precisions.len();
        let s2 = ctx.sigma * ctx.sigma;
        let mut a = DMatrix::zeros(k, k);
        let mut b = vec![0.0; k];
        let mut yty = 0.0;
        for &i in indices {
            let i = i as Size;
            let w = ctx.weights.map_or(1.0, |w| w[i]);
            let row = ctx.data.row(i);
            let r = ctx.residuals[i];
            yty += w * r * r;
            for p in 0..k {
                let ap = if p == 0 { 1.0 } else { row[p - 1] };
                b[p] += w * ap * r;
                for q in p..k {
                    let aq = if q == 0 { 1.0 } else { row[q - 1] };
                    a[(p, q)] += w * ap * aq;
                }
            }
        }
        for p in 0..k {
            a[(p, p)] += self.precisions[p] * s2;
            for q in (p + 1)..k {
                a[(q, p)] = a[(p, q)];
            }
        }
        let r = cholesky_upper(&a)?;
        solve_upper_transposed_in_place(&r, &mut b);
        Some((r, b, yty))
    }
}

impl EndNodePrior for LinRegPrior {
    fn empty_scratch(&self) -> LeafScratch {
        let k = self.precisions.len();
        LeafScratch::LinReg {
            r: DMatrix::identity(k, k),
            coefficients: vec![0.0; k],
        }
    }

    fn prepare(&self, ctx: &LeafContext, indices: &[ObsIndex]) -> LeafScratch {
        match self.decompose(ctx, indices) {
            Some((r, theta, _)) => LeafScratch::LinReg {
                r,
                coefficients: theta,
            },
            None => self.empty_scratch(),
        }
    }

    fn integrated_log_likelihood(&self, ctx: &LeafContext, indices: &[ObsIndex]) -> Real {
        if indices.is_empty() {
            return Real::NEG_INFINITY;
        }
        let Some((r, theta, yty)) = self.decompose(ctx, indices) else {
            return Real::NEG_INFINITY;
        };
        let s2 = ctx.sigma * ctx.sigma;
        -log_diagonal_sum(&r) - 0.5 * (yty - dot(&theta, &theta)) / s2
    }

    fn draw_posterior(&self, rng: &mut MersenneTwister, _sigma: Real, scratch: &mut LeafScratch) {
        let LeafScratch::LinReg { r, coefficients } = scratch else {
            panic!("scratch does not belong to the linear-regression model");
        };
        for c in coefficients.iter_mut() {
            *c += rng.next_normal();
        }
        solve_upper_in_place(r, coefficients);
    }

    fn fitted_value(&self, scratch: &LeafScratch, row: &[Real]) -> Real {
        match scratch {
            LeafScratch::LinReg { coefficients, .. } => {
                coefficients[0] + dot(&coefficients[1..], row)
            }
            LeafScratch::MeanNormal { .. } => {
                panic!("scratch does not belong to the linear-regression model")
            }
        }
    }

    fn num_parameters(&self) -> Size {
        self.precisions.len()
    }

    fn parameters(&self, scratch: &LeafScratch) -> Vec<Real> {
        match scratch {
            LeafScratch::LinReg { coefficients, .. } => coefficients.clone(),
            LeafScratch::MeanNormal { .. } => {
                panic!("scratch does not belong to the linear-regression model")
            }
        }
    }

    fn scratch_with_parameters(&self, parameters: &[Real]) -> LeafScratch {
        let k = self.precisions.len();
        debug_assert_eq!(parameters.len(), k);
        LeafScratch::LinReg {
            r: DMatrix::identity(k, k),
            coefficients: parameters.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::VariableType;

    fn ctx<'a>(
        data: &'a Data,
        residuals: &'a [Real],
        weights: Option<&'a [Real]>,
        sigma: Real,
        reducer: &'a Reducer,
    ) -> LeafContext<'a> {
        LeafContext {
            data,
            residuals,
            weights,
            sigma,
            reducer,
        }
    }

    fn toy_data(n: Size) -> Data {
        Data::new(
            vec![0.0; n],
            (0..n).map(|i| i as Real).collect(),
            vec![VariableType::Ordinal],
            vec![100],
            1.0,
        )
        .unwrap()
    }

    #[test]
    fn tau_derivation() {
        // sigma_mu = 0.5 / (2 sqrt(4)) = 0.125, tau = 64
        let p = MeanNormalPrior::new(2.0, 4, false);
        assert!((p.tau() - 64.0).abs() < 1e-12);
        // binary numerator is 3.0
        let p = MeanNormalPrior::new(2.0, 4, true);
        assert!((p.tau() - 1.0 / (0.75 * 0.75)).abs() < 1e-9);
    }

    #[test]
    fn prepared_mu_is_weighted_mean() {
        let data = toy_data(3);
        let reducer = Reducer::new(1);
        let residuals = [1.0, 2.0, 6.0];
        let weights = [1.0, 1.0, 2.0];
        let prior = MeanNormalPrior::new(2.0, 1, false);
        let c = ctx(&data, &residuals, Some(&weights), 1.0, &reducer);
        match prior.prepare(&c, &[0, 1, 2]) {
            LeafScratch::MeanNormal {
                mu,
                num_effective_obs,
            } => {
                assert!((mu - 15.0 / 4.0).abs() < 1e-12);
                assert_eq!(num_effective_obs, 4.0);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn mean_likelihood_matches_closed_form() {
        let data = toy_data(2);
        let reducer = Reducer::new(1);
        let residuals = [0.5, -0.25];
        let prior = MeanNormalPrior::new(2.0, 1, false);
        let tau = prior.tau();
        let c = ctx(&data, &residuals, None, 2.0, &reducer);
        let ll = prior.integrated_log_likelihood(&c, &[0, 1]);

        let (n_eff, s2) = (2.0, 4.0);
        let mean = 0.125;
        let ssd = (0.5 - mean) * (0.5 - mean) + (-0.25 - mean) * (-0.25 - mean);
        let expected = 0.5 * (tau / (tau + n_eff / s2)).ln() - 0.5 * ssd / s2
            - 0.5 * (tau * n_eff * mean * mean) / (s2 * (tau + n_eff / s2));
        assert!((ll - expected).abs() < 1e-12);
    }

    #[test]
    fn empty_leaf_is_impossible() {
        let data = toy_data(2);
        let reducer = Reducer::new(1);
        let residuals = [0.5, -0.25];
        let prior = MeanNormalPrior::new(2.0, 1, false);
        let c = ctx(&data, &residuals, None, 1.0, &reducer);
        assert_eq!(
            prior.integrated_log_likelihood(&c, &[]),
            Real::NEG_INFINITY
        );
        let lr = LinRegPrior::new(vec![1.0, 1.0]);
        assert_eq!(lr.integrated_log_likelihood(&c, &[]), Real::NEG_INFINITY);
    }

    #[test]
    fn mean_posterior_draw_concentrates() {
        // With huge n_eff/sigma² the draw pins to the residual mean
        let prior = MeanNormalPrior::new(2.0, 1, false);
        let mut rng = MersenneTwister::new(9);
        let mut scratch = LeafScratch::MeanNormal {
            mu: 3.0,
            num_effective_obs: 1e12,
        };
        prior.draw_posterior(&mut rng, 1.0, &mut scratch);
        match scratch {
            LeafScratch::MeanNormal { mu, .. } => assert!((mu - 3.0).abs() < 1e-3),
            _ => unreachable!(),
        }
    }

    #[test]
    fn linreg_decomposition_solves_the_normal_equations() {
        let data = toy_data(4);
        let reducer = Reducer::new(1);
        // residuals exactly linear in x: r = 1 + 2x
        let residuals = [1.0, 3.0, 5.0, 7.0];
        let prior = LinRegPrior::new(vec![1e-8, 1e-8]);
        let c = ctx(&data, &residuals, None, 0.1, &reducer);
        let mut scratch = prior.prepare(&c, &[0, 1, 2, 3]);
        // theta = R^{-T} X'y; beta = R^{-1} theta should recover (1, 2)
        // since the prior is essentially flat
        match &mut scratch {
            LeafScratch::LinReg { r, coefficients } => {
                let mut beta = coefficients.clone();
                solve_upper_in_place(r, &mut beta);
                assert!((beta[0] - 1.0).abs() < 1e-5, "intercept {}", beta[0]);
                assert!((beta[1] - 2.0).abs() < 1e-5, "slope {}", beta[1]);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn linreg_likelihood_prefers_the_true_fit() {
        let data = toy_data(4);
        let reducer = Reducer::new(1);
        let linear = [1.0, 3.0, 5.0, 7.0];
        let noise = [1.0, -3.0, 5.0, -7.0];
        let prior = LinRegPrior::new(vec![1.0, 1.0]);
        let c_lin = ctx(&data, &linear, None, 1.0, &reducer);
        let c_noise = ctx(&data, &noise, None, 1.0, &reducer);
        let idx = [0, 1, 2, 3];
        assert!(
            prior.integrated_log_likelihood(&c_lin, &idx)
                > prior.integrated_log_likelihood(&c_noise, &idx)
        );
    }

    #[test]
    fn linreg_fitted_value_is_affine() {
        let prior = LinRegPrior::new(vec![1.0, 1.0, 1.0]);
        let scratch = prior.scratch_with_parameters(&[0.5, 2.0, -1.0]);
        assert!((prior.fitted_value(&scratch, &[3.0, 4.0]) - 2.5).abs() < 1e-12);
    }
}
