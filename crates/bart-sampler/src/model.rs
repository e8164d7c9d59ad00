//! Statistical model options.
//!
//! Bundles the structural-move step probabilities, the tree prior
//! hyperparameters, the end-node prior family, and the residual-variance
//! prior hyperparameters. Validation is hard: an invalid model never
//! produces a fit.

use bart_core::{ensure, errors::Result, Real, Size};

/// Tolerance for the step-probability triple summing to one.
const PROBABILITY_SUM_TOLERANCE: Real = 1e-10;

/// The end-node (leaf) prior family.
#[derive(Debug, Clone, PartialEq)]
pub enum EndNodeSpec {
    /// Constant leaf mean with a `Normal(0, 1/τ)` prior, `τ` derived
    /// from `k`: `σ_μ = (binary ? 3.0 : 0.5) / (k √numTrees)`.
    MeanNormal {
        /// Prior tightness; larger k shrinks leaf means harder.
        k: Real,
    },
    /// Per-leaf linear regression on the augmented row `[1, x]`, with
    /// independent `Normal(0, 1/λᵢ)` priors on the coefficients.
    LinRegNormal {
        /// Coefficient prior precisions, length `numPredictors + 1`.
        precisions: Vec<Real>,
    },
}

/// Model options: structural-move probabilities and the three priors.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    /// Probability of proposing a birth-or-death move.
    pub birth_or_death_probability: Real,
    /// Probability of proposing a swap move.
    pub swap_probability: Real,
    /// Probability of proposing a change move.
    pub change_probability: Real,
    /// Probability of birth within a birth-or-death move when both
    /// directions are possible.
    pub birth_probability: Real,
    /// Tree prior growth probability at depth 0.
    pub base: Real,
    /// Tree prior depth-decay exponent.
    pub power: Real,
    /// End-node prior family.
    pub end_node: EndNodeSpec,
    /// Residual-variance prior degrees of freedom.
    pub sigma_df: Real,
    /// Prior quantile pinned to the supplied sigma estimate.
    pub sigma_quantile: Real,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            birth_or_death_probability: 0.5,
            swap_probability: 0.1,
            change_probability: 0.4,
            birth_probability: 0.5,
            base: 0.95,
            power: 2.0,
            end_node: EndNodeSpec::MeanNormal { k: 2.0 },
            sigma_df: 3.0,
            sigma_quantile: 0.9,
        }
    }
}

impl Model {
    /// Validate hyperparameter ranges against a predictor count.
    pub fn validate(&self, num_predictors: Size) -> Result<()> {
        for (name, p) in [
            ("birthOrDeathProbability", self.birth_or_death_probability),
            ("swapProbability", self.swap_probability),
            ("changeProbability", self.change_probability),
        ] {
            ensure!((0.0..=1.0).contains(&p), "{name} must lie in [0, 1], got {p}");
        }
        let sum = self.birth_or_death_probability + self.swap_probability
            + self.change_probability;
        ensure!(
            (sum - 1.0).abs() < PROBABILITY_SUM_TOLERANCE,
            "step probabilities must sum to 1, got {sum}"
        );
        ensure!(
            self.birth_probability > 0.0 && self.birth_probability <= 1.0,
            "birthProbability must lie in (0, 1]"
        );
        ensure!(
            self.base > 0.0 && self.base < 1.0,
            "tree prior base must lie in (0, 1), got {}",
            self.base
        );
        ensure!(self.power > 0.0, "tree prior power must be positive, got {}", self.power);
        match &self.end_node {
            EndNodeSpec::MeanNormal { k } => {
                ensure!(*k > 0.0, "end-node k must be positive, got {k}");
            }
            EndNodeSpec::LinRegNormal { precisions } => {
                ensure!(
                    precisions.len() == num_predictors + 1,
                    "end-node precisions must have length numPredictors + 1 = {}, got {}",
                    num_predictors + 1,
                    precisions.len()
                );
                ensure!(
                    precisions.iter().all(|&l| l > 0.0),
                    "end-node precisions must all be positive"
                );
            }
        }
        ensure!(self.sigma_df > 0.0, "sigma prior df must be positive");
        ensure!(
            self.sigma_quantile > 0.0 && self.sigma_quantile < 1.0,
            "sigma prior quantile must lie in (0, 1)"
        );
        Ok(())
    }
}
