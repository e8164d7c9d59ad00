//! The residual-variance prior.
//!
//! A scaled-inverse-chi-square prior on σ², calibrated so a chosen prior
//! quantile of σ coincides with the user-supplied estimate. Binary fits
//! pin the variance at one instead.

use bart_core::{ensure, errors::Result, Real};
use bart_math::distributions::chi_square_quantile;
use bart_math::rng::MersenneTwister;

/// Prior over the residual variance σ² (scaled space).
pub trait ResidualVariancePrior: std::fmt::Debug {
    /// Draw σ² from its conditional posterior given the weighted sum of
    /// squared residuals `ssr` over `n_eff` effective observations.
    fn draw_from_posterior(&self, rng: &mut MersenneTwister, n_eff: Real, ssr: Real) -> Real;

    /// Adjust the prior scale after the response scale changed so the
    /// unscaled prior quantile is preserved.
    fn rescale(&mut self, old_range: Real, new_range: Real);
}

/// `σ² ~ Scaled-Inv-χ²(df, scale)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledInvChiSquaredPrior {
    df: Real,
    scale: Real,
}

impl ScaledInvChiSquaredPrior {
    /// Calibrate the prior scale so that `P(σ ≤ sigma_estimate) =
    /// quantile` under the prior. `sigma_estimate` is in the scaled
    /// response space.
    pub fn calibrated(df: Real, quantile: Real, sigma_estimate: Real) -> Result<Self> {
        ensure!(df > 0.0, "sigma prior df must be positive, got {df}");
        ensure!(
            quantile > 0.0 && quantile < 1.0,
            "sigma prior quantile must lie in (0, 1), got {quantile}"
        );
        ensure!(
            sigma_estimate > 0.0,
            "sigma estimate must be positive, got {sigma_estimate}"
        );
        // P(sigma^2 <= s^2) = P(chi^2_df >= df*scale/s^2)
        let scale =
            sigma_estimate * sigma_estimate * chi_square_quantile(df, 1.0 - quantile) / df;
        Ok(Self { df, scale })
    }

    /// Degrees of freedom.
    pub fn df(&self) -> Real {
        self.df
    }

    /// Prior scale.
    pub fn scale(&self) -> Real {
        self.scale
    }
}

impl ResidualVariancePrior for ScaledInvChiSquaredPrior {
    fn draw_from_posterior(&self, rng: &mut MersenneTwister, n_eff: Real, ssr: Real) -> Real {
        let df_posterior = self.df + n_eff;
        let scale_posterior = (self.df * self.scale + ssr) / df_posterior;
        df_posterior * scale_posterior / rng.next_chi_square(df_posterior)
    }

    fn rescale(&mut self, old_range: Real, new_range: Real) {
        let ratio = old_range / new_range;
        self.scale *= ratio * ratio;
    }
}

/// A degenerate variance prior: σ² is a known constant (the probit
/// chain's unit variance).
#[derive(Debug, Clone, PartialEq)]
pub struct FixedVariancePrior {
    value: Real,
}

impl FixedVariancePrior {
    /// Pin σ² at `value`.
    pub fn new(value: Real) -> Self {
        Self { value }
    }
}

impl ResidualVariancePrior for FixedVariancePrior {
    fn draw_from_posterior(&self, _rng: &mut MersenneTwister, _n_eff: Real, _ssr: Real) -> Real {
        self.value
    }

    fn rescale(&mut self, _old_range: Real, _new_range: Real) {}
}
