//! Sampler control options.

use bart_core::{ensure, errors::Result, Size};

/// Run-level options of the sampler: chain lengths, thinning, threading,
/// and verbosity. Orthogonal to the statistical model (see
/// [`crate::model::Model`]) and to the training data.
#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    /// Treat the response as binary and run the probit latent-variable
    /// chain instead of drawing a residual variance.
    pub response_is_binary: bool,
    /// Emit progress lines while sampling.
    pub verbose: bool,
    /// Store de-scaled per-observation training fits in the results.
    pub keep_training_fits: bool,
    /// Compute cut points from predictor quantiles instead of uniformly
    /// over the column range.
    pub use_quantiles: bool,
    /// Number of posterior samples to store.
    pub num_samples: Size,
    /// Number of burn-in samples discarded before storage begins.
    pub num_burn_in: Size,
    /// Number of trees in the ensemble.
    pub num_trees: Size,
    /// Worker threads for leaf-level reductions; 1 means sequential.
    pub num_threads: Size,
    /// Only every `tree_thinning_rate`-th iteration emits a sample.
    pub tree_thinning_rate: Size,
    /// Progress line frequency, in iterations.
    pub print_every: Size,
    /// How many cut points per predictor to echo at construction.
    pub print_cutoffs: Size,
    /// Use the alternate probit latent initialization/truncation scheme.
    pub match_bayes_tree: bool,
    /// Seed of the fit-owned Mersenne Twister.
    pub rng_seed: u64,
}

impl Default for Control {
    fn default() -> Self {
        Self {
            response_is_binary: false,
            verbose: false,
            keep_training_fits: true,
            use_quantiles: false,
            num_samples: 800,
            num_burn_in: 200,
            num_trees: 75,
            num_threads: 1,
            tree_thinning_rate: 1,
            print_every: 100,
            print_cutoffs: 0,
            match_bayes_tree: false,
            rng_seed: 0,
        }
    }
}

impl Control {
    /// Validate option ranges. Called by the fit constructor.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.num_samples >= 1, "numSamples must be at least 1");
        ensure!(self.num_trees >= 1, "numTrees must be at least 1");
        ensure!(self.num_threads >= 1, "numThreads must be at least 1");
        ensure!(
            self.tree_thinning_rate >= 1,
            "treeThinningRate must be at least 1"
        );
        ensure!(self.print_every > 0, "printEvery must be positive");
        Ok(())
    }

    /// Total number of chain iterations a default run executes.
    pub fn total_iterations(&self) -> Size {
        (self.num_burn_in + self.num_samples) * self.tree_thinning_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(Control::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_counts() {
        let mut c = Control::default();
        c.num_trees = 0;
        assert!(c.validate().is_err());

        let mut c = Control::default();
        c.num_samples = 0;
        assert!(c.validate().is_err());

        let mut c = Control::default();
        c.tree_thinning_rate = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn iteration_count() {
        let mut c = Control::default();
        c.num_burn_in = 10;
        c.num_samples = 5;
        c.tree_thinning_rate = 3;
        assert_eq!(c.total_iterations(), 45);
    }
}
