//! In-memory sampler state snapshots.
//!
//! A `StateBlob` captures everything the chain needs to continue from a
//! given point: the trees (topology, partitions, leaf parameters), the
//! fit matrices, the latents/scaled response, sigma, and the RNG state.
//! Restoring a blob into the fit it came from reproduces the subsequent
//! chain bitwise.

use crate::fit::BartFit;
use crate::tree::Tree;
use bart_core::Real;
use bart_math::rng::MersenneTwister;

/// A point-in-time copy of the mutable sampler state.
#[derive(Debug, Clone)]
pub struct StateBlob {
    pub(crate) trees: Vec<Tree>,
    pub(crate) tree_fits: Vec<Real>,
    pub(crate) tree_test_fits: Vec<Real>,
    pub(crate) total_fits: Vec<Real>,
    pub(crate) total_test_fits: Vec<Real>,
    pub(crate) y_scaled: Vec<Real>,
    pub(crate) sigma: Real,
    pub(crate) rng_seed: u64,
    pub(crate) rng_draws: u64,
    pub(crate) running_time: Real,
}

impl BartFit {
    /// Capture the current sampler state.
    pub fn create_state(&self) -> StateBlob {
        StateBlob {
            trees: self.trees.clone(),
            tree_fits: self.tree_fits.clone(),
            tree_test_fits: self.tree_test_fits.clone(),
            total_fits: self.total_fits.clone(),
            total_test_fits: self.total_test_fits.clone(),
            y_scaled: self.y_scaled.clone(),
            sigma: self.sigma,
            rng_seed: self.rng.seed(),
            rng_draws: self.rng.draws(),
            running_time: self.running_time,
        }
    }

    /// Overwrite an existing blob with the current state (avoids
    /// reallocating when snapshotting repeatedly).
    pub fn store_state(&self, blob: &mut StateBlob) {
        blob.trees.clone_from(&self.trees);
        blob.tree_fits.clone_from(&self.tree_fits);
        blob.tree_test_fits.clone_from(&self.tree_test_fits);
        blob.total_fits.clone_from(&self.total_fits);
        blob.total_test_fits.clone_from(&self.total_test_fits);
        blob.y_scaled.clone_from(&self.y_scaled);
        blob.sigma = self.sigma;
        blob.rng_seed = self.rng.seed();
        blob.rng_draws = self.rng.draws();
        blob.running_time = self.running_time;
    }

    /// Restore a previously captured state.
    ///
    /// The blob must come from a fit with the same data dimensions and
    /// tree count; restoring a foreign blob is a logic error.
    pub fn restore_state(&mut self, blob: &StateBlob) {
        assert_eq!(blob.trees.len(), self.trees.len(), "tree count mismatch");
        assert_eq!(blob.y_scaled.len(), self.y_scaled.len(), "size mismatch");
        self.trees.clone_from(&blob.trees);
        self.tree_fits.clone_from(&blob.tree_fits);
        self.tree_test_fits.clone_from(&blob.tree_test_fits);
        self.total_fits.clone_from(&blob.total_fits);
        self.total_test_fits.clone_from(&blob.total_test_fits);
        self.y_scaled.clone_from(&blob.y_scaled);
        self.sigma = blob.sigma;
        self.rng = MersenneTwister::recover(blob.rng_seed, blob.rng_draws);
        self.running_time = blob.running_time;
    }
}
