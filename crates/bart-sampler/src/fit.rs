//! The sampler orchestrator.
//!
//! `BartFit` owns the ensemble, the running per-observation fit totals,
//! the residual standard deviation, the RNG, and the three priors. One
//! iteration sweeps the trees in order — subtract a tree's contribution,
//! propose a structural move on it, redraw its leaf parameters, write
//! its new fits back — then draws sigma (continuous) or resamples the
//! probit latents (binary). Every `treeThinningRate`-th post-burn-in
//! iteration stores one de-scaled sample.

use crate::control::Control;
use crate::cuts::CutPoints;
use crate::data::Data;
use crate::end_node::{EndNodePrior, LeafContext, LinRegPrior, MeanNormalPrior};
use crate::model::{EndNodeSpec, Model};
use crate::moves::{self, MoveContext};
use crate::results::Results;
use crate::scale::ResponseScale;
use crate::sigma_prior::{FixedVariancePrior, ResidualVariancePrior, ScaledInvChiSquaredPrior};
use crate::tree::Tree;
use crate::tree_prior::{CgmTreePrior, TreePrior};
use bart_core::{ensure, errors::Result, Real, Size};
use bart_math::rng::MersenneTwister;
use bart_math::stats::Reducer;
use std::time::Instant;

/// One stored sample, handed to the callback read-only.
#[derive(Debug)]
pub struct SampleView<'a> {
    /// Index of this sample among the stored ones.
    pub sample_index: Size,
    /// De-scaled training fits of this sample, length n.
    pub training_fits: &'a [Real],
    /// De-scaled test fits of this sample, length m.
    pub test_fits: &'a [Real],
    /// De-scaled sigma of this sample.
    pub sigma: Real,
}

/// Callback invoked synchronously after each stored sample.
pub type SampleCallback<'a> = dyn FnMut(&SampleView) + 'a;

/// A BART sampler over fixed training data.
pub struct BartFit {
    pub(crate) control: Control,
    pub(crate) model: Model,
    pub(crate) data: Data,
    pub(crate) cuts: CutPoints,
    pub(crate) scale: ResponseScale,
    /// Scaled response (continuous) or current probit latents (binary).
    pub(crate) y_scaled: Vec<Real>,
    pub(crate) trees: Vec<Tree>,
    /// Per-tree training contributions, tree-major (`numTrees × n`).
    pub(crate) tree_fits: Vec<Real>,
    /// Per-tree test contributions, tree-major (`numTrees × m`).
    pub(crate) tree_test_fits: Vec<Real>,
    /// Column sums of `tree_fits`, length n.
    pub(crate) total_fits: Vec<Real>,
    /// Column sums of `tree_test_fits`, length m.
    pub(crate) total_test_fits: Vec<Real>,
    /// Partial-residual scratch buffer, length n.
    pub(crate) residuals: Vec<Real>,
    /// Residual standard deviation, scaled space (1 for binary).
    pub(crate) sigma: Real,
    pub(crate) tree_prior: Box<dyn TreePrior>,
    pub(crate) end_node: Box<dyn EndNodePrior>,
    pub(crate) resid_prior: Box<dyn ResidualVariancePrior>,
    pub(crate) reducer: Reducer,
    pub(crate) rng: MersenneTwister,
    /// Cumulative sampling wall-clock seconds.
    pub(crate) running_time: Real,
}

impl std::fmt::Debug for BartFit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BartFit")
            .field("num_observations", &self.data.num_observations())
            .field("num_trees", &self.control.num_trees)
            .field("sigma", &self.sigma)
            .field("running_time", &self.running_time)
            .finish()
    }
}

impl BartFit {
    /// Construct a fit. Fails on any invalid configuration; no partial
    /// fit is ever produced.
    pub fn new(control: Control, model: Model, data: Data) -> Result<Self> {
        control.validate()?;
        model.validate(data.num_predictors())?;

        let cuts = CutPoints::from_data(&data, control.use_quantiles);
        if control.print_cutoffs > 0 {
            for j in 0..data.num_predictors() {
                let shown = cuts.cuts(j).len().min(control.print_cutoffs);
                log::info!(
                    "predictor {:>3}: {} cut points, first {:?}",
                    j,
                    cuts.num_cuts(j),
                    &cuts.cuts(j)[..shown]
                );
            }
        }

        let binary = control.response_is_binary;
        let num_trees = control.num_trees;
        let n = data.num_observations();
        let m = data.num_test_observations();

        let scale = if binary {
            ResponseScale::binary()
        } else {
            ResponseScale::from_response(data.y(), data.offset())
        };
        let end_node: Box<dyn EndNodePrior> = match &model.end_node {
            EndNodeSpec::MeanNormal { k } => {
                Box::new(MeanNormalPrior::new(*k, num_trees, binary))
            }
            EndNodeSpec::LinRegNormal { precisions } => {
                Box::new(LinRegPrior::new(precisions.clone()))
            }
        };
        let tree_prior: Box<dyn TreePrior> = Box::new(CgmTreePrior {
            base: model.base,
            power: model.power,
        });
        let (sigma, resid_prior): (Real, Box<dyn ResidualVariancePrior>) = if binary {
            (1.0, Box::new(FixedVariancePrior::new(1.0)))
        } else {
            let estimate = data.sigma_estimate() / scale.range;
            ensure!(
                estimate.is_finite(),
                "sigma estimate is not finite after scaling"
            );
            (
                estimate,
                Box::new(ScaledInvChiSquaredPrior::calibrated(
                    model.sigma_df,
                    model.sigma_quantile,
                    estimate,
                )?),
            )
        };

        let trees = (0..num_trees)
            .map(|_| Tree::new(n, end_node.empty_scratch()))
            .collect();
        let reducer = Reducer::new(control.num_threads);
        let rng = MersenneTwister::new(control.rng_seed);

        let mut fit = Self {
            control,
            model,
            data,
            cuts,
            scale,
            y_scaled: vec![0.0; n],
            trees,
            tree_fits: vec![0.0; n * num_trees],
            tree_test_fits: vec![0.0; m * num_trees],
            total_fits: vec![0.0; n],
            total_test_fits: vec![0.0; m],
            residuals: vec![0.0; n],
            sigma,
            tree_prior,
            end_node,
            resid_prior,
            reducer,
            rng,
            running_time: 0.0,
        };
        if binary {
            fit.initialize_latents();
        } else {
            fit.rescale_response();
        }
        Ok(fit)
    }

    // ─── Accessors ───────────────────────────────────────────────────

    /// The control block.
    pub fn control(&self) -> &Control {
        &self.control
    }

    /// The model block.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// The training/test data.
    pub fn data(&self) -> &Data {
        &self.data
    }

    /// Current residual standard deviation in the scaled space.
    pub fn sigma(&self) -> Real {
        self.sigma
    }

    /// Current aggregated training fits (scaled space).
    pub fn total_fits(&self) -> &[Real] {
        &self.total_fits
    }

    /// Cumulative wall-clock seconds spent inside `run_sampler*`.
    pub fn running_time(&self) -> Real {
        self.running_time
    }

    // ─── The outer MCMC loop ─────────────────────────────────────────

    /// Run the chain with the burn-in and sample counts from the
    /// control block.
    pub fn run_sampler(&mut self) -> Results {
        self.run_sampler_with(self.control.num_burn_in, self.control.num_samples, None)
    }

    /// Run the chain with explicit burn-in and sample counts.
    pub fn run_sampler_for(&mut self, num_burn_in: Size, num_samples: Size) -> Results {
        self.run_sampler_with(num_burn_in, num_samples, None)
    }

    /// Run the chain, invoking `callback` after each stored sample.
    pub fn run_sampler_with(
        &mut self,
        num_burn_in: Size,
        num_samples: Size,
        mut callback: Option<&mut SampleCallback>,
    ) -> Results {
        let timer = Instant::now();
        let thin = self.control.tree_thinning_rate;
        let mut results = Results::new(
            num_samples,
            self.data.num_observations(),
            self.data.num_test_observations(),
            self.data.num_predictors(),
            self.control.keep_training_fits,
        );
        let total_iterations = (num_burn_in + num_samples) * thin;
        for iteration in 0..total_iterations {
            for t in 0..self.control.num_trees {
                self.sample_tree(t);
            }
            if self.control.response_is_binary {
                self.resample_latents();
            }
            let (n_eff, ssr) = self.residual_stats();
            self.sigma = self
                .resid_prior
                .draw_from_posterior(&mut self.rng, n_eff, ssr)
                .sqrt();

            if (iteration + 1) % thin == 0 {
                let emitted = (iteration + 1) / thin;
                if emitted > num_burn_in {
                    self.store_sample(&mut results, emitted - num_burn_in - 1, &mut callback);
                }
            }
            if self.control.verbose && (iteration + 1) % self.control.print_every == 0 {
                log::info!("iteration {:>8} / {}", iteration + 1, total_iterations);
            }
        }
        self.running_time += timer.elapsed().as_secs_f64();
        results
    }

    /// One per-tree sub-iteration: partial residuals, structural
    /// proposal, leaf posterior draws, fit write-back.
    fn sample_tree(&mut self, t: Size) {
        let n = self.data.num_observations();
        let base = t * n;
        for i in 0..n {
            self.residuals[i] = self.y_scaled[i] - self.total_fits[i] + self.tree_fits[base + i];
        }
        let ctx = MoveContext {
            data: &self.data,
            cuts: &self.cuts,
            leaf: LeafContext {
                data: &self.data,
                residuals: &self.residuals,
                weights: self.data.weights(),
                sigma: self.sigma,
                reducer: &self.reducer,
            },
            tree_prior: self.tree_prior.as_ref(),
            end_node: self.end_node.as_ref(),
            model: &self.model,
        };
        moves::propose(&mut self.trees[t], &ctx, &mut self.rng);

        // Gibbs step: every leaf parameter is redrawn whether or not
        // the structural move went through
        let leaf_ids = self.trees[t].leaves();
        let mut drawn = Vec::with_capacity(leaf_ids.len());
        for &id in &leaf_ids {
            let mut scratch = self
                .end_node
                .prepare(&ctx.leaf, self.trees[t].leaf_indices(id));
            self.end_node
                .draw_posterior(&mut self.rng, self.sigma, &mut scratch);
            drawn.push((id, scratch));
        }
        for (id, scratch) in drawn {
            self.trees[t].set_leaf_scratch(id, scratch);
        }
        self.trees[t].enumerate_leaves();

        // Write the tree's new fits and roll the totals forward
        let tree = &self.trees[t];
        let end_node = self.end_node.as_ref();
        for &id in &leaf_ids {
            let scratch = tree.node(id).scratch();
            for &i in tree.leaf_indices(id) {
                let i = i as Size;
                let fit = end_node.fitted_value(scratch, self.data.row(i));
                self.total_fits[i] += fit - self.tree_fits[base + i];
                self.tree_fits[base + i] = fit;
            }
        }
        let m = self.data.num_test_observations();
        if m > 0 {
            let test_base = t * m;
            for i in 0..m {
                let leaf = tree.route_row(self.data.test_row(i), &self.cuts);
                let fit = end_node.fitted_value(tree.node(leaf).scratch(), self.data.test_row(i));
                self.total_test_fits[i] += fit - self.tree_test_fits[test_base + i];
                self.tree_test_fits[test_base + i] = fit;
            }
        }
    }

    /// Weighted SSR of `yScaled − totalFits` and the total effective
    /// observation count.
    fn residual_stats(&mut self) -> (Real, Real) {
        let n = self.data.num_observations();
        for i in 0..n {
            self.residuals[i] = self.y_scaled[i] - self.total_fits[i];
        }
        let ssr = self
            .reducer
            .weighted_sum_of_squares(&self.residuals, self.data.weights());
        (self.data.total_effective_observations(), ssr)
    }

    /// Initial probit latents. The default scheme starts them at ±1
    /// shifted by the offset; the alternate scheme draws them from a
    /// standard normal truncated at the offset itself.
    fn initialize_latents(&mut self) {
        let n = self.data.num_observations();
        for i in 0..n {
            let offset = self.data.offset_at(i);
            let positive = self.data.y()[i] > 0.0;
            self.y_scaled[i] = if self.control.match_bayes_tree {
                if positive {
                    self.rng.next_lower_truncated_normal(0.0, offset)
                } else {
                    self.rng.next_upper_truncated_normal(0.0, offset)
                }
            } else {
                (if positive { 1.0 } else { -1.0 }) - offset
            };
        }
    }

    /// Redraw every probit latent from a unit-variance normal around the
    /// current fit, on the side of the boundary the response dictates.
    /// The default scheme shifts the mean by the offset and truncates at
    /// zero; the alternate scheme keeps the mean at the fit and uses the
    /// offset as the truncation boundary.
    fn resample_latents(&mut self) {
        let n = self.data.num_observations();
        for i in 0..n {
            let offset = self.data.offset_at(i);
            let positive = self.data.y()[i] > 0.0;
            if self.control.match_bayes_tree {
                let mean = self.total_fits[i];
                self.y_scaled[i] = if positive {
                    self.rng.next_lower_truncated_normal(mean, offset)
                } else {
                    self.rng.next_upper_truncated_normal(mean, offset)
                };
            } else {
                let mean = self.total_fits[i] + offset;
                let z = if positive {
                    self.rng.next_lower_truncated_normal(mean, 0.0)
                } else {
                    self.rng.next_upper_truncated_normal(mean, 0.0)
                };
                self.y_scaled[i] = z - offset;
            }
        }
    }

    /// Map `y − offset` into the scaled space.
    fn rescale_response(&mut self) {
        let n = self.data.num_observations();
        for i in 0..n {
            self.y_scaled[i] = self
                .scale
                .scale_value(self.data.y()[i] - self.data.offset_at(i));
        }
    }

    /// De-scale and store one sample; invoke the callback.
    fn store_sample(
        &mut self,
        results: &mut Results,
        s: Size,
        callback: &mut Option<&mut SampleCallback>,
    ) {
        let n = self.data.num_observations();
        let m = self.data.num_test_observations();
        let p = self.data.num_predictors();
        let binary = self.control.response_is_binary;
        let num_samples = results.num_samples;

        let mut training = vec![0.0; n];
        for i in 0..n {
            training[i] = if binary {
                self.total_fits[i] + self.data.offset_at(i)
            } else {
                self.scale.descale_fit(self.total_fits[i]) + self.data.offset_at(i)
            };
        }
        let mut test = vec![0.0; m];
        for i in 0..m {
            test[i] = if binary {
                self.total_test_fits[i] + self.data.test_offset_at(i)
            } else {
                self.scale.descale_fit(self.total_test_fits[i]) + self.data.test_offset_at(i)
            };
        }
        let sigma = if binary {
            self.sigma
        } else {
            self.scale.descale_sigma(self.sigma)
        };

        results.sigma_samples[s] = sigma;
        if self.control.keep_training_fits {
            for i in 0..n {
                results.training_samples[i * num_samples + s] = training[i];
            }
        }
        for i in 0..m {
            results.test_samples[i * num_samples + s] = test[i];
        }
        let mut counts = vec![0u32; p];
        for tree in &self.trees {
            tree.variable_counts(&mut counts);
        }
        for (j, &c) in counts.iter().enumerate() {
            results.variable_count_samples[j * num_samples + s] = c;
        }

        if let Some(cb) = callback {
            cb(&SampleView {
                sample_index: s,
                training_fits: &training,
                test_fits: &test,
                sigma,
            });
        }
    }

    // ─── Input replacement ───────────────────────────────────────────

    /// Replace the response. Continuous fits recompute the response
    /// scale and rescale the residual-variance prior so its unscaled
    /// quantile is preserved; binary fits re-initialize the latents
    /// only when the response actually changed.
    pub fn set_response(&mut self, y: &[Real]) -> Result<()> {
        if self.control.response_is_binary {
            let changed = self.data.y() != y;
            self.data.set_y(y)?;
            if changed {
                self.initialize_latents();
            }
        } else {
            self.data.set_y(y)?;
            let old_range = self.scale.range;
            self.scale = ResponseScale::from_response(self.data.y(), self.data.offset());
            self.resid_prior.rescale(old_range, self.scale.range);
            self.rescale_response();
        }
        Ok(())
    }

    /// Replace or clear the offset.
    pub fn set_offset(&mut self, offset: Option<&[Real]>) -> Result<()> {
        if self.control.response_is_binary {
            if let Some(o) = offset {
                ensure!(
                    o.len() == self.data.num_observations(),
                    "replacement offset must have {} entries",
                    self.data.num_observations()
                );
            }
            if self.control.match_bayes_tree {
                // The offset is the truncation boundary here; redraw the
                // latents against the new one
                self.data.set_offset(offset)?;
                self.initialize_latents();
            } else {
                // Latents store z − offset; preserve z across the change
                let n = self.data.num_observations();
                let old: Vec<Real> = (0..n).map(|i| self.data.offset_at(i)).collect();
                self.data.set_offset(offset)?;
                for i in 0..n {
                    self.y_scaled[i] += old[i] - self.data.offset_at(i);
                }
            }
        } else {
            self.data.set_offset(offset)?;
            let old_range = self.scale.range;
            self.scale = ResponseScale::from_response(self.data.y(), self.data.offset());
            self.resid_prior.rescale(old_range, self.scale.range);
            self.rescale_response();
        }
        Ok(())
    }

    /// Replace one predictor column. Returns `Ok(false)` — with the fit
    /// left exactly in its pre-call state — when the new column would
    /// empty a leaf of some tree; fails when it supports fewer cut
    /// points than existing splits require.
    pub fn set_predictor(&mut self, j: Size, column: &[Real]) -> Result<bool> {
        self.replace_columns(&[(j, column)])
    }

    /// Replace several predictor columns at once; `x` holds the
    /// replacement columns column-major in `columns` order.
    pub fn set_predictors(&mut self, x: &[Real], columns: &[Size]) -> Result<bool> {
        let n = self.data.num_observations();
        ensure!(
            x.len() == n * columns.len(),
            "replacement matrix must have {} x {} entries",
            n,
            columns.len()
        );
        let updates: Vec<(Size, &[Real])> = columns
            .iter()
            .enumerate()
            .map(|(k, &j)| (j, &x[k * n..(k + 1) * n]))
            .collect();
        self.replace_columns(&updates)
    }

    fn replace_columns(&mut self, updates: &[(Size, &[Real])]) -> Result<bool> {
        let saved_data = self.data.clone();
        let saved_cuts = self.cuts.clone();
        let mut failure = None;
        for (j, column) in updates {
            let outcome = self.data.set_column(*j, column).and_then(|_| {
                self.cuts
                    .replace_column(&self.data, *j, self.control.use_quantiles)
            });
            if let Err(e) = outcome {
                failure = Some(e);
                break;
            }
        }
        if let Some(e) = failure {
            self.data = saved_data;
            self.cuts = saved_cuts;
            return Err(e);
        }
        let saved_trees = self.trees.clone();
        let feasible = (0..self.trees.len()).all(|t| {
            let (data, cuts) = (&self.data, &self.cuts);
            self.trees[t].refresh_from_root(data, cuts)
        });
        if !feasible {
            self.trees = saved_trees;
            self.data = saved_data;
            self.cuts = saved_cuts;
            return Ok(false);
        }
        self.rebuild_fits();
        Ok(true)
    }

    /// Replace the test predictor matrix (row-major, `m` rows) and
    /// recompute test fits. The test offset is untouched unless its
    /// length no longer matches.
    pub fn set_test_predictor(&mut self, x_test: &[Real], m: Size) -> Result<()> {
        self.data.set_test_predictors(x_test, m)?;
        self.tree_test_fits = vec![0.0; m * self.control.num_trees];
        self.total_test_fits = vec![0.0; m];
        self.rebuild_test_fits();
        Ok(())
    }

    /// Replace or clear the test offset.
    pub fn set_test_offset(&mut self, test_offset: Option<&[Real]>) -> Result<()> {
        self.data.set_test_offset(test_offset)
    }

    /// Recompute per-tree and total fits from the current leaf
    /// parameters (after a partition-changing predictor update).
    fn rebuild_fits(&mut self) {
        let n = self.data.num_observations();
        self.tree_fits.iter_mut().for_each(|f| *f = 0.0);
        self.total_fits.iter_mut().for_each(|f| *f = 0.0);
        let end_node = self.end_node.as_ref();
        for (t, tree) in self.trees.iter().enumerate() {
            let base = t * n;
            for id in tree.leaves() {
                let scratch = tree.node(id).scratch();
                for &i in tree.leaf_indices(id) {
                    let i = i as Size;
                    let fit = end_node.fitted_value(scratch, self.data.row(i));
                    self.tree_fits[base + i] = fit;
                    self.total_fits[i] += fit;
                }
            }
        }
        self.rebuild_test_fits();
    }

    /// Recompute per-tree and total test fits by routing every test row.
    fn rebuild_test_fits(&mut self) {
        let m = self.data.num_test_observations();
        if m == 0 {
            return;
        }
        self.tree_test_fits.iter_mut().for_each(|f| *f = 0.0);
        self.total_test_fits.iter_mut().for_each(|f| *f = 0.0);
        let end_node = self.end_node.as_ref();
        for (t, tree) in self.trees.iter().enumerate() {
            let base = t * m;
            for i in 0..m {
                let leaf = tree.route_row(self.data.test_row(i), &self.cuts);
                let fit = end_node.fitted_value(tree.node(leaf).scratch(), self.data.test_row(i));
                self.tree_test_fits[base + i] = fit;
                self.total_test_fits[i] += fit;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::VariableType;

    fn linear_data(n: Size, seed: u64, noise: Real) -> Data {
        let mut rng = MersenneTwister::new(seed);
        let x0: Vec<Real> = (0..n).map(|_| rng.next_real() * 10.0).collect();
        let x1: Vec<Real> = (0..n).map(|_| rng.next_real() * 10.0).collect();
        let y: Vec<Real> = (0..n)
            .map(|i| 0.5 * x0[i] + noise * rng.next_normal())
            .collect();
        Data::new(
            y,
            [x0, x1].concat(),
            vec![VariableType::Ordinal, VariableType::Ordinal],
            vec![100, 100],
            1.0,
        )
        .unwrap()
    }

    fn small_control(num_trees: Size, seed: u64) -> Control {
        Control {
            num_trees,
            num_samples: 5,
            num_burn_in: 10,
            rng_seed: seed,
            ..Control::default()
        }
    }

    fn check_invariants(fit: &BartFit) {
        let n = fit.data.num_observations();
        // Leaves of every tree partition the training set
        for tree in &fit.trees {
            let mut seen = vec![false; n];
            for id in tree.leaves() {
                let indices = tree.leaf_indices(id);
                assert!(!indices.is_empty());
                for &i in indices {
                    assert!(!seen[i as usize]);
                    seen[i as usize] = true;
                }
            }
            assert!(seen.iter().all(|&s| s));
        }
        // totalFits is the column sum of treeFits
        for i in 0..n {
            let sum: Real = (0..fit.control.num_trees)
                .map(|t| fit.tree_fits[t * n + i])
                .sum();
            assert!(
                (sum - fit.total_fits[i]).abs() < 1e-9,
                "total fit drift at {i}: {sum} vs {}",
                fit.total_fits[i]
            );
        }
        assert!(fit.sigma > 0.0);
    }

    #[test]
    fn invariants_hold_through_a_run() {
        let data = linear_data(40, 11, 0.2);
        let mut fit = BartFit::new(small_control(3, 42), Model::default(), data).unwrap();
        check_invariants(&fit);
        let results = fit.run_sampler();
        check_invariants(&fit);
        assert_eq!(results.sigma_samples.len(), 5);
        assert!(results.sigma_samples.iter().all(|&s| s.is_finite() && s > 0.0));
        assert!(fit.running_time() >= 0.0);
    }

    #[test]
    fn same_seed_reproduces_bitwise() {
        let run = || {
            let data = linear_data(30, 3, 0.3);
            let mut fit =
                BartFit::new(small_control(2, 777), Model::default(), data).unwrap();
            fit.run_sampler()
        };
        let a = run();
        let b = run();
        assert_eq!(a.sigma_samples, b.sigma_samples);
        assert_eq!(a.training_samples, b.training_samples);
        assert_eq!(a.variable_count_samples, b.variable_count_samples);
    }

    #[test]
    fn single_observation_single_tree() {
        let data = Data::new(
            vec![2.0],
            vec![1.0],
            vec![VariableType::Ordinal],
            vec![10],
            1.0,
        )
        .unwrap();
        let mut fit = BartFit::new(small_control(1, 1), Model::default(), data).unwrap();
        let results = fit.run_sampler();
        assert_eq!(fit.trees[0].num_leaves(), 1, "one observation cannot split");
        assert_eq!(results.training_samples.len(), 5);
    }

    #[test]
    fn constant_column_is_never_split() {
        let n = 25;
        let mut rng = MersenneTwister::new(5);
        let x0: Vec<Real> = (0..n).map(|_| rng.next_real()).collect();
        let x1 = vec![3.0; n];
        let y: Vec<Real> = x0.iter().map(|&v| v + 0.1 * rng.next_normal()).collect();
        let data = Data::new(
            y,
            [x0, x1].concat(),
            vec![VariableType::Ordinal, VariableType::Ordinal],
            vec![100, 100],
            0.5,
        )
        .unwrap();
        let mut fit = BartFit::new(small_control(3, 8), Model::default(), data).unwrap();
        let results = fit.run_sampler();
        for s in 0..results.num_samples {
            assert_eq!(results.variable_count(1, s), 0);
        }
    }

    #[test]
    fn callback_sees_every_stored_sample() {
        let data = linear_data(20, 9, 0.2);
        let mut fit = BartFit::new(small_control(2, 10), Model::default(), data).unwrap();
        let mut seen = Vec::new();
        let mut cb = |view: &SampleView| {
            assert_eq!(view.training_fits.len(), 20);
            assert!(view.sigma > 0.0);
            seen.push(view.sample_index);
        };
        fit.run_sampler_with(2, 4, Some(&mut cb));
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn thinning_advances_the_chain_between_samples() {
        let data = linear_data(20, 13, 0.2);
        let mut control = small_control(2, 14);
        control.tree_thinning_rate = 3;
        control.num_burn_in = 2;
        control.num_samples = 4;
        let mut fit = BartFit::new(control, Model::default(), data).unwrap();
        let results = fit.run_sampler();
        assert_eq!(results.sigma_samples.len(), 4);
        check_invariants(&fit);
    }

    #[test]
    fn binary_latents_have_the_right_sign_structure() {
        let n = 30;
        let mut rng = MersenneTwister::new(19);
        let x: Vec<Real> = (0..n).map(|_| rng.next_real() * 4.0 - 2.0).collect();
        let y: Vec<Real> = x.iter().map(|&v| if v > 0.0 { 1.0 } else { 0.0 }).collect();
        let mut control = small_control(3, 20);
        control.response_is_binary = true;
        let data = Data::new(y.clone(), x, vec![VariableType::Ordinal], vec![100], 1.0).unwrap();
        let mut fit = BartFit::new(control, Model::default(), data).unwrap();
        // Zero offset: initial latents sit at ±1
        for i in 0..n {
            assert_eq!(fit.y_scaled[i], if y[i] > 0.0 { 1.0 } else { -1.0 });
        }
        fit.run_sampler_for(5, 2);
        // After resampling, latents are truncated at zero on y's side
        for i in 0..n {
            if y[i] > 0.0 {
                assert!(fit.y_scaled[i] >= 0.0);
            } else {
                assert!(fit.y_scaled[i] <= 0.0);
            }
        }
        assert_eq!(fit.sigma, 1.0, "binary chains pin sigma at one");
        check_invariants(&fit);
    }

    #[test]
    fn match_bayes_tree_latents_truncate_at_the_offset() {
        let n = 24;
        let mut rng = MersenneTwister::new(91);
        let x: Vec<Real> = (0..n).map(|_| rng.next_real() * 4.0 - 2.0).collect();
        let y: Vec<Real> = x.iter().map(|&v| if v > 0.0 { 1.0 } else { 0.0 }).collect();
        let offset: Vec<Real> = (0..n)
            .map(|i| if i % 2 == 0 { 0.75 } else { -0.25 })
            .collect();
        let data = Data::new(y.clone(), x, vec![VariableType::Ordinal], vec![100], 1.0)
            .unwrap()
            .with_offset(offset.clone())
            .unwrap();
        let mut control = small_control(2, 93);
        control.response_is_binary = true;
        control.match_bayes_tree = true;
        let mut fit = BartFit::new(control, Model::default(), data).unwrap();

        let on_response_side = |fit: &BartFit| {
            for i in 0..n {
                if y[i] > 0.0 {
                    assert!(
                        fit.y_scaled[i] >= offset[i],
                        "latent {i} below its offset boundary"
                    );
                } else {
                    assert!(
                        fit.y_scaled[i] <= offset[i],
                        "latent {i} above its offset boundary"
                    );
                }
            }
        };
        // The offset is the truncation boundary from initialization on,
        // never a shift of the latent itself
        on_response_side(&fit);
        fit.run_sampler_for(5, 2);
        on_response_side(&fit);
        check_invariants(&fit);
    }

    #[test]
    fn set_response_with_same_y_is_idempotent() {
        let data = linear_data(25, 23, 0.2);
        let control = small_control(2, 31);

        let mut plain = BartFit::new(control.clone(), Model::default(), data.clone()).unwrap();
        let mut touched = BartFit::new(control, Model::default(), data.clone()).unwrap();
        touched.set_response(&data.y().to_vec()).unwrap();

        let a = plain.run_sampler();
        let b = touched.run_sampler();
        assert_eq!(a.sigma_samples, b.sigma_samples);
        assert_eq!(a.training_samples, b.training_samples);
    }

    #[test]
    fn rescaled_response_rescales_samples() {
        // Doubling y and offset doubles predictions and sigma exactly
        // (powers of two keep the float arithmetic bitwise)
        let n = 24;
        let mut rng = MersenneTwister::new(29);
        let x: Vec<Real> = (0..n).map(|_| rng.next_real() * 8.0).collect();
        let y: Vec<Real> = x.iter().map(|&v| v + 0.25 * rng.next_normal()).collect();
        let offset: Vec<Real> = (0..n).map(|_| 0.5).collect();

        let data1 = Data::new(
            y.clone(),
            x.clone(),
            vec![VariableType::Ordinal],
            vec![100],
            0.5,
        )
        .unwrap()
        .with_offset(offset.clone())
        .unwrap();
        let data2 = Data::new(
            y.iter().map(|v| 2.0 * v).collect(),
            x,
            vec![VariableType::Ordinal],
            vec![100],
            1.0,
        )
        .unwrap()
        .with_offset(offset.iter().map(|v| 2.0 * v).collect())
        .unwrap();

        let mut fit1 = BartFit::new(small_control(2, 37), Model::default(), data1).unwrap();
        let mut fit2 = BartFit::new(small_control(2, 37), Model::default(), data2).unwrap();
        let r1 = fit1.run_sampler();
        let r2 = fit2.run_sampler();
        for (a, b) in r1.sigma_samples.iter().zip(&r2.sigma_samples) {
            assert!((2.0 * a - b).abs() < 1e-12, "{a} vs {b}");
        }
        for (a, b) in r1.training_samples.iter().zip(&r2.training_samples) {
            assert!((2.0 * a - b).abs() < 1e-9, "{a} vs {b}");
        }
    }

    #[test]
    fn failed_predictor_update_leaves_the_chain_untouched() {
        let data = linear_data(30, 41, 0.2);
        let control = small_control(2, 43);

        let mut touched = BartFit::new(control.clone(), Model::default(), data.clone()).unwrap();
        let mut plain = BartFit::new(control, Model::default(), data).unwrap();
        touched.run_sampler();
        plain.run_sampler();

        // A constant column supports no cut points at all
        let outcome = touched.set_predictor(0, &vec![1.0; 30]);
        assert!(matches!(
            outcome,
            Err(bart_core::errors::Error::Compatibility(_))
        ));

        let a = touched.run_sampler_for(0, 1);
        let b = plain.run_sampler_for(0, 1);
        assert_eq!(a.sigma_samples, b.sigma_samples);
        assert_eq!(a.training_samples, b.training_samples);
    }

    #[test]
    fn successful_predictor_update_rebuilds_fits() {
        let data = linear_data(30, 47, 0.2);
        let mut fit = BartFit::new(small_control(2, 53), Model::default(), data).unwrap();
        fit.run_sampler();
        // Re-supply column 0 with fresh values spanning a similar range
        let mut rng = MersenneTwister::new(59);
        let column: Vec<Real> = (0..30).map(|_| rng.next_real() * 10.0).collect();
        if fit.set_predictor(0, &column).unwrap() {
            check_invariants(&fit);
        }
    }

    #[test]
    fn test_fits_track_the_ensemble() {
        let n = 30;
        let data = linear_data(n, 61, 0.2);
        let x_test: Vec<Real> = vec![2.0, 3.0, 7.0, 1.0]; // two rows, p = 2
        let data = data.with_test_predictors(x_test, 2).unwrap();
        let mut fit = BartFit::new(small_control(3, 67), Model::default(), data).unwrap();
        let results = fit.run_sampler();
        assert_eq!(results.test_samples.len(), 2 * 5);
        assert!(results.test_samples.iter().all(|v| v.is_finite()));
        // Aggregated test fits equal the per-tree column sums
        for i in 0..2 {
            let sum: Real = (0..3).map(|t| fit.tree_test_fits[t * 2 + i]).sum();
            assert!((sum - fit.total_test_fits[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn weighted_fit_matches_duplicated_observations_in_neff() {
        // Doubling every weight doubles the effective count the sigma
        // posterior sees
        let data = linear_data(20, 71, 0.2);
        let weighted = data.clone().with_weights(vec![2.0; 20]).unwrap();
        assert_eq!(weighted.total_effective_observations(), 40.0);
        let mut fit = BartFit::new(small_control(2, 73), Model::default(), weighted).unwrap();
        let (n_eff, _) = fit.residual_stats();
        assert_eq!(n_eff, 40.0);
        let results = fit.run_sampler();
        assert!(results.sigma_samples.iter().all(|&s| s > 0.0));
    }
}
