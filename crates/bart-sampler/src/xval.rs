//! K-fold cross-validation over a hyperparameter grid.
//!
//! Re-runs the sampler for every cell of a (numTrees, k, (base, power))
//! grid across shuffled folds, scoring held-out observations with RMSE
//! for continuous responses and misclassification rate for binary ones.

use crate::control::Control;
use crate::data::Data;
use crate::fit::BartFit;
use crate::model::{EndNodeSpec, Model};
use bart_core::{ensure, errors::Result, Real, Size};
use bart_math::distributions::normal_cdf;
use bart_math::rng::MersenneTwister;
use rand::RngCore;

/// Inputs of one cross-validation run.
pub struct XvalSpec<'a> {
    /// Template control block; tree counts and seeds are overridden per
    /// cell, verbosity and training-fit retention are switched off.
    pub control: &'a Control,
    /// Template model block; `k`, `base`, and `power` are overridden
    /// per cell.
    pub model: &'a Model,
    /// The full data set to fold.
    pub data: &'a Data,
    /// Number of folds, in `[2, n − 1]`.
    pub num_folds: Size,
    /// Number of independent shuffles of the fold assignment.
    pub num_reps: Size,
    /// Ensemble sizes to try.
    pub tree_counts: &'a [Size],
    /// End-node shrinkage values to try (constant-mean prior only).
    pub ks: &'a [Real],
    /// `(base, power)` pairs to try.
    pub tree_priors: &'a [(Real, Real)],
    /// Seed of the fold shuffler and per-fit seed stream.
    pub seed: u64,
}

/// Averaged held-out loss of one hyperparameter cell.
#[derive(Debug, Clone, PartialEq)]
pub struct XvalCell {
    /// Ensemble size of this cell.
    pub num_trees: Size,
    /// End-node shrinkage of this cell.
    pub k: Real,
    /// Tree prior base of this cell.
    pub base: Real,
    /// Tree prior power of this cell.
    pub power: Real,
    /// Mean held-out loss over reps × folds.
    pub loss: Real,
}

/// Run the grid. Cells come back in (numTrees, k, (base, power)) order.
pub fn cross_validate(spec: &XvalSpec) -> Result<Vec<XvalCell>> {
    let n = spec.data.num_observations();
    ensure!(
        spec.num_folds >= 2,
        "numFolds must be at least 2, got {}",
        spec.num_folds
    );
    ensure!(
        spec.num_folds <= n - 1,
        "numFolds must be at most numObservations - 1 = {}, got {}",
        n - 1,
        spec.num_folds
    );
    ensure!(spec.num_reps >= 1, "numReps must be at least 1");
    ensure!(!spec.tree_counts.is_empty(), "tree count grid is empty");
    ensure!(!spec.ks.is_empty(), "k grid is empty");
    ensure!(!spec.tree_priors.is_empty(), "tree prior grid is empty");

    let mut cells = Vec::new();
    for &num_trees in spec.tree_counts {
        for &k in spec.ks {
            for &(base, power) in spec.tree_priors {
                cells.push(XvalCell {
                    num_trees,
                    k,
                    base,
                    power,
                    loss: 0.0,
                });
            }
        }
    }

    let mut rng = MersenneTwister::new(spec.seed);
    let mut evaluations = 0;
    for _ in 0..spec.num_reps {
        let mut perm: Vec<Size> = (0..n).collect();
        for i in (1..n).rev() {
            perm.swap(i, rng.next_below(i + 1));
        }
        for fold in 0..spec.num_folds {
            let lo = fold * n / spec.num_folds;
            let hi = (fold + 1) * n / spec.num_folds;
            let test_indices = &perm[lo..hi];
            let train_indices: Vec<Size> = perm[..lo]
                .iter()
                .chain(&perm[hi..])
                .copied()
                .collect();
            let (fold_data, y_test) = build_fold(spec.data, &train_indices, test_indices)?;
            for cell in cells.iter_mut() {
                cell.loss +=
                    evaluate_cell(spec, cell, &fold_data, &y_test, rng.next_u64())?;
            }
            evaluations += 1;
        }
    }
    for cell in cells.iter_mut() {
        cell.loss /= evaluations as Real;
    }
    Ok(cells)
}

/// Fit one cell on one fold and score the held-out rows.
fn evaluate_cell(
    spec: &XvalSpec,
    cell: &XvalCell,
    fold_data: &Data,
    y_test: &[Real],
    fit_seed: u64,
) -> Result<Real> {
    let mut control = spec.control.clone();
    control.num_trees = cell.num_trees;
    control.rng_seed = fit_seed;
    control.keep_training_fits = false;
    control.verbose = false;
    let mut model = spec.model.clone();
    if matches!(model.end_node, EndNodeSpec::MeanNormal { .. }) {
        model.end_node = EndNodeSpec::MeanNormal { k: cell.k };
    }
    model.base = cell.base;
    model.power = cell.power;

    let mut fit = BartFit::new(control, model, fold_data.clone())?;
    let results = fit.run_sampler();

    let num_samples = results.num_samples;
    let binary = spec.control.response_is_binary;
    let mut loss = 0.0;
    for (i, &truth) in y_test.iter().enumerate() {
        let mean: Real =
            results.test_row(i).iter().sum::<Real>() / num_samples as Real;
        if binary {
            let predicted_positive = normal_cdf(mean) > 0.5;
            if predicted_positive != (truth > 0.0) {
                loss += 1.0;
            }
        } else {
            let d = mean - truth;
            loss += d * d;
        }
    }
    loss /= y_test.len() as Real;
    Ok(if binary { loss } else { loss.sqrt() })
}

/// Assemble the training data of one fold, with the held-out rows as
/// its test set. Returns the held-out responses alongside.
fn build_fold(
    data: &Data,
    train_indices: &[Size],
    test_indices: &[Size],
) -> Result<(Data, Vec<Real>)> {
    let p = data.num_predictors();
    let n_train = train_indices.len();

    let mut x = Vec::with_capacity(n_train * p);
    for j in 0..p {
        let column = data.column(j);
        x.extend(train_indices.iter().map(|&i| column[i]));
    }
    let y: Vec<Real> = train_indices.iter().map(|&i| data.y()[i]).collect();
    let variable_types = (0..p).map(|j| data.variable_type(j)).collect();
    let max_num_cuts = (0..p).map(|j| data.max_num_cuts(j)).collect();

    let mut fold = Data::new(y, x, variable_types, max_num_cuts, data.sigma_estimate())?;
    if let Some(weights) = data.weights() {
        fold = fold.with_weights(train_indices.iter().map(|&i| weights[i]).collect())?;
    }
    if let Some(offset) = data.offset() {
        fold = fold.with_offset(train_indices.iter().map(|&i| offset[i]).collect())?;
    }

    let mut x_test = Vec::with_capacity(test_indices.len() * p);
    for &i in test_indices {
        x_test.extend_from_slice(data.row(i));
    }
    fold = fold.with_test_predictors(x_test, test_indices.len())?;
    if let Some(offset) = data.offset() {
        fold = fold.with_test_offset(test_indices.iter().map(|&i| offset[i]).collect())?;
    }

    let y_test = test_indices.iter().map(|&i| data.y()[i]).collect();
    Ok((fold, y_test))
}
