//! Training and test data.
//!
//! `X` is held twice: column-major for cut-point computation and rule
//! evaluation over observation-index sets, and row-major for routing
//! whole rows (test prediction, linear-regression leaf design rows).
//! Both copies are kept in sync through the replacement operations.

use bart_core::{ensure, errors::Result, Real, Size};

/// Maximum number of category codes a categorical predictor may take
/// (codes are routed through a 64-bit mask).
pub const MAX_CATEGORIES: Size = 64;

/// How a predictor column is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableType {
    /// Real-valued; split by a cut point (`left iff x ≤ cut`).
    Ordinal,
    /// Integer category codes; split by a code subset mask.
    Categorical,
}

/// Immutable-by-default training inputs plus optional test inputs.
#[derive(Debug, Clone)]
pub struct Data {
    num_observations: Size,
    num_predictors: Size,
    /// Column-major, `num_observations × num_predictors`.
    x: Vec<Real>,
    /// Row-major transpose of `x`.
    x_rows: Vec<Real>,
    y: Vec<Real>,
    weights: Option<Vec<Real>>,
    offset: Option<Vec<Real>>,
    variable_types: Vec<VariableType>,
    max_num_cuts: Vec<Size>,
    /// Row-major, `num_test_observations × num_predictors`.
    x_test: Vec<Real>,
    num_test_observations: Size,
    test_offset: Option<Vec<Real>>,
    sigma_estimate: Real,
}

impl Data {
    /// Create training data from a response and a column-major predictor
    /// matrix.
    ///
    /// `x` must have length `y.len() * variable_types.len()`;
    /// `max_num_cuts` gives the per-column cut-count hint.
    pub fn new(
        y: Vec<Real>,
        x: Vec<Real>,
        variable_types: Vec<VariableType>,
        max_num_cuts: Vec<Size>,
        sigma_estimate: Real,
    ) -> Result<Self> {
        let n = y.len();
        let p = variable_types.len();
        ensure!(n > 0, "response must be non-empty");
        ensure!(p > 0, "at least one predictor is required");
        ensure!(
            x.len() == n * p,
            "predictor matrix must have {n} x {p} = {} entries, got {}",
            n * p,
            x.len()
        );
        ensure!(
            max_num_cuts.len() == p,
            "maxNumCuts must have one entry per predictor"
        );
        ensure!(
            max_num_cuts.iter().all(|&c| c > 0),
            "maxNumCuts entries must be positive"
        );
        ensure!(
            sigma_estimate > 0.0,
            "sigmaEstimate must be positive, got {sigma_estimate}"
        );
        for (j, t) in variable_types.iter().enumerate() {
            if *t == VariableType::Categorical {
                validate_categorical(&x[j * n..(j + 1) * n], j)?;
            }
        }
        let x_rows = transpose(&x, n, p);
        Ok(Self {
            num_observations: n,
            num_predictors: p,
            x,
            x_rows,
            y,
            weights: None,
            offset: None,
            variable_types,
            max_num_cuts,
            x_test: Vec::new(),
            num_test_observations: 0,
            test_offset: None,
            sigma_estimate,
        })
    }

    /// Attach strictly positive observation weights.
    pub fn with_weights(mut self, weights: Vec<Real>) -> Result<Self> {
        ensure!(
            weights.len() == self.num_observations,
            "weights must have one entry per observation"
        );
        ensure!(
            weights.iter().all(|&w| w > 0.0),
            "weights must be strictly positive"
        );
        self.weights = Some(weights);
        Ok(self)
    }

    /// Attach a per-observation offset subtracted from the response.
    pub fn with_offset(mut self, offset: Vec<Real>) -> Result<Self> {
        ensure!(
            offset.len() == self.num_observations,
            "offset must have one entry per observation"
        );
        self.offset = Some(offset);
        Ok(self)
    }

    /// Attach a row-major test predictor matrix of `m` rows.
    pub fn with_test_predictors(mut self, x_test: Vec<Real>, m: Size) -> Result<Self> {
        ensure!(
            x_test.len() == m * self.num_predictors,
            "test predictor matrix must have {m} x {} entries",
            self.num_predictors
        );
        self.x_test = x_test;
        self.num_test_observations = m;
        Ok(self)
    }

    /// Attach a test offset (requires test predictors of matching length).
    pub fn with_test_offset(mut self, test_offset: Vec<Real>) -> Result<Self> {
        ensure!(
            test_offset.len() == self.num_test_observations,
            "test offset must have one entry per test observation"
        );
        self.test_offset = Some(test_offset);
        Ok(self)
    }

    /// Number of training observations.
    pub fn num_observations(&self) -> Size {
        self.num_observations
    }

    /// Number of predictor columns.
    pub fn num_predictors(&self) -> Size {
        self.num_predictors
    }

    /// Number of test observations (0 when no test set is attached).
    pub fn num_test_observations(&self) -> Size {
        self.num_test_observations
    }

    /// Predictor column `j` as a contiguous slice.
    pub fn column(&self, j: Size) -> &[Real] {
        &self.x[j * self.num_observations..(j + 1) * self.num_observations]
    }

    /// Value of predictor `j` for training observation `i`.
    #[inline]
    pub fn value(&self, i: Size, j: Size) -> Real {
        self.x[j * self.num_observations + i]
    }

    /// Training row `i` as a contiguous slice.
    pub fn row(&self, i: Size) -> &[Real] {
        &self.x_rows[i * self.num_predictors..(i + 1) * self.num_predictors]
    }

    /// Test row `i` as a contiguous slice.
    pub fn test_row(&self, i: Size) -> &[Real] {
        &self.x_test[i * self.num_predictors..(i + 1) * self.num_predictors]
    }

    /// The response vector.
    pub fn y(&self) -> &[Real] {
        &self.y
    }

    /// Observation weights, when supplied.
    pub fn weights(&self) -> Option<&[Real]> {
        self.weights.as_deref()
    }

    /// Response offset, when supplied.
    pub fn offset(&self) -> Option<&[Real]> {
        self.offset.as_deref()
    }

    /// Test offset, when supplied.
    pub fn test_offset(&self) -> Option<&[Real]> {
        self.test_offset.as_deref()
    }

    /// Offset of training observation `i`, 0 when unset.
    #[inline]
    pub fn offset_at(&self, i: Size) -> Real {
        self.offset.as_ref().map_or(0.0, |o| o[i])
    }

    /// Test offset of test observation `i`, 0 when unset.
    #[inline]
    pub fn test_offset_at(&self, i: Size) -> Real {
        self.test_offset.as_ref().map_or(0.0, |o| o[i])
    }

    /// Sum of weights, or the observation count without weights.
    pub fn total_effective_observations(&self) -> Real {
        self.weights
            .as_ref()
            .map_or(self.num_observations as Real, |w| w.iter().sum())
    }

    /// Split type of predictor `j`.
    pub fn variable_type(&self, j: Size) -> VariableType {
        self.variable_types[j]
    }

    /// Cut-count hint of predictor `j`.
    pub fn max_num_cuts(&self, j: Size) -> Size {
        self.max_num_cuts[j]
    }

    /// The user-supplied residual standard deviation estimate.
    pub fn sigma_estimate(&self) -> Real {
        self.sigma_estimate
    }

    /// Replace the response in place (length must match).
    pub(crate) fn set_y(&mut self, y: &[Real]) -> Result<()> {
        ensure!(
            y.len() == self.num_observations,
            "replacement response must have {} entries",
            self.num_observations
        );
        self.y.copy_from_slice(y);
        Ok(())
    }

    /// Replace or clear the offset in place.
    pub(crate) fn set_offset(&mut self, offset: Option<&[Real]>) -> Result<()> {
        match offset {
            Some(o) => {
                ensure!(
                    o.len() == self.num_observations,
                    "replacement offset must have {} entries",
                    self.num_observations
                );
                self.offset = Some(o.to_vec());
            }
            None => self.offset = None,
        }
        Ok(())
    }

    /// Replace predictor column `j`, keeping both layouts in sync.
    pub(crate) fn set_column(&mut self, j: Size, column: &[Real]) -> Result<()> {
        let n = self.num_observations;
        ensure!(
            column.len() == n,
            "replacement column must have {n} entries"
        );
        if self.variable_types[j] == VariableType::Categorical {
            validate_categorical(column, j)?;
        }
        self.x[j * n..(j + 1) * n].copy_from_slice(column);
        for i in 0..n {
            self.x_rows[i * self.num_predictors + j] = column[i];
        }
        Ok(())
    }

    /// Replace the test predictor matrix.
    pub(crate) fn set_test_predictors(&mut self, x_test: &[Real], m: Size) -> Result<()> {
        ensure!(
            x_test.len() == m * self.num_predictors,
            "test predictor matrix must have {m} x {} entries",
            self.num_predictors
        );
        self.x_test = x_test.to_vec();
        self.num_test_observations = m;
        if let Some(t) = &self.test_offset {
            if t.len() != m {
                self.test_offset = None;
            }
        }
        Ok(())
    }

    /// Replace or clear the test offset.
    pub(crate) fn set_test_offset(&mut self, test_offset: Option<&[Real]>) -> Result<()> {
        match test_offset {
            Some(t) => {
                ensure!(
                    t.len() == self.num_test_observations,
                    "test offset must have {} entries",
                    self.num_test_observations
                );
                self.test_offset = Some(t.to_vec());
            }
            None => self.test_offset = None,
        }
        Ok(())
    }
}

/// Category codes must be small non-negative integers so they fit the
/// routing mask.
fn validate_categorical(column: &[Real], j: Size) -> Result<()> {
    for &v in column {
        ensure!(
            v >= 0.0 && v.fract() == 0.0 && (v as Size) < MAX_CATEGORIES,
            "categorical predictor {j} must hold integer codes in [0, {MAX_CATEGORIES}), got {v}"
        );
    }
    Ok(())
}

fn transpose(x: &[Real], n: Size, p: Size) -> Vec<Real> {
    let mut out = vec![0.0; n * p];
    for j in 0..p {
        for i in 0..n {
            out[i * p + j] = x[j * n + i];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Data {
        // n = 3, p = 2, columns [1,2,3] and [0,1,0]
        Data::new(
            vec![10.0, 20.0, 30.0],
            vec![1.0, 2.0, 3.0, 0.0, 1.0, 0.0],
            vec![VariableType::Ordinal, VariableType::Categorical],
            vec![100, 100],
            1.0,
        )
        .unwrap()
    }

    #[test]
    fn layouts_agree() {
        let d = small();
        assert_eq!(d.column(0), &[1.0, 2.0, 3.0]);
        assert_eq!(d.column(1), &[0.0, 1.0, 0.0]);
        assert_eq!(d.row(1), &[2.0, 1.0]);
        assert_eq!(d.value(2, 0), 3.0);
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(Data::new(
            vec![1.0, 2.0],
            vec![1.0, 2.0, 3.0],
            vec![VariableType::Ordinal],
            vec![100],
            1.0
        )
        .is_err());
        assert!(small().with_weights(vec![1.0, 0.0, 1.0]).is_err());
        assert!(small().with_offset(vec![1.0]).is_err());
    }

    #[test]
    fn rejects_fractional_categories() {
        assert!(Data::new(
            vec![1.0, 2.0],
            vec![0.5, 1.0],
            vec![VariableType::Categorical],
            vec![100],
            1.0
        )
        .is_err());
    }

    #[test]
    fn column_replacement_updates_both_layouts() {
        let mut d = small();
        d.set_column(0, &[9.0, 8.0, 7.0]).unwrap();
        assert_eq!(d.column(0), &[9.0, 8.0, 7.0]);
        assert_eq!(d.row(0), &[9.0, 0.0]);
    }

    #[test]
    fn effective_observations() {
        let d = small();
        assert_eq!(d.total_effective_observations(), 3.0);
        let d = small().with_weights(vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(d.total_effective_observations(), 6.0);
    }
}
