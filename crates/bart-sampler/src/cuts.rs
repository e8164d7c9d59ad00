//! Per-predictor cut points.
//!
//! Ordinal columns get a sorted cut-point list (quantile midpoints or a
//! uniform grid); categorical columns get the mask of observed category
//! codes. Cut counts are frozen at construction: a predictor replacement
//! may never shrink a column's cut set, and surplus new cut points are
//! ignored, so existing split rules keep a valid index range.

use crate::data::{Data, VariableType};
use bart_core::{
    errors::{Error, Result},
    Real, Size,
};

/// Cut points / category masks for every predictor column.
#[derive(Debug, Clone, PartialEq)]
pub struct CutPoints {
    /// Sorted cut values per ordinal column; empty for categorical.
    points: Vec<Vec<Real>>,
    /// Observed-code mask per categorical column; 0 for ordinal.
    category_masks: Vec<u64>,
}

impl CutPoints {
    /// Compute cut points for every column of `data`.
    pub fn from_data(data: &Data, use_quantiles: bool) -> Self {
        let p = data.num_predictors();
        let mut points = Vec::with_capacity(p);
        let mut category_masks = Vec::with_capacity(p);
        for j in 0..p {
            match data.variable_type(j) {
                VariableType::Ordinal => {
                    points.push(ordinal_cuts(
                        data.column(j),
                        data.max_num_cuts(j),
                        use_quantiles,
                    ));
                    category_masks.push(0);
                }
                VariableType::Categorical => {
                    points.push(Vec::new());
                    category_masks.push(observed_mask(data.column(j)));
                }
            }
        }
        Self {
            points,
            category_masks,
        }
    }

    /// Number of cut points of ordinal column `j`.
    pub fn num_cuts(&self, j: Size) -> Size {
        self.points[j].len()
    }

    /// Cut value `c` of ordinal column `j`.
    #[inline]
    pub fn cut(&self, j: Size, c: Size) -> Real {
        self.points[j][c]
    }

    /// All cut values of ordinal column `j`.
    pub fn cuts(&self, j: Size) -> &[Real] {
        &self.points[j]
    }

    /// Mask of category codes observed in categorical column `j`.
    pub fn category_mask(&self, j: Size) -> u64 {
        self.category_masks[j]
    }

    /// Recompute column `j` from replacement data.
    ///
    /// Fails with a compatibility error when the new column supports
    /// fewer cut points (or categories) than the current set — existing
    /// splits would dangle. Surplus cut points are dropped so the count
    /// is unchanged on success.
    pub(crate) fn replace_column(
        &mut self,
        data: &Data,
        j: Size,
        use_quantiles: bool,
    ) -> Result<()> {
        match data.variable_type(j) {
            VariableType::Ordinal => {
                let mut new =
                    ordinal_cuts(data.column(j), data.max_num_cuts(j), use_quantiles);
                let old_len = self.points[j].len();
                if new.len() < old_len {
                    return Err(Error::Compatibility(format!(
                        "column {j} supports {} cut points, existing splits require {old_len}",
                        new.len()
                    )));
                }
                new.truncate(old_len);
                self.points[j] = new;
            }
            VariableType::Categorical => {
                let new = observed_mask(data.column(j));
                let old = self.category_masks[j];
                if new.count_ones() < old.count_ones() {
                    return Err(Error::Compatibility(format!(
                        "column {j} lost category codes ({} < {})",
                        new.count_ones(),
                        old.count_ones()
                    )));
                }
                self.category_masks[j] = new;
            }
        }
        Ok(())
    }
}

/// Cut points of one ordinal column.
fn ordinal_cuts(values: &[Real], max_num_cuts: Size, use_quantiles: bool) -> Vec<Real> {
    if use_quantiles {
        quantile_cuts(values, max_num_cuts)
    } else {
        uniform_cuts(values, max_num_cuts)
    }
}

/// Midpoints between consecutive distinct values; strided when the
/// column supports more than `max_num_cuts` of them.
fn quantile_cuts(values: &[Real], max_num_cuts: Size) -> Vec<Real> {
    let mut distinct: Vec<Real> = values.to_vec();
    distinct.sort_by(|a, b| a.partial_cmp(b).expect("predictor contains NaN"));
    distinct.dedup();
    let num_unique = distinct.len();
    if num_unique < 2 {
        return Vec::new();
    }
    if num_unique <= max_num_cuts + 1 {
        return distinct
            .windows(2)
            .map(|w| 0.5 * (w[0] + w[1]))
            .collect();
    }
    let num_cuts = max_num_cuts;
    let stride = num_unique / num_cuts;
    (0..num_cuts)
        .map(|i| {
            let idx = (i * stride + stride / 2).min(num_unique - 2);
            0.5 * (distinct[idx] + distinct[idx + 1])
        })
        .collect()
}

/// `max_num_cuts` points evenly spaced strictly inside the column range.
fn uniform_cuts(values: &[Real], max_num_cuts: Size) -> Vec<Real> {
    let mut min = Real::INFINITY;
    let mut max = Real::NEG_INFINITY;
    for &v in values {
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }
    if !(max > min) {
        return Vec::new();
    }
    let num_cuts = max_num_cuts;
    (0..num_cuts)
        .map(|i| min + (i + 1) as Real * (max - min) / (num_cuts + 1) as Real)
        .collect()
}

/// OR of the code bits present in a categorical column.
fn observed_mask(values: &[Real]) -> u64 {
    values.iter().fold(0u64, |m, &v| m | (1u64 << (v as u32)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_cuts_are_gap_midpoints() {
        let cuts = quantile_cuts(&[3.0, 1.0, 2.0, 1.0], 100);
        assert_eq!(cuts, vec![1.5, 2.5]);
    }

    #[test]
    fn quantile_cuts_stride_when_capped() {
        let values: Vec<Real> = (0..10).map(|i| i as Real).collect();
        let cuts = quantile_cuts(&values, 3);
        assert_eq!(cuts.len(), 3);
        // stride = 10/3 = 3, offset 1: indices 1, 4, 7
        assert_eq!(cuts, vec![1.5, 4.5, 7.5]);
    }

    #[test]
    fn uniform_cuts_are_evenly_spaced() {
        let cuts = uniform_cuts(&[0.0, 10.0], 4);
        assert_eq!(cuts, vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn constant_column_has_no_cuts() {
        assert!(quantile_cuts(&[5.0, 5.0, 5.0], 10).is_empty());
        assert!(uniform_cuts(&[5.0, 5.0, 5.0], 10).is_empty());
    }

    #[test]
    fn observed_mask_collects_codes() {
        assert_eq!(observed_mask(&[0.0, 2.0, 0.0]), 0b101);
    }

    #[test]
    fn replacement_cannot_shrink() {
        let data = Data::new(
            vec![0.0; 4],
            vec![1.0, 2.0, 3.0, 4.0],
            vec![VariableType::Ordinal],
            vec![100],
            1.0,
        )
        .unwrap();
        let mut cuts = CutPoints::from_data(&data, true);
        assert_eq!(cuts.num_cuts(0), 3);

        let mut shrunk = data.clone();
        shrunk.set_column(0, &[1.0, 1.0, 2.0, 2.0]).unwrap();
        assert!(cuts.replace_column(&shrunk, 0, true).is_err());

        // A compatible column is adopted; the count stays frozen
        let mut replaced = data.clone();
        replaced.set_column(0, &[1.0, 2.0, 3.0, 4.5]).unwrap();
        cuts.replace_column(&replaced, 0, true).unwrap();
        assert_eq!(cuts.num_cuts(0), 3);
        assert_eq!(cuts.cuts(0), &[1.5, 2.5, 3.75]);
    }
}
