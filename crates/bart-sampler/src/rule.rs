//! Split rules and per-node feasible split sets.

use crate::cuts::CutPoints;
use crate::data::{Data, VariableType};
use bart_core::{Real, Size};

/// The split rule of an internal node.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// `left iff X[·, variable] ≤ cutPoints[variable][cut_index]`.
    Ordinal {
        /// Predictor column.
        variable: Size,
        /// Index into the column's cut-point list.
        cut_index: Size,
    },
    /// `left iff` the observation's category-code bit is set in `mask`.
    Categorical {
        /// Predictor column.
        variable: Size,
        /// Set bit = category code routed left.
        mask: u64,
    },
}

impl Rule {
    /// The predictor column this rule splits on.
    pub fn variable(&self) -> Size {
        match self {
            Rule::Ordinal { variable, .. } | Rule::Categorical { variable, .. } => *variable,
        }
    }

    /// Route a single predictor value.
    #[inline]
    pub fn goes_left(&self, value: Real, cuts: &CutPoints) -> bool {
        match self {
            Rule::Ordinal {
                variable,
                cut_index,
            } => value <= cuts.cut(*variable, *cut_index),
            Rule::Categorical { mask, .. } => (mask >> (value as u32)) & 1 == 1,
        }
    }
}

/// The feasible split set of one variable at one node, induced by the
/// node's ancestor rules.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableBound {
    /// Admissible cut-index range `[lo, hi)`.
    Ordinal {
        /// First admissible cut index.
        lo: Size,
        /// One past the last admissible cut index.
        hi: Size,
    },
    /// Category codes that can still reach this node.
    Categorical {
        /// Mask of reachable codes.
        available: u64,
    },
}

/// Feasible split sets of every variable at one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeBounds {
    bounds: Vec<VariableBound>,
}

impl NodeBounds {
    /// Bounds at the root: every cut index and every observed category.
    pub fn root(data: &Data, cuts: &CutPoints) -> Self {
        let bounds = (0..data.num_predictors())
            .map(|j| match data.variable_type(j) {
                VariableType::Ordinal => VariableBound::Ordinal {
                    lo: 0,
                    hi: cuts.num_cuts(j),
                },
                VariableType::Categorical => VariableBound::Categorical {
                    available: cuts.category_mask(j),
                },
            })
            .collect();
        Self { bounds }
    }

    /// Narrow the bounds by descending through `rule` to the given side.
    pub fn apply(&mut self, rule: &Rule, left: bool) {
        match rule {
            Rule::Ordinal {
                variable,
                cut_index,
            } => {
                if let VariableBound::Ordinal { lo, hi } = &mut self.bounds[*variable] {
                    if left {
                        *hi = (*cut_index).min(*hi);
                    } else {
                        *lo = (*cut_index + 1).max(*lo);
                    }
                }
            }
            Rule::Categorical { variable, mask } => {
                if let VariableBound::Categorical { available } = &mut self.bounds[*variable] {
                    if left {
                        *available &= mask;
                    } else {
                        *available &= !mask;
                    }
                }
            }
        }
    }

    /// The bounds one level down.
    pub fn child(&self, rule: &Rule, left: bool) -> Self {
        let mut child = self.clone();
        child.apply(rule, left);
        child
    }

    /// The bound of variable `j`.
    pub fn bound(&self, j: Size) -> &VariableBound {
        &self.bounds[j]
    }

    /// Whether variable `j` still admits a split here.
    pub fn is_feasible(&self, j: Size) -> bool {
        match &self.bounds[j] {
            VariableBound::Ordinal { lo, hi } => hi > lo,
            // A categorical split needs at least two reachable codes to
            // route some left and some right
            VariableBound::Categorical { available } => available.count_ones() >= 2,
        }
    }

    /// Whether any variable admits a split here.
    pub fn any_feasible(&self) -> bool {
        (0..self.bounds.len()).any(|j| self.is_feasible(j))
    }

    /// Variables that still admit a split.
    pub fn feasible_variables(&self) -> Vec<Size> {
        (0..self.bounds.len())
            .filter(|&j| self.is_feasible(j))
            .collect()
    }

    /// Natural log of the number of distinct rules variable `j` admits
    /// (`hi − lo` cuts, or `2^K − 2` proper non-empty code subsets).
    pub fn log_num_rules(&self, j: Size) -> Real {
        match &self.bounds[j] {
            VariableBound::Ordinal { lo, hi } => ((hi - lo) as Real).ln(),
            VariableBound::Categorical { available } => {
                ((2.0 as Real).powi(available.count_ones() as i32) - 2.0).ln()
            }
        }
    }
}
