//! The Chipman-George-McCulloch tree prior.
//!
//! A node at depth `d` grows with probability `base / (1 + d)^power`;
//! conditional on growing, its rule is drawn uniformly over the
//! variables that still admit a split and uniformly over the chosen
//! variable's remaining feasible rules.

use crate::rule::{NodeBounds, Rule, VariableBound};
use bart_core::{Real, Size};
use bart_math::rng::MersenneTwister;

/// A rule drawn from the prior, with its log-probability and a report
/// of whether it exhausts either child's split options.
#[derive(Debug, Clone)]
pub struct DrawnRule {
    /// The drawn rule.
    pub rule: Rule,
    /// Log-probability of this draw given the node's feasible sets.
    pub log_probability: Real,
    /// No variable admits a split in the left child.
    pub exhausted_left_splits: bool,
    /// No variable admits a split in the right child.
    pub exhausted_right_splits: bool,
}

/// The prior over tree topologies and split rules.
pub trait TreePrior: std::fmt::Debug {
    /// Probability that a node at `depth` grows.
    fn growth_probability(&self, depth: Size) -> Real;

    /// `ln P_grow(depth)`.
    fn log_growth(&self, depth: Size) -> Real {
        self.growth_probability(depth).ln()
    }

    /// `ln (1 − P_grow(depth))`.
    fn log_no_growth(&self, depth: Size) -> Real {
        (1.0 - self.growth_probability(depth)).ln()
    }

    /// Draw a rule uniformly over the feasible set, or `None` when no
    /// variable admits a split.
    fn draw_rule(&self, rng: &mut MersenneTwister, bounds: &NodeBounds) -> Option<DrawnRule>;

    /// Log-probability of drawing `rule` at a node with these feasible
    /// sets; `-inf` when the rule is not drawable there.
    fn rule_log_probability(&self, rule: &Rule, bounds: &NodeBounds) -> Real;
}

/// The depth-decay prior of Chipman, George & McCulloch.
#[derive(Debug, Clone, PartialEq)]
pub struct CgmTreePrior {
    /// Growth probability at depth 0, in (0, 1).
    pub base: Real,
    /// Depth-decay exponent, positive.
    pub power: Real,
}

impl TreePrior for CgmTreePrior {
    fn growth_probability(&self, depth: Size) -> Real {
        self.base / (1.0 + depth as Real).powf(self.power)
    }

    fn draw_rule(&self, rng: &mut MersenneTwister, bounds: &NodeBounds) -> Option<DrawnRule> {
        let feasible = bounds.feasible_variables();
        if feasible.is_empty() {
            return None;
        }
        let variable = feasible[rng.next_below(feasible.len())];
        let rule = match bounds.bound(variable) {
            VariableBound::Ordinal { lo, hi } => Rule::Ordinal {
                variable,
                cut_index: lo + rng.next_below(hi - lo),
            },
            VariableBound::Categorical { available } => {
                // Uniform over proper non-empty subsets of the reachable
                // codes
                let mask = loop {
                    let m = rng.next_subset(*available);
                    if m != 0 && m != *available {
                        break m;
                    }
                };
                Rule::Categorical { variable, mask }
            }
        };
        let log_probability =
            -((feasible.len() as Real).ln()) - bounds.log_num_rules(variable);
        let exhausted_left_splits = !bounds.child(&rule, true).any_feasible();
        let exhausted_right_splits = !bounds.child(&rule, false).any_feasible();
        Some(DrawnRule {
            rule,
            log_probability,
            exhausted_left_splits,
            exhausted_right_splits,
        })
    }

    fn rule_log_probability(&self, rule: &Rule, bounds: &NodeBounds) -> Real {
        let num_feasible = bounds.feasible_variables().len();
        if num_feasible == 0 || !bounds.is_feasible(rule.variable()) {
            return Real::NEG_INFINITY;
        }
        let drawable = match (rule, bounds.bound(rule.variable())) {
            (Rule::Ordinal { cut_index, .. }, VariableBound::Ordinal { lo, hi }) => {
                (*lo..*hi).contains(cut_index)
            }
            (Rule::Categorical { mask, .. }, VariableBound::Categorical { available }) => {
                let m = mask & available;
                m != 0 && m != *available
            }
            _ => false,
        };
        if !drawable {
            return Real::NEG_INFINITY;
        }
        -((num_feasible as Real).ln()) - bounds.log_num_rules(rule.variable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cuts::CutPoints;
    use crate::data::{Data, VariableType};

    fn prior() -> CgmTreePrior {
        CgmTreePrior {
            base: 0.95,
            power: 2.0,
        }
    }

    #[test]
    fn growth_decays_with_depth() {
        let p = prior();
        assert!((p.growth_probability(0) - 0.95).abs() < 1e-12);
        assert!((p.growth_probability(1) - 0.95 / 4.0).abs() < 1e-12);
        assert!(p.growth_probability(5) < p.growth_probability(4));
    }

    #[test]
    fn drawn_rules_are_feasible_and_scored() {
        let data = Data::new(
            vec![0.0; 6],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 0.0, 1.0, 2.0, 0.0, 1.0, 2.0],
            vec![VariableType::Ordinal, VariableType::Categorical],
            vec![100, 100],
            1.0,
        )
        .unwrap();
        let cuts = CutPoints::from_data(&data, true);
        let bounds = NodeBounds::root(&data, &cuts);
        let p = prior();
        let mut rng = MersenneTwister::new(17);
        for _ in 0..200 {
            let drawn = p.draw_rule(&mut rng, &bounds).unwrap();
            let lp = p.rule_log_probability(&drawn.rule, &bounds);
            assert!(
                (lp - drawn.log_probability).abs() < 1e-12,
                "draw and score disagree"
            );
            // 2 variables, 5 cuts or 6 subsets
            let expected = -(2.0_f64.ln())
                - match drawn.rule {
                    Rule::Ordinal { .. } => 5.0_f64.ln(),
                    Rule::Categorical { .. } => 6.0_f64.ln(),
                };
            assert!((lp - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn infeasible_rules_score_neg_infinity() {
        let data = Data::new(
            vec![0.0; 3],
            vec![1.0, 2.0, 3.0],
            vec![VariableType::Ordinal],
            vec![100],
            1.0,
        )
        .unwrap();
        let cuts = CutPoints::from_data(&data, true);
        let root = NodeBounds::root(&data, &cuts);
        let rule = Rule::Ordinal {
            variable: 0,
            cut_index: 0,
        };
        // Descend left of cut 0: no cut below remains
        let child = root.child(&rule, true);
        assert_eq!(
            prior().rule_log_probability(&rule, &child),
            Real::NEG_INFINITY
        );
        assert!(prior().draw_rule(&mut MersenneTwister::new(1), &child).is_none());
    }

    #[test]
    fn exhaustion_is_reported() {
        let data = Data::new(
            vec![0.0; 2],
            vec![1.0, 2.0],
            vec![VariableType::Ordinal],
            vec![100],
            1.0,
        )
        .unwrap();
        let cuts = CutPoints::from_data(&data, true);
        let bounds = NodeBounds::root(&data, &cuts);
        // A single cut: using it exhausts both children
        let drawn = prior()
            .draw_rule(&mut MersenneTwister::new(2), &bounds)
            .unwrap();
        assert!(drawn.exhausted_left_splits);
        assert!(drawn.exhausted_right_splits);
    }
}
