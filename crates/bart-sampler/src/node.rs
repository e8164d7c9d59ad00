//! Tree nodes.
//!
//! Nodes live in a per-tree arena and are addressed by `NodeId`; an
//! internal node stores its rule and two child ids, a leaf stores a
//! contiguous span of the tree's shared observation-index buffer plus
//! its end-node scratch block. Birth and death therefore touch three
//! arena slots and never the heap.

use crate::rule::Rule;
use bart_core::{Real, Size};
use nalgebra::DMatrix;

/// Index of a node in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The arena slot as a usize.
    #[inline]
    pub fn index(self) -> Size {
        self.0 as Size
    }
}

/// Model-specific per-leaf working storage.
///
/// For the constant-mean model, `mu` holds the weighted residual mean
/// right after preparation and the drawn leaf mean after the posterior
/// draw. For the linear-regression model, `coefficients` transitions the
/// same way: `R⁻ᵀXᵀy` after preparation, the drawn β afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafScratch {
    /// Constant-mean-Normal end node.
    MeanNormal {
        /// Residual mean, then drawn leaf mean.
        mu: Real,
        /// Weight sum (or count) of the leaf's observations.
        num_effective_obs: Real,
    },
    /// Per-leaf linear-regression end node.
    LinReg {
        /// Upper Cholesky factor of `XᵀX + Λσ²` over augmented rows.
        r: DMatrix<Real>,
        /// `R⁻ᵀXᵀy`, then the drawn coefficient vector.
        coefficients: Vec<Real>,
    },
}

/// A tree cell: either a leaf holding a partition cell or an internal
/// node holding a split.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A leaf.
    Leaf {
        /// First position of this leaf's span in the tree's
        /// observation-index buffer.
        start: Size,
        /// Span length.
        len: Size,
        /// Ordinal position among the tree's leaves in traversal order.
        enumeration: Size,
        /// End-node working storage.
        scratch: LeafScratch,
    },
    /// An internal node. Both children exist from the moment the split
    /// does.
    Internal {
        /// The split rule.
        rule: Rule,
        /// Left child (observations satisfying the rule).
        left: NodeId,
        /// Right child.
        right: NodeId,
    },
}

impl Node {
    /// Whether this is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// The rule of an internal node.
    ///
    /// # Panics
    /// Panics on a leaf.
    pub fn rule(&self) -> &Rule {
        match self {
            Node::Internal { rule, .. } => rule,
            Node::Leaf { .. } => panic!("leaf has no rule"),
        }
    }

    /// The children of an internal node.
    ///
    /// # Panics
    /// Panics on a leaf.
    pub fn children(&self) -> (NodeId, NodeId) {
        match self {
            Node::Internal { left, right, .. } => (*left, *right),
            Node::Leaf { .. } => panic!("leaf has no children"),
        }
    }

    /// The scratch block of a leaf.
    ///
    /// # Panics
    /// Panics on an internal node.
    pub fn scratch(&self) -> &LeafScratch {
        match self {
            Node::Leaf { scratch, .. } => scratch,
            Node::Internal { .. } => panic!("internal node has no scratch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_accessors() {
        let leaf = Node::Leaf {
            start: 0,
            len: 4,
            enumeration: 0,
            scratch: LeafScratch::MeanNormal {
                mu: 0.0,
                num_effective_obs: 4.0,
            },
        };
        assert!(leaf.is_leaf());
        assert!(matches!(
            leaf.scratch(),
            LeafScratch::MeanNormal { .. }
        ));
    }

    #[test]
    fn internal_accessors() {
        let node = Node::Internal {
            rule: Rule::Ordinal {
                variable: 0,
                cut_index: 1,
            },
            left: NodeId(1),
            right: NodeId(2),
        };
        assert!(!node.is_leaf());
        assert_eq!(node.children(), (NodeId(1), NodeId(2)));
        assert_eq!(node.rule().variable(), 0);
    }
}
