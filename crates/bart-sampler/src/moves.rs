//! Structural Metropolis-Hastings proposals.
//!
//! Each tree draws one of three move families per sub-iteration: birth
//! or death (grow a leaf / collapse a parent of two leaves), swap
//! (exchange an internal node's rule with an internal child's), or
//! change (redraw an internal node's rule). Rule probabilities cancel
//! between the tree prior and the proposal wherever the same rule is
//! drawn from the same feasible set, so the acceptance ratios below
//! carry only the terms that survive.
//!
//! A proposal that empties a leaf is rejected by construction; rejection
//! restores the snapshot taken before mutation, so the pre-proposal
//! partition and scratch blocks come back byte-identical.

use crate::cuts::CutPoints;
use crate::data::Data;
use crate::end_node::{EndNodePrior, LeafContext};
use crate::model::Model;
use crate::node::{Node, NodeId};
use crate::rule::{NodeBounds, Rule};
use crate::tree::Tree;
use crate::tree_prior::TreePrior;
use bart_core::Real;
use bart_math::rng::MersenneTwister;

/// Everything a proposal reads besides the tree itself.
pub(crate) struct MoveContext<'a> {
    pub data: &'a Data,
    pub cuts: &'a CutPoints,
    pub leaf: LeafContext<'a>,
    pub tree_prior: &'a dyn TreePrior,
    pub end_node: &'a dyn EndNodePrior,
    pub model: &'a Model,
}

/// Which structural move was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum MoveKind {
    Birth,
    Death,
    Swap,
    Change,
}

/// Result of one proposal.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MoveOutcome {
    pub kind: MoveKind,
    pub accepted: bool,
}

impl MoveOutcome {
    fn rejected(kind: MoveKind) -> Self {
        Self {
            kind,
            accepted: false,
        }
    }

    fn accepted(kind: MoveKind) -> Self {
        Self {
            kind,
            accepted: true,
        }
    }
}

/// Draw a move family and run one proposal on `tree`.
///
/// The family probabilities are identical in every tree state: a swap
/// or change drawn on a tree with no eligible node is a rejected
/// no-op, never a redirect to birth-or-death. This keeps the family
/// terms canceling from every acceptance ratio.
pub(crate) fn propose(
    tree: &mut Tree,
    ctx: &MoveContext,
    rng: &mut MersenneTwister,
) -> MoveOutcome {
    let u = rng.next_real();
    if u < ctx.model.birth_or_death_probability {
        birth_or_death(tree, ctx, rng)
    } else if u < ctx.model.birth_or_death_probability + ctx.model.swap_probability {
        swap(tree, ctx, rng)
    } else {
        change(tree, ctx, rng)
    }
}

/// Leaves at which the ancestor rules leave some split drawable.
fn birth_eligible(tree: &Tree, ctx: &MoveContext) -> Vec<NodeId> {
    tree.leaves()
        .into_iter()
        .filter(|&id| tree.bounds_at(id, ctx.data, ctx.cuts).any_feasible())
        .collect()
}

fn leaf_log_likelihood(tree: &Tree, ctx: &MoveContext, id: NodeId) -> Real {
    ctx.end_node
        .integrated_log_likelihood(&ctx.leaf, tree.leaf_indices(id))
}

fn subtree_log_likelihood(tree: &Tree, ctx: &MoveContext, id: NodeId) -> Real {
    tree.leaves_under(id)
        .into_iter()
        .map(|leaf| leaf_log_likelihood(tree, ctx, leaf))
        .sum()
}

/// Sum of rule log-probabilities over the internal nodes of the subtree
/// at `id`, with `bounds` the feasible sets at `id` itself.
fn subtree_rule_log_prior(
    tree: &Tree,
    ctx: &MoveContext,
    id: NodeId,
    bounds: &NodeBounds,
) -> Real {
    match tree.node(id) {
        Node::Leaf { .. } => 0.0,
        Node::Internal { rule, left, right } => {
            let own = ctx.tree_prior.rule_log_probability(rule, bounds);
            if own == Real::NEG_INFINITY {
                return Real::NEG_INFINITY;
            }
            let (rule, left, right) = (rule.clone(), *left, *right);
            own + subtree_rule_log_prior(tree, ctx, left, &bounds.child(&rule, true))
                + subtree_rule_log_prior(tree, ctx, right, &bounds.child(&rule, false))
        }
    }
}

fn set_rule(tree: &mut Tree, id: NodeId, new_rule: Rule) {
    match tree.node_mut(id) {
        Node::Internal { rule, .. } => *rule = new_rule,
        Node::Leaf { .. } => panic!("cannot set a rule on a leaf"),
    }
}

// ─── Birth / death ───────────────────────────────────────────────────────

fn birth_or_death(tree: &mut Tree, ctx: &MoveContext, rng: &mut MersenneTwister) -> MoveOutcome {
    let birth_leaves = birth_eligible(tree, ctx);
    let death_nodes = tree.death_eligible();
    let can_birth = !birth_leaves.is_empty();
    let can_death = !death_nodes.is_empty();
    if !can_birth && !can_death {
        // A root-only tree over splitless predictors never moves
        return MoveOutcome::rejected(MoveKind::Birth);
    }
    let p_birth = if !can_death {
        1.0
    } else if !can_birth {
        0.0
    } else {
        ctx.model.birth_probability
    };
    if rng.next_real() < p_birth {
        birth(tree, ctx, rng, birth_leaves, p_birth)
    } else {
        death(tree, ctx, rng, death_nodes, 1.0 - p_birth)
    }
}

fn birth(
    tree: &mut Tree,
    ctx: &MoveContext,
    rng: &mut MersenneTwister,
    eligible: Vec<NodeId>,
    p_birth_current: Real,
) -> MoveOutcome {
    let leaf_id = eligible[rng.next_below(eligible.len())];
    let depth = tree.depth(leaf_id);
    let bounds = tree.bounds_at(leaf_id, ctx.data, ctx.cuts);
    let Some(drawn) = ctx.tree_prior.draw_rule(rng, &bounds) else {
        return MoveOutcome::rejected(MoveKind::Birth);
    };

    let snapshot = tree.snapshot(leaf_id);
    let log_lik_old = leaf_log_likelihood(tree, ctx, leaf_id);
    let (start, len) = tree.span_of(leaf_id);
    let left_len = tree.partition(start, len, &drawn.rule, ctx.data, ctx.cuts);
    if left_len == 0 || left_len == len {
        tree.restore(snapshot);
        return MoveOutcome::rejected(MoveKind::Birth);
    }

    let scratch = ctx.end_node.empty_scratch();
    let left = tree.alloc(Node::Leaf {
        start,
        len: left_len,
        enumeration: 0,
        scratch: scratch.clone(),
    });
    let right = tree.alloc(Node::Leaf {
        start: start + left_len,
        len: len - left_len,
        enumeration: 0,
        scratch,
    });
    *tree.node_mut(leaf_id) = Node::Internal {
        rule: drawn.rule.clone(),
        left,
        right,
    };

    let log_lik_new =
        leaf_log_likelihood(tree, ctx, left) + leaf_log_likelihood(tree, ctx, right);

    // The reverse death must select this freshly grown parent
    let num_death_reverse = tree.death_eligible().len();
    let p_death_reverse = if birth_eligible(tree, ctx).is_empty() {
        1.0
    } else {
        1.0 - ctx.model.birth_probability
    };

    let prior = ctx.tree_prior;
    let log_prior_ratio = prior.log_growth(depth) + 2.0 * prior.log_no_growth(depth + 1)
        - prior.log_no_growth(depth);
    let log_transition_ratio = p_death_reverse.ln() - p_birth_current.ln()
        + (eligible.len() as Real).ln()
        - (num_death_reverse as Real).ln();
    let log_ratio = log_prior_ratio + log_transition_ratio + log_lik_new - log_lik_old;

    if rng.next_open_real().ln() < log_ratio {
        MoveOutcome::accepted(MoveKind::Birth)
    } else {
        tree.restore(snapshot);
        MoveOutcome::rejected(MoveKind::Birth)
    }
}

fn death(
    tree: &mut Tree,
    ctx: &MoveContext,
    rng: &mut MersenneTwister,
    eligible: Vec<NodeId>,
    p_death_current: Real,
) -> MoveOutcome {
    let node_id = eligible[rng.next_below(eligible.len())];
    let depth = tree.depth(node_id);
    let snapshot = tree.snapshot(node_id);

    let (left, right) = tree.node(node_id).children();
    let log_lik_old =
        leaf_log_likelihood(tree, ctx, left) + leaf_log_likelihood(tree, ctx, right);
    let (start, len) = tree.span_of(node_id);
    tree.release(left);
    tree.release(right);
    *tree.node_mut(node_id) = Node::Leaf {
        start,
        len,
        enumeration: 0,
        scratch: ctx.end_node.empty_scratch(),
    };
    let log_lik_new = leaf_log_likelihood(tree, ctx, node_id);

    // The reverse birth must re-grow the collapsed leaf; it is always
    // eligible since its rule just came out of the feasible set
    let num_birth_reverse = birth_eligible(tree, ctx).len();
    let p_birth_reverse = if tree.death_eligible().is_empty() {
        1.0
    } else {
        ctx.model.birth_probability
    };

    let prior = ctx.tree_prior;
    let log_prior_ratio = prior.log_no_growth(depth)
        - prior.log_growth(depth)
        - 2.0 * prior.log_no_growth(depth + 1);
    let log_transition_ratio = p_birth_reverse.ln() - p_death_current.ln()
        + (eligible.len() as Real).ln()
        - (num_birth_reverse as Real).ln();
    let log_ratio = log_prior_ratio + log_transition_ratio + log_lik_new - log_lik_old;

    if rng.next_open_real().ln() < log_ratio {
        MoveOutcome::accepted(MoveKind::Death)
    } else {
        tree.restore(snapshot);
        MoveOutcome::rejected(MoveKind::Death)
    }
}

// ─── Swap ────────────────────────────────────────────────────────────────

fn swap(tree: &mut Tree, ctx: &MoveContext, rng: &mut MersenneTwister) -> MoveOutcome {
    let candidates = tree.swap_eligible();
    if candidates.is_empty() {
        // Depth-one trees have nothing to swap; fall through to a rule
        // change instead of wasting the sub-iteration
        return change(tree, ctx, rng);
    }
    let node_id = candidates[rng.next_below(candidates.len())];
    let (left, right) = tree.node(node_id).children();
    let left_internal = !tree.node(left).is_leaf();
    let right_internal = !tree.node(right).is_leaf();

    let bounds = tree.bounds_at(node_id, ctx.data, ctx.cuts);
    let snapshot = tree.snapshot(node_id);
    let log_lik_old = subtree_log_likelihood(tree, ctx, node_id);
    let log_prior_old = subtree_rule_log_prior(tree, ctx, node_id, &bounds);

    if left_internal && right_internal && tree.node(left).rule() == tree.node(right).rule() {
        // Double swap: capture the shared child rule, hand the parent
        // rule to both children, then give the parent the captured rule
        let shared = tree.node(left).rule().clone();
        let parent_rule = tree.node(node_id).rule().clone();
        set_rule(tree, left, parent_rule.clone());
        set_rule(tree, right, parent_rule);
        set_rule(tree, node_id, shared);
    } else {
        let child = if left_internal && right_internal {
            if rng.next_real() < 0.5 {
                left
            } else {
                right
            }
        } else if left_internal {
            left
        } else {
            right
        };
        let child_rule = tree.node(child).rule().clone();
        let parent_rule = tree.node(node_id).rule().clone();
        set_rule(tree, node_id, child_rule);
        set_rule(tree, child, parent_rule);
    }

    if !tree.refresh_partition(node_id, ctx.data, ctx.cuts) {
        tree.restore(snapshot);
        return MoveOutcome::rejected(MoveKind::Swap);
    }
    let log_prior_new = subtree_rule_log_prior(tree, ctx, node_id, &bounds);
    if log_prior_new == Real::NEG_INFINITY {
        tree.restore(snapshot);
        return MoveOutcome::rejected(MoveKind::Swap);
    }
    let log_lik_new = subtree_log_likelihood(tree, ctx, node_id);
    let log_ratio = log_prior_new - log_prior_old + log_lik_new - log_lik_old;

    if rng.next_open_real().ln() < log_ratio {
        MoveOutcome::accepted(MoveKind::Swap)
    } else {
        tree.restore(snapshot);
        MoveOutcome::rejected(MoveKind::Swap)
    }
}

// ─── Change ──────────────────────────────────────────────────────────────

fn change(tree: &mut Tree, ctx: &MoveContext, rng: &mut MersenneTwister) -> MoveOutcome {
    let internals = tree.internals();
    if internals.is_empty() {
        // A root-only tree has no rule to redraw
        return MoveOutcome::rejected(MoveKind::Change);
    }
    let node_id = internals[rng.next_below(internals.len())];
    let bounds = tree.bounds_at(node_id, ctx.data, ctx.cuts);
    let Some(drawn) = ctx.tree_prior.draw_rule(rng, &bounds) else {
        return MoveOutcome::rejected(MoveKind::Change);
    };
    let old_rule = tree.node(node_id).rule().clone();
    let snapshot = tree.snapshot(node_id);
    let log_lik_old = subtree_log_likelihood(tree, ctx, node_id);
    // The node's own rule probability cancels between prior and
    // proposal; only descendant feasible sets shift
    let log_prior_old = subtree_rule_log_prior(tree, ctx, node_id, &bounds)
        - ctx.tree_prior.rule_log_probability(&old_rule, &bounds);

    set_rule(tree, node_id, drawn.rule.clone());
    if !tree.refresh_partition(node_id, ctx.data, ctx.cuts) {
        tree.restore(snapshot);
        return MoveOutcome::rejected(MoveKind::Change);
    }
    let log_prior_new =
        subtree_rule_log_prior(tree, ctx, node_id, &bounds) - drawn.log_probability;
    if log_prior_new == Real::NEG_INFINITY {
        tree.restore(snapshot);
        return MoveOutcome::rejected(MoveKind::Change);
    }
    let log_lik_new = subtree_log_likelihood(tree, ctx, node_id);
    let log_ratio = log_prior_new - log_prior_old + log_lik_new - log_lik_old;

    if rng.next_open_real().ln() < log_ratio {
        MoveOutcome::accepted(MoveKind::Change)
    } else {
        tree.restore(snapshot);
        MoveOutcome::rejected(MoveKind::Change)
    }
}
