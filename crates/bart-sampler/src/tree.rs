//! The decision tree: an arena of nodes plus the shared
//! observation-index buffer its leaves partition.
//!
//! Every leaf owns a contiguous `(start, len)` span of `obs`; a split
//! stably partitions its span in place, so the leaves of a subtree
//! always cover the subtree's span left-to-right. Stable partition of an
//! already-partitioned span is the identity, which is what makes a
//! persisted observation buffer reproduce spans exactly on reload.

use crate::cuts::CutPoints;
use crate::data::Data;
use crate::node::{LeafScratch, Node, NodeId};
use crate::rule::{NodeBounds, Rule};
use bart_core::{
    errors::{Error, Result},
    ObsIndex, Size,
};

/// A single regression tree of the ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: NodeId,
    obs: Vec<ObsIndex>,
}

/// Undo record of one structural proposal: the affected subtree's arena
/// slots, its observation span, and the allocator state.
#[derive(Debug, Clone)]
pub(crate) struct TreeSnapshot {
    nodes: Vec<(NodeId, Node)>,
    nodes_len: Size,
    free: Vec<NodeId>,
    span_start: Size,
    indices: Vec<ObsIndex>,
}

impl Tree {
    /// A single-leaf tree spanning all `num_observations` training rows.
    pub fn new(num_observations: Size, scratch: LeafScratch) -> Self {
        let root_node = Node::Leaf {
            start: 0,
            len: num_observations,
            enumeration: 0,
            scratch,
        };
        Self {
            nodes: vec![root_node],
            free: Vec::new(),
            root: NodeId(0),
            obs: (0..num_observations as ObsIndex).collect(),
        }
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Borrow a node.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Mutably borrow a node.
    #[inline]
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// The full observation-index buffer.
    pub fn obs(&self) -> &[ObsIndex] {
        &self.obs
    }

    /// The observation indices of a leaf.
    ///
    /// # Panics
    /// Panics if `id` is not a leaf.
    pub fn leaf_indices(&self, id: NodeId) -> &[ObsIndex] {
        match self.node(id) {
            Node::Leaf { start, len, .. } => &self.obs[*start..*start + *len],
            Node::Internal { .. } => panic!("not a leaf"),
        }
    }

    /// The `(start, len)` span a node covers.
    pub fn span_of(&self, id: NodeId) -> (Size, Size) {
        match self.node(id) {
            Node::Leaf { start, len, .. } => (*start, *len),
            Node::Internal { left, right, .. } => {
                let (start, left_len) = self.span_of(*left);
                let (_, right_len) = self.span_of(*right);
                (start, left_len + right_len)
            }
        }
    }

    /// Leaf ids in depth-first left-to-right order.
    pub fn leaves(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect(self.root, &mut |t, id| t.node(id).is_leaf(), &mut out);
        out
    }

    /// Leaf ids of the subtree rooted at `id`, left-to-right.
    pub fn leaves_under(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect(id, &mut |t, n| t.node(n).is_leaf(), &mut out);
        out
    }

    /// Internal node ids in depth-first order.
    pub fn internals(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect(self.root, &mut |t, id| !t.node(id).is_leaf(), &mut out);
        out
    }

    /// Internal nodes whose children are both leaves (DEATH candidates).
    pub fn death_eligible(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect(
            self.root,
            &mut |t, id| match t.node(id) {
                Node::Internal { left, right, .. } => {
                    t.node(*left).is_leaf() && t.node(*right).is_leaf()
                }
                Node::Leaf { .. } => false,
            },
            &mut out,
        );
        out
    }

    /// Internal nodes with at least one internal child (SWAP candidates).
    pub fn swap_eligible(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect(
            self.root,
            &mut |t, id| match t.node(id) {
                Node::Internal { left, right, .. } => {
                    !t.node(*left).is_leaf() || !t.node(*right).is_leaf()
                }
                Node::Leaf { .. } => false,
            },
            &mut out,
        );
        out
    }

    fn collect(
        &self,
        id: NodeId,
        keep: &mut dyn FnMut(&Tree, NodeId) -> bool,
        out: &mut Vec<NodeId>,
    ) {
        if keep(self, id) {
            out.push(id);
        }
        if let Node::Internal { left, right, .. } = self.node(id) {
            let (left, right) = (*left, *right);
            self.collect(left, keep, out);
            self.collect(right, keep, out);
        }
    }

    /// Number of leaves.
    pub fn num_leaves(&self) -> Size {
        self.leaves().len()
    }

    /// Root-to-node path, both endpoints included.
    pub fn path_to(&self, target: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let found = self.find_path(self.root, target, &mut path);
        debug_assert!(found, "node not reachable from root");
        path
    }

    fn find_path(&self, current: NodeId, target: NodeId, path: &mut Vec<NodeId>) -> bool {
        path.push(current);
        if current == target {
            return true;
        }
        if let Node::Internal { left, right, .. } = self.node(current) {
            let (left, right) = (*left, *right);
            if self.find_path(left, target, path) || self.find_path(right, target, path) {
                return true;
            }
        }
        path.pop();
        false
    }

    /// Depth of a node (root = 0).
    pub fn depth(&self, id: NodeId) -> Size {
        self.path_to(id).len() - 1
    }

    /// Feasible split sets at a node, induced by its ancestor rules.
    pub fn bounds_at(&self, id: NodeId, data: &Data, cuts: &CutPoints) -> NodeBounds {
        let path = self.path_to(id);
        let mut bounds = NodeBounds::root(data, cuts);
        for pair in path.windows(2) {
            let (left, _) = self.node(pair[0]).children();
            bounds.apply(self.node(pair[0]).rule(), pair[1] == left);
        }
        bounds
    }

    /// Stably partition `obs[start..start+len]` by `rule`; observations
    /// routed left come first. Returns the left count.
    pub(crate) fn partition(
        &mut self,
        start: Size,
        len: Size,
        rule: &Rule,
        data: &Data,
        cuts: &CutPoints,
    ) -> Size {
        let j = rule.variable();
        let span = &mut self.obs[start..start + len];
        let mut buf: Vec<ObsIndex> = Vec::with_capacity(len);
        for &i in span.iter() {
            if rule.goes_left(data.value(i as Size, j), cuts) {
                buf.push(i);
            }
        }
        let left_len = buf.len();
        for &i in span.iter() {
            if !rule.goes_left(data.value(i as Size, j), cuts) {
                buf.push(i);
            }
        }
        span.copy_from_slice(&buf);
        left_len
    }

    /// Recompute the partition of the subtree under `id` from its
    /// current span. Returns `false` as soon as any leaf would come out
    /// empty; the caller is then expected to restore a snapshot.
    pub(crate) fn refresh_partition(&mut self, id: NodeId, data: &Data, cuts: &CutPoints) -> bool {
        let (start, len) = self.span_of(id);
        self.refresh_rec(id, start, len, data, cuts)
    }

    /// Recompute every span from the root over the full buffer (used
    /// after deserialization, when leaf spans are placeholders).
    pub(crate) fn refresh_from_root(&mut self, data: &Data, cuts: &CutPoints) -> bool {
        let len = self.obs.len();
        self.refresh_rec(self.root, 0, len, data, cuts)
    }

    fn refresh_rec(
        &mut self,
        id: NodeId,
        start: Size,
        len: Size,
        data: &Data,
        cuts: &CutPoints,
    ) -> bool {
        let (rule, left, right) = match &mut self.nodes[id.index()] {
            Node::Leaf {
                start: s, len: l, ..
            } => {
                if len == 0 {
                    return false;
                }
                *s = start;
                *l = len;
                return true;
            }
            Node::Internal { rule, left, right } => (rule.clone(), *left, *right),
        };
        let left_len = self.partition(start, len, &rule, data, cuts);
        self.refresh_rec(left, start, left_len, data, cuts)
            && self.refresh_rec(right, start + left_len, len - left_len, data, cuts)
    }

    /// Assign `enumeration` 0.. to the leaves in traversal order.
    pub fn enumerate_leaves(&mut self) {
        for (k, id) in self.leaves().into_iter().enumerate() {
            if let Node::Leaf { enumeration, .. } = &mut self.nodes[id.index()] {
                *enumeration = k;
            }
        }
    }

    /// Route a predictor row to the leaf it falls in.
    pub fn route_row(&self, row: &[bart_core::Real], cuts: &CutPoints) -> NodeId {
        let mut id = self.root;
        loop {
            match self.node(id) {
                Node::Leaf { .. } => return id,
                Node::Internal { rule, left, right } => {
                    id = if rule.goes_left(row[rule.variable()], cuts) {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Add each internal node's split variable to `counts`.
    pub fn variable_counts(&self, counts: &mut [u32]) {
        for id in self.internals() {
            counts[self.node(id).rule().variable()] += 1;
        }
    }

    /// Overwrite a leaf's scratch block.
    pub(crate) fn set_leaf_scratch(&mut self, id: NodeId, new_scratch: LeafScratch) {
        match &mut self.nodes[id.index()] {
            Node::Leaf { scratch, .. } => *scratch = new_scratch,
            Node::Internal { .. } => panic!("not a leaf"),
        }
    }

    /// Allocate an arena slot, reusing freed ones.
    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.index()] = node;
                id
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() as u32 - 1)
            }
        }
    }

    /// Return an arena slot to the freelist.
    pub(crate) fn release(&mut self, id: NodeId) {
        self.free.push(id);
    }

    /// Record everything a rejected proposal must put back: the subtree
    /// rooted at `id`, its observation span, and the allocator state.
    pub(crate) fn snapshot(&self, id: NodeId) -> TreeSnapshot {
        let mut ids = Vec::new();
        self.collect(id, &mut |_, _| true, &mut ids);
        // Freed slots are unreachable but a birth may recycle them;
        // saving their contents keeps a restored arena byte-identical
        ids.extend_from_slice(&self.free);
        let (span_start, span_len) = self.span_of(id);
        TreeSnapshot {
            nodes: ids
                .into_iter()
                .map(|i| (i, self.node(i).clone()))
                .collect(),
            nodes_len: self.nodes.len(),
            free: self.free.clone(),
            span_start,
            indices: self.obs[span_start..span_start + span_len].to_vec(),
        }
    }

    /// Restore a snapshot taken on this tree.
    pub(crate) fn restore(&mut self, snapshot: TreeSnapshot) {
        self.nodes.truncate(snapshot.nodes_len);
        self.free = snapshot.free;
        for (id, node) in snapshot.nodes {
            self.nodes[id.index()] = node;
        }
        self.obs[snapshot.span_start..snapshot.span_start + snapshot.indices.len()]
            .copy_from_slice(&snapshot.indices);
    }

    /// Overwrite the observation buffer (deserialization only).
    pub(crate) fn set_obs(&mut self, obs: Vec<ObsIndex>) {
        debug_assert_eq!(obs.len(), self.obs.len());
        self.obs = obs;
    }

    // ─── Persistence ──────────────────────────────────────────────────

    /// Encode the topology as a newline-free preorder token string,
    /// e.g. `"o0:3 . c1:5 . ."`.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        self.serialize_rec(self.root, &mut out);
        out.trim_end().to_string()
    }

    fn serialize_rec(&self, id: NodeId, out: &mut String) {
        match self.node(id) {
            Node::Leaf { .. } => out.push_str(". "),
            Node::Internal { rule, left, right } => {
                match rule {
                    Rule::Ordinal {
                        variable,
                        cut_index,
                    } => out.push_str(&format!("o{variable}:{cut_index} ")),
                    Rule::Categorical { variable, mask } => {
                        out.push_str(&format!("c{variable}:{mask} "))
                    }
                }
                let (left, right) = (*left, *right);
                self.serialize_rec(left, out);
                self.serialize_rec(right, out);
            }
        }
    }

    /// Decode a topology string. Leaf spans are placeholders until
    /// [`Tree::refresh_from_root`] runs; scratch blocks start as copies
    /// of `placeholder`.
    pub fn parse(
        text: &str,
        num_observations: Size,
        placeholder: &LeafScratch,
    ) -> Result<Self> {
        let mut tokens = text.split_whitespace().peekable();
        let mut nodes = Vec::new();
        let root = Self::parse_rec(&mut tokens, &mut nodes, placeholder)?;
        if tokens.next().is_some() {
            return Err(Error::CorruptState(
                "trailing tokens after tree topology".into(),
            ));
        }
        Ok(Self {
            nodes,
            free: Vec::new(),
            root,
            obs: (0..num_observations as ObsIndex).collect(),
        })
    }

    fn parse_rec<'a, I: Iterator<Item = &'a str>>(
        tokens: &mut std::iter::Peekable<I>,
        nodes: &mut Vec<Node>,
        placeholder: &LeafScratch,
    ) -> Result<NodeId> {
        let token = tokens
            .next()
            .ok_or_else(|| Error::CorruptState("tree topology ended early".into()))?;
        let id = NodeId(nodes.len() as u32);
        if token == "." {
            nodes.push(Node::Leaf {
                start: 0,
                len: 0,
                enumeration: 0,
                scratch: placeholder.clone(),
            });
            return Ok(id);
        }
        let rule = parse_rule_token(token)?;
        // Reserve the slot so children come after their parent
        nodes.push(Node::Leaf {
            start: 0,
            len: 0,
            enumeration: 0,
            scratch: placeholder.clone(),
        });
        let left = Self::parse_rec(tokens, nodes, placeholder)?;
        let right = Self::parse_rec(tokens, nodes, placeholder)?;
        nodes[id.index()] = Node::Internal { rule, left, right };
        Ok(id)
    }
}

fn parse_rule_token(token: &str) -> Result<Rule> {
    let bad = || Error::CorruptState(format!("malformed rule token `{token}`"));
    let (kind, rest) = token.split_at(1);
    let (var, value) = rest.split_once(':').ok_or_else(bad)?;
    let variable: Size = var.parse().map_err(|_| bad())?;
    match kind {
        "o" => Ok(Rule::Ordinal {
            variable,
            cut_index: value.parse().map_err(|_| bad())?,
        }),
        "c" => Ok(Rule::Categorical {
            variable,
            mask: value.parse().map_err(|_| bad())?,
        }),
        _ => Err(bad()),
    }
}
