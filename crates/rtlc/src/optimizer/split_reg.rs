//! Bit-range splitting of registers.
//!
//! A register whose next value is assembled from independent bit-ranges
//! (`cat` of unrelated parts, possibly under conditions that hold the old
//! value) is split into one register per range when every read of the
//! register selects whole ranges. The pieces then schedule independently.

use std::collections::BTreeSet;

use log::info;

use crate::config::CompileOptions;
use crate::error::CompileError;
use crate::ir::{ENode, ENodeKind, ExpTree, Graph, Node, NodeId, NodeKind, PrimOp, RegReset};
use crate::optimizer::GraphPass;
use crate::optimizer::tree_opt::simplify_node;
use crate::width::{infer_exp_tree, infer_tree};

pub struct SplitRegisters;

impl GraphPass for SplitRegisters {
    fn name(&self) -> &'static str {
        "register splitting"
    }

    fn run(&self, graph: &mut Graph, _options: &CompileOptions) -> Result<bool, CompileError> {
        Ok(split_registers(graph)? > 0)
    }
}

/// One contiguous piece of a value, most significant first in a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragment {
    /// Bits `hi..=lo` of a node.
    Node { id: NodeId, hi: usize, lo: usize },
    /// Literal bits.
    Int { width: usize },
    /// Computed bits that should stay together.
    Space { width: usize },
}

impl Fragment {
    pub fn width(&self) -> usize {
        match self {
            Fragment::Node { hi, lo, .. } => hi - lo + 1,
            Fragment::Int { width } | Fragment::Space { width } => *width,
        }
    }

    fn is_opaque(&self) -> bool {
        matches!(self, Fragment::Space { .. })
    }
}

/// Bit-range provenance of an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeComponent {
    pub fragments: Vec<Fragment>,
}

impl NodeComponent {
    fn single(fragment: Fragment) -> Self {
        Self {
            fragments: vec![fragment],
        }
    }

    pub fn of(e: &ENode) -> Self {
        let opaque = Self::single(Fragment::Space { width: e.width });
        match &e.kind {
            ENodeKind::Literal(_) => Self::single(Fragment::Int { width: e.width }),
            ENodeKind::Ref(id) if e.children.is_empty() && e.width > 0 => {
                Self::single(Fragment::Node {
                    id: *id,
                    hi: e.width - 1,
                    lo: 0,
                })
            }
            ENodeKind::Prim(PrimOp::Bits { hi, lo }) => match e.children[0].as_bare_ref() {
                Some(id) => Self::single(Fragment::Node {
                    id,
                    hi: *hi,
                    lo: *lo,
                }),
                None => opaque,
            },
            ENodeKind::Prim(PrimOp::Cat) => {
                let mut fragments = Self::of(&e.children[0]).fragments;
                fragments.extend(Self::of(&e.children[1]).fragments);
                Self { fragments }.normalized()
            }
            ENodeKind::Mux | ENodeKind::When => {
                let (a, b) = (&e.children[1], &e.children[2]);
                if a.width != e.width || b.width != e.width || a.sign != b.sign {
                    return opaque;
                }
                Self::merge(&Self::of(a), &Self::of(b), e.width)
            }
            _ => opaque,
        }
    }

    pub fn width(&self) -> usize {
        self.fragments.iter().map(|f| f.width()).sum()
    }

    /// Joins neighbouring literal runs and consecutive ranges of one node.
    fn normalized(self) -> Self {
        let mut fragments: Vec<Fragment> = Vec::new();
        for f in self.fragments {
            let joined = match (fragments.last(), f) {
                (Some(Fragment::Int { width: a }), Fragment::Int { width: b }) => {
                    Some(Fragment::Int { width: a + b })
                }
                (
                    Some(Fragment::Node { id, hi, lo }),
                    Fragment::Node {
                        id: next,
                        hi: next_hi,
                        lo: next_lo,
                    },
                ) if *id == next && *lo == next_hi + 1 => Some(Fragment::Node {
                    id: *id,
                    hi: *hi,
                    lo: next_lo,
                }),
                _ => None,
            };
            match joined {
                Some(j) => {
                    fragments.pop();
                    fragments.push(j);
                }
                None => fragments.push(f),
            }
        }
        Self { fragments }
    }

    /// Cut positions, counted from the least significant bit.
    pub fn cuts(&self) -> BTreeSet<usize> {
        let mut cuts = BTreeSet::new();
        let mut offset = self.width();
        for f in &self.fragments {
            offset -= f.width();
            if offset > 0 {
                cuts.insert(offset);
            }
        }
        cuts
    }

    fn is_flexible(&self) -> bool {
        self.fragments.len() == 1 && !self.fragments[0].is_opaque()
    }

    /// Segmentation of `mux(c, a, b)`.
    fn merge(a: &Self, b: &Self, width: usize) -> Self {
        if a == b {
            return a.clone();
        }
        if a.is_flexible() {
            return b.clone();
        }
        if b.is_flexible() {
            return a.clone();
        }
        let cuts: BTreeSet<usize> = a.cuts().union(&b.cuts()).copied().collect();
        if a.splits_opaque(&cuts) || b.splits_opaque(&cuts) {
            return Self::single(Fragment::Space { width });
        }
        let mut fragments = Vec::new();
        let mut hi = width;
        for cut in cuts.iter().rev().copied().chain([0]) {
            let both_int = a.int_at(cut) && b.int_at(cut);
            let width = hi - cut;
            fragments.push(if both_int {
                Fragment::Int { width }
            } else {
                Fragment::Space { width }
            });
            hi = cut;
        }
        Self { fragments }
    }

    fn splits_opaque(&self, cuts: &BTreeSet<usize>) -> bool {
        let mut hi = self.width();
        for f in &self.fragments {
            let lo = hi - f.width();
            if f.is_opaque() && cuts.range(lo + 1..hi).next().is_some() {
                return true;
            }
            hi = lo;
        }
        false
    }

    fn int_at(&self, bit: usize) -> bool {
        let mut hi = self.width();
        for f in &self.fragments {
            let lo = hi - f.width();
            if bit >= lo && bit < hi {
                return matches!(f, Fragment::Int { .. });
            }
            hi = lo;
        }
        false
    }
}

/// Whether every read of `src` selects whole segments.
///
/// Bare reads are allowed only in the register's own update, where they
/// hold the current value.
fn reads_aligned(e: &ENode, src: NodeId, cuts: &BTreeSet<usize>, width: usize, hold: bool) -> bool {
    let is_src = |c: &ENode| c.as_bare_ref() == Some(src);
    match &e.kind {
        ENodeKind::Prim(PrimOp::Bits { hi, lo }) if is_src(&e.children[0]) => {
            let edge = |p: usize| p == 0 || p == width || cuts.contains(&p);
            edge(*lo) && edge(hi + 1)
        }
        ENodeKind::Ref(id) if *id == src => hold && e.children.is_empty(),
        _ => e
            .children
            .iter()
            .all(|c| reads_aligned(c, src, cuts, width, hold)),
    }
}

struct Plan {
    src: NodeId,
    dst: NodeId,
    /// `(hi, lo)` ranges, most significant first.
    ranges: Vec<(usize, usize)>,
}

fn plan(graph: &Graph, src: NodeId) -> Option<Plan> {
    let node = graph.node(src);
    let dst = node.partner?;
    if node.is_array() || node.width < 2 || !graph.node(dst).is_live() {
        return None;
    }
    let [tree] = graph.node(dst).assigns.as_slice() else {
        return None;
    };
    let component = NodeComponent::of(&tree.root);
    if component.width() != node.width || component.fragments.len() < 2 {
        return None;
    }
    let cuts = component.cuts();
    for reader in &node.next {
        let hold = *reader == dst;
        let trees = &graph.node(*reader).assigns;
        if !trees
            .iter()
            .all(|t| reads_aligned(&t.root, src, &cuts, node.width, hold))
        {
            return None;
        }
        if trees
            .iter()
            .flat_map(|t| &t.lhs_index)
            .any(|i| i.refs().contains(&src))
        {
            return None;
        }
    }
    let mut ranges = Vec::new();
    let mut hi = node.width;
    for cut in cuts.iter().rev().copied().chain([0]) {
        ranges.push((hi - 1, cut));
        hi = cut;
    }
    Some(Plan { src, dst, ranges })
}

fn bits(hi: usize, lo: usize, e: ENode) -> ENode {
    ENode::prim(PrimOp::Bits { hi, lo }, vec![e])
}

fn apply(graph: &mut Graph, plan: &Plan) -> Result<(), CompileError> {
    let src_node = graph.node(plan.src).clone();
    let update = graph.node(plan.dst).assigns[0].root.clone();

    let mut pieces = Vec::new();
    for (hi, lo) in &plan.ranges {
        let (hi, lo) = (*hi, *lo);
        let name = format!("{}${}_{}", src_node.name, hi, lo);
        let width = hi - lo + 1;
        let mut piece_src = Node::new(&name, NodeKind::RegSrc, width, false);
        piece_src.reset = src_node.reset.as_ref().map(|r| RegReset {
            kind: r.kind,
            cond: r.cond.clone(),
            value: bits(hi, lo, r.value.clone()),
        });
        for tree in &src_node.assigns {
            if tree.root.kind == ENodeKind::AsyncReset {
                let root = ENode::new(
                    ENodeKind::AsyncReset,
                    vec![
                        tree.root.children[0].clone(),
                        bits(hi, lo, tree.root.children[1].clone()),
                    ],
                );
                piece_src.assigns.push(ExpTree::new(root));
            }
        }
        let piece_src = graph.add_node(piece_src);
        let mut piece_dst = Node::new(format!("{}$next", name), NodeKind::RegDst, width, false);
        piece_dst.partner = Some(piece_src);
        piece_dst
            .assigns
            .push(ExpTree::new(bits(hi, lo, update.clone())));
        let piece_dst = graph.add_node(piece_dst);
        graph.node_mut(piece_src).partner = Some(piece_dst);
        graph.regs.push(piece_src);
        pieces.push((piece_src, piece_dst));
    }

    let mut joined = pieces
        .iter()
        .rev()
        .map(|(s, _)| ENode::reference(*s))
        .reduce(|low, high| ENode::prim(PrimOp::Cat, vec![high, low]))
        .unwrap_or_else(|| ENode::zero(src_node.width));
    if src_node.sign {
        joined = ENode::prim(PrimOp::AsSInt, vec![joined]);
    }
    infer_tree(graph, &mut joined)?;

    let mut touched: Vec<NodeId> = src_node.next.iter().copied().collect();
    touched.extend(pieces.iter().flat_map(|(s, d)| [*s, *d]));
    graph.mark_dead(plan.src);
    graph.mark_dead(plan.dst);
    for id in touched {
        if !graph.node(id).is_live() {
            continue;
        }
        let mut assigns = std::mem::take(&mut graph.node_mut(id).assigns);
        for tree in &mut assigns {
            tree.root.visit_mut(&mut |e: &mut ENode| {
                if e.kind == ENodeKind::Ref(plan.src) {
                    *e = joined.clone();
                }
            });
            infer_exp_tree(graph, tree)?;
        }
        graph.node_mut(id).assigns = assigns;
        simplify_node(graph, id)?;
    }
    // Another register's reset may read this one without an edge.
    let mut reset_readers: Vec<NodeId> = pieces.iter().map(|(s, _)| *s).collect();
    for reg in graph.live_regs() {
        let reads_src = graph.node(reg).reset.as_ref().is_some_and(|r| {
            r.cond.refs().contains(&plan.src) || r.value.refs().contains(&plan.src)
        });
        if reads_src {
            reset_readers.push(reg);
        }
    }
    for reg in reset_readers {
        let mut reset = graph.node_mut(reg).reset.take();
        let mut outcome = Ok(());
        if let Some(r) = &mut reset {
            for e in [&mut r.cond, &mut r.value] {
                e.visit_mut(&mut |e: &mut ENode| {
                    if e.kind == ENodeKind::Ref(plan.src) {
                        *e = joined.clone();
                    }
                });
                outcome = outcome.and_then(|_| infer_tree(graph, e));
            }
        }
        graph.node_mut(reg).reset = reset;
        outcome?;
    }
    Ok(())
}

pub fn split_registers(graph: &mut Graph) -> Result<usize, CompileError> {
    graph.rebuild_edges();
    let mut count = 0;
    for src in graph.live_regs() {
        if let Some(plan) = plan(graph, src) {
            apply(graph, &plan)?;
            count += 1;
        }
    }
    graph.rebuild_edges();
    if count > 0 {
        info!("split {} registers", count);
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ResetKind;

    fn typed(g: &Graph, mut e: ENode) -> ENode {
        infer_tree(g, &mut e).unwrap();
        e
    }

    /// `r` is 8 bits; `r$next = when(en, cat(add(hi, 1), lo_in), r)`.
    fn split_candidate() -> (Graph, NodeId, NodeId) {
        let mut g = Graph::new("Top");
        let en = g.add_node(Node::new("en", NodeKind::Input, 1, false));
        let lo_in = g.add_node(Node::new("lo_in", NodeKind::Input, 4, false));
        let src = g.add_node(Node::new("r", NodeKind::RegSrc, 8, false));
        let dst = g.add_node(Node::new("r$next", NodeKind::RegDst, 8, false));
        let o = g.add_node(Node::new("o", NodeKind::Output, 4, false));
        g.node_mut(src).partner = Some(dst);
        g.node_mut(dst).partner = Some(src);
        g.regs.push(src);
        g.outputs.push(o);
        let hi = bits(7, 4, ENode::reference(src));
        let inc = ENode::prim(
            PrimOp::Tail(1),
            vec![ENode::prim(PrimOp::Add, vec![hi, ENode::uint(1)])],
        );
        let update = ENode::when(
            ENode::reference(en),
            ENode::prim(PrimOp::Cat, vec![inc, ENode::reference(lo_in)]),
            ENode::reference(src),
        );
        let update = typed(&g, update);
        g.node_mut(dst).assigns.push(ExpTree::new(update));
        let read = typed(&g, bits(3, 0, ENode::reference(src)));
        g.node_mut(o).assigns.push(ExpTree::new(read));
        g.rebuild_edges();
        (g, src, o)
    }

    #[test]
    fn component_of_conditional_cat() {
        let (g, src, _) = split_candidate();
        let dst = g.node(src).partner.unwrap();
        let component = NodeComponent::of(&g.node(dst).assigns[0].root);
        assert_eq!(component.cuts().into_iter().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn aligned_register_is_split() {
        let (mut g, src, o) = split_candidate();
        assert_eq!(split_registers(&mut g).unwrap(), 1);
        assert!(!g.node(src).is_live());
        let lo = g.find("r$3_0").unwrap();
        assert!(g.find("r$7_4").is_some());
        assert_eq!(g.node(o).assigns[0].root.as_bare_ref(), Some(lo));
        let lo_next = g.find("r$3_0$next").unwrap();
        let update = &g.node(lo_next).assigns[0].root;
        assert_eq!(
            g.display(update).to_string(),
            "when(en, lo_in, r$3_0)"
        );
    }

    #[test]
    fn unaligned_read_blocks_split() {
        let (mut g, src, o) = split_candidate();
        let read = typed(&g, bits(5, 2, ENode::reference(src)));
        g.node_mut(o).assigns = vec![ExpTree::new(read)];
        g.rebuild_edges();
        assert_eq!(split_registers(&mut g).unwrap(), 0);
    }

    #[test]
    fn reset_value_reading_split_register_is_rewritten() {
        let (mut g, src, _) = split_candidate();
        let en = g.find("en").unwrap();
        let q = g.add_node(Node::new("q", NodeKind::RegSrc, 8, false));
        let q_next = g.add_node(Node::new("q$next", NodeKind::RegDst, 8, false));
        g.node_mut(q).partner = Some(q_next);
        g.node_mut(q_next).partner = Some(q);
        g.node_mut(q).reset = Some(RegReset {
            kind: ResetKind::Sync,
            cond: typed(&g, ENode::reference(en)),
            value: typed(&g, ENode::reference(src)),
        });
        let q_ref = typed(&g, ENode::reference(q));
        g.node_mut(q_next).assigns.push(ExpTree::new(q_ref));
        g.regs.push(q);
        g.rebuild_edges();

        assert_eq!(split_registers(&mut g).unwrap(), 1);
        let value = &g.node(q).reset.as_ref().unwrap().value;
        assert!(!value.refs().contains(&src));
        assert_eq!(g.display(value).to_string(), "cat(r$7_4, r$3_0)");
        assert_eq!(value.width, 8);
    }
}
