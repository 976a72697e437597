use num_bigint::BigUint;

use crate::config::CompileOptions;
use crate::error::{CompileError, InternalError};
use crate::ir::{ENode, ENodeKind, Graph, NodeId, PrimOp};
use crate::optimizer::GraphPass;
use crate::value::mask;
use crate::width::infer_tree;

/// Local rewrites of every expression tree.
pub struct TreeSimplify;

impl GraphPass for TreeSimplify {
    fn name(&self) -> &'static str {
        "tree simplification"
    }

    fn run(&self, graph: &mut Graph, _options: &CompileOptions) -> Result<bool, CompileError> {
        simplify_graph(graph)
    }
}

pub fn simplify_graph(graph: &mut Graph) -> Result<bool, CompileError> {
    let mut changed = false;
    let ids: Vec<NodeId> = graph.live_nodes().collect();
    for id in ids {
        changed |= simplify_node(graph, id)?;
    }
    if changed {
        graph.rebuild_edges();
    }
    Ok(changed)
}

/// Simplifies the trees of one node. Edges are left stale.
pub fn simplify_node(graph: &mut Graph, id: NodeId) -> Result<bool, CompileError> {
    let mut assigns = std::mem::take(&mut graph.node_mut(id).assigns);
    let mut changed = false;
    let mut failure = None;
    for tree in &mut assigns {
        match simplify(graph, &mut tree.root, id) {
            Ok(c) => changed |= c,
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    // Array writes that became unconditional no-ops are dropped.
    if graph.node(id).is_array() {
        let before = assigns.len();
        assigns.retain(|t| !t.root.is_empty());
        changed |= assigns.len() != before;
    }
    graph.node_mut(id).assigns = assigns;
    match failure {
        Some(err) => Err(err),
        None => Ok(changed),
    }
}

/// Rewrites `e` bottom-up until no local rule applies.
pub fn simplify(graph: &Graph, e: &mut ENode, owner: NodeId) -> Result<bool, CompileError> {
    let mut changed = false;
    for child in &mut e.children {
        changed |= simplify(graph, child, owner)?;
    }
    if let Some(mut next) = rewrite(graph, e, owner)? {
        infer_tree(graph, &mut next)?;
        simplify(graph, &mut next, owner)?;
        *e = next;
        changed = true;
    }
    Ok(changed)
}

/// Extends `branch` back to the width of the node it replaces.
fn keep_width(branch: &ENode, width: usize) -> ENode {
    if branch.is_empty() || branch.width == width {
        branch.clone()
    } else {
        ENode::prim(PrimOp::Pad(width), vec![branch.clone()])
    }
}

fn rewrite(graph: &Graph, e: &ENode, owner: NodeId) -> Result<Option<ENode>, CompileError> {
    match &e.kind {
        ENodeKind::Mux | ENodeKind::When => {
            let (cond, then, otherwise) = (&e.children[0], &e.children[1], &e.children[2]);
            if then.is_empty() && otherwise.is_empty() {
                return Err(InternalError::EmptyWhen {
                    node: graph.node(owner).name.clone(),
                }
                .into());
            }
            if let Some(v) = cond.literal_value() {
                let pick = if v.bits() > 0 { then } else { otherwise };
                return Ok(Some(keep_width(pick, e.width)));
            }
            if then == otherwise && !then.has_side_effects() {
                return Ok(Some(keep_width(then, e.width)));
            }
            if e.kind == ENodeKind::When {
                let same = |b: &ENode| b.kind == ENodeKind::When && &b.children[0] == cond;
                if same(then) || same(otherwise) {
                    let then = if same(then) { &then.children[1] } else { then };
                    let otherwise = if same(otherwise) {
                        &otherwise.children[2]
                    } else {
                        otherwise
                    };
                    return Ok(Some(ENode::when(
                        cond.clone(),
                        then.clone(),
                        otherwise.clone(),
                    )));
                }
            }
            Ok(None)
        }
        ENodeKind::Prim(PrimOp::AsUInt | PrimOp::AsSInt) => {
            let child = &e.children[0];
            Ok((child.width == e.width && child.sign == e.sign).then(|| child.clone()))
        }
        ENodeKind::Prim(PrimOp::AsAsyncReset | PrimOp::AsClock) => {
            let child = &e.children[0];
            if child.width == 1 && !child.sign {
                Ok(Some(child.clone()))
            } else {
                Ok(Some(ENode::prim(
                    PrimOp::Bits { hi: 0, lo: 0 },
                    vec![child.clone()],
                )))
            }
        }
        ENodeKind::Prim(PrimOp::Bits { hi, lo }) => Ok(rewrite_bits(*hi, *lo, &e.children[0])),
        _ => Ok(None),
    }
}

fn bits(hi: usize, lo: usize, e: ENode) -> ENode {
    ENode::prim(PrimOp::Bits { hi, lo }, vec![e])
}

fn rewrite_bits(hi: usize, lo: usize, x: &ENode) -> Option<ENode> {
    if let Some(v) = x.literal_value() {
        let width = hi - lo + 1;
        let value: BigUint = (v >> lo) & mask(width);
        return Some(ENode::literal(value, width, false));
    }
    if lo == 0 && hi + 1 == x.width && !x.sign {
        return Some(x.clone());
    }
    match &x.kind {
        ENodeKind::Prim(PrimOp::Bits { lo: inner_lo, .. }) => Some(bits(
            hi + inner_lo,
            lo + inner_lo,
            x.children[0].clone(),
        )),
        ENodeKind::Prim(PrimOp::Cat) => {
            let (a, b) = (&x.children[0], &x.children[1]);
            let wb = b.width;
            if lo >= wb {
                Some(bits(hi - wb, lo - wb, a.clone()))
            } else if hi < wb {
                Some(bits(hi, lo, b.clone()))
            } else {
                Some(ENode::prim(
                    PrimOp::Cat,
                    vec![bits(hi - wb, 0, a.clone()), bits(wb - 1, lo, b.clone())],
                ))
            }
        }
        ENodeKind::Mux | ENodeKind::When => {
            let branches = &x.children[1..];
            let uniform = branches
                .iter()
                .all(|b| b.is_empty() || (b.width == x.width && b.sign == x.sign));
            if !uniform || x.has_side_effects() {
                return None;
            }
            let push = |b: &ENode| {
                if b.is_empty() {
                    b.clone()
                } else {
                    bits(hi, lo, b.clone())
                }
            };
            Some(ENode::new(
                x.kind.clone(),
                vec![x.children[0].clone(), push(&x.children[1]), push(&x.children[2])],
            ))
        }
        _ => None,
    }
}
