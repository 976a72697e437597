//! Width and signedness inference over expression trees.

use crate::error::BuildError;
use crate::ir::{ENode, ENodeKind, ExpTree, Graph, NodeId, PrimOp, RegReset};

/// Widest result any operator may produce.
pub const MAX_WIDTH: usize = 1 << 20;

/// Types every tree in the graph and resolves the width of `node` values.
///
/// Ports and wires may be created before the `node` values they read, so
/// every width-inferred node is resolved first, after the nodes it reads.
/// Only then are the remaining trees typed.
pub fn infer_widths(graph: &mut Graph) -> Result<(), BuildError> {
    let mut state = vec![Visit::Unseen; graph.nodes.len()];
    for index in 0..graph.nodes.len() {
        let id = NodeId(index);
        if graph.node(id).is_live() && graph.node(id).width_inferred {
            resolve_inferred(graph, id, &mut state)?;
        }
    }
    for index in 0..graph.nodes.len() {
        let id = NodeId(index);
        let node = graph.node(id);
        if node.is_live() && !node.width_inferred {
            type_node(graph, id)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unseen,
    Open,
    Done,
}

/// Post-order walk over the width-inferred nodes `id` reads.
fn resolve_inferred(graph: &mut Graph, id: NodeId, state: &mut [Visit]) -> Result<(), BuildError> {
    let mut stack = vec![(id, false)];
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            type_node(graph, id)?;
            state[id.0] = Visit::Done;
            continue;
        }
        if state[id.0] != Visit::Unseen {
            continue;
        }
        state[id.0] = Visit::Open;
        stack.push((id, true));
        for dep in graph.node(id).assigns.iter().flat_map(|t| t.refs()) {
            let node = graph.node(dep);
            if node.is_live() && node.width_inferred && state[dep.0] == Visit::Unseen {
                stack.push((dep, false));
            }
        }
    }
    Ok(())
}

fn type_node(graph: &mut Graph, id: NodeId) -> Result<(), BuildError> {
    let mut assigns = std::mem::take(&mut graph.node_mut(id).assigns);
    let mut reset = graph.node_mut(id).reset.take();
    let outcome = infer_node_trees(graph, &mut assigns, reset.as_mut());
    let node = graph.node_mut(id);
    node.assigns = assigns;
    node.reset = reset;
    outcome?;
    if node.width_inferred {
        if let Some(tree) = node.assigns.first() {
            node.width = tree.root.width;
            node.sign = tree.root.sign;
        }
    }
    Ok(())
}

fn infer_node_trees(
    graph: &Graph,
    assigns: &mut [ExpTree],
    reset: Option<&mut RegReset>,
) -> Result<(), BuildError> {
    for tree in assigns {
        infer_exp_tree(graph, tree)?;
    }
    if let Some(reset) = reset {
        infer_tree(graph, &mut reset.cond)?;
        infer_tree(graph, &mut reset.value)?;
    }
    Ok(())
}

pub fn infer_exp_tree(graph: &Graph, tree: &mut ExpTree) -> Result<(), BuildError> {
    for index in &mut tree.lhs_index {
        infer_tree(graph, index)?;
    }
    infer_tree(graph, &mut tree.root)
}

/// Types `e` bottom-up. Already-typed trees are left unchanged.
pub fn infer_tree(graph: &Graph, e: &mut ENode) -> Result<(), BuildError> {
    for child in &mut e.children {
        infer_tree(graph, child)?;
    }
    let (width, sign) = match &e.kind {
        ENodeKind::Literal(_) => return Ok(()),
        ENodeKind::Ref(id) => {
            let node = graph.node(*id);
            (node.width, node.sign)
        }
        ENodeKind::ReadMem(mem) => {
            let node = graph.node(*mem);
            (node.width, node.sign)
        }
        ENodeKind::Prim(op) => prim_type(*op, &e.children)?,
        ENodeKind::Mux => branch_type(&e.children[1..]),
        ENodeKind::When => branch_type(&e.children[1..]),
        ENodeKind::AsyncReset => (e.children[1].width, e.children[1].sign),
        ENodeKind::Empty
        | ENodeKind::Invalid
        | ENodeKind::Printf(_)
        | ENodeKind::Assert(_) => (0, false),
    };
    let collapses = width == 0 && matches!(e.kind, ENodeKind::Prim(_) | ENodeKind::Ref(_));
    if collapses {
        *e = ENode::zero(0);
        e.sign = sign;
    } else {
        e.width = width;
        e.sign = sign;
    }
    Ok(())
}

fn branch_type(branches: &[ENode]) -> (usize, bool) {
    let width = branches.iter().map(|b| b.width).max().unwrap_or(0);
    let sign = branches
        .iter()
        .find(|b| !b.is_empty())
        .map(|b| b.sign)
        .unwrap_or(false);
    (width, sign)
}

/// Result type of `op` applied to typed operands.
pub fn prim_type(op: PrimOp, args: &[ENode]) -> Result<(usize, bool), BuildError> {
    let wa = args.first().map(|a| a.width).unwrap_or(0);
    let sa = args.first().map(|a| a.sign).unwrap_or(false);
    let wb = args.get(1).map(|a| a.width).unwrap_or(0);
    let invalid = |detail: String| BuildError::InvalidParameter {
        op: op.to_string(),
        width: wa,
        detail,
    };
    let typed = match op {
        PrimOp::Add | PrimOp::Sub => (wa.max(wb) + 1, sa),
        PrimOp::Mul => (wa + wb, sa),
        PrimOp::Div => (if sa { wa + 1 } else { wa }, sa),
        PrimOp::Rem => (wa.min(wb), sa),
        PrimOp::Lt | PrimOp::Leq | PrimOp::Gt | PrimOp::Geq | PrimOp::Eq | PrimOp::Neq => {
            (1, false)
        }
        PrimOp::Dshl => {
            let grow = u32::try_from(wb)
                .ok()
                .and_then(|wb| 1usize.checked_shl(wb))
                .filter(|g| *g <= MAX_WIDTH)
                .ok_or_else(|| BuildError::WidthOverflow {
                    op: op.to_string(),
                    width: wb,
                })?;
            (wa + grow - 1, sa)
        }
        PrimOp::Dshr => (wa, sa),
        PrimOp::And | PrimOp::Or | PrimOp::Xor => (wa.max(wb), false),
        PrimOp::Cat => (wa + wb, false),
        PrimOp::AsUInt => (wa, false),
        PrimOp::AsSInt => (wa, true),
        PrimOp::AsClock | PrimOp::AsAsyncReset => (1, false),
        PrimOp::Cvt => (if sa { wa } else { wa + 1 }, true),
        PrimOp::Neg => (wa + 1, true),
        PrimOp::Not => (wa, false),
        PrimOp::Andr | PrimOp::Orr | PrimOp::Xorr => (1, false),
        PrimOp::Pad(n) => (wa.max(n), sa),
        PrimOp::Shl(n) => (wa + n, sa),
        PrimOp::Shr(n) => (wa.saturating_sub(n).max(1), sa),
        PrimOp::Head(n) => {
            if n > wa {
                return Err(invalid(format!("head {} exceeds operand", n)));
            }
            (n, false)
        }
        PrimOp::Tail(n) => {
            if n > wa {
                return Err(invalid(format!("tail {} exceeds operand", n)));
            }
            (wa - n, false)
        }
        PrimOp::Bits { hi, lo } => {
            if hi < lo || hi >= wa {
                return Err(invalid(format!("bits({}, {}) outside operand", hi, lo)));
            }
            (hi - lo + 1, false)
        }
    };
    if typed.0 > MAX_WIDTH {
        return Err(BuildError::WidthOverflow {
            op: op.to_string(),
            width: typed.0,
        });
    }
    Ok(typed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Node, NodeKind};
    use num_bigint::BigUint;
    use proptest::prelude::*;
    use test_case::test_case;

    fn operand(width: usize, sign: bool) -> ENode {
        let mut e = ENode::zero(width);
        e.sign = sign;
        e
    }

    #[test_case(PrimOp::Add, 8, 4, false => (9, false); "add")]
    #[test_case(PrimOp::Mul, 8, 4, true => (12, true); "mul")]
    #[test_case(PrimOp::Div, 8, 4, true => (9, true); "signed div")]
    #[test_case(PrimOp::Rem, 8, 4, false => (4, false); "rem")]
    #[test_case(PrimOp::Lt, 8, 4, true => (1, false); "lt")]
    #[test_case(PrimOp::Dshl, 8, 3, false => (15, false); "dshl")]
    #[test_case(PrimOp::Xor, 8, 4, true => (8, false); "xor")]
    #[test_case(PrimOp::Cat, 8, 4, false => (12, false); "cat")]
    fn binary_rules(op: PrimOp, wa: usize, wb: usize, sign: bool) -> (usize, bool) {
        prim_type(op, &[operand(wa, sign), operand(wb, sign)]).unwrap()
    }

    #[test_case(PrimOp::Cvt, false => (9, true); "cvt unsigned")]
    #[test_case(PrimOp::Neg, false => (9, true); "neg")]
    #[test_case(PrimOp::Shr(10), false => (1, false); "shr past width")]
    #[test_case(PrimOp::Pad(12), true => (12, true); "pad")]
    #[test_case(PrimOp::Bits { hi: 6, lo: 2 }, true => (5, false); "bits")]
    #[test_case(PrimOp::Head(3), false => (3, false); "head")]
    #[test_case(PrimOp::AsAsyncReset, false => (1, false); "async reset cast")]
    fn unary_rules(op: PrimOp, sign: bool) -> (usize, bool) {
        prim_type(op, &[operand(8, sign)]).unwrap()
    }

    #[test]
    fn out_of_range_bits_are_rejected() {
        let err = prim_type(PrimOp::Bits { hi: 8, lo: 0 }, &[operand(8, false)]).unwrap_err();
        assert!(matches!(err, BuildError::InvalidParameter { width: 8, .. }));
    }

    #[test]
    fn huge_dynamic_shift_overflows() {
        let err = prim_type(PrimOp::Dshl, &[operand(8, false), operand(40, false)]).unwrap_err();
        assert!(matches!(err, BuildError::WidthOverflow { .. }));
    }

    #[test]
    fn zero_width_collapses_to_literal() {
        let g = Graph::new("Top");
        let five = ENode::literal(BigUint::from(5u32), 4, false);
        let mut e = ENode::prim(PrimOp::Tail(4), vec![five]);
        infer_tree(&g, &mut e).unwrap();
        assert_eq!(e.literal_value(), Some(&BigUint::from(0u32)));
        assert_eq!(e.width, 0);
    }

    #[test]
    fn named_value_takes_expression_width() {
        let mut g = Graph::new("Top");
        let a = g.add_node(Node::new("a", NodeKind::Input, 8, true));
        let mut n = Node::new("n", NodeKind::Wire, 0, false);
        n.width_inferred = true;
        n.assigns.push(ExpTree::new(ENode::prim(
            PrimOp::Add,
            vec![ENode::reference(a), ENode::reference(a)],
        )));
        let n = g.add_node(n);
        infer_widths(&mut g).unwrap();
        assert_eq!((g.node(n).width, g.node(n).sign), (9, true));
    }

    #[test]
    fn named_value_is_typed_before_earlier_readers() {
        // `o` is created before the `node` values it reads.
        let mut g = Graph::new("Top");
        let a = g.add_node(Node::new("a", NodeKind::Input, 8, false));
        let o = g.add_node(Node::new("o", NodeKind::Output, 10, false));
        let mut m = Node::new("m", NodeKind::Wire, 0, false);
        m.width_inferred = true;
        let m = g.add_node(m);
        let mut n = Node::new("n", NodeKind::Wire, 0, false);
        n.width_inferred = true;
        n.assigns.push(ExpTree::new(ENode::prim(
            PrimOp::Add,
            vec![ENode::reference(a), ENode::uint(1)],
        )));
        let n = g.add_node(n);
        g.node_mut(m).assigns.push(ExpTree::new(ENode::prim(
            PrimOp::Add,
            vec![ENode::reference(n), ENode::uint(1)],
        )));
        g.node_mut(o).assigns.push(ExpTree::new(ENode::reference(m)));

        infer_widths(&mut g).unwrap();
        assert_eq!(g.node(n).width, 9);
        assert_eq!(g.node(m).width, 10);
        let root = &g.node(o).assigns[0].root;
        assert_eq!(root.as_bare_ref(), Some(m));
        assert_eq!(root.width, 10);
    }

    fn arb_tree() -> impl Strategy<Value = ENode> {
        let leaf = (1usize..16, any::<bool>()).prop_map(|(w, s)| operand(w, s));
        leaf.prop_recursive(4, 32, 3, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone())
                    .prop_map(|(a, b)| ENode::prim(PrimOp::Add, vec![a, b])),
                (inner.clone(), inner.clone())
                    .prop_map(|(a, b)| ENode::prim(PrimOp::Cat, vec![a, b])),
                inner.clone().prop_map(|a| ENode::prim(PrimOp::Not, vec![a])),
                inner.clone().prop_map(|a| ENode::prim(PrimOp::Shr(3), vec![a])),
                (inner.clone(), inner.clone(), inner)
                    .prop_map(|(c, a, b)| ENode::mux(c, a, b)),
            ]
        })
    }

    proptest! {
        #[test]
        fn inference_is_idempotent(tree in arb_tree()) {
            let g = Graph::new("Top");
            let mut once = tree;
            infer_tree(&g, &mut once).unwrap();
            let mut twice = once.clone();
            infer_tree(&g, &mut twice).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
